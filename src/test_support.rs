//! Fixtures shared by the handler tests.

use std::sync::Arc;

use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};

use crate::app_state::AppState;
use crate::auth::create_jwt;
use crate::config::{Config, Environment};
use crate::models::{Role, User};
use crate::repository::memory::MemoryRepository;

pub const SECRET: &str = "test-secret";
pub const PASSWORD: &str = "password123";

pub fn config() -> Config {
    Config {
        mongo_uri: "mongodb://unused".into(),
        database_name: "taskify-test".into(),
        jwt_secret: SECRET.into(),
        jwt_expires_hours: 1,
        bcrypt_cost: 4,
        host: "127.0.0.1".into(),
        port: 0,
        cors_origins: vec!["*".into()],
        environment: Environment::Development,
    }
}

pub fn state(repo: Arc<MemoryRepository>) -> AppState {
    AppState::new(repo, config())
}

/// Stores a user whose password is [`PASSWORD`] and returns it with a valid token.
pub async fn seed_user(repo: &MemoryRepository, name: &str, role: Role) -> (User, String) {
    use crate::repository::Repository;

    let now = BsonDateTime::now();
    let user = User {
        id: ObjectId::new(),
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        password: bcrypt::hash(PASSWORD, 4).unwrap(),
        avatar: None,
        role,
        last_login: None,
        created_at: now,
        updated_at: now,
    };
    repo.insert_user(&user).await.unwrap();
    let (token, _) = create_jwt(&user.id, SECRET, 1).unwrap();
    (user, token)
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

/// Initialises the full application around `$state`, with the middleware
/// stacked in the same order as `main` (CORS and logging aside).
macro_rules! test_app {
    ($state:expr) => {{
        let state: $crate::app_state::AppState = $state;
        actix_web::test::init_service(
            actix_web::App::new()
                .wrap($crate::auth::Authentication::new(state.config.jwt_secret.clone()))
                .wrap(
                    actix_web::middleware::ErrorHandlers::new().handler(
                        actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                        $crate::error::expose_error_detail,
                    ),
                )
                .app_data(actix_web::web::Data::new(state))
                .configure($crate::routes::configure)
                .default_service(actix_web::web::to($crate::error::route_not_found)),
        )
        .await
    }};
}

pub(crate) use test_app;
