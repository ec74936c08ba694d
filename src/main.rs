// src/main.rs

use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{
    http::{self, StatusCode},
    middleware::{ErrorHandlers, Logger},
    web, App, HttpServer,
};
use env_logger::Env;
use log::info;

use taskify::app_state::AppState;
use taskify::auth::Authentication;
use taskify::config::Config;
use taskify::error::{expose_error_detail, route_not_found};
use taskify::repository::MongoRepository;
use taskify::routes;

fn cors(config: &Config) -> Cors {
    let cors = if config.allows_any_origin() {
        Cors::default().allow_any_origin()
    } else {
        config
            .cors_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };
    cors.allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            http::header::CONTENT_TYPE,
            http::header::ACCEPT,
            http::header::AUTHORIZATION,
        ])
        .expose_headers(vec![taskify::task::TOTAL_COUNT_HEADER])
        .supports_credentials()
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let repo = MongoRepository::init(&config.mongo_uri, &config.database_name)
        .await
        .map_err(io::Error::other)?;
    let state = AppState::new(Arc::new(repo), config.clone());

    let address = (config.host.clone(), config.port);
    info!("Server running at http://{}:{}/api", address.0, address.1);
    info!("Allowed CORS origins: {}", config.cors_origins.join(", "));

    HttpServer::new(move || {
        App::new()
            .wrap(Authentication::new(config.jwt_secret.clone()))
            .wrap(ErrorHandlers::new().handler(StatusCode::INTERNAL_SERVER_ERROR, expose_error_detail))
            .wrap(cors(&config))
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
            .default_service(web::to(route_not_found))
    })
    .bind(address)?
    .run()
    .await
}
