// src/user_management.rs

use actix_web::{web, HttpResponse};
use log::info;
use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::Authenticated;
use crate::error::{ApiError, Envelope};
use crate::models::{ProfileUpdate, Role, User, UserProfile};
use crate::policy::{authorize_role_change, authorize_user, authorize_user_admin, authorize_user_delete};

/// Body of `PUT /api/users/{id}`: the profile fields plus, for admins, `role`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(flatten)]
    pub profile: ProfileUpdate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

fn user_not_found() -> ApiError {
    ApiError::NotFound("User not found".into())
}

fn parse_user_id(raw: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw).map_err(|_| user_not_found())
}

async fn load_user(data: &AppState, id: ObjectId, context: &str) -> Result<User, ApiError> {
    data.repo
        .find_user(id)
        .await
        .map_err(|e| ApiError::internal(context, e))?
        .ok_or_else(user_not_found)
}

/// GET /api/users
/// Admin only. Returns every account as a bare array, newest first.
pub async fn list_users(auth: Authenticated, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    authorize_user_admin(&auth.actor())?;
    let users = data
        .repo
        .list_users()
        .await
        .map_err(|e| ApiError::internal("Error fetching users", e))?;
    let profiles: Vec<UserProfile> = users.iter().map(User::profile).collect();
    Ok(HttpResponse::Ok().json(profiles))
}

/// GET /api/users/{id}
pub async fn get_user(
    auth: Authenticated,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_user_id(&path)?;
    authorize_user(&auth.actor(), id)?;
    let user = load_user(&data, id, "Error fetching user").await?;
    Ok(HttpResponse::Ok().json(Envelope::data(user.profile())))
}

/// PUT /api/users/{id}
pub async fn update_user(
    auth: Authenticated,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateUserRequest>,
) -> Result<HttpResponse, ApiError> {
    const CONTEXT: &str = "Error updating user";
    let actor = auth.actor();
    let id = parse_user_id(&path)?;
    authorize_user(&actor, id)?;
    if payload.role.is_some() {
        authorize_role_change(&actor)?;
    }

    let mut user = load_user(&data, id, CONTEXT).await?;
    user.apply_profile(&payload.profile, BsonDateTime::now())?;
    if let Some(role) = payload.role {
        user.role = role;
    }
    let replaced = data
        .repo
        .replace_user(&user)
        .await
        .map_err(|e| ApiError::storage(CONTEXT, e))?;
    if !replaced {
        return Err(user_not_found());
    }
    info!("User updated: {} by {}", user.id, actor.id);
    Ok(HttpResponse::Ok().json(Envelope::with_message("User updated successfully", user.profile())))
}

/// DELETE /api/users/{id}
/// Tasks referencing the account are left alone; their views show the
/// reference as null from then on.
pub async fn delete_user(
    auth: Authenticated,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor();
    let id = parse_user_id(&path)?;
    authorize_user_delete(&actor, id)?;

    let deleted = data
        .repo
        .delete_user(id)
        .await
        .map_err(|e| ApiError::internal("Error deleting user", e))?;
    if !deleted {
        return Err(user_not_found());
    }
    info!("User deleted: {} by {}", id, actor.id);
    Ok(HttpResponse::Ok().json(Envelope::message("User deleted successfully")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{http::StatusCode, test};
    use serde_json::{json, Value};

    use super::*;
    use crate::repository::memory::MemoryRepository;
    use crate::repository::Repository;
    use crate::test_support::{bearer, seed_user, state, test_app};

    #[actix_web::test]
    async fn only_admins_list_users() {
        let repo = Arc::new(MemoryRepository::new());
        let (_, admin_token) = seed_user(&repo, "Root", Role::Admin).await;
        let (_, token) = seed_user(&repo, "Ada", Role::User).await;
        let app = test_app!(state(repo.clone()));

        let req = test::TestRequest::get().uri("/api/users").insert_header(bearer(&token)).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::get().uri("/api/users").insert_header(bearer(&admin_token)).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let users = body.as_array().unwrap();
        assert_eq!(users.len(), 2);
        assert!(users.iter().all(|u| u.get("password").is_none()));
    }

    #[actix_web::test]
    async fn users_edit_themselves_but_not_their_role() {
        let repo = Arc::new(MemoryRepository::new());
        let (ada, token) = seed_user(&repo, "Ada", Role::User).await;
        let (bob, _) = seed_user(&repo, "Bob", Role::User).await;
        let app = test_app!(state(repo.clone()));

        let req = test::TestRequest::put()
            .uri(&format!("/api/users/{}", ada.id.to_hex()))
            .insert_header(bearer(&token))
            .set_json(json!({ "name": "Ada L." }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["name"], "Ada L.");

        let req = test::TestRequest::put()
            .uri(&format!("/api/users/{}", ada.id.to_hex()))
            .insert_header(bearer(&token))
            .set_json(json!({ "role": "admin" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::get()
            .uri(&format!("/api/users/{}", bob.id.to_hex()))
            .insert_header(bearer(&token))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::put()
            .uri(&format!("/api/users/{}", ada.id.to_hex()))
            .insert_header(bearer(&token))
            .set_json(json!({ "email": "bob@example.com" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "User already exists with this email");
    }

    #[actix_web::test]
    async fn admins_promote_and_delete_others_but_not_themselves() {
        let repo = Arc::new(MemoryRepository::new());
        let (root, admin_token) = seed_user(&repo, "Root", Role::Admin).await;
        let (ada, _) = seed_user(&repo, "Ada", Role::User).await;
        let app = test_app!(state(repo.clone()));

        let req = test::TestRequest::put()
            .uri(&format!("/api/users/{}", ada.id.to_hex()))
            .insert_header(bearer(&admin_token))
            .set_json(json!({ "role": "admin" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["role"], "admin");

        let req = test::TestRequest::delete()
            .uri(&format!("/api/users/{}", root.id.to_hex()))
            .insert_header(bearer(&admin_token))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/users/{}", ada.id.to_hex()))
            .insert_header(bearer(&admin_token))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert!(repo.find_user(ada.id).await.unwrap().is_none());

        let req = test::TestRequest::delete()
            .uri(&format!("/api/users/{}", ada.id.to_hex()))
            .insert_header(bearer(&admin_token))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
