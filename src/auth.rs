// src/auth.rs

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http, web, Error, FromRequest, HttpMessage, HttpRequest, HttpResponse, ResponseError,
};
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use futures::future::{ok, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{info, warn};
use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{ApiError, Envelope};
use crate::models::user::{normalize_email, validate_name, validate_password};
use crate::models::{ProfileUpdate, Role, User, UserProfile};
use crate::policy::Actor;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    /// Token id, remembered on logout so the token stops working.
    pub jti: String,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

// JWT Creation
pub fn create_jwt(user_id: &ObjectId, secret: &str, expires_hours: i64) -> Result<(String, Claims), TokenError> {
    let expiration = Utc::now() + Duration::hours(expires_hours);
    let claims = Claims {
        sub: user_id.to_hex(),
        exp: expiration.timestamp() as usize,
        jti: Uuid::new_v4().to_string(),
    };
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))?;
    Ok((token, claims))
}

// JWT Validation
pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, TokenError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/* -------------------------------------------------------------------------- */
/* Middleware                                                                 */
/* -------------------------------------------------------------------------- */

/// Verifies `Authorization: Bearer <token>` when present and stores the
/// [`Claims`] in the request extensions. Requests without the header pass
/// through; handlers that need an identity reject them via [`Authenticated`].
#[derive(Debug, Clone)]
pub struct Authentication {
    secret: Rc<String>,
}

impl Authentication {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Rc::new(secret.into()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            secret: Rc::clone(&self.secret),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: Rc<String>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let bearer = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string());

        if let Some(token) = bearer {
            match validate_jwt(&token, &self.secret) {
                Ok(claims) => {
                    req.extensions_mut().insert(claims);
                }
                Err(e) => {
                    warn!("Rejected bearer token: {}", e);
                    let (req_parts, _payload) = req.into_parts();
                    let resp = ApiError::Authentication("Not authorized, token failed".into())
                        .error_response()
                        .map_into_boxed_body();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

/* -------------------------------------------------------------------------- */
/* Extractor                                                                  */
/* -------------------------------------------------------------------------- */

/// The caller of a protected endpoint: the verified token plus the current
/// user record it names.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user: User,
    pub claims: Claims,
}

impl Authenticated {
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.user.id,
            role: self.user.role,
        }
    }
}

impl FromRequest for Authenticated {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let claims = req.extensions().get::<Claims>().cloned();
        let state = req.app_data::<web::Data<AppState>>().cloned();

        Box::pin(async move {
            let claims =
                claims.ok_or_else(|| ApiError::Authentication("Not authorized, no token".into()))?;
            let state = state
                .ok_or_else(|| ApiError::internal("Authentication failed", "application state missing"))?;

            let revoked = state
                .repo
                .is_token_revoked(&claims.jti)
                .await
                .map_err(|e| ApiError::internal("Error checking token", e))?;
            if revoked {
                return Err(ApiError::Authentication("Token has been revoked".into()));
            }

            let user_id = ObjectId::parse_str(&claims.sub)
                .map_err(|_| ApiError::Authentication("Not authorized, token failed".into()))?;
            let user = state
                .repo
                .find_user(user_id)
                .await
                .map_err(|e| ApiError::internal("Error loading user", e))?
                .ok_or_else(|| ApiError::Authentication("User no longer exists".into()))?;

            Ok(Authenticated { user, claims })
        })
    }
}

/* -------------------------------------------------------------------------- */
/* Handlers                                                                   */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginInfo {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

/// Body returned by register and login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    pub token: String,
    pub user: UserProfile,
}

async fn hash_password(password: String, cost: u32) -> Result<String, ApiError> {
    web::block(move || hash(password, cost))
        .await
        .map_err(|e| ApiError::internal("Error hashing password", e))?
        .map_err(|e| ApiError::internal("Error hashing password", e))
}

async fn password_matches(password: String, hashed: String) -> Result<bool, ApiError> {
    web::block(move || verify(password, &hashed))
        .await
        .map_err(|e| ApiError::internal("Error verifying password", e))?
        .map_err(|e| ApiError::internal("Error verifying password", e))
}

fn issue_token(data: &AppState, user: &User) -> Result<String, ApiError> {
    create_jwt(&user.id, &data.config.jwt_secret, data.config.jwt_expires_hours)
        .map(|(token, _)| token)
        .map_err(|e| ApiError::internal("Error issuing token", e))
}

/// POST /api/auth/register
/// Creates an account and signs it in.
pub async fn register(
    data: web::Data<AppState>,
    info: web::Json<RegisterInfo>,
) -> Result<HttpResponse, ApiError> {
    let info = info.into_inner();
    let name = validate_name(&info.name)?;
    let email = normalize_email(&info.email)?;
    validate_password(&info.password)?;

    let existing = data
        .repo
        .find_user_by_email(&email)
        .await
        .map_err(|e| ApiError::internal("Error registering user", e))?;
    if existing.is_some() {
        return Err(ApiError::Validation("User already exists with this email".into()));
    }

    let now = BsonDateTime::now();
    let user = User {
        id: ObjectId::new(),
        name,
        email,
        password: hash_password(info.password, data.config.bcrypt_cost).await?,
        avatar: None,
        role: Role::User,
        last_login: Some(now),
        created_at: now,
        updated_at: now,
    };
    data.repo
        .insert_user(&user)
        .await
        .map_err(|e| ApiError::storage("Error registering user", e))?;
    info!("User registered: {}", user.id);

    let token = issue_token(&data, &user)?;
    Ok(HttpResponse::Created().json(AuthResponse {
        success: true,
        message: "User registered successfully".into(),
        token,
        user: user.profile(),
    }))
}

/// POST /api/auth/login
pub async fn login(
    data: web::Data<AppState>,
    info: web::Json<LoginInfo>,
) -> Result<HttpResponse, ApiError> {
    let info = info.into_inner();
    if info.email.trim().is_empty() || info.password.is_empty() {
        return Err(ApiError::Validation("Please provide email and password".into()));
    }
    let invalid = || ApiError::Authentication("Invalid credentials".into());

    let email = normalize_email(&info.email).map_err(|_| invalid())?;
    let mut user = data
        .repo
        .find_user_by_email(&email)
        .await
        .map_err(|e| ApiError::internal("Error logging in", e))?
        .ok_or_else(invalid)?;
    if !password_matches(info.password, user.password.clone()).await? {
        return Err(invalid());
    }

    let now = BsonDateTime::now();
    data.repo
        .record_login(user.id, now)
        .await
        .map_err(|e| ApiError::internal("Error logging in", e))?;
    user.last_login = Some(now);
    user.updated_at = now;

    let token = issue_token(&data, &user)?;
    Ok(HttpResponse::Ok().json(AuthResponse {
        success: true,
        message: "Login successful".into(),
        token,
        user: user.profile(),
    }))
}

/// GET /api/auth/me
pub async fn me(auth: Authenticated) -> HttpResponse {
    HttpResponse::Ok().json(Envelope::data(auth.user.profile()))
}

/// POST /api/auth/logout
/// Revokes the presented token until it would have expired.
pub async fn logout(
    auth: Authenticated,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let expires_at = BsonDateTime::from_millis((auth.claims.exp as i64).saturating_mul(1000));
    data.repo
        .revoke_token(&auth.claims.jti, expires_at)
        .await
        .map_err(|e| ApiError::internal("Error logging out", e))?;
    Ok(HttpResponse::Ok().json(Envelope::message("Logged out successfully")))
}

/// PUT /api/auth/profile
pub async fn update_profile(
    auth: Authenticated,
    data: web::Data<AppState>,
    payload: web::Json<ProfileUpdate>,
) -> Result<HttpResponse, ApiError> {
    let mut user = auth.user;
    user.apply_profile(&payload, BsonDateTime::now())?;
    data.repo
        .replace_user(&user)
        .await
        .map_err(|e| ApiError::storage("Error updating profile", e))?;
    Ok(HttpResponse::Ok().json(Envelope::with_message("Profile updated successfully", user.profile())))
}

/// PUT /api/auth/password
pub async fn change_password(
    auth: Authenticated,
    data: web::Data<AppState>,
    payload: web::Json<ChangePasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();
    validate_password(&payload.new_password)?;

    let mut user = auth.user;
    if !password_matches(payload.current_password, user.password.clone()).await? {
        return Err(ApiError::Validation("Current password is incorrect".into()));
    }
    user.password = hash_password(payload.new_password, data.config.bcrypt_cost).await?;
    user.updated_at = BsonDateTime::now();
    data.repo
        .replace_user(&user)
        .await
        .map_err(|e| ApiError::internal("Error changing password", e))?;
    Ok(HttpResponse::Ok().json(Envelope::message("Password updated successfully")))
}
