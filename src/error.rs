//! The response envelope and the error taxonomy handlers translate into it.

use std::fmt::Display;

use actix_web::{
    body::EitherBody,
    dev::ServiceResponse,
    error::ResponseError,
    http::StatusCode,
    middleware::ErrorHandlerResponse,
    web, HttpRequest, HttpResponse,
};
use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app_state::AppState;
use crate::models::ValidationError;
use crate::policy::Denied;
use crate::repository::RepositoryError;

/// `{success, message?, data?, error?}`, shared by most endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn data(data: T) -> Self {
        Envelope {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Envelope {
            success: true,
            message: Some(message.into()),
            data: Some(data),
            error: None,
        }
    }
}

impl Envelope<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Envelope {
            success: true,
            message: Some(message.into()),
            data: None,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>, error: Option<String>) -> Self {
        Envelope {
            success: false,
            message: Some(message.into()),
            data: None,
            error,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Authentication(String),
    #[error("{message}")]
    Internal { message: String, detail: String },
}

impl ApiError {
    /// Logs `err` under `message` and hides it from production responses.
    pub fn internal(message: impl Into<String>, err: impl Display) -> Self {
        let message = message.into();
        error!("{}: {}", message, err);
        ApiError::Internal {
            message,
            detail: err.to_string(),
        }
    }

    /// Like [`ApiError::internal`], but unique-key clashes are the caller's fault.
    pub fn storage(message: impl Into<String>, err: RepositoryError) -> Self {
        match err {
            RepositoryError::Duplicate(field) => {
                ApiError::Validation(format!("User already exists with this {field}"))
            }
            other => ApiError::internal(message, other),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err.message)
    }
}

impl From<Denied> for ApiError {
    fn from(err: Denied) -> Self {
        ApiError::Forbidden(err.0)
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        ApiError::storage("Database error", err)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ApiError::Internal { message, .. } => {
                Envelope::failure(message.as_str(), Some("Internal server error".to_string()))
            }
            other => Envelope::failure(other.to_string(), None),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

/// `ErrorHandlers` hook for 500s: in development, swap the generic error text
/// for the underlying failure.
pub fn expose_error_detail<B>(res: ServiceResponse<B>) -> actix_web::Result<ErrorHandlerResponse<B>> {
    let development = res
        .request()
        .app_data::<web::Data<AppState>>()
        .is_some_and(|state| state.config.is_development());

    let replacement = match res.response().error().and_then(|e| e.as_error::<ApiError>()) {
        Some(ApiError::Internal { message, detail }) if development => {
            Some(Envelope::failure(message.as_str(), Some(detail.clone())))
        }
        _ => None,
    };

    let response: ServiceResponse<EitherBody<B>> = match replacement {
        Some(body) => {
            let (req, _) = res.into_parts();
            ServiceResponse::new(req, HttpResponse::InternalServerError().json(body)).map_into_right_body()
        }
        None => res.map_into_left_body(),
    };
    Ok(ErrorHandlerResponse::Response(response))
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| ApiError::Validation(format!("Invalid request body: {err}")).into())
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| ApiError::Validation(format!("Invalid query: {err}")).into())
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|err, _req| ApiError::Validation(format!("Invalid path: {err}")).into())
}

pub async fn route_not_found(_req: HttpRequest) -> HttpResponse {
    HttpResponse::NotFound().json(Envelope::failure("Route not found", None))
}
