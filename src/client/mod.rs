//! Client core for Taskify frontends: a typed HTTP client, the auth session
//! and the in-memory task board.
//!
//! Every remote failure is returned to the caller unchanged. Nothing here
//! retries.

pub mod api;
pub mod board;
pub mod session;

use thiserror::Error;

pub use api::{ApiClient, AuthApi, TaskApi, TaskPage};
pub use board::{BoardFilter, Notice, TaskBoard, MAX_NOTICES};
pub use session::{sign_out_on_rejection, FileTokenStorage, MemoryTokenStorage, Session, TokenStorage};

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server rejected the credentials or token (HTTP 401).
    #[error("{0}")]
    Authentication(String),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token storage failed: {0}")]
    Storage(#[from] std::io::Error),
}

impl ClientError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, ClientError::Authentication(_))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
