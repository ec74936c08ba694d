pub mod task;
pub mod user;

use chrono::{DateTime, Utc};
use mongodb::bson::DateTime as BsonDateTime;
use thiserror::Error;

pub use task::{
    is_overdue, Attachment, Comment, CommentAuthor, CreateTaskRequest, Task, TaskPriority,
    TaskPatch, TaskStats, TaskStatus, TaskView, UpdateTaskRequest,
};
pub use user::{ProfileUpdate, Role, User, UserProfile, UserSummary};

/// A schema constraint violated by a task or user document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Trims a required string field and rejects it when blank or too long.
pub(crate) fn required_text(
    field: &'static str,
    value: &str,
    max: usize,
    missing: &str,
    too_long: &str,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(field, missing));
    }
    if trimmed.chars().count() > max {
        return Err(ValidationError::new(field, too_long));
    }
    Ok(trimmed.to_string())
}

/// A stored millisecond timestamp as a chrono UTC instant.
pub fn to_utc(dt: BsonDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or_default()
}
