//! Persistence seam. Handlers talk to a `dyn Repository`; production uses
//! [`mongo::MongoRepository`], handler tests an in-memory store.

#[cfg(test)]
pub mod memory;
pub mod mongo;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use thiserror::Error;

use crate::models::{Comment, Task, TaskPatch, TaskStats, User};
use crate::query::{ListPlan, TaskFilter};

pub use mongo::MongoRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
    #[error("could not decode stored document: {0}")]
    Decode(#[from] mongodb::bson::de::Error),
    #[error("could not encode document: {0}")]
    Encode(#[from] mongodb::bson::ser::Error),
    #[error("duplicate value for unique field `{0}`")]
    Duplicate(&'static str),
}

pub type RepoResult<T> = Result<T, RepositoryError>;
pub type RepoFuture<'a, T> = BoxFuture<'a, RepoResult<T>>;

/// Every persisted read and write the API performs. Each call is a single
/// round trip; writes against one document are atomic and last-write-wins.
pub trait Repository: Send + Sync {
    fn ping(&self) -> RepoFuture<'_, ()>;

    fn insert_task<'a>(&'a self, task: &'a Task) -> RepoFuture<'a, ()>;
    fn find_task(&self, id: ObjectId) -> RepoFuture<'_, Option<Task>>;
    /// One page of tasks, in plan order.
    fn find_tasks<'a>(&'a self, plan: &'a ListPlan) -> RepoFuture<'a, Vec<Task>>;
    fn count_tasks<'a>(&'a self, filter: &'a TaskFilter) -> RepoFuture<'a, u64>;
    /// Sets only the fields carried by `patch` and returns the document as
    /// stored afterwards; `None` when it no longer exists.
    fn update_task<'a>(&'a self, id: ObjectId, patch: &'a TaskPatch) -> RepoFuture<'a, Option<Task>>;
    /// Writes only `status`, `completedAt` and `updatedAt` from `task`.
    fn update_task_status<'a>(&'a self, task: &'a Task) -> RepoFuture<'a, bool>;
    fn push_task_comment<'a>(
        &'a self,
        task_id: ObjectId,
        comment: &'a Comment,
        updated_at: BsonDateTime,
    ) -> RepoFuture<'a, bool>;
    fn delete_task(&self, id: ObjectId) -> RepoFuture<'_, bool>;
    fn task_stats<'a>(&'a self, filter: &'a TaskFilter, now: DateTime<Utc>) -> RepoFuture<'a, TaskStats>;

    fn insert_user<'a>(&'a self, user: &'a User) -> RepoFuture<'a, ()>;
    fn find_user(&self, id: ObjectId) -> RepoFuture<'_, Option<User>>;
    fn find_user_by_email<'a>(&'a self, email: &'a str) -> RepoFuture<'a, Option<User>>;
    fn find_users<'a>(&'a self, ids: &'a [ObjectId]) -> RepoFuture<'a, Vec<User>>;
    /// All accounts, newest first.
    fn list_users(&self) -> RepoFuture<'_, Vec<User>>;
    fn replace_user<'a>(&'a self, user: &'a User) -> RepoFuture<'a, bool>;
    /// Stamps `lastLogin` and `updatedAt` without touching anything else.
    fn record_login(&self, id: ObjectId, at: BsonDateTime) -> RepoFuture<'_, bool>;
    fn delete_user(&self, id: ObjectId) -> RepoFuture<'_, bool>;

    /// Remembers a logged-out token id until the token would have expired anyway.
    fn revoke_token<'a>(&'a self, jti: &'a str, expires_at: BsonDateTime) -> RepoFuture<'a, ()>;
    fn is_token_revoked<'a>(&'a self, jti: &'a str) -> RepoFuture<'a, bool>;
}
