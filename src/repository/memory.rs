//! In-memory repository for handler tests. Mirrors the document store's
//! filtering, ordering and uniqueness rules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::future;
use mongodb::bson::{from_document, oid::ObjectId, DateTime as BsonDateTime, Document};

use super::{RepoFuture, RepoResult, Repository, RepositoryError};
use crate::models::{Comment, Task, TaskPatch, TaskStats, User};
use crate::query::{ListPlan, TaskFilter};

#[derive(Default)]
struct State {
    tasks: Vec<Task>,
    users: Vec<User>,
    revoked: HashMap<String, BsonDateTime>,
}

#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
    corrupt: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later task listing fail as if a stored document could not
    /// be decoded.
    pub fn corrupt_tasks(&self) {
        self.corrupt.store(true, Ordering::SeqCst);
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ready<'a, T: Send + 'a>(result: RepoResult<T>) -> RepoFuture<'a, T> {
        Box::pin(future::ready(result))
    }
}

impl Repository for MemoryRepository {
    fn ping(&self) -> RepoFuture<'_, ()> {
        Self::ready(Ok(()))
    }

    fn insert_task<'a>(&'a self, task: &'a Task) -> RepoFuture<'a, ()> {
        self.state().tasks.push(task.clone());
        Self::ready(Ok(()))
    }

    fn find_task(&self, id: ObjectId) -> RepoFuture<'_, Option<Task>> {
        let found = self.state().tasks.iter().find(|t| t.id == id).cloned();
        Self::ready(Ok(found))
    }

    fn find_tasks<'a>(&'a self, plan: &'a ListPlan) -> RepoFuture<'a, Vec<Task>> {
        if self.corrupt.load(Ordering::SeqCst) {
            let err = from_document::<Task>(Document::new()).unwrap_err();
            return Self::ready(Err(RepositoryError::Decode(err)));
        }
        let mut matched: Vec<Task> = self
            .state()
            .tasks
            .iter()
            .filter(|t| plan.filter.matches(t))
            .cloned()
            .collect();
        matched.sort_by(|a, b| plan.sort.compare(a, b));
        let page = matched
            .into_iter()
            .skip(usize::try_from(plan.skip).unwrap_or(usize::MAX))
            .take(plan.limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX)))
            .collect();
        Self::ready(Ok(page))
    }

    fn count_tasks<'a>(&'a self, filter: &'a TaskFilter) -> RepoFuture<'a, u64> {
        let count = self.state().tasks.iter().filter(|t| filter.matches(t)).count();
        Self::ready(Ok(count as u64))
    }

    fn update_task<'a>(&'a self, id: ObjectId, patch: &'a TaskPatch) -> RepoFuture<'a, Option<Task>> {
        let mut state = self.state();
        let updated = state.tasks.iter_mut().find(|t| t.id == id).map(|stored| {
            patch.apply_to(stored);
            stored.clone()
        });
        Self::ready(Ok(updated))
    }

    fn update_task_status<'a>(&'a self, task: &'a Task) -> RepoFuture<'a, bool> {
        let mut state = self.state();
        let updated = match state.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(stored) => {
                stored.status = task.status;
                stored.completed_at = task.completed_at;
                stored.updated_at = task.updated_at;
                true
            }
            None => false,
        };
        Self::ready(Ok(updated))
    }

    fn push_task_comment<'a>(
        &'a self,
        task_id: ObjectId,
        comment: &'a Comment,
        updated_at: BsonDateTime,
    ) -> RepoFuture<'a, bool> {
        let mut state = self.state();
        let pushed = match state.tasks.iter_mut().find(|t| t.id == task_id) {
            Some(stored) => {
                stored.comments.push(comment.clone());
                stored.updated_at = updated_at;
                true
            }
            None => false,
        };
        Self::ready(Ok(pushed))
    }

    fn delete_task(&self, id: ObjectId) -> RepoFuture<'_, bool> {
        let mut state = self.state();
        let before = state.tasks.len();
        state.tasks.retain(|t| t.id != id);
        let deleted = state.tasks.len() < before;
        Self::ready(Ok(deleted))
    }

    fn task_stats<'a>(&'a self, filter: &'a TaskFilter, now: DateTime<Utc>) -> RepoFuture<'a, TaskStats> {
        let state = self.state();
        let stats = TaskStats::from_tasks(state.tasks.iter().filter(|t| filter.matches(t)), now);
        Self::ready(Ok(stats))
    }

    fn insert_user<'a>(&'a self, user: &'a User) -> RepoFuture<'a, ()> {
        let mut state = self.state();
        if state.users.iter().any(|u| u.email == user.email) {
            return Self::ready(Err(RepositoryError::Duplicate("email")));
        }
        state.users.push(user.clone());
        Self::ready(Ok(()))
    }

    fn find_user(&self, id: ObjectId) -> RepoFuture<'_, Option<User>> {
        let found = self.state().users.iter().find(|u| u.id == id).cloned();
        Self::ready(Ok(found))
    }

    fn find_user_by_email<'a>(&'a self, email: &'a str) -> RepoFuture<'a, Option<User>> {
        let found = self.state().users.iter().find(|u| u.email == email).cloned();
        Self::ready(Ok(found))
    }

    fn find_users<'a>(&'a self, ids: &'a [ObjectId]) -> RepoFuture<'a, Vec<User>> {
        let found = self
            .state()
            .users
            .iter()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect();
        Self::ready(Ok(found))
    }

    fn list_users(&self) -> RepoFuture<'_, Vec<User>> {
        let mut users = self.state().users.clone();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self::ready(Ok(users))
    }

    fn replace_user<'a>(&'a self, user: &'a User) -> RepoFuture<'a, bool> {
        let mut state = self.state();
        if state.users.iter().any(|u| u.id != user.id && u.email == user.email) {
            return Self::ready(Err(RepositoryError::Duplicate("email")));
        }
        let replaced = match state.users.iter_mut().find(|u| u.id == user.id) {
            Some(stored) => {
                *stored = user.clone();
                true
            }
            None => false,
        };
        Self::ready(Ok(replaced))
    }

    fn record_login(&self, id: ObjectId, at: BsonDateTime) -> RepoFuture<'_, bool> {
        let mut state = self.state();
        let found = match state.users.iter_mut().find(|u| u.id == id) {
            Some(stored) => {
                stored.last_login = Some(at);
                stored.updated_at = at;
                true
            }
            None => false,
        };
        Self::ready(Ok(found))
    }

    fn delete_user(&self, id: ObjectId) -> RepoFuture<'_, bool> {
        let mut state = self.state();
        let before = state.users.len();
        state.users.retain(|u| u.id != id);
        let deleted = state.users.len() < before;
        Self::ready(Ok(deleted))
    }

    fn revoke_token<'a>(&'a self, jti: &'a str, expires_at: BsonDateTime) -> RepoFuture<'a, ()> {
        self.state().revoked.insert(jti.to_string(), expires_at);
        Self::ready(Ok(()))
    }

    fn is_token_revoked<'a>(&'a self, jti: &'a str) -> RepoFuture<'a, bool> {
        let revoked = self.state().revoked.contains_key(jti);
        Self::ready(Ok(revoked))
    }
}
