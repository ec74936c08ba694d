use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use log::{debug, info};
use mongodb::{
    bson::{doc, from_document, oid::ObjectId, to_bson, DateTime as BsonDateTime, Document},
    error::{ErrorKind, WriteFailure},
    options::{ClientOptions, IndexOptions, ReturnDocument},
    Client, Collection, Database, IndexModel,
};

use super::{RepoFuture, RepoResult, Repository, RepositoryError};
use crate::models::{Comment, Task, TaskPatch, TaskStats, User};
use crate::query::{ListPlan, TaskFilter};

const DUPLICATE_KEY: i32 = 11000;

pub struct MongoRepository {
    pub client: Client,
    pub db: Database,
}

impl MongoRepository {
    pub async fn init(uri: &str, db_name: &str) -> RepoResult<Self> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        let repo = MongoRepository { client, db };
        repo.ensure_indexes().await?;
        info!("Connected to MongoDB database `{}`", db_name);
        Ok(repo)
    }

    async fn ensure_indexes(&self) -> RepoResult<()> {
        self.tasks()
            .create_indexes(vec![
                IndexModel::builder().keys(doc! { "assignedTo": 1, "status": 1 }).build(),
                IndexModel::builder().keys(doc! { "dueDate": 1 }).build(),
                IndexModel::builder().keys(doc! { "createdBy": 1 }).build(),
            ])
            .await?;
        self.users()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;
        self.revoked_tokens()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "expiresAt": 1 })
                    .options(IndexOptions::builder().expire_after(Duration::from_secs(0)).build())
                    .build(),
            )
            .await?;
        debug!("MongoDB indexes ensured");
        Ok(())
    }

    fn tasks(&self) -> Collection<Task> {
        self.db.collection("tasks")
    }

    fn users(&self) -> Collection<User> {
        self.db.collection("users")
    }

    fn revoked_tokens(&self) -> Collection<Document> {
        self.db.collection("revoked_tokens")
    }
}

/// Maps a unique index violation on `field` to [`RepositoryError::Duplicate`].
fn unique_violation(err: mongodb::error::Error, field: &'static str) -> RepositoryError {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY => {
            RepositoryError::Duplicate(field)
        }
        _ => RepositoryError::Database(err),
    }
}

/// `$set` body for a full task update: only the supplied fields plus `updatedAt`.
fn patch_document(patch: &TaskPatch) -> Document {
    let mut set = doc! { "updatedAt": patch.updated_at };
    if let Some(title) = &patch.title {
        set.insert("title", title.as_str());
    }
    if let Some(description) = &patch.description {
        set.insert("description", description.as_str());
    }
    if let Some(status) = patch.status {
        set.insert("status", status.as_str());
    }
    if let Some(priority) = patch.priority {
        set.insert("priority", priority.as_str());
    }
    if let Some(category) = &patch.category {
        set.insert("category", category.as_str());
    }
    if let Some(due_date) = patch.due_date {
        set.insert("dueDate", due_date);
    }
    if let Some(assigned_to) = patch.assigned_to {
        set.insert("assignedTo", assigned_to);
    }
    if let Some(tags) = &patch.tags {
        set.insert("tags", tags.clone());
    }
    if let Some(hours) = patch.estimated_hours {
        set.insert("estimatedHours", hours);
    }
    if let Some(hours) = patch.actual_hours {
        set.insert("actualHours", hours);
    }
    set
}

impl Repository for MongoRepository {
    fn ping(&self) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            self.db.run_command(doc! { "ping": 1 }).await?;
            Ok(())
        })
    }

    fn insert_task<'a>(&'a self, task: &'a Task) -> RepoFuture<'a, ()> {
        Box::pin(async move {
            self.tasks().insert_one(task).await?;
            Ok(())
        })
    }

    fn find_task(&self, id: ObjectId) -> RepoFuture<'_, Option<Task>> {
        Box::pin(async move { Ok(self.tasks().find_one(doc! { "_id": id }).await?) })
    }

    fn find_tasks<'a>(&'a self, plan: &'a ListPlan) -> RepoFuture<'a, Vec<Task>> {
        Box::pin(async move {
            let collection = self.tasks();
            let mut find = collection
                .find(plan.filter.to_document())
                .sort(plan.sort.to_document())
                .skip(plan.skip);
            if let Some(limit) = plan.limit {
                find = find.limit(i64::try_from(limit).unwrap_or(i64::MAX));
            }
            let tasks: Vec<Task> = find.await?.try_collect().await?;
            Ok(tasks)
        })
    }

    fn count_tasks<'a>(&'a self, filter: &'a TaskFilter) -> RepoFuture<'a, u64> {
        Box::pin(async move { Ok(self.tasks().count_documents(filter.to_document()).await?) })
    }

    fn update_task<'a>(&'a self, id: ObjectId, patch: &'a TaskPatch) -> RepoFuture<'a, Option<Task>> {
        Box::pin(async move {
            let updated = self
                .tasks()
                .find_one_and_update(doc! { "_id": id }, doc! { "$set": patch_document(patch) })
                .return_document(ReturnDocument::After)
                .await?;
            Ok(updated)
        })
    }

    fn update_task_status<'a>(&'a self, task: &'a Task) -> RepoFuture<'a, bool> {
        Box::pin(async move {
            let update = match task.completed_at {
                Some(completed_at) => doc! {
                    "$set": {
                        "status": task.status.as_str(),
                        "completedAt": completed_at,
                        "updatedAt": task.updated_at,
                    }
                },
                None => doc! {
                    "$set": { "status": task.status.as_str(), "updatedAt": task.updated_at },
                    "$unset": { "completedAt": "" },
                },
            };
            let result = self.tasks().update_one(doc! { "_id": task.id }, update).await?;
            Ok(result.matched_count > 0)
        })
    }

    fn push_task_comment<'a>(
        &'a self,
        task_id: ObjectId,
        comment: &'a Comment,
        updated_at: BsonDateTime,
    ) -> RepoFuture<'a, bool> {
        Box::pin(async move {
            let update = doc! {
                "$push": { "comments": to_bson(comment)? },
                "$set": { "updatedAt": updated_at },
            };
            let result = self.tasks().update_one(doc! { "_id": task_id }, update).await?;
            Ok(result.matched_count > 0)
        })
    }

    fn delete_task(&self, id: ObjectId) -> RepoFuture<'_, bool> {
        Box::pin(async move {
            let result = self.tasks().delete_one(doc! { "_id": id }).await?;
            Ok(result.deleted_count > 0)
        })
    }

    fn task_stats<'a>(&'a self, filter: &'a TaskFilter, now: DateTime<Utc>) -> RepoFuture<'a, TaskStats> {
        Box::pin(async move {
            let now = BsonDateTime::from_millis(now.timestamp_millis());
            let count_if = |condition: Document| doc! { "$sum": { "$cond": [condition, 1, 0] } };
            let pipeline = vec![
                doc! { "$match": filter.to_document() },
                doc! {
                    "$group": {
                        "_id": null,
                        "total": { "$sum": 1 },
                        "todo": count_if(doc! { "$eq": ["$status", "todo"] }),
                        "inProgress": count_if(doc! { "$eq": ["$status", "in-progress"] }),
                        "completed": count_if(doc! { "$eq": ["$status", "completed"] }),
                        "highPriority": count_if(doc! { "$eq": ["$priority", "high"] }),
                        "overdue": count_if(doc! {
                            "$and": [
                                { "$lt": ["$dueDate", now] },
                                { "$ne": ["$status", "completed"] },
                            ]
                        }),
                    }
                },
            ];
            let mut cursor = self.tasks().aggregate(pipeline).await?;
            match cursor.try_next().await? {
                Some(group) => Ok(from_document(group)?),
                None => Ok(TaskStats::default()),
            }
        })
    }

    fn insert_user<'a>(&'a self, user: &'a User) -> RepoFuture<'a, ()> {
        Box::pin(async move {
            self.users()
                .insert_one(user)
                .await
                .map_err(|e| unique_violation(e, "email"))?;
            Ok(())
        })
    }

    fn find_user(&self, id: ObjectId) -> RepoFuture<'_, Option<User>> {
        Box::pin(async move { Ok(self.users().find_one(doc! { "_id": id }).await?) })
    }

    fn find_user_by_email<'a>(&'a self, email: &'a str) -> RepoFuture<'a, Option<User>> {
        Box::pin(async move { Ok(self.users().find_one(doc! { "email": email }).await?) })
    }

    fn find_users<'a>(&'a self, ids: &'a [ObjectId]) -> RepoFuture<'a, Vec<User>> {
        Box::pin(async move {
            let users: Vec<User> = self
                .users()
                .find(doc! { "_id": { "$in": ids.to_vec() } })
                .await?
                .try_collect()
                .await?;
            Ok(users)
        })
    }

    fn list_users(&self) -> RepoFuture<'_, Vec<User>> {
        Box::pin(async move {
            let users: Vec<User> = self
                .users()
                .find(doc! {})
                .sort(doc! { "createdAt": -1 })
                .await?
                .try_collect()
                .await?;
            Ok(users)
        })
    }

    fn replace_user<'a>(&'a self, user: &'a User) -> RepoFuture<'a, bool> {
        Box::pin(async move {
            let result = self
                .users()
                .replace_one(doc! { "_id": user.id }, user)
                .await
                .map_err(|e| unique_violation(e, "email"))?;
            Ok(result.matched_count > 0)
        })
    }

    fn record_login(&self, id: ObjectId, at: BsonDateTime) -> RepoFuture<'_, bool> {
        Box::pin(async move {
            let update = doc! { "$set": { "lastLogin": at, "updatedAt": at } };
            let result = self.users().update_one(doc! { "_id": id }, update).await?;
            Ok(result.matched_count > 0)
        })
    }

    fn delete_user(&self, id: ObjectId) -> RepoFuture<'_, bool> {
        Box::pin(async move {
            let result = self.users().delete_one(doc! { "_id": id }).await?;
            Ok(result.deleted_count > 0)
        })
    }

    fn revoke_token<'a>(&'a self, jti: &'a str, expires_at: BsonDateTime) -> RepoFuture<'a, ()> {
        Box::pin(async move {
            self.revoked_tokens()
                .insert_one(doc! { "jti": jti, "expiresAt": expires_at })
                .await?;
            Ok(())
        })
    }

    fn is_token_revoked<'a>(&'a self, jti: &'a str) -> RepoFuture<'a, bool> {
        Box::pin(async move { Ok(self.revoked_tokens().find_one(doc! { "jti": jti }).await?.is_some()) })
    }
}
