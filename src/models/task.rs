use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};

use super::{required_text, to_utc, UserSummary, ValidationError};

pub const TITLE_MAX: usize = 100;
pub const DESCRIPTION_MAX: usize = 1000;
pub const CATEGORY_MAX: usize = 50;
pub const TAG_MAX: usize = 20;
pub const COMMENT_MAX: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
        }
    }

    /// The status a card moves to when advanced. Completed is terminal.
    pub fn next(self) -> Self {
        match self {
            TaskStatus::Todo => TaskStatus::InProgress,
            TaskStatus::InProgress | TaskStatus::Completed => TaskStatus::Completed,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in-progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(ValidationError::new(
                "status",
                format!("`{other}` is not a valid status"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            other => Err(ValidationError::new(
                "priority",
                format!("`{other}` is not a valid priority"),
            )),
        }
    }
}

/// Overdue means past due and not yet completed, evaluated against `now`.
pub fn is_overdue(due_date: DateTime<Utc>, status: TaskStatus, now: DateTime<Utc>) -> bool {
    due_date < now && status != TaskStatus::Completed
}

/* -------------------------------------------------------------------------- */
/* Stored model                                                               */
/* -------------------------------------------------------------------------- */

/// A task document, stored exactly as it lives in MongoDB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    pub category: String,
    pub due_date: BsonDateTime,
    pub assigned_to: ObjectId,
    pub created_by: ObjectId,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Never written by any endpoint; carried so stored documents round-trip.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<BsonDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_hours: Option<f64>,
    pub created_at: BsonDateTime,
    pub updated_at: BsonDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    pub url: String,
    pub uploaded_at: BsonDateTime,
}

/// Comments are append-only and kept in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user: ObjectId,
    pub content: String,
    pub created_at: BsonDateTime,
}

/* -------------------------------------------------------------------------- */
/* Client payloads                                                            */
/* -------------------------------------------------------------------------- */

/// Body of `POST /tasks`. Required fields are optional here so that a missing
/// one is reported as a validation error rather than a decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
}

/// Body of `PUT /tasks/{id}`; every present field is merged into the stored task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_hours: Option<f64>,
}

/// Accepts RFC 3339 timestamps as well as bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_due_date(raw: &str) -> Result<BsonDateTime, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::new("dueDate", "Due date is required"));
    }
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
        })
        .map_err(|_| ValidationError::new("dueDate", format!("Invalid due date: {raw}")))?;
    Ok(BsonDateTime::from_millis(parsed.timestamp_millis()))
}

/// The validated fields a full update writes. Everything else in the stored
/// document, comments and `completedAt` included, is left as it is.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub category: Option<String>,
    pub due_date: Option<BsonDateTime>,
    pub assigned_to: Option<ObjectId>,
    pub tags: Option<Vec<String>>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub updated_at: BsonDateTime,
}

impl TaskPatch {
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(category) = &self.category {
            task.category = category.clone();
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(assigned_to) = self.assigned_to {
            task.assigned_to = assigned_to;
        }
        if let Some(tags) = &self.tags {
            task.tags = tags.clone();
        }
        if self.estimated_hours.is_some() {
            task.estimated_hours = self.estimated_hours;
        }
        if self.actual_hours.is_some() {
            task.actual_hours = self.actual_hours;
        }
        task.updated_at = self.updated_at;
    }
}

impl Task {
    /// Builds a new task from a creation payload. `assigned_to` has already been
    /// resolved by the caller (defaulting to the creator).
    pub fn create(
        payload: &CreateTaskRequest,
        assigned_to: ObjectId,
        created_by: ObjectId,
        now: BsonDateTime,
    ) -> Result<Self, ValidationError> {
        let due_date = match payload.due_date.as_deref() {
            Some(raw) => parse_due_date(raw)?,
            None => return Err(ValidationError::new("dueDate", "Due date is required")),
        };

        let mut task = Task {
            id: ObjectId::new(),
            title: payload.title.clone().unwrap_or_default(),
            description: payload.description.clone().unwrap_or_default(),
            status: payload.status.unwrap_or_default(),
            priority: payload.priority.unwrap_or_default(),
            category: payload.category.clone().unwrap_or_default(),
            due_date,
            assigned_to,
            created_by,
            tags: payload.tags.clone().unwrap_or_default(),
            attachments: Vec::new(),
            comments: Vec::new(),
            completed_at: None,
            estimated_hours: payload.estimated_hours,
            actual_hours: None,
            created_at: now,
            updated_at: now,
        };
        task.validate()?;
        Ok(task)
    }

    /// Merges the present fields of `changes` into a copy, validates it, and on
    /// success adopts the copy and returns the fields to persist. Nothing
    /// changes on error.
    ///
    /// `status` is written as-is: `completedAt` is only maintained by
    /// [`Task::set_status`].
    pub fn apply_update(
        &mut self,
        changes: &UpdateTaskRequest,
        assigned_to: Option<ObjectId>,
        now: BsonDateTime,
    ) -> Result<TaskPatch, ValidationError> {
        let mut merged = self.clone();
        if let Some(title) = &changes.title {
            merged.title = title.clone();
        }
        if let Some(description) = &changes.description {
            merged.description = description.clone();
        }
        if let Some(category) = &changes.category {
            merged.category = category.clone();
        }
        let due_date = changes.due_date.as_deref().map(parse_due_date).transpose()?;
        if let Some(tags) = &changes.tags {
            merged.tags = tags.clone();
        }
        if changes.estimated_hours.is_some() {
            merged.estimated_hours = changes.estimated_hours;
        }
        if changes.actual_hours.is_some() {
            merged.actual_hours = changes.actual_hours;
        }
        merged.validate()?;

        let patch = TaskPatch {
            title: changes.title.as_ref().map(|_| merged.title.clone()),
            description: changes.description.as_ref().map(|_| merged.description.clone()),
            status: changes.status,
            priority: changes.priority,
            category: changes.category.as_ref().map(|_| merged.category.clone()),
            due_date,
            assigned_to,
            tags: changes.tags.as_ref().map(|_| merged.tags.clone()),
            estimated_hours: changes.estimated_hours,
            actual_hours: changes.actual_hours,
            updated_at: now,
        };
        patch.apply_to(&mut merged);
        *self = merged;
        Ok(patch)
    }

    /// Normalises string fields in place and checks every schema constraint.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        self.title = required_text(
            "title",
            &self.title,
            TITLE_MAX,
            "Task title is required",
            "Title cannot be more than 100 characters",
        )?;
        self.description = required_text(
            "description",
            &self.description,
            DESCRIPTION_MAX,
            "Task description is required",
            "Description cannot be more than 1000 characters",
        )?;
        self.category = required_text(
            "category",
            &self.category,
            CATEGORY_MAX,
            "Category is required",
            "Category cannot be more than 50 characters",
        )?;

        let mut tags = Vec::with_capacity(self.tags.len());
        for tag in &self.tags {
            let tag = tag.trim();
            if tag.chars().count() > TAG_MAX {
                return Err(ValidationError::new(
                    "tags",
                    "Tag cannot be more than 20 characters",
                ));
            }
            tags.push(tag.to_string());
        }
        self.tags = tags;

        check_hours("estimatedHours", self.estimated_hours, "Estimated hours cannot be negative")?;
        check_hours("actualHours", self.actual_hours, "Actual hours cannot be negative")?;

        for comment in &self.comments {
            check_comment(&comment.content)?;
        }
        Ok(())
    }

    /// Sets the status and keeps `completedAt` in step with it: stamped with
    /// `now` for completed, cleared for anything else, whatever the previous
    /// status was.
    pub fn set_status(&mut self, status: TaskStatus, now: BsonDateTime) {
        self.status = status;
        self.completed_at = match status {
            TaskStatus::Completed => Some(now),
            _ => None,
        };
        self.updated_at = now;
    }

    /// Appends a comment by `user` and returns it.
    pub fn add_comment(
        &mut self,
        user: ObjectId,
        content: &str,
        now: BsonDateTime,
    ) -> Result<Comment, ValidationError> {
        check_comment(content)?;
        let comment = Comment {
            id: ObjectId::new(),
            user,
            content: content.to_string(),
            created_at: now,
        };
        self.comments.push(comment.clone());
        self.updated_at = now;
        Ok(comment)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        is_overdue(to_utc(self.due_date), self.status, now)
    }

    /// Users whose display fields are needed to expand this task.
    pub fn referenced_users(&self, with_comment_authors: bool) -> Vec<ObjectId> {
        let mut ids = vec![self.assigned_to, self.created_by];
        if with_comment_authors {
            ids.extend(self.comments.iter().map(|c| c.user));
        }
        ids
    }
}

fn check_hours(field: &'static str, hours: Option<f64>, message: &str) -> Result<(), ValidationError> {
    match hours {
        Some(h) if h < 0.0 || h.is_nan() => Err(ValidationError::new(field, message)),
        _ => Ok(()),
    }
}

fn check_comment(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::new("content", "Comment content is required"));
    }
    if content.chars().count() > COMMENT_MAX {
        return Err(ValidationError::new(
            "content",
            "Comment cannot be more than 500 characters",
        ));
    }
    Ok(())
}

/* -------------------------------------------------------------------------- */
/* Expanded record                                                            */
/* -------------------------------------------------------------------------- */

/// What we expose to the frontend: ids as hex strings, user references
/// replaced by display fields, and `isOverdue` computed at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub category: String,
    pub due_date: DateTime<Utc>,
    /// `None` when the referenced user no longer exists.
    pub assigned_to: Option<UserSummary>,
    pub created_by: Option<UserSummary>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentView>,
    #[serde(default)]
    pub comments: Vec<CommentView>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub actual_hours: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_overdue: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentView {
    pub filename: String,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    #[serde(rename = "_id")]
    pub id: String,
    pub user: CommentAuthor,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Comment authors are expanded on single-task reads and comment appends only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommentAuthor {
    Expanded(UserSummary),
    Id(String),
}

impl TaskView {
    pub fn expand(
        task: &Task,
        users: &HashMap<ObjectId, UserSummary>,
        with_comment_authors: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let comments = task
            .comments
            .iter()
            .map(|c| CommentView {
                id: c.id.to_hex(),
                user: match users.get(&c.user) {
                    Some(author) if with_comment_authors => CommentAuthor::Expanded(author.clone()),
                    _ => CommentAuthor::Id(c.user.to_hex()),
                },
                content: c.content.clone(),
                created_at: to_utc(c.created_at),
            })
            .collect();

        TaskView {
            id: task.id.to_hex(),
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status,
            priority: task.priority,
            category: task.category.clone(),
            due_date: to_utc(task.due_date),
            assigned_to: users.get(&task.assigned_to).cloned(),
            created_by: users.get(&task.created_by).cloned(),
            tags: task.tags.clone(),
            attachments: task
                .attachments
                .iter()
                .map(|a| AttachmentView {
                    filename: a.filename.clone(),
                    url: a.url.clone(),
                    uploaded_at: to_utc(a.uploaded_at),
                })
                .collect(),
            comments,
            completed_at: task.completed_at.map(to_utc),
            estimated_hours: task.estimated_hours,
            actual_hours: task.actual_hours,
            created_at: to_utc(task.created_at),
            updated_at: to_utc(task.updated_at),
            is_overdue: task.is_overdue(now),
        }
    }

    /// Same predicate as [`Task::is_overdue`], evaluated on the wire representation.
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        is_overdue(self.due_date, self.status, now)
    }
}

/* -------------------------------------------------------------------------- */
/* Statistics                                                                 */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: u64,
    pub todo: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub high_priority: u64,
    pub overdue: u64,
}

impl TaskStats {
    pub fn record(&mut self, status: TaskStatus, priority: TaskPriority, overdue: bool) {
        self.total += 1;
        match status {
            TaskStatus::Todo => self.todo += 1,
            TaskStatus::InProgress => self.in_progress += 1,
            TaskStatus::Completed => self.completed += 1,
        }
        if priority == TaskPriority::High {
            self.high_priority += 1;
        }
        if overdue {
            self.overdue += 1;
        }
    }

    pub fn from_tasks<'a, I>(tasks: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a Task>,
    {
        tasks.into_iter().fold(TaskStats::default(), |mut stats, t| {
            stats.record(t.status, t.priority, t.is_overdue(now));
            stats
        })
    }

    pub fn from_views<'a, I>(tasks: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a TaskView>,
    {
        tasks.into_iter().fold(TaskStats::default(), |mut stats, t| {
            stats.record(t.status, t.priority, t.is_overdue_at(now));
            stats
        })
    }
}
