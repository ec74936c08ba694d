// src/task.rs

use std::collections::{HashMap, HashSet};

use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::info;
use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::Authenticated;
use crate::error::{ApiError, Envelope};
use crate::models::{CreateTaskRequest, Task, TaskStatus, TaskView, UpdateTaskRequest, UserSummary};
use crate::policy::{authorize_task, TaskAction};
use crate::query::{ListPlan, TaskFilter, TaskQuery};

/// Response header carrying the unpaginated match count of a listing.
pub const TOTAL_COUNT_HEADER: &str = "X-Total-Count";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommentRequest {
    #[serde(default)]
    pub content: Option<String>,
}

/* -------------------------------------------------------------------------- */
/* Helpers                                                                    */
/* -------------------------------------------------------------------------- */

fn task_not_found() -> ApiError {
    ApiError::NotFound("Task not found".into())
}

/// A malformed id cannot resolve to a task, so it is reported as not found.
fn parse_task_id(raw: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw).map_err(|_| task_not_found())
}

async fn load_task(data: &AppState, raw_id: &str, context: &str) -> Result<Task, ApiError> {
    let id = parse_task_id(raw_id)?;
    data.repo
        .find_task(id)
        .await
        .map_err(|e| ApiError::internal(context, e))?
        .ok_or_else(task_not_found)
}

/// An explicit assignee must be an existing user.
async fn resolve_assignee(data: &AppState, raw: Option<&str>, context: &str) -> Result<Option<ObjectId>, ApiError> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(None),
    };
    let not_found = || ApiError::Validation("Assigned user not found".into());
    let id = ObjectId::parse_str(raw).map_err(|_| not_found())?;
    data.repo
        .find_user(id)
        .await
        .map_err(|e| ApiError::internal(context, e))?
        .ok_or_else(not_found)?;
    Ok(Some(id))
}

/// Replaces user references with display fields, one user lookup per batch.
async fn expand_tasks(
    data: &AppState,
    tasks: &[Task],
    with_comment_authors: bool,
    context: &str,
) -> Result<Vec<TaskView>, ApiError> {
    let ids: HashSet<ObjectId> = tasks
        .iter()
        .flat_map(|t| t.referenced_users(with_comment_authors))
        .collect();
    let ids: Vec<ObjectId> = ids.into_iter().collect();
    let users: HashMap<ObjectId, UserSummary> = data
        .repo
        .find_users(&ids)
        .await
        .map_err(|e| ApiError::internal(context, e))?
        .into_iter()
        .map(|user| (user.id, user.summary()))
        .collect();

    let now = Utc::now();
    Ok(tasks
        .iter()
        .map(|task| TaskView::expand(task, &users, with_comment_authors, now))
        .collect())
}

async fn expand_task(
    data: &AppState,
    task: &Task,
    with_comment_authors: bool,
    context: &str,
) -> Result<TaskView, ApiError> {
    let mut views = expand_tasks(data, std::slice::from_ref(task), with_comment_authors, context).await?;
    views.pop().ok_or_else(task_not_found)
}

/* -------------------------------------------------------------------------- */
/* Handlers                                                                   */
/* -------------------------------------------------------------------------- */

/// GET /api/tasks
/// Lists the caller's visible tasks as a bare array; the total match count
/// travels in the `X-Total-Count` header.
pub async fn list_tasks(
    auth: Authenticated,
    data: web::Data<AppState>,
    query: web::Query<TaskQuery>,
) -> Result<HttpResponse, ApiError> {
    const CONTEXT: &str = "Error fetching tasks";
    let plan = ListPlan::build(&auth.actor(), &query)?;

    let tasks = data
        .repo
        .find_tasks(&plan)
        .await
        .map_err(|e| ApiError::internal(CONTEXT, e))?;
    let total = data
        .repo
        .count_tasks(&plan.filter)
        .await
        .map_err(|e| ApiError::internal(CONTEXT, e))?;
    let views = expand_tasks(&data, &tasks, false, CONTEXT).await?;

    Ok(HttpResponse::Ok()
        .insert_header((TOTAL_COUNT_HEADER, total.to_string()))
        .json(views))
}

/// GET /api/tasks/{id}
pub async fn get_task(
    auth: Authenticated,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    const CONTEXT: &str = "Error fetching task";
    let task = load_task(&data, &path, CONTEXT).await?;
    authorize_task(&auth.actor(), &task, TaskAction::Read)?;

    let view = expand_task(&data, &task, true, CONTEXT).await?;
    Ok(HttpResponse::Ok().json(Envelope::data(view)))
}

/// POST /api/tasks
/// Creates a task, assigned to the caller unless `assignedTo` names someone else.
pub async fn create_task(
    auth: Authenticated,
    data: web::Data<AppState>,
    payload: web::Json<CreateTaskRequest>,
) -> Result<HttpResponse, ApiError> {
    const CONTEXT: &str = "Error creating task";
    let actor = auth.actor();
    let assigned_to = resolve_assignee(&data, payload.assigned_to.as_deref(), CONTEXT)
        .await?
        .unwrap_or(actor.id);

    let task = Task::create(&payload, assigned_to, actor.id, BsonDateTime::now())?;
    data.repo
        .insert_task(&task)
        .await
        .map_err(|e| ApiError::internal(CONTEXT, e))?;
    info!("Task created: {} by {}", task.id, actor.id);

    let view = expand_task(&data, &task, false, CONTEXT).await?;
    Ok(HttpResponse::Created().json(Envelope::with_message("Task created successfully", view)))
}

/// PUT /api/tasks/{id}
/// Writes only the supplied fields, so concurrent comments and status changes survive.
pub async fn update_task(
    auth: Authenticated,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateTaskRequest>,
) -> Result<HttpResponse, ApiError> {
    const CONTEXT: &str = "Error updating task";
    let mut task = load_task(&data, &path, CONTEXT).await?;
    authorize_task(&auth.actor(), &task, TaskAction::Update)?;

    let assigned_to = resolve_assignee(&data, payload.assigned_to.as_deref(), CONTEXT).await?;
    let patch = task.apply_update(&payload, assigned_to, BsonDateTime::now())?;
    let task = data
        .repo
        .update_task(task.id, &patch)
        .await
        .map_err(|e| ApiError::internal(CONTEXT, e))?
        .ok_or_else(task_not_found)?;
    info!("Task updated: {} by {}", task.id, auth.user.id);

    let view = expand_task(&data, &task, false, CONTEXT).await?;
    Ok(HttpResponse::Ok().json(Envelope::with_message("Task updated successfully", view)))
}

/// DELETE /api/tasks/{id}
/// Only the creator (or an admin) may delete, unlike every other task operation.
pub async fn delete_task(
    auth: Authenticated,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    const CONTEXT: &str = "Error deleting task";
    let task = load_task(&data, &path, CONTEXT).await?;
    authorize_task(&auth.actor(), &task, TaskAction::Delete)?;

    let deleted = data
        .repo
        .delete_task(task.id)
        .await
        .map_err(|e| ApiError::internal(CONTEXT, e))?;
    if !deleted {
        return Err(task_not_found());
    }
    info!("Task deleted: {}", task.id);
    Ok(HttpResponse::Ok().json(Envelope::message("Task deleted successfully")))
}

/// PATCH /api/tasks/{id}/status
/// Re-stamps `completedAt` when set to completed, clears it otherwise.
pub async fn update_task_status(
    auth: Authenticated,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<StatusRequest>,
) -> Result<HttpResponse, ApiError> {
    const CONTEXT: &str = "Error updating task status";
    let status = payload
        .status
        .ok_or_else(|| ApiError::Validation("Status is required".into()))?;
    let mut task = load_task(&data, &path, CONTEXT).await?;
    authorize_task(&auth.actor(), &task, TaskAction::Update)?;

    task.set_status(status, BsonDateTime::now());
    let updated = data
        .repo
        .update_task_status(&task)
        .await
        .map_err(|e| ApiError::internal(CONTEXT, e))?;
    if !updated {
        return Err(task_not_found());
    }

    let view = expand_task(&data, &task, false, CONTEXT).await?;
    Ok(HttpResponse::Ok().json(Envelope::with_message("Task status updated successfully", view)))
}

/// POST /api/tasks/{id}/comments
pub async fn add_comment(
    auth: Authenticated,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<CommentRequest>,
) -> Result<HttpResponse, ApiError> {
    const CONTEXT: &str = "Error adding comment";
    let actor = auth.actor();
    let mut task = load_task(&data, &path, CONTEXT).await?;
    authorize_task(&actor, &task, TaskAction::Comment)?;

    let content = payload.content.as_deref().unwrap_or_default();
    let comment = task.add_comment(actor.id, content, BsonDateTime::now())?;
    let pushed = data
        .repo
        .push_task_comment(task.id, &comment, task.updated_at)
        .await
        .map_err(|e| ApiError::internal(CONTEXT, e))?;
    if !pushed {
        return Err(task_not_found());
    }

    let view = expand_task(&data, &task, true, CONTEXT).await?;
    Ok(HttpResponse::Ok().json(Envelope::with_message("Comment added successfully", view)))
}

/// GET /api/tasks/stats
pub async fn task_stats(
    auth: Authenticated,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let filter = TaskFilter::scope(&auth.actor());
    let stats = data
        .repo
        .task_stats(&filter, Utc::now())
        .await
        .map_err(|e| ApiError::internal("Error fetching task statistics", e))?;
    Ok(HttpResponse::Ok().json(Envelope::data(stats)))
}
