//! Access control for tasks and user records.
//!
//! Every handler asks these functions instead of re-deriving role checks.
//! Note the asymmetry: reading, updating and commenting follow the
//! assignee, deleting follows the creator.

use mongodb::bson::oid::ObjectId;

use crate::models::{Role, Task};

/// The authenticated identity behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: ObjectId,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Operation classes a task can be subjected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    Read,
    Update,
    Delete,
    Comment,
}

impl TaskAction {
    fn verb(self) -> &'static str {
        match self {
            TaskAction::Read => "access",
            TaskAction::Update => "update",
            TaskAction::Delete => "delete",
            TaskAction::Comment => "comment on",
        }
    }
}

/// A policy rejection. Carries the message shown to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Denied(pub String);

pub fn authorize_task(actor: &Actor, task: &Task, action: TaskAction) -> Result<(), Denied> {
    if actor.is_admin() {
        return Ok(());
    }
    let allowed = match action {
        TaskAction::Read | TaskAction::Update | TaskAction::Comment => task.assigned_to == actor.id,
        TaskAction::Delete => task.created_by == actor.id,
    };
    if allowed {
        Ok(())
    } else {
        Err(Denied(format!("Not authorized to {} this task", action.verb())))
    }
}

/// The `assignedTo` constraint a task listing is scoped to, if any.
///
/// Non-admins always see only their own tasks, whatever they asked for;
/// admins see everything unless they name an assignee.
pub fn list_scope(actor: &Actor, requested: Option<ObjectId>) -> Option<ObjectId> {
    if actor.is_admin() {
        requested
    } else {
        Some(actor.id)
    }
}

/// Reading or editing a user record: admins, or the user themself.
pub fn authorize_user(actor: &Actor, target: ObjectId) -> Result<(), Denied> {
    if actor.is_admin() || actor.id == target {
        Ok(())
    } else {
        Err(Denied("Not authorized to access this user".into()))
    }
}

pub fn authorize_role_change(actor: &Actor) -> Result<(), Denied> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(Denied("Only admins can change roles".into()))
    }
}

/// Listing and deleting accounts is admin-only; nobody deletes their own.
pub fn authorize_user_admin(actor: &Actor) -> Result<(), Denied> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(Denied("Admin access required".into()))
    }
}

pub fn authorize_user_delete(actor: &Actor, target: ObjectId) -> Result<(), Denied> {
    authorize_user_admin(actor)?;
    if actor.id == target {
        return Err(Denied("Admins cannot delete their own account".into()));
    }
    Ok(())
}
