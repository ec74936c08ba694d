//! Turns task listing parameters into a store query.
//!
//! A [`TaskFilter`] can only be built through a constructor that applies the
//! caller's access scope first, so no listing or aggregate ever runs unscoped.

use std::cmp::Ordering;
use std::fmt::Display;
use std::str::FromStr;

use mongodb::bson::{doc, oid::ObjectId, Document};
use regex::{Regex, RegexBuilder};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::models::{Task, TaskPriority, TaskStatus, ValidationError};
use crate::policy::{list_scope, Actor};

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;

/// Query string of `GET /tasks`. Empty values count as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortField>,
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(de::Error::custom),
    }
}

/* -------------------------------------------------------------------------- */
/* Sorting                                                                    */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    DueDate,
    Title,
    Status,
    Priority,
    Category,
}

impl SortField {
    pub fn as_str(self) -> &'static str {
        match self {
            SortField::CreatedAt => "createdAt",
            SortField::UpdatedAt => "updatedAt",
            SortField::DueDate => "dueDate",
            SortField::Title => "title",
            SortField::Status => "status",
            SortField::Priority => "priority",
            SortField::Category => "category",
        }
    }
}

impl FromStr for SortField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            SortField::CreatedAt,
            SortField::UpdatedAt,
            SortField::DueDate,
            SortField::Title,
            SortField::Status,
            SortField::Priority,
            SortField::Category,
        ]
        .into_iter()
        .find(|field| field.as_str() == s)
        .ok_or_else(|| ValidationError::new("sortBy", format!("Cannot sort tasks by `{s}`")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(ValidationError::new(
                "sortOrder",
                format!("Sort order must be `asc` or `desc`, got `{other}`"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub order: SortOrder,
}

impl Sort {
    pub fn to_document(&self) -> Document {
        let direction = match self.order {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        };
        doc! { self.field.as_str(): direction }
    }

    /// Orders two tasks the way the document store would. Enum fields compare
    /// by their stored string.
    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        let ordering = match self.field {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::DueDate => a.due_date.cmp(&b.due_date),
            SortField::Title => a.title.cmp(&b.title),
            SortField::Status => a.status.as_str().cmp(b.status.as_str()),
            SortField::Priority => a.priority.as_str().cmp(b.priority.as_str()),
            SortField::Category => a.category.cmp(&b.category),
        };
        match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

/* -------------------------------------------------------------------------- */
/* Filtering                                                                  */
/* -------------------------------------------------------------------------- */

/// Case-insensitive literal substring search.
#[derive(Debug, Clone)]
pub struct Search {
    pattern: String,
    regex: Regex,
}

impl Search {
    pub fn new(text: &str) -> Result<Self, ValidationError> {
        let pattern = regex::escape(text);
        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ValidationError::new("search", format!("Invalid search: {e}")))?;
        Ok(Self { pattern, regex })
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }
}

#[derive(Debug, Clone)]
pub struct TaskFilter {
    assigned_to: Option<ObjectId>,
    status: Option<TaskStatus>,
    priority: Option<TaskPriority>,
    category: Option<String>,
    search: Option<Search>,
}

impl TaskFilter {
    /// Only the access scope of `actor`, used for stats.
    pub fn scope(actor: &Actor) -> Self {
        TaskFilter {
            assigned_to: list_scope(actor, None),
            status: None,
            priority: None,
            category: None,
            search: None,
        }
    }

    /// The access scope of `actor` plus the filters named in `query`.
    pub fn scoped(actor: &Actor, query: &TaskQuery) -> Result<Self, ValidationError> {
        let requested = match query.assigned_to.as_deref() {
            Some(raw) if actor.is_admin() => Some(ObjectId::parse_str(raw).map_err(|_| {
                ValidationError::new("assignedTo", format!("`{raw}` is not a valid user id"))
            })?),
            _ => None,
        };
        let search = query.search.as_deref().map(Search::new).transpose()?;

        Ok(TaskFilter {
            assigned_to: list_scope(actor, requested),
            status: query.status,
            priority: query.priority,
            category: query.category.clone(),
            search,
        })
    }

    pub fn assigned_to(&self) -> Option<ObjectId> {
        self.assigned_to
    }

    pub fn to_document(&self) -> Document {
        let mut filter = Document::new();
        if let Some(assignee) = self.assigned_to {
            filter.insert("assignedTo", assignee);
        }
        if let Some(status) = self.status {
            filter.insert("status", status.as_str());
        }
        if let Some(priority) = self.priority {
            filter.insert("priority", priority.as_str());
        }
        if let Some(category) = &self.category {
            filter.insert("category", category.as_str());
        }
        if let Some(search) = &self.search {
            let clause = |field: &str| doc! { field: { "$regex": search.pattern.as_str(), "$options": "i" } };
            filter.insert(
                "$or",
                vec![clause("title"), clause("description"), clause("category")],
            );
        }
        filter
    }

    /// The same predicate as [`TaskFilter::to_document`], evaluated in memory.
    pub fn matches(&self, task: &Task) -> bool {
        self.assigned_to.map_or(true, |id| task.assigned_to == id)
            && self.status.map_or(true, |s| task.status == s)
            && self.priority.map_or(true, |p| task.priority == p)
            && self.category.as_deref().map_or(true, |c| task.category == c)
            && self.search.as_ref().map_or(true, |s| {
                s.is_match(&task.title) || s.is_match(&task.description) || s.is_match(&task.category)
            })
    }
}

/// Everything the store needs to answer one page of a listing.
#[derive(Debug, Clone)]
pub struct ListPlan {
    pub filter: TaskFilter,
    pub sort: Sort,
    pub skip: u64,
    /// `None` means no limit.
    pub limit: Option<u64>,
}

impl ListPlan {
    pub fn build(actor: &Actor, query: &TaskQuery) -> Result<Self, ValidationError> {
        let filter = TaskFilter::scoped(actor, query)?;
        let page = query.page.unwrap_or(DEFAULT_PAGE).max(1);
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
        Ok(ListPlan {
            filter,
            sort: Sort {
                field: query.sort_by.unwrap_or_default(),
                order: query.sort_order.unwrap_or_default(),
            },
            skip: (page - 1).saturating_mul(limit),
            limit: (limit > 0).then_some(limit),
        })
    }
}
