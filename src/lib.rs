//! Taskify: a task management REST API over MongoDB, plus the client core
//! that frontends build on.

pub mod app_state;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod policy;
pub mod query;
pub mod repository;
pub mod routes;
pub mod task;
pub mod user_management;

#[cfg(test)]
pub(crate) mod test_support;
