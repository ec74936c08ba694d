// src/routes.rs

use actix_web::web;

use crate::auth::{change_password, login, logout, me, register, update_profile};
use crate::error::{json_config, path_config, query_config};
use crate::health::health;
use crate::task::{
    add_comment, create_task, delete_task, get_task, list_tasks, task_stats, update_task,
    update_task_status,
};
use crate::user_management::{delete_user, get_user, list_users, update_user};

/// Mounts every endpoint under `/api`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .app_data(path_config())
        .service(
            web::scope("/api")
                .route("/health", web::get().to(health))
                // AUTH
                .service(
                    web::scope("/auth")
                        .route("/register", web::post().to(register))
                        .route("/login", web::post().to(login))
                        .route("/me", web::get().to(me))
                        .route("/logout", web::post().to(logout))
                        .route("/profile", web::put().to(update_profile))
                        .route("/password", web::put().to(change_password)),
                )
                // TASKS (`/stats` before `/{id}`)
                .service(
                    web::scope("/tasks")
                        .route("", web::get().to(list_tasks))
                        .route("", web::post().to(create_task))
                        .route("/stats", web::get().to(task_stats))
                        .route("/{id}", web::get().to(get_task))
                        .route("/{id}", web::put().to(update_task))
                        .route("/{id}", web::delete().to(delete_task))
                        .route("/{id}/status", web::patch().to(update_task_status))
                        .route("/{id}/comments", web::post().to(add_comment)),
                )
                // USERS
                .service(
                    web::scope("/users")
                        .route("", web::get().to(list_users))
                        .route("/{id}", web::get().to(get_user))
                        .route("/{id}", web::put().to(update_user))
                        .route("/{id}", web::delete().to(delete_user)),
                ),
        );
}
