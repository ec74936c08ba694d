use std::sync::{PoisonError, RwLock};

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use super::{ClientError, ClientResult};
use crate::auth::AuthResponse;
use crate::error::Envelope;
use crate::health::HealthReport;
use crate::models::{
    CreateTaskRequest, ProfileUpdate, TaskStats, TaskStatus, TaskView, UpdateTaskRequest, UserProfile,
};
use crate::query::TaskQuery;
use crate::task::TOTAL_COUNT_HEADER;
use crate::user_management::UpdateUserRequest;

/// One page of `GET /tasks` plus the total from `X-Total-Count`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPage {
    pub tasks: Vec<TaskView>,
    pub total: Option<u64>,
}

/// Account endpoints used by [`super::Session`].
#[allow(async_fn_in_trait)]
pub trait AuthApi {
    /// Sets or clears the bearer token attached to later requests.
    fn set_token(&self, token: Option<String>);

    async fn register(&self, name: &str, email: &str, password: &str) -> ClientResult<AuthResponse>;

    async fn login(&self, email: &str, password: &str) -> ClientResult<AuthResponse>;

    async fn me(&self) -> ClientResult<UserProfile>;

    async fn logout(&self) -> ClientResult<()>;

    async fn update_profile(&self, update: &ProfileUpdate) -> ClientResult<UserProfile>;

    async fn change_password(&self, current_password: &str, new_password: &str) -> ClientResult<()>;
}

/// Task endpoints used by [`super::TaskBoard`].
#[allow(async_fn_in_trait)]
pub trait TaskApi {
    async fn list_tasks(&self, query: &TaskQuery) -> ClientResult<TaskPage>;

    async fn get_task(&self, id: &str) -> ClientResult<TaskView>;

    async fn create_task(&self, task: &CreateTaskRequest) -> ClientResult<TaskView>;

    async fn update_task(&self, id: &str, changes: &UpdateTaskRequest) -> ClientResult<TaskView>;

    async fn update_status(&self, id: &str, status: TaskStatus) -> ClientResult<TaskView>;

    async fn delete_task(&self, id: &str) -> ClientResult<()>;

    async fn add_comment(&self, id: &str, content: &str) -> ClientResult<TaskView>;

    async fn stats(&self) -> ClientResult<TaskStats>;
}

/// HTTP client for the Taskify API.
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    /// `base_url` includes the `/api` prefix, e.g. `http://localhost:5001/api`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.get(self.url(path)))
    }

    fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RequestBuilder {
        self.authorized(self.client.post(self.url(path)).json(body))
    }

    fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RequestBuilder {
        self.authorized(self.client.put(self.url(path)).json(body))
    }

    fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RequestBuilder {
        self.authorized(self.client.patch(self.url(path)).json(body))
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.delete(self.url(path)))
    }

    /* ---------------------------- user administration --------------------------- */

    pub async fn list_users(&self) -> ClientResult<Vec<UserProfile>> {
        parse(self.get("users").send().await?).await
    }

    pub async fn get_user(&self, id: &str) -> ClientResult<UserProfile> {
        parse_data(self.get(&format!("users/{id}")).send().await?).await
    }

    pub async fn update_user(&self, id: &str, update: &UpdateUserRequest) -> ClientResult<UserProfile> {
        parse_data(self.put(&format!("users/{id}"), update).send().await?).await
    }

    pub async fn delete_user(&self, id: &str) -> ClientResult<()> {
        expect_success(self.delete(&format!("users/{id}")).send().await?).await
    }

    pub async fn health(&self) -> ClientResult<HealthReport> {
        parse(self.get("health").send().await?).await
    }
}

/// Maps non-2xx responses onto [`ClientError`], keeping the server's message.
async fn check(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<Envelope<Value>>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Request failed").to_string());
    if status == StatusCode::UNAUTHORIZED {
        Err(ClientError::Authentication(message))
    } else {
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    Ok(check(response).await?.json::<T>().await?)
}

async fn parse_data<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status().as_u16();
    let envelope: Envelope<T> = parse(response).await?;
    envelope.data.ok_or_else(|| ClientError::Api {
        status,
        message: "Response carried no data".into(),
    })
}

async fn expect_success(response: Response) -> ClientResult<()> {
    check(response).await.map(|_| ())
}

impl AuthApi for ApiClient {
    fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    async fn register(&self, name: &str, email: &str, password: &str) -> ClientResult<AuthResponse> {
        let body = json!({ "name": name, "email": email, "password": password });
        parse(self.post("auth/register", &body).send().await?).await
    }

    async fn login(&self, email: &str, password: &str) -> ClientResult<AuthResponse> {
        let body = json!({ "email": email, "password": password });
        parse(self.post("auth/login", &body).send().await?).await
    }

    async fn me(&self) -> ClientResult<UserProfile> {
        parse_data(self.get("auth/me").send().await?).await
    }

    async fn logout(&self) -> ClientResult<()> {
        expect_success(self.post("auth/logout", &json!({})).send().await?).await
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> ClientResult<UserProfile> {
        parse_data(self.put("auth/profile", update).send().await?).await
    }

    async fn change_password(&self, current_password: &str, new_password: &str) -> ClientResult<()> {
        let body = json!({ "currentPassword": current_password, "newPassword": new_password });
        expect_success(self.put("auth/password", &body).send().await?).await
    }
}

impl TaskApi for ApiClient {
    async fn list_tasks(&self, query: &TaskQuery) -> ClientResult<TaskPage> {
        let response = check(self.get("tasks").query(query).send().await?).await?;
        let total = response
            .headers()
            .get(TOTAL_COUNT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok());
        let tasks = response.json::<Vec<TaskView>>().await?;
        Ok(TaskPage { tasks, total })
    }

    async fn get_task(&self, id: &str) -> ClientResult<TaskView> {
        parse_data(self.get(&format!("tasks/{id}")).send().await?).await
    }

    async fn create_task(&self, task: &CreateTaskRequest) -> ClientResult<TaskView> {
        parse_data(self.post("tasks", task).send().await?).await
    }

    async fn update_task(&self, id: &str, changes: &UpdateTaskRequest) -> ClientResult<TaskView> {
        parse_data(self.put(&format!("tasks/{id}"), changes).send().await?).await
    }

    async fn update_status(&self, id: &str, status: TaskStatus) -> ClientResult<TaskView> {
        let body = json!({ "status": status });
        parse_data(self.patch(&format!("tasks/{id}/status"), &body).send().await?).await
    }

    async fn delete_task(&self, id: &str) -> ClientResult<()> {
        expect_success(self.delete(&format!("tasks/{id}")).send().await?).await
    }

    async fn add_comment(&self, id: &str, content: &str) -> ClientResult<TaskView> {
        let body = json!({ "content": content });
        parse_data(self.post(&format!("tasks/{id}/comments"), &body).send().await?).await
    }

    async fn stats(&self) -> ClientResult<TaskStats> {
        parse_data(self.get("tasks/stats").send().await?).await
    }
}
