//! In-memory view of the signed-in user's tasks.
//!
//! Remote calls go first; the local list only changes once they succeed.
//! The lock is never held across an `await`.

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use super::api::TaskApi;
use super::{ClientError, ClientResult};
use crate::models::{CreateTaskRequest, TaskStats, TaskStatus, TaskView, ValidationError};
use crate::query::{Search, TaskQuery};

/// Which slice of the board is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoardFilter {
    #[default]
    All,
    Todo,
    InProgress,
    Completed,
    Overdue,
}

impl BoardFilter {
    pub fn matches(self, task: &TaskView, now: DateTime<Utc>) -> bool {
        match self {
            BoardFilter::All => true,
            BoardFilter::Todo => task.status == TaskStatus::Todo,
            BoardFilter::InProgress => task.status == TaskStatus::InProgress,
            BoardFilter::Completed => task.status == TaskStatus::Completed,
            BoardFilter::Overdue => task.is_overdue_at(now),
        }
    }
}

impl FromStr for BoardFilter {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(BoardFilter::All),
            "todo" => Ok(BoardFilter::Todo),
            "in-progress" => Ok(BoardFilter::InProgress),
            "completed" => Ok(BoardFilter::Completed),
            "overdue" => Ok(BoardFilter::Overdue),
            other => Err(ValidationError::new("filter", format!("Unknown filter `{other}`"))),
        }
    }
}

/// A transient message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Error(String),
}

/// Undrained notices beyond this are dropped, oldest first.
pub const MAX_NOTICES: usize = 32;

/// Called when the server rejects the board's credentials.
pub type AuthFailureHook = Box<dyn Fn(&ClientError) + Send + Sync>;

#[derive(Default)]
struct BoardState {
    tasks: Vec<TaskView>,
    stats: TaskStats,
    busy: HashSet<String>,
    notices: VecDeque<Notice>,
    loading: bool,
}

impl BoardState {
    fn refresh_stats(&mut self) {
        self.stats = TaskStats::from_views(&self.tasks, Utc::now());
    }

    fn notify(&mut self, notice: Notice) {
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(notice);
    }

    fn fail(&mut self, message: String) {
        self.notify(Notice::Error(message));
    }
}

pub struct TaskBoard<A: TaskApi> {
    api: Arc<A>,
    state: Mutex<BoardState>,
    on_auth_failure: Option<AuthFailureHook>,
}

impl<A: TaskApi> TaskBoard<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            state: Mutex::new(BoardState::default()),
            on_auth_failure: None,
        }
    }

    /// Runs `hook` whenever a board call fails with an authentication error,
    /// typically to end the session (see [`super::session::sign_out_on_rejection`]).
    pub fn on_auth_failure(mut self, hook: impl Fn(&ClientError) + Send + Sync + 'static) -> Self {
        self.on_auth_failure = Some(Box::new(hook));
        self
    }

    /// Records `err` as a notice and hands credential failures to the hook.
    /// Must not be called with the state lock held.
    fn report(&self, message: &str, err: &ClientError) {
        self.state().fail(format!("{message}: {err}"));
        if err.is_authentication() {
            if let Some(hook) = &self.on_auth_failure {
                hook(err);
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tasks(&self) -> Vec<TaskView> {
        self.state().tasks.clone()
    }

    /// Counts derived from the loaded list, never fetched.
    pub fn stats(&self) -> TaskStats {
        self.state().stats
    }

    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    pub fn is_busy(&self, id: &str) -> bool {
        self.state().busy.contains(id)
    }

    /// Drains pending notices, oldest first. At most [`MAX_NOTICES`] are kept
    /// between drains.
    pub fn take_notices(&self) -> Vec<Notice> {
        self.state().notices.drain(..).collect()
    }

    /// Tasks matching `filter` whose title or description contains `search`,
    /// ignoring case.
    pub fn visible(&self, filter: BoardFilter, search: Option<&str>) -> Vec<TaskView> {
        let search = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| Search::new(s).ok());
        let now = Utc::now();
        self.state()
            .tasks
            .iter()
            .filter(|t| filter.matches(t, now))
            .filter(|t| {
                search
                    .as_ref()
                    .map_or(true, |s| s.is_match(&t.title) || s.is_match(&t.description))
            })
            .cloned()
            .collect()
    }

    /// Replaces the whole list. On failure the previous list stays.
    pub async fn reload(&self, query: &TaskQuery) -> ClientResult<()> {
        self.state().loading = true;
        let result = self.api.list_tasks(query).await;
        self.state().loading = false;

        match result {
            Ok(page) => {
                let mut state = self.state();
                state.tasks = page.tasks;
                state.refresh_stats();
                Ok(())
            }
            Err(e) => {
                self.report("Failed to load tasks", &e);
                Err(e)
            }
        }
    }

    pub async fn create(&self, task: &CreateTaskRequest) -> ClientResult<TaskView> {
        match self.api.create_task(task).await {
            Ok(created) => {
                let mut state = self.state();
                state.tasks.insert(0, created.clone());
                state.refresh_stats();
                state.notify(Notice::Success("Task created".into()));
                Ok(created)
            }
            Err(e) => {
                self.report("Failed to create task", &e);
                Err(e)
            }
        }
    }

    /// Sets the status of task `id`. Returns `Ok(false)` without calling the
    /// server while an earlier request for the same task is outstanding.
    pub async fn change_status(&self, id: &str, status: TaskStatus) -> ClientResult<bool> {
        if !self.claim(id) {
            debug!("Ignoring status change for busy task {}", id);
            return Ok(false);
        }
        let result = self.api.update_status(id, status).await;
        self.state().busy.remove(id);

        match result {
            Ok(updated) => {
                let mut state = self.state();
                if let Some(slot) = state.tasks.iter_mut().find(|t| t.id == id) {
                    *slot = updated;
                }
                state.refresh_stats();
                state.notify(Notice::Success("Task status updated".into()));
                Ok(true)
            }
            Err(e) => {
                self.report("Failed to update task", &e);
                Err(e)
            }
        }
    }

    /// Moves task `id` one step along todo → in-progress → completed.
    /// Completed tasks stay put.
    pub async fn advance(&self, id: &str) -> ClientResult<bool> {
        let current = self.state().tasks.iter().find(|t| t.id == id).map(|t| t.status);
        match current {
            Some(status) if status.next() != status => self.change_status(id, status.next()).await,
            _ => Ok(false),
        }
    }

    pub async fn delete(&self, id: &str) -> ClientResult<bool> {
        if !self.claim(id) {
            debug!("Ignoring delete for busy task {}", id);
            return Ok(false);
        }
        let result = self.api.delete_task(id).await;
        self.state().busy.remove(id);

        match result {
            Ok(()) => {
                let mut state = self.state();
                state.tasks.retain(|t| t.id != id);
                state.refresh_stats();
                state.notify(Notice::Success("Task deleted".into()));
                Ok(true)
            }
            Err(e) => {
                self.report("Failed to delete task", &e);
                Err(e)
            }
        }
    }

    /// Marks `id` busy; `false` if it already was.
    fn claim(&self, id: &str) -> bool {
        self.state().busy.insert(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Duration;
    use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};

    use super::*;
    use crate::client::api::TaskPage;
    use crate::client::ClientError;
    use crate::models::{Task, UpdateTaskRequest};

    fn view(title: &str, status: TaskStatus, due_in_days: i64) -> TaskView {
        let due = (Utc::now() + Duration::days(due_in_days)).to_rfc3339();
        let owner = ObjectId::new();
        let body = CreateTaskRequest {
            title: Some(title.into()),
            description: Some(format!("About {title}")),
            category: Some("Work".into()),
            due_date: Some(due),
            status: Some(status),
            ..Default::default()
        };
        let task = Task::create(&body, owner, owner, BsonDateTime::now()).unwrap();
        TaskView::expand(&task, &HashMap::new(), false, Utc::now())
    }

    /// Serves a fixed list; status changes yield once before answering.
    #[derive(Default)]
    struct FakeTasks {
        tasks: Mutex<Vec<TaskView>>,
        fail: Mutex<bool>,
        status_calls: Mutex<u32>,
    }

    impl FakeTasks {
        fn with(tasks: Vec<TaskView>) -> Arc<Self> {
            Arc::new(FakeTasks {
                tasks: Mutex::new(tasks),
                ..FakeTasks::default()
            })
        }

        fn check(&self) -> ClientResult<()> {
            if *self.fail.lock().unwrap() {
                return Err(ClientError::Api { status: 500, message: "Internal server error".into() });
            }
            Ok(())
        }
    }

    impl TaskApi for FakeTasks {
        async fn list_tasks(&self, _query: &TaskQuery) -> ClientResult<TaskPage> {
            self.check()?;
            let tasks = self.tasks.lock().unwrap().clone();
            Ok(TaskPage { total: Some(tasks.len() as u64), tasks })
        }

        async fn get_task(&self, id: &str) -> ClientResult<TaskView> {
            self.tasks
                .lock()
                .unwrap()
                .iter()
                .find(|t| t.id == id)
                .cloned()
                .ok_or(ClientError::Api { status: 404, message: "Task not found".into() })
        }

        async fn create_task(&self, task: &CreateTaskRequest) -> ClientResult<TaskView> {
            self.check()?;
            let created = view(task.title.as_deref().unwrap_or("untitled"), TaskStatus::Todo, 1);
            self.tasks.lock().unwrap().push(created.clone());
            Ok(created)
        }

        async fn update_task(&self, id: &str, _changes: &UpdateTaskRequest) -> ClientResult<TaskView> {
            self.get_task(id).await
        }

        async fn update_status(&self, id: &str, status: TaskStatus) -> ClientResult<TaskView> {
            *self.status_calls.lock().unwrap() += 1;
            tokio::task::yield_now().await;
            self.check()?;
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(ClientError::Api { status: 404, message: "Task not found".into() })?;
            task.status = status;
            task.completed_at = (status == TaskStatus::Completed).then(Utc::now);
            Ok(task.clone())
        }

        async fn delete_task(&self, id: &str) -> ClientResult<()> {
            tokio::task::yield_now().await;
            self.check()?;
            self.tasks.lock().unwrap().retain(|t| t.id != id);
            Ok(())
        }

        async fn add_comment(&self, id: &str, _content: &str) -> ClientResult<TaskView> {
            self.get_task(id).await
        }

        async fn stats(&self) -> ClientResult<TaskStats> {
            Ok(TaskStats::from_views(&*self.tasks.lock().unwrap(), Utc::now()))
        }
    }

    #[tokio::test]
    async fn reload_derives_stats_from_the_list() {
        let api = FakeTasks::with(vec![
            view("a", TaskStatus::Todo, 1),
            view("b", TaskStatus::InProgress, -1),
            view("c", TaskStatus::Completed, -1),
        ]);
        let board = TaskBoard::new(api.clone());
        board.reload(&TaskQuery::default()).await.unwrap();

        let stats = board.stats();
        assert_eq!((stats.total, stats.todo, stats.in_progress, stats.completed), (3, 1, 1, 1));
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats, api.stats().await.unwrap());
        assert!(!board.is_loading());
    }

    #[tokio::test]
    async fn failed_reload_keeps_the_old_list() {
        let api = FakeTasks::with(vec![view("a", TaskStatus::Todo, 1)]);
        let board = TaskBoard::new(api.clone());
        board.reload(&TaskQuery::default()).await.unwrap();
        board.take_notices();

        *api.fail.lock().unwrap() = true;
        assert!(board.reload(&TaskQuery::default()).await.is_err());
        assert_eq!(board.tasks().len(), 1);
        assert!(matches!(board.take_notices().as_slice(), [Notice::Error(_)]));
    }

    #[tokio::test]
    async fn undrained_notices_are_capped() {
        let api = FakeTasks::with(Vec::new());
        *api.fail.lock().unwrap() = true;
        let board = TaskBoard::new(api);
        for _ in 0..MAX_NOTICES + 5 {
            assert!(board.reload(&TaskQuery::default()).await.is_err());
        }
        assert_eq!(board.take_notices().len(), MAX_NOTICES);
        assert!(board.take_notices().is_empty());
    }

    #[tokio::test]
    async fn overdue_filter_matches_the_stats_count() {
        let api = FakeTasks::with(vec![
            view("late", TaskStatus::Todo, -2),
            view("late but done", TaskStatus::Completed, -2),
            view("fine", TaskStatus::InProgress, 3),
        ]);
        let board = TaskBoard::new(api);
        board.reload(&TaskQuery::default()).await.unwrap();

        let overdue = board.visible(BoardFilter::Overdue, None);
        assert_eq!(overdue.len() as u64, board.stats().overdue);
        assert_eq!(overdue[0].title, "late");

        assert_eq!(board.visible(BoardFilter::All, Some("LATE")).len(), 2);
        assert_eq!(board.visible(BoardFilter::Completed, Some("about")).len(), 1);
        assert_eq!(board.visible(BoardFilter::All, Some("a.b")).len(), 0);
        assert_eq!("in-progress".parse::<BoardFilter>().unwrap(), BoardFilter::InProgress);
    }

    #[tokio::test]
    async fn status_change_is_applied_only_on_success() {
        let first = view("a", TaskStatus::Todo, 1);
        let id = first.id.clone();
        let api = FakeTasks::with(vec![first]);
        let board = TaskBoard::new(api.clone());
        board.reload(&TaskQuery::default()).await.unwrap();

        *api.fail.lock().unwrap() = true;
        assert!(board.change_status(&id, TaskStatus::Completed).await.is_err());
        assert_eq!(board.tasks()[0].status, TaskStatus::Todo);
        assert!(!board.is_busy(&id));

        *api.fail.lock().unwrap() = false;
        assert!(board.advance(&id).await.unwrap());
        assert_eq!(board.tasks()[0].status, TaskStatus::InProgress);
        assert!(board.advance(&id).await.unwrap());
        assert_eq!(board.stats().completed, 1);
        assert!(!board.advance(&id).await.unwrap());
    }

    #[tokio::test]
    async fn repeated_clicks_on_a_busy_task_are_ignored() {
        let first = view("a", TaskStatus::Todo, 1);
        let id = first.id.clone();
        let api = FakeTasks::with(vec![first]);
        let board = TaskBoard::new(api.clone());
        board.reload(&TaskQuery::default()).await.unwrap();

        let (a, b) = tokio::join!(
            board.change_status(&id, TaskStatus::InProgress),
            board.change_status(&id, TaskStatus::Completed),
        );
        assert!(a.unwrap());
        assert!(!b.unwrap());
        assert_eq!(*api.status_calls.lock().unwrap(), 1);
        assert_eq!(board.tasks()[0].status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn delete_removes_only_after_the_server_agrees() {
        let keep = view("keep", TaskStatus::Todo, 1);
        let gone = view("gone", TaskStatus::Todo, 1);
        let gone_id = gone.id.clone();
        let api = FakeTasks::with(vec![keep, gone]);
        let board = TaskBoard::new(api.clone());
        board.reload(&TaskQuery::default()).await.unwrap();

        *api.fail.lock().unwrap() = true;
        assert!(board.delete(&gone_id).await.is_err());
        assert_eq!(board.stats().total, 2);

        *api.fail.lock().unwrap() = false;
        assert!(board.delete(&gone_id).await.unwrap());
        let titles: Vec<String> = board.tasks().into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["keep".to_string()]);
        assert_eq!(board.stats().total, 1);

        let created = board
            .create(&CreateTaskRequest { title: Some("new".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(board.tasks()[0].id, created.id);
    }
}
