//! The signed-in identity of a client and where its token is kept.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};

use super::api::AuthApi;
use super::{ClientError, ClientResult};
use crate::models::{ProfileUpdate, Role, UserProfile};

/// Somewhere to keep the bearer token between runs.
pub trait TokenStorage {
    fn load(&self) -> ClientResult<Option<String>>;
    fn save(&self, token: &str) -> ClientResult<()>;
    fn clear(&self) -> ClientResult<()>;
}

/// Keeps the token in a plain file, created on first save.
#[derive(Debug, Clone)]
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStorage for FileTokenStorage {
    fn load(&self) -> ClientResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, token: &str) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, token)?;
        Ok(())
    }

    fn clear(&self) -> ClientResult<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    token: Mutex<Option<String>>,
}

impl TokenStorage for MemoryTokenStorage {
    fn load(&self) -> ClientResult<Option<String>> {
        Ok(self.token.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, token: &str) -> ClientResult<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> ClientResult<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Current identity plus token. Anonymous until [`Session::hydrate`],
/// [`Session::login`] or [`Session::register`] succeeds.
pub struct Session<A: AuthApi, S: TokenStorage> {
    api: Arc<A>,
    storage: S,
    user: Option<UserProfile>,
    token: Option<String>,
}

impl<A: AuthApi, S: TokenStorage> Session<A, S> {
    pub fn new(api: Arc<A>, storage: S) -> Self {
        Self {
            api,
            storage,
            user: None,
            token: None,
        }
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.role == Role::Admin)
    }

    /// Restores a stored token and checks it against the server. Any failure,
    /// including an unreadable store, leaves the session anonymous.
    pub async fn hydrate(&mut self) -> Option<&UserProfile> {
        let token = match self.storage.load() {
            Ok(Some(token)) => token,
            Ok(None) => return None,
            Err(e) => {
                warn!("Could not read stored token: {}", e);
                return None;
            }
        };

        self.api.set_token(Some(token.clone()));
        match self.api.me().await {
            Ok(user) => {
                self.token = Some(token);
                self.user = Some(user);
            }
            Err(e) => {
                info!("Stored token rejected, signing out: {}", e);
                self.discard();
            }
        }
        self.user.as_ref()
    }

    pub async fn login(&mut self, email: &str, password: &str) -> ClientResult<&UserProfile> {
        let response = self.api.login(email, password).await?;
        self.establish(response.token, response.user)
    }

    pub async fn register(&mut self, name: &str, email: &str, password: &str) -> ClientResult<&UserProfile> {
        let response = self.api.register(name, email, password).await?;
        self.establish(response.token, response.user)
    }

    /// Revokes the token server-side if possible; the local session is
    /// cleared whatever the server says.
    pub async fn logout(&mut self) {
        if self.token.is_some() {
            if let Err(e) = self.api.logout().await {
                warn!("Server logout failed: {}", e);
            }
        }
        self.discard();
    }

    pub async fn update_profile(&mut self, update: &ProfileUpdate) -> ClientResult<&UserProfile> {
        match self.api.update_profile(update).await {
            Ok(user) => Ok(&*self.user.insert(user)),
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    pub async fn change_password(&mut self, current_password: &str, new_password: &str) -> ClientResult<()> {
        let result = self.api.change_password(current_password, new_password).await;
        if let Err(e) = &result {
            self.handle_error(e);
        }
        result
    }

    /// Reacts to a failed call made with this session's token. Returns `true`
    /// when the session was signed out and the caller should show the login
    /// screen.
    pub fn handle_error(&mut self, err: &ClientError) -> bool {
        if err.is_authentication() && self.token.is_some() {
            self.discard();
            return true;
        }
        false
    }

    fn establish(&mut self, token: String, user: UserProfile) -> ClientResult<&UserProfile> {
        self.storage.save(&token)?;
        self.api.set_token(Some(token.clone()));
        self.token = Some(token);
        Ok(&*self.user.insert(user))
    }

    fn discard(&mut self) {
        self.api.set_token(None);
        self.token = None;
        self.user = None;
        if let Err(e) = self.storage.clear() {
            warn!("Could not clear stored token: {}", e);
        }
    }
}

/// A [`TaskBoard`](super::board::TaskBoard) hook that ends a shared session
/// when the server rejects its token.
pub fn sign_out_on_rejection<A, S>(session: Arc<Mutex<Session<A, S>>>) -> impl Fn(&ClientError) + Send + Sync + 'static
where
    A: AuthApi + Send + Sync + 'static,
    S: TokenStorage + Send + 'static,
{
    move |err: &ClientError| {
        let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.handle_error(err) {
            info!("Signed out after the server rejected the token");
        }
    }
}
