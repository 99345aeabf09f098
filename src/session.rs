//! Shared session state for one controller connection.
//!
//! All authentication material lives behind a single `parking_lot::Mutex`.
//! The lock is only ever held for field access, never across a network call,
//! so every reader sees either the full (cookie, url token) pair or neither.

use std::collections::HashSet;
use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Login credentials for the controller.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection status of the event stream, written by the stream handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Closed,
    Opening,
    Open,
}

/// Headers that identify the session on a single request.
///
/// A snapshot; callers must not keep it beyond one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeaders {
    pub cookie: String,
    pub url_token: String,
}

struct Inner {
    cookie: Option<String>,
    auth_token: Option<String>,
    url_token: Option<String>,
    stream_status: StreamStatus,
    subscription_ids: HashSet<String>,
    /// Cancelled on reset; every loop and stream started during the
    /// authenticated period holds a child of it.
    epoch: Option<CancellationToken>,
    /// Bumped on every reset and every new epoch.
    generation: u64,
}

/// Mutable authentication state shared by the query path, both refresh
/// loops, and the event stream.
pub struct SessionState {
    host: String,
    credentials: Credentials,
    inner: Mutex<Inner>,
}

impl SessionState {
    /// Create an empty, unauthenticated session for `host`.
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            credentials,
            inner: Mutex::new(Inner {
                cookie: None,
                auth_token: None,
                url_token: None,
                stream_status: StreamStatus::Closed,
                subscription_ids: HashSet::new(),
                epoch: None,
                generation: 0,
            }),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// True iff both the cookie and the url token are present.
    pub fn is_authenticated(&self) -> bool {
        let inner = self.inner.lock();
        inner.cookie.is_some() && inner.url_token.is_some()
    }

    /// Store the material returned by a successful login.
    ///
    /// Opens a new epoch unless one is already live, so repeating a login
    /// does not orphan the loops of the current one.
    pub fn apply_login(&self, cookie: String, token: String, url_token: String) {
        let mut inner = self.inner.lock();
        inner.cookie = Some(cookie);
        inner.auth_token = Some(token);
        inner.url_token = Some(url_token);
        if inner.epoch.as_ref().map_or(true, |e| e.is_cancelled()) {
            inner.epoch = Some(CancellationToken::new());
            inner.generation += 1;
        }
    }

    /// Replace the token, and the cookie when one is given, after a refresh.
    /// The url token is kept.
    ///
    /// `generation` is the value read before the refresh was sent. The reply
    /// is ignored when the session was reset (and possibly logged in again)
    /// while it was in flight.
    pub fn apply_refresh(&self, generation: u64, token: String, cookie: Option<String>) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.cookie.is_none() || inner.url_token.is_none() {
            return false;
        }
        inner.auth_token = Some(token);
        if let Some(cookie) = cookie {
            inner.cookie = Some(cookie);
        }
        true
    }

    /// Identifies the current authenticated period.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Drop all authentication material and subscriptions.
    ///
    /// Cancels the current epoch; loops and streams bound to it wind down on
    /// their own.
    pub fn reset(&self) {
        let epoch = {
            let mut inner = self.inner.lock();
            inner.cookie = None;
            inner.auth_token = None;
            inner.url_token = None;
            inner.subscription_ids.clear();
            inner.stream_status = StreamStatus::Closed;
            inner.generation += 1;
            inner.epoch.take()
        };
        if let Some(epoch) = epoch {
            epoch.cancel();
        }
    }

    /// Track a subscription id. Returns true if it was not tracked before.
    pub fn add_subscription(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        inner.subscription_ids.insert(id.to_string())
    }

    /// Snapshot of the tracked subscription ids.
    pub fn subscription_ids(&self) -> Vec<String> {
        self.inner.lock().subscription_ids.iter().cloned().collect()
    }

    /// Cookie and url token for one request, if authenticated.
    pub fn auth_headers(&self) -> Option<AuthHeaders> {
        let inner = self.inner.lock();
        match (&inner.cookie, &inner.url_token) {
            (Some(cookie), Some(url_token)) => Some(AuthHeaders {
                cookie: cookie.clone(),
                url_token: url_token.clone(),
            }),
            _ => None,
        }
    }

    pub fn auth_token(&self) -> Option<String> {
        self.inner.lock().auth_token.clone()
    }

    /// Current cookie, used when a refresh reply carries no new one.
    pub fn cookie(&self) -> Option<String> {
        self.inner.lock().cookie.clone()
    }

    /// Cancellation token of the live epoch, if authenticated.
    pub fn epoch(&self) -> Option<CancellationToken> {
        self.inner.lock().epoch.clone()
    }

    pub fn stream_status(&self) -> StreamStatus {
        self.inner.lock().stream_status
    }

    pub fn set_stream_status(&self, status: StreamStatus) {
        self.inner.lock().stream_status = status;
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SessionState")
            .field("host", &self.host)
            .field("username", &self.credentials.username)
            .field("authenticated", &(inner.cookie.is_some() && inner.url_token.is_some()))
            .field("stream_status", &inner.stream_status)
            .field("subscriptions", &inner.subscription_ids.len())
            .finish()
    }
}
