use thiserror::Error;

/// Errors surfaced by the controller client.
///
/// Foreground calls return these directly. Background loops never return
/// them to anyone; they log the error and reset the session instead.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Login was rejected or its reply could not be used.
    #[error("login failed: {0}")]
    AuthFailure(String),

    /// A token refresh got a non-200 reply.
    #[error("token refresh failed with status {status}")]
    AuthRefreshFailure { status: u16 },

    /// A subscription refresh got a non-200 reply for a tracked id.
    #[error("subscription {id} refresh failed with status {status}")]
    SubRefreshFailure { id: String, status: u16 },

    /// A query got a non-200 reply. The session has been reset.
    #[error("query failed with status {status}")]
    QueryFailure { status: u16 },

    /// The call was malformed and was rejected before any network I/O.
    #[error("invalid lookup request: {0}")]
    InvalidLookupRequest(String),

    /// Connection, TLS, or timeout failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A reply body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The event stream did not reach the open state in time.
    #[error("event stream did not open after {attempts} attempts")]
    WsOpenFailure { attempts: u32 },
}

impl ClientError {
    /// Whether this error is evidence that the session itself is gone.
    ///
    /// Transport and decode problems are not: the session may still be valid
    /// on the controller.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            ClientError::AuthRefreshFailure { .. }
                | ClientError::SubRefreshFailure { .. }
                | ClientError::QueryFailure { .. }
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
