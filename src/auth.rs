//! Login, token refresh and logout exchanges.
//!
//! Each exchange does its network call without holding the session lock and
//! then applies the result in one locked step.

use serde_json::json;

use crate::channel::{ApiChannel, ApiReply};
use crate::error::{ClientError, Result};

pub const LOGIN_PATH: &str = "/api/aaaLogin.json?gui-token-request=yes";
pub const REFRESH_PATH: &str = "/api/aaaRefresh.json?gui-token-request=yes";
pub const LOGOUT_PATH: &str = "/api/aaaLogout.json";

/// Performs the authentication exchanges for one session.
#[derive(Clone)]
pub struct Authenticator {
    channel: ApiChannel,
}

impl Authenticator {
    pub fn new(channel: ApiChannel) -> Self {
        Self { channel }
    }

    /// Exchange credentials for a cookie, token and url token.
    ///
    /// On failure the session is left untouched.
    pub async fn login(&self) -> Result<()> {
        let session = self.channel.session();
        let creds = session.credentials();
        let body = json!({
            "aaaUser": {
                "attributes": {
                    "name": creds.username,
                    "pwd": creds.password(),
                }
            }
        });

        let reply = match self.channel.post(LOGIN_PATH, body).await {
            Ok(reply) => reply,
            Err(ClientError::Decode(e)) => {
                return Err(ClientError::AuthFailure(format!("malformed login reply: {e}")))
            }
            Err(e) => return Err(ClientError::AuthFailure(e.to_string())),
        };
        if !reply.is_ok() {
            return Err(ClientError::AuthFailure(format!(
                "controller returned status {}",
                reply.status
            )));
        }

        let attrs = login_attributes(&reply)
            .ok_or_else(|| ClientError::AuthFailure("reply has no aaaLogin entry".into()))?;
        let token = attr_str(attrs, "token")
            .ok_or_else(|| ClientError::AuthFailure("reply has no token".into()))?;
        let url_token = attr_str(attrs, "urlToken")
            .ok_or_else(|| ClientError::AuthFailure("reply has no urlToken".into()))?;
        let cookie = reply
            .set_cookie
            .as_deref()
            .and_then(session_cookie)
            .ok_or_else(|| ClientError::AuthFailure("reply has no session cookie".into()))?;

        session.apply_login(cookie, token, url_token);
        tracing::info!(host = %session.host(), user = %creds.username, "logged in");
        Ok(())
    }

    /// Renew the session token.
    ///
    /// Any non-200 reply is an [`ClientError::AuthRefreshFailure`]; the caller
    /// decides what to do with the session.
    pub async fn refresh(&self) -> Result<()> {
        let session = self.channel.session();
        let generation = session.generation();
        let reply = self.channel.get(REFRESH_PATH).await?;
        if !reply.is_ok() {
            return Err(ClientError::AuthRefreshFailure {
                status: reply.status,
            });
        }

        let token = login_attributes(&reply)
            .and_then(|attrs| attr_str(attrs, "token"))
            .ok_or_else(|| ClientError::Decode("refresh reply has no token".into()))?;
        // No Set-Cookie means the controller kept the current cookie.
        let cookie = reply.set_cookie.as_deref().and_then(session_cookie);

        if !session.apply_refresh(generation, token, cookie) {
            tracing::debug!("session reset while refresh was in flight");
        }
        Ok(())
    }

    /// End the session on the controller. The local session is reset
    /// whatever the controller answers.
    pub async fn logout(&self) -> Result<()> {
        let session = self.channel.session();
        let body = json!({
            "aaaUser": { "attributes": { "name": session.credentials().username } }
        });
        let result = self.channel.post(LOGOUT_PATH, body).await;
        session.reset();
        match result {
            Ok(reply) if !reply.is_ok() => {
                tracing::debug!(status = reply.status, "logout not acknowledged");
                Ok(())
            }
            Ok(_) => {
                tracing::info!(host = %session.host(), "logged out");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn login_attributes(reply: &ApiReply) -> Option<&serde_json::Map<String, serde_json::Value>> {
    reply.body["imdata"]
        .as_array()?
        .iter()
        .find_map(|entry| entry["aaaLogin"]["attributes"].as_object())
}

fn attr_str(attrs: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    attrs
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Extract the `name=value` pair from a `Set-Cookie` header value.
pub fn session_cookie(set_cookie: &str) -> Option<String> {
    let pair = set_cookie.split(';').next()?.trim();
    if pair.is_empty() || !pair.contains('=') {
        return None;
    }
    Some(pair.to_string())
}
