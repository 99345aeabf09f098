//! In-memory transport for unit tests.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::{ClientError, Result};
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Replies with queued responses in order and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, status: u16, set_cookie: Option<&str>, body: &str) {
        self.replies.lock().push_back(HttpResponse {
            status,
            set_cookie: set_cookie.map(|s| s.to_string()),
            body: Bytes::from(body.to_string()),
        });
    }

    pub fn push_login(&self, cookie: &str, token: &str, url_token: &str) {
        self.push(
            200,
            Some(&format!("{cookie}; path=/; HttpOnly; HttpOnly; Secure")),
            &login_body(token, url_token),
        );
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.path.clone()).collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        self.requests.lock().push(request);
        let reply = self.replies.lock().pop_front();
        Box::pin(async move {
            reply.ok_or_else(|| ClientError::Transport("no scripted reply".into()))
        })
    }
}

pub fn login_body(token: &str, url_token: &str) -> String {
    serde_json::json!({
        "totalCount": "1",
        "imdata": [{
            "aaaLogin": {
                "attributes": {
                    "token": token,
                    "urlToken": url_token,
                    "refreshTimeoutSeconds": "600",
                }
            }
        }]
    })
    .to_string()
}
