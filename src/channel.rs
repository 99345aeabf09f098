use std::sync::Arc;

use crate::error::{ClientError, Result};
use crate::session::SessionState;
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Header carrying the url token on authenticated requests.
pub const CHALLENGE_HEADER: &str = "APIC-challenge";

/// A decoded reply from the controller.
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub status: u16,
    pub set_cookie: Option<String>,
    pub body: serde_json::Value,
}

impl ApiReply {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Sends requests with the current session's headers attached and decodes
/// the JSON reply. Never mutates the session.
#[derive(Clone)]
pub struct ApiChannel {
    transport: Arc<dyn Transport>,
    session: Arc<SessionState>,
}

impl ApiChannel {
    pub fn new(transport: Arc<dyn Transport>, session: Arc<SessionState>) -> Self {
        Self { transport, session }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub async fn get(&self, path: &str) -> Result<ApiReply> {
        self.send(HttpRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: serde_json::Value) -> Result<ApiReply> {
        self.send(HttpRequest::post(path, body)).await
    }

    async fn send(&self, mut request: HttpRequest) -> Result<ApiReply> {
        request = request.header("Accept", "application/json");
        if let Some(headers) = self.session.auth_headers() {
            request = request
                .header("Cookie", headers.cookie)
                .header(CHALLENGE_HEADER, headers.url_token);
        }
        let resp = self.transport.send(request).await?;
        decode(resp)
    }
}

/// Decode a raw reply. A 200 must carry JSON; other statuses may carry
/// anything, and an undecodable body becomes `null` so the status can still
/// be classified by the caller.
fn decode(resp: HttpResponse) -> Result<ApiReply> {
    let body = if resp.body.is_empty() {
        serde_json::Value::Null
    } else {
        match serde_json::from_slice(&resp.body) {
            Ok(v) => v,
            Err(e) if resp.status == 200 => return Err(ClientError::Decode(e.to_string())),
            Err(_) => serde_json::Value::Null,
        }
    };
    Ok(ApiReply {
        status: resp.status,
        set_cookie: resp.set_cookie,
        body,
    })
}
