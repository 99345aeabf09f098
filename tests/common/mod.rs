#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apic_client::{
    ApicClient, Credentials, EventStream, HttpRequest, HttpResponse, StreamContext,
    StreamStatus, Timings, Transport,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::json;

/// In-memory controller that answers by path and records every request.
///
/// Logins hand out numbered credentials (`APIC-cookie=C<n>`, token `T<n>`,
/// url token `U<n>`); refreshes hand out `R<n>` tokens and `RC<n>` cookies.
/// Subscribing queries get `S<n>`, one id per distinct query path.
/// Status codes for refreshes and queries can be flipped mid-test.
pub struct MockController {
    calls: Mutex<Vec<HttpRequest>>,
    logins: AtomicUsize,
    refreshes: AtomicUsize,
    subscriptions: Mutex<Vec<String>>,
    pub login_status: AtomicU16,
    pub refresh_status: AtomicU16,
    pub sub_refresh_status: AtomicU16,
    pub query_status: AtomicU16,
    login_delay: Duration,
}

impl MockController {
    pub fn new() -> Arc<Self> {
        Self::with_login_delay(Duration::ZERO)
    }

    pub fn with_login_delay(login_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            logins: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            subscriptions: Mutex::new(Vec::new()),
            login_status: AtomicU16::new(200),
            refresh_status: AtomicU16::new(200),
            sub_refresh_status: AtomicU16::new(200),
            query_status: AtomicU16::new(200),
            login_delay,
        })
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, prefix: &str) -> Vec<HttpRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|r| r.path.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn set(&self, which: &AtomicU16, status: u16) {
        which.store(status, Ordering::SeqCst);
    }

    fn answer(&self, request: &HttpRequest) -> HttpResponse {
        let path = request.path.as_str();
        if path.starts_with("/api/aaaLogin.json") {
            let status = self.login_status.load(Ordering::SeqCst);
            if status != 200 {
                return reply(status, None, json!({"imdata": []}));
            }
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            return reply(
                200,
                Some(format!("APIC-cookie=C{n}; path=/; HttpOnly; Secure")),
                json!({"imdata": [{"aaaLogin": {"attributes": {
                    "token": format!("T{n}"),
                    "urlToken": format!("U{n}"),
                }}}]}),
            );
        }
        if path.starts_with("/api/aaaRefresh.json") {
            let status = self.refresh_status.load(Ordering::SeqCst);
            if status != 200 {
                return reply(status, None, json!({"imdata": []}));
            }
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            return reply(
                200,
                Some(format!("APIC-cookie=RC{n}; path=/")),
                json!({"imdata": [{"aaaLogin": {"attributes": {"token": format!("R{n}")}}}]}),
            );
        }
        if path.starts_with("/api/aaaLogout.json") {
            return reply(200, None, json!({"imdata": []}));
        }
        if path.starts_with("/api/subscriptionRefresh.json") {
            let status = self.sub_refresh_status.load(Ordering::SeqCst);
            return reply(status, None, json!({"imdata": []}));
        }
        if path.starts_with("/api/mo/") || path.starts_with("/api/node/class/") {
            let status = self.query_status.load(Ordering::SeqCst);
            if status != 200 {
                return reply(status, None, json!({"imdata": [{"error": {"attributes": {"code": "400"}}}]}));
            }
            let mut body = json!({
                "totalCount": "1",
                "imdata": [{"fvTenant": {"attributes": {"dn": "uni/tn-common", "name": "common"}}}],
            });
            if path.contains("subscription=yes") {
                body["subscriptionId"] = json!(self.subscription_for(path));
            }
            return reply(200, None, body);
        }
        reply(404, None, json!({"imdata": []}))
    }

    fn subscription_for(&self, path: &str) -> String {
        let target = path.split('?').next().unwrap_or(path).to_string();
        let mut known = self.subscriptions.lock();
        let n = match known.iter().position(|p| *p == target) {
            Some(i) => i + 1,
            None => {
                known.push(target);
                known.len()
            }
        };
        format!("S{n}")
    }
}

fn reply(status: u16, set_cookie: Option<String>, body: serde_json::Value) -> HttpResponse {
    HttpResponse {
        status,
        set_cookie,
        body: Bytes::from(body.to_string()),
    }
}

impl Transport for MockController {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, apic_client::Result<HttpResponse>> {
        self.calls.lock().push(request.clone());
        let delay = if request.path.starts_with("/api/aaaLogin.json") {
            self.login_delay
        } else {
            Duration::ZERO
        };
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(self.answer(&request))
        })
    }
}

/// Stream handler that reports open on start (or never, when told not to)
/// and counts how often it is stopped.
pub struct FakeStream {
    ctx: StreamContext,
    opens: bool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    stopped: AtomicBool,
}

impl FakeStream {
    pub fn new(ctx: StreamContext, opens: bool) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            opens,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn socket_url(&self) -> &str {
        &self.ctx.socket_url
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.cancel.is_cancelled()
    }
}

impl EventStream for FakeStream {
    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.opens {
            self.ctx.session.set_stream_status(StreamStatus::Open);
        }
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.ctx.cancel.cancel();
            self.ctx.session.set_stream_status(StreamStatus::Closed);
        }
    }
}

pub fn timings(auth_refresh: Duration, subscription_refresh: Duration) -> Timings {
    Timings {
        auth_refresh,
        subscription_refresh,
        stream_open_attempts: 3,
        stream_open_backoff: Duration::from_millis(10),
    }
}

/// Client whose loops never fire during a test.
pub fn quiet_client(mock: &Arc<MockController>) -> ApicClient {
    client_with(mock, timings(Duration::from_secs(3600), Duration::from_secs(3600)))
}

pub fn client_with(mock: &Arc<MockController>, timings: Timings) -> ApicClient {
    ApicClient::with_transport(
        mock.clone(),
        "https://apic.test",
        Credentials::new("admin", "pw"),
        timings,
    )
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}
