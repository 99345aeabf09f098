//! The controller client.
//!
//! [`ApicClient`] is the call surface for queries. It logs in on demand,
//! keeps the session token fresh with a background loop, keeps live
//! subscriptions alive with a second loop, and owns the optional event
//! stream. Clones share one session.
//!
//! Failure handling:
//! - A query that gets a non-200 resets the session; the next call logs in
//!   again.
//! - A refresh loop that gets a non-200 resets the session and stops itself.
//!   A failed subscription refresh also stops the event stream.
//! - Transport and decode errors are returned to foreground callers without
//!   touching the session; background loops log them and try again next
//!   cycle.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::auth::Authenticator;
use crate::channel::ApiChannel;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::model::QueryResult;
use crate::query::{command_path, subscription_refresh_path, LookupRequest, QueryOptions};
use crate::session::{Credentials, SessionState, StreamStatus};
use crate::stream::{socket_url, EventStream, StreamContext};
use crate::task::LoopSlot;
use crate::transport::{HttpTransport, Transport};

/// Loop intervals and stream-open polling.
#[derive(Debug, Clone)]
pub struct Timings {
    pub auth_refresh: Duration,
    pub subscription_refresh: Duration,
    pub stream_open_attempts: u32,
    pub stream_open_backoff: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            auth_refresh: Duration::from_secs(360),
            subscription_refresh: Duration::from_secs(30),
            stream_open_attempts: 5,
            stream_open_backoff: Duration::from_secs(1),
        }
    }
}

impl From<&ClientConfig> for Timings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            auth_refresh: config.auth_refresh_interval(),
            subscription_refresh: config.subscription_refresh_interval(),
            stream_open_attempts: config.stream_open_attempts.max(1),
            stream_open_backoff: config.stream_open_backoff(),
        }
    }
}

type StreamSlot = Arc<Mutex<Option<Arc<dyn EventStream>>>>;

struct Inner {
    session: Arc<SessionState>,
    channel: ApiChannel,
    auth: Authenticator,
    base_url: String,
    timings: Timings,
    /// Serializes logins so concurrent first calls share one.
    login_gate: tokio::sync::Mutex<()>,
    auth_refresh: LoopSlot,
    subscription_refresh: LoopSlot,
    stream: StreamSlot,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.auth_refresh.stop();
        self.subscription_refresh.stop();
        if let Some(stream) = self.stream.lock().take() {
            stream.stop();
        }
    }
}

enum Call {
    Get(String),
    Post(String, serde_json::Value),
}

/// Authenticated client for one controller.
#[derive(Clone)]
pub struct ApicClient {
    inner: Arc<Inner>,
}

impl ApicClient {
    /// Build a client that talks HTTPS to the configured controller.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = config.base_url();
        let transport = HttpTransport::new(base_url.clone(), config.verify_tls)?;
        Ok(Self::with_transport(
            Arc::new(transport),
            base_url,
            config.credentials(),
            Timings::from(config),
        ))
    }

    /// Build a client over any transport.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        credentials: Credentials,
        timings: Timings,
    ) -> Self {
        let base_url = base_url.into();
        let session = Arc::new(SessionState::new(host_of(&base_url), credentials));
        let channel = ApiChannel::new(transport, session.clone());
        let auth = Authenticator::new(channel.clone());
        Self {
            inner: Arc::new(Inner {
                session,
                channel,
                auth,
                base_url,
                timings,
                login_gate: tokio::sync::Mutex::new(()),
                auth_refresh: LoopSlot::new("auth-refresh"),
                subscription_refresh: LoopSlot::new("subscription-refresh"),
                stream: Arc::new(Mutex::new(None)),
            }),
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.inner.session
    }

    pub fn auth_refresh_loop(&self) -> &LoopSlot {
        &self.inner.auth_refresh
    }

    pub fn subscription_refresh_loop(&self) -> &LoopSlot {
        &self.inner.subscription_refresh
    }

    pub fn is_auth_refresh_running(&self) -> bool {
        self.inner.auth_refresh.is_running()
    }

    pub fn is_subscription_refresh_running(&self) -> bool {
        self.inner.subscription_refresh.is_running()
    }

    /// Log in unless already authenticated, and make sure the token refresh
    /// loop is running for this session.
    pub async fn ensure_authenticated(&self) -> Result<()> {
        if !self.inner.session.is_authenticated() {
            let _gate = self.inner.login_gate.lock().await;
            // Another caller may have logged in while we waited.
            if !self.inner.session.is_authenticated() {
                self.inner.auth.login().await?;
            }
        }
        self.start_auth_refresh();
        Ok(())
    }

    /// Look up a single object by dn, or all objects of a class.
    pub async fn lookup(&self, request: &LookupRequest) -> Result<QueryResult> {
        let path = request.path()?;
        self.dispatch(Call::Get(path), request.options.is_subscribe())
            .await
    }

    /// Look up every object of `class`.
    pub async fn lookup_by_class(
        &self,
        class: &str,
        options: QueryOptions,
    ) -> Result<QueryResult> {
        self.lookup(&LookupRequest::class(class).with_options(options))
            .await
    }

    /// Post `args` to `/api/<name>.json`.
    pub async fn command(&self, name: &str, args: serde_json::Value) -> Result<QueryResult> {
        let path = command_path(name)?;
        self.dispatch(Call::Post(path, args), false).await
    }

    async fn dispatch(&self, call: Call, subscribe: bool) -> Result<QueryResult> {
        self.ensure_authenticated().await?;

        let session = &self.inner.session;
        let (reply, path) = match call {
            Call::Get(path) => (self.inner.channel.get(&path).await?, path),
            Call::Post(path, body) => (self.inner.channel.post(&path, body).await?, path),
        };
        if !reply.is_ok() {
            tracing::warn!(path = %path, status = reply.status, "query failed, resetting session");
            session.reset();
            return Err(ClientError::QueryFailure {
                status: reply.status,
            });
        }

        let result = QueryResult::from_body(&reply.body)?;
        if subscribe {
            if let Some(id) = &result.subscription_id {
                if session.add_subscription(id) {
                    tracing::debug!(subscription = %id, "tracking subscription");
                    self.start_subscription_refresh();
                }
            }
        }
        Ok(result)
    }

    /// Build and start an event stream, then wait for it to report open.
    pub async fn setup_stream<F>(&self, factory: F) -> Result<()>
    where
        F: FnOnce(StreamContext) -> Arc<dyn EventStream>,
    {
        self.ensure_authenticated().await?;
        let session = &self.inner.session;
        let (epoch, token) = match (session.epoch(), session.auth_token()) {
            (Some(epoch), Some(token)) => (epoch, token),
            _ => {
                return Err(ClientError::AuthFailure(
                    "session reset during stream setup".into(),
                ))
            }
        };

        self.stop_stream();
        let ctx = StreamContext {
            session: session.clone(),
            socket_url: socket_url(&self.inner.base_url, &token),
            cancel: epoch.child_token(),
        };
        let handler = factory(ctx);
        session.set_stream_status(StreamStatus::Opening);
        *self.inner.stream.lock() = Some(handler.clone());
        handler.start();

        let attempts = self.inner.timings.stream_open_attempts.max(1);
        for attempt in 1..=attempts {
            if session.stream_status() == StreamStatus::Open {
                return Ok(());
            }
            tracing::debug!(attempt, "waiting for event stream to open");
            tokio::time::sleep(self.inner.timings.stream_open_backoff).await;
        }
        if session.stream_status() == StreamStatus::Open {
            return Ok(());
        }

        tracing::warn!(attempts, "event stream did not open");
        self.stop_stream();
        Err(ClientError::WsOpenFailure { attempts })
    }

    /// Stop the event stream, if one is set up.
    pub fn stop_stream(&self) {
        if let Some(stream) = self.inner.stream.lock().take() {
            stream.stop();
        }
    }

    /// Log out on the controller and drop the local session.
    pub async fn logout(&self) -> Result<()> {
        self.inner.auth_refresh.stop();
        self.inner.subscription_refresh.stop();
        self.stop_stream();
        if !self.inner.session.is_authenticated() {
            self.inner.session.reset();
            return Ok(());
        }
        self.inner.auth.logout().await
    }

    /// Stop background work and drop the local session without contacting
    /// the controller.
    pub fn shutdown(&self) {
        self.inner.auth_refresh.stop();
        self.inner.subscription_refresh.stop();
        self.stop_stream();
        self.inner.session.reset();
        tracing::debug!(host = %self.inner.session.host(), "client shut down");
    }

    fn start_auth_refresh(&self) {
        let Some(epoch) = self.inner.session.epoch() else {
            return;
        };
        let auth = self.inner.auth.clone();
        let session = self.inner.session.clone();
        let started = self.inner.auth_refresh.start(
            &epoch,
            self.inner.timings.auth_refresh,
            move || {
                let auth = auth.clone();
                let session = session.clone();
                async move { auth_refresh_cycle(&auth, &session).await }
            },
        );
        if started {
            tracing::debug!(interval = ?self.inner.timings.auth_refresh, "token refresh loop started");
        }
    }

    fn start_subscription_refresh(&self) {
        let Some(epoch) = self.inner.session.epoch() else {
            return;
        };
        let channel = self.inner.channel.clone();
        let stream = self.inner.stream.clone();
        let started = self.inner.subscription_refresh.start(
            &epoch,
            self.inner.timings.subscription_refresh,
            move || {
                let channel = channel.clone();
                let stream = stream.clone();
                async move { subscription_refresh_cycle(&channel, &stream).await }
            },
        );
        if started {
            tracing::debug!(
                interval = ?self.inner.timings.subscription_refresh,
                "subscription refresh loop started"
            );
        }
    }
}

async fn auth_refresh_cycle(auth: &Authenticator, session: &SessionState) -> ControlFlow<()> {
    if !session.is_authenticated() {
        tracing::debug!("session gone, token refresh loop exiting");
        return ControlFlow::Break(());
    }
    match auth.refresh().await {
        Ok(()) => {
            tracing::debug!(host = %session.host(), "session token refreshed");
            ControlFlow::Continue(())
        }
        Err(e) if e.invalidates_session() => {
            tracing::warn!(host = %session.host(), error = %e, "token refresh failed, resetting session");
            session.reset();
            ControlFlow::Break(())
        }
        Err(e) => {
            tracing::warn!(host = %session.host(), error = %e, "token refresh errored, retrying next cycle");
            ControlFlow::Continue(())
        }
    }
}

async fn subscription_refresh_cycle(channel: &ApiChannel, stream: &StreamSlot) -> ControlFlow<()> {
    let session = channel.session();
    if !session.is_authenticated() {
        tracing::debug!("session gone, subscription refresh loop exiting");
        return ControlFlow::Break(());
    }
    for id in session.subscription_ids() {
        let failure = match channel.get(&subscription_refresh_path(&id)).await {
            Ok(reply) if reply.is_ok() => continue,
            Ok(reply) => ClientError::SubRefreshFailure {
                id,
                status: reply.status,
            },
            Err(e) => {
                tracing::warn!(subscription = %id, error = %e, "subscription refresh errored, retrying next cycle");
                return ControlFlow::Continue(());
            }
        };

        tracing::warn!(error = %failure, "subscription refresh failed, resetting session");
        let handler = stream.lock().take();
        if let Some(handler) = handler {
            handler.stop();
        }
        session.reset();
        return ControlFlow::Break(());
    }
    ControlFlow::Continue(())
}

fn host_of(base_url: &str) -> String {
    base_url
        .strip_prefix("https://")
        .or_else(|| base_url.strip_prefix("http://"))
        .unwrap_or(base_url)
        .split('/')
        .next()
        .unwrap_or(base_url)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedTransport;

    fn client(t: Arc<ScriptedTransport>) -> ApicClient {
        ApicClient::with_transport(
            t,
            "https://apic.test",
            Credentials::new("admin", "pw"),
            Timings {
                auth_refresh: Duration::from_secs(3600),
                subscription_refresh: Duration::from_secs(3600),
                stream_open_attempts: 2,
                stream_open_backoff: Duration::from_millis(5),
            },
        )
    }

    #[test]
    fn host_of_strips_scheme_and_path() {
        assert_eq!(host_of("https://10.0.0.1/"), "10.0.0.1");
        assert_eq!(host_of("http://127.0.0.1:8080"), "127.0.0.1:8080");
        assert_eq!(host_of("apic.lab"), "apic.lab");
    }

    #[test]
    fn timings_from_config() {
        let mut config = ClientConfig::new("h", "u", "p");
        config.auth_refresh_secs = 10;
        config.stream_open_attempts = 0;
        let t = Timings::from(&config);
        assert_eq!(t.auth_refresh, Duration::from_secs(10));
        assert_eq!(t.stream_open_attempts, 1);
    }

    #[tokio::test]
    async fn invalid_lookup_does_no_io() {
        let t = Arc::new(ScriptedTransport::new());
        let c = client(t.clone());
        let err = c.lookup(&LookupRequest::default()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidLookupRequest(_)));
        assert!(t.requests().is_empty());
        assert!(!c.session().is_authenticated());
    }

    #[tokio::test]
    async fn failed_login_skips_query() {
        let t = Arc::new(ScriptedTransport::new());
        t.push(401, None, "");
        let c = client(t.clone());
        let err = c.lookup(&LookupRequest::dn("uni")).await.unwrap_err();
        assert!(matches!(err, ClientError::AuthFailure(_)));
        assert_eq!(t.requests().len(), 1);
        assert!(!c.is_auth_refresh_running());
    }

    #[tokio::test]
    async fn command_posts_body() {
        let t = Arc::new(ScriptedTransport::new());
        t.push_login("APIC-cookie=C1", "T1", "U1");
        t.push(200, None, r#"{"totalCount":"0","imdata":[]}"#);
        let c = client(t.clone());

        let body = serde_json::json!({"fvTenant": {"attributes": {"name": "demo"}}});
        c.command("mo/uni", body.clone()).await.unwrap();

        let sent = t.requests();
        assert_eq!(sent[1].path, "/api/mo/uni.json");
        assert_eq!(sent[1].body.as_ref(), Some(&body));
        c.shutdown();
    }

    #[tokio::test]
    async fn query_failure_resets_session() {
        let t = Arc::new(ScriptedTransport::new());
        t.push_login("APIC-cookie=C1", "T1", "U1");
        t.push(400, None, r#"{"imdata":[{"error":{"attributes":{"text":"bad filter"}}}]}"#);
        let c = client(t.clone());

        let err = c
            .lookup_by_class("fvTenant", QueryOptions::new().filter("query_target_filter", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::QueryFailure { status: 400 }));
        assert!(!c.session().is_authenticated());
        assert!(!c.is_auth_refresh_running());
    }

    #[tokio::test]
    async fn decode_error_keeps_session() {
        let t = Arc::new(ScriptedTransport::new());
        t.push_login("APIC-cookie=C1", "T1", "U1");
        t.push(200, None, "<html/>");
        let c = client(t.clone());

        let err = c.lookup(&LookupRequest::dn("uni")).await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
        assert!(c.session().is_authenticated());
        c.shutdown();
    }

    #[tokio::test]
    async fn subscribe_registers_id_once() {
        let t = Arc::new(ScriptedTransport::new());
        t.push_login("APIC-cookie=C1", "T1", "U1");
        t.push(200, None, r#"{"totalCount":"0","subscriptionId":"77","imdata":[]}"#);
        t.push(200, None, r#"{"totalCount":"0","subscriptionId":"77","imdata":[]}"#);
        let c = client(t.clone());
        let opts = QueryOptions::new().subscribe(true);

        c.lookup_by_class("fvTenant", opts.clone()).await.unwrap();
        c.lookup_by_class("fvTenant", opts).await.unwrap();

        assert_eq!(c.session().subscription_ids(), vec!["77".to_string()]);
        assert_eq!(c.subscription_refresh_loop().starts(), 1);
        assert!(t.paths()[1].ends_with("subscription=yes"));
        c.shutdown();
    }

    #[tokio::test]
    async fn subscription_id_ignored_without_subscribe() {
        let t = Arc::new(ScriptedTransport::new());
        t.push_login("APIC-cookie=C1", "T1", "U1");
        t.push(200, None, r#"{"totalCount":"0","subscriptionId":"77","imdata":[]}"#);
        let c = client(t.clone());

        c.lookup(&LookupRequest::class("fvTenant")).await.unwrap();
        assert!(c.session().subscription_ids().is_empty());
        assert!(!c.is_subscription_refresh_running());
        c.shutdown();
    }

    #[tokio::test]
    async fn refresh_transport_error_keeps_session() {
        let t = Arc::new(ScriptedTransport::new());
        t.push_login("APIC-cookie=C1", "T1", "U1");
        t.push(200, None, r#"{"imdata":[]}"#);
        let c = ApicClient::with_transport(
            t.clone(),
            "https://apic.test",
            Credentials::new("admin", "pw"),
            Timings {
                auth_refresh: Duration::from_millis(10),
                ..Timings::default()
            },
        );

        c.lookup(&LookupRequest::dn("uni")).await.unwrap();
        // The queue is now empty, so every refresh fails at the transport.
        tokio::time::timeout(Duration::from_secs(5), async {
            while t.requests().len() < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(c.session().is_authenticated());
        assert!(c.is_auth_refresh_running());
        c.shutdown();
    }

    #[tokio::test]
    async fn logout_stops_loops() {
        let t = Arc::new(ScriptedTransport::new());
        t.push_login("APIC-cookie=C1", "T1", "U1");
        t.push(200, None, r#"{"imdata":[]}"#);
        t.push(200, None, "");
        let c = client(t.clone());

        c.lookup(&LookupRequest::dn("uni")).await.unwrap();
        assert!(c.is_auth_refresh_running());

        c.logout().await.unwrap();
        assert!(!c.is_auth_refresh_running());
        assert!(!c.session().is_authenticated());
        assert_eq!(t.paths()[2], crate::auth::LOGOUT_PATH);
    }

    #[tokio::test]
    async fn logout_without_session_is_local() {
        let t = Arc::new(ScriptedTransport::new());
        let c = client(t.clone());
        c.logout().await.unwrap();
        assert!(t.requests().is_empty());
    }
}
