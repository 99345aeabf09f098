//! Client for the APIC REST API.
//!
//! An [`ApicClient`] logs in on first use, keeps its session token fresh in
//! the background, refreshes the subscriptions its queries open, and can
//! attach an event stream that receives the pushed subscription events.
//!
//! ```no_run
//! use apic_client::{ApicClient, ClientConfig, QueryOptions};
//!
//! # async fn run() -> apic_client::Result<()> {
//! let client = ApicClient::new(&ClientConfig::new("10.0.0.1", "admin", "secret"))?;
//! let tenants = client
//!     .lookup_by_class("fvTenant", QueryOptions::new().filter("rsp_subtree", "children"))
//!     .await?;
//! for tenant in &tenants.objects {
//!     println!("{}", tenant.dn().unwrap_or_default());
//! }
//! client.logout().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod session;
pub mod stream;
pub mod task;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::{ApicClient, Timings};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use model::{ManagedObject, QueryResult};
pub use query::{LookupRequest, QueryOptions};
pub use session::{Credentials, SessionState, StreamStatus};
pub use stream::{EventStream, StreamContext, WebSocketStream};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, Transport};
