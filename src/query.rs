//! Lookup targets and querystring encoding.

use crate::error::{ClientError, Result};

/// Options appended to a lookup as querystring pairs.
///
/// Keys use `_` in code and are sent with `-` (`order_by` becomes
/// `order-by`). Pairs keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    filters: Vec<(String, String)>,
    subscribe: bool,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter pair. A repeated key replaces the earlier value.
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.filters.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.filters.push((key, value)),
        }
        self
    }

    /// Ask the controller for a live subscription on the result set.
    pub fn subscribe(mut self, subscribe: bool) -> Self {
        self.subscribe = subscribe;
        self
    }

    pub fn is_subscribe(&self) -> bool {
        self.subscribe
    }

    pub fn filters(&self) -> &[(String, String)] {
        &self.filters
    }

    /// Encode as `key=value&...` with wire key names.
    ///
    /// Values are passed through as given; the controller's filter syntax
    /// uses characters that must not be escaped here.
    pub fn to_query_string(&self) -> String {
        let mut pairs: Vec<String> = self
            .filters
            .iter()
            .map(|(k, v)| format!("{}={}", wire_key(k), v))
            .collect();
        if self.subscribe {
            pairs.push("subscription=yes".to_string());
        }
        pairs.join("&")
    }
}

/// Translate an option key to its wire form.
pub fn wire_key(key: &str) -> String {
    key.replace('_', "-")
}

/// What to look up: a single object by distinguished name, or every object
/// of a class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupRequest {
    pub dn: Option<String>,
    pub class: Option<String>,
    pub options: QueryOptions,
}

impl LookupRequest {
    pub fn dn(dn: impl Into<String>) -> Self {
        Self {
            dn: Some(dn.into()),
            ..Default::default()
        }
    }

    pub fn class(class: impl Into<String>) -> Self {
        Self {
            class: Some(class.into()),
            ..Default::default()
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Request path including the querystring.
    ///
    /// A dn wins over a class when both are set. Fails when neither is set,
    /// or when the one given is blank.
    pub fn path(&self) -> Result<String> {
        let base = match (non_blank(&self.dn), non_blank(&self.class)) {
            (Some(dn), _) => format!("/api/mo/{}.json", dn.trim_matches('/')),
            (None, Some(class)) => format!("/api/node/class/{}.json", class),
            (None, None) => {
                return Err(ClientError::InvalidLookupRequest(
                    "either a dn or a class is required".into(),
                ))
            }
        };
        Ok(format!("{}?{}", base, self.options.to_query_string()))
    }
}

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Path of a generic command: `POST /api/<name>.json`.
pub fn command_path(name: &str) -> Result<String> {
    let name = name.trim().trim_matches('/');
    if name.is_empty() {
        return Err(ClientError::InvalidLookupRequest(
            "command name must not be empty".into(),
        ));
    }
    let name = name.strip_suffix(".json").unwrap_or(name);
    Ok(format!("/api/{}.json", name))
}

/// Path of the subscription refresh for `id`.
pub fn subscription_refresh_path(id: &str) -> String {
    format!("/api/subscriptionRefresh.json?id={}", id)
}
