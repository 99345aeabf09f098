//! Thin wrappers over the controller's `imdata` reply shape.
//!
//! Replies look like
//! `{"totalCount": "1", "imdata": [{"fvTenant": {"attributes": {..}, "children": [..]}}]}`.
//! Each `imdata` entry is a single-key object naming the class.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};

/// One managed object and its children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagedObject {
    pub class: String,
    pub attributes: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ManagedObject>,
}

impl ManagedObject {
    /// Parse a `{"<class>": {"attributes": .., "children": ..}}` entry.
    pub fn from_entry(entry: &Value) -> Result<Self> {
        let obj = entry
            .as_object()
            .ok_or_else(|| ClientError::Decode("imdata entry is not an object".into()))?;
        let (class, body) = match obj.iter().next() {
            Some(pair) if obj.len() == 1 => pair,
            _ => {
                return Err(ClientError::Decode(format!(
                    "imdata entry must have exactly one class key, found {}",
                    obj.len()
                )))
            }
        };
        let attributes = body
            .get("attributes")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let children = match body.get("children").and_then(Value::as_array) {
            Some(items) => items
                .iter()
                .map(ManagedObject::from_entry)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        Ok(Self {
            class: class.clone(),
            attributes,
            children,
        })
    }

    /// String attribute by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    pub fn dn(&self) -> Option<&str> {
        self.attr("dn")
    }

    /// This object and all descendants, depth first.
    pub fn walk(&self) -> Vec<&ManagedObject> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

/// A parsed query reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub total_count: u64,
    pub objects: Vec<ManagedObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
}

impl QueryResult {
    pub fn from_body(body: &Value) -> Result<Self> {
        let entries: &[Value] = match body.get("imdata") {
            Some(Value::Array(entries)) => entries.as_slice(),
            Some(_) => return Err(ClientError::Decode("imdata is not an array".into())),
            None => &[],
        };
        let objects = entries
            .iter()
            .map(ManagedObject::from_entry)
            .collect::<Result<Vec<_>>>()?;
        // The controller sends counts and ids as strings.
        let total_count = match body.get("totalCount") {
            Some(Value::String(s)) => s.parse().unwrap_or(objects.len() as u64),
            Some(Value::Number(n)) => n.as_u64().unwrap_or(objects.len() as u64),
            _ => objects.len() as u64,
        };
        let subscription_id = match body.get("subscriptionId") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Ok(Self {
            total_count,
            objects,
            subscription_id,
        })
    }

    pub fn first(&self) -> Option<&ManagedObject> {
        self.objects.first()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
