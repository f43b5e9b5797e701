//! Dapp identity metadata.
//!
//! `PeerMeta` is the stable identity of a dapp: two sessions belong to the
//! same dapp iff their `PeerMeta` values are structurally equal. Equality is
//! field-wise and independent of the key order the metadata arrived in.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Descriptor a peer announces about itself (name, url, icons).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub icons: Vec<String>,
    /// Fields not modelled above, preserved so they take part in equality
    /// and survive a persistence round trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PeerMeta {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icons.push(icon.into());
        self
    }

    /// Stable SHA-256 hex digest of the canonical JSON form.
    ///
    /// Object keys are emitted in sorted order, so the digest does not depend
    /// on how the metadata was ordered when it was received.
    pub fn fingerprint(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        let mut canonical = String::new();
        write_canonical(&value, &mut canonical);
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }

    /// Short label for logs: the name, falling back to the url.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.url
        } else {
            &self.name
        }
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&Value::String((*key).clone()), out);
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}
