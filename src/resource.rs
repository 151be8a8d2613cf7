// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resource object data structure.
//!
//! A [`ResourceObject`] is the unit the router moves between the legacy and the
//! unified store. Each store assigns its own `uid` and `resource_version`; only
//! the `payload` is meant to agree across stores.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A versioned resource as seen by one store.
///
/// # Example
///
/// ```
/// use dualwrite_engine::ResourceObject;
/// use serde_json::json;
///
/// let mut obj = ResourceObject::new("team-a", json!({"title": "Team A"}));
/// obj.uid = "legacy-uid".into();
/// obj.resource_version = "42".into();
///
/// let forwarded = obj.clone().without_identity();
/// assert!(forwarded.uid.is_empty());
/// assert!(forwarded.resource_version.is_empty());
/// assert!(forwarded.payload_eq(&obj));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceObject {
    /// Name, unique within a store for one resource type
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Store-assigned unique identifier
    #[serde(default)]
    pub uid: String,
    /// Store-assigned opaque version-sequence token
    #[serde(default)]
    pub resource_version: String,
    /// Last write timestamp (epoch millis), store-assigned
    #[serde(default)]
    pub updated_at: i64,
    /// Domain payload
    pub payload: Value,
}

impl ResourceObject {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            uid: String::new(),
            resource_version: String::new(),
            updated_at: 0,
            payload,
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Clear the store-assigned identity so another store can assign its own.
    pub fn clear_identity(&mut self) {
        self.uid.clear();
        self.resource_version.clear();
    }

    #[must_use]
    pub fn without_identity(mut self) -> Self {
        self.clear_identity();
        self
    }

    /// Adopt another copy's store-assigned identity (update-in-place).
    pub fn adopt_identity(&mut self, other: &ResourceObject) {
        self.uid.clone_from(&other.uid);
        self.resource_version.clone_from(&other.resource_version);
    }

    /// Deep payload comparison.
    ///
    /// Object keys compare order-insensitively; identity, versions and
    /// timestamps are ignored.
    #[must_use]
    pub fn payload_eq(&self, other: &ResourceObject) -> bool {
        self.payload == other.payload
    }
}
