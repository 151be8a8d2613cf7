// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pairing of the two full listings by name.

use std::collections::BTreeMap;

use crate::resource::ResourceObject;
use crate::storage::traits::UpdateRequest;

/// What a pass does to bring unified in line with legacy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Both copies agree (or neither exists).
    None,
    /// Unified is missing or holds a different payload.
    Upsert,
    /// Unified holds an object legacy no longer has.
    Delete,
}

impl SyncAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

/// One object name with whatever each store holds for it.
#[derive(Debug, Clone, Default)]
pub struct SyncItem {
    pub name: String,
    pub legacy: Option<ResourceObject>,
    pub unified: Option<ResourceObject>,
}

impl SyncItem {
    #[must_use]
    pub fn action(&self) -> SyncAction {
        match (&self.legacy, &self.unified) {
            (Some(legacy), Some(unified)) if legacy.payload_eq(unified) => SyncAction::None,
            (Some(_), _) => SyncAction::Upsert,
            (None, Some(_)) => SyncAction::Delete,
            (None, None) => SyncAction::None,
        }
    }

    /// The write that makes unified match legacy.
    ///
    /// The legacy copy takes the unified copy's identity, so a unified object
    /// modified since it was listed fails with a conflict instead of being
    /// overwritten blind. A missing unified copy is created.
    #[must_use]
    pub fn upsert_request(&self) -> Option<UpdateRequest> {
        let mut next = self.legacy.clone()?;
        match &self.unified {
            Some(unified) => next.adopt_identity(unified),
            None => next.clear_identity(),
        }
        Some(UpdateRequest::replace(next).force_create())
    }
}

/// Pair both listings by name, in name order.
pub fn pair(legacy: Vec<ResourceObject>, unified: Vec<ResourceObject>) -> Vec<SyncItem> {
    let mut items: BTreeMap<String, SyncItem> = BTreeMap::new();

    for obj in legacy {
        let item = items.entry(obj.name.clone()).or_default();
        item.name.clone_from(&obj.name);
        item.legacy = Some(obj);
    }
    for obj in unified {
        let item = items.entry(obj.name.clone()).or_default();
        item.name.clone_from(&obj.name);
        item.unified = Some(obj);
    }

    items.into_values().collect()
}
