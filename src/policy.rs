// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Routing policy: which store is written, which is read, and how failures of
//! the secondary store are treated.
//!
//! A policy is a tuple of independent switches rather than a closed set of
//! modes. Six named points cover the usual migration path and double as the
//! static policy ids `0..=5`:
//!
//! | id | name | writes | reads | secondary |
//! |----|------|--------|-------|-----------|
//! | 0 | legacy-only | legacy | legacy | n/a |
//! | 1 | shadow-write | both | legacy | detached, tolerant |
//! | 2 | validated dual-write | both | legacy | inline, strict (rollback) |
//! | 3 | migrating-read | both | unified | inline, strict (rollback) |
//! | 4 | unified-primary | both | unified | unified authoritative |
//! | 5 | unified-only | unified | unified | n/a |

use serde::{Deserialize, Serialize};

use crate::status::StatusRecord;

/// Which of the two stores an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Store {
    Legacy,
    Unified,
}

impl Store {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Unified => "unified",
        }
    }

    #[must_use]
    pub fn other(&self) -> Self {
        match self {
            Self::Legacy => Self::Unified,
            Self::Unified => Self::Legacy,
        }
    }
}

impl std::fmt::Display for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub write_legacy: bool,
    pub write_unified: bool,
    pub read_unified: bool,
    /// Write the secondary store inline instead of in a detached task
    pub synchronous_secondary: bool,
    /// Swallow secondary failures instead of surfacing them
    pub error_tolerant: bool,
    /// Unified results are returned to the caller and never rolled back
    pub unified_authoritative: bool,
}

impl RoutingPolicy {
    pub const LEGACY_ONLY: Self = Self {
        write_legacy: true,
        write_unified: false,
        read_unified: false,
        synchronous_secondary: false,
        error_tolerant: true,
        unified_authoritative: false,
    };

    pub const SHADOW_WRITE: Self = Self {
        write_legacy: true,
        write_unified: true,
        read_unified: false,
        synchronous_secondary: false,
        error_tolerant: true,
        unified_authoritative: false,
    };

    pub const VALIDATED_DUAL_WRITE: Self = Self {
        write_legacy: true,
        write_unified: true,
        read_unified: false,
        synchronous_secondary: true,
        error_tolerant: false,
        unified_authoritative: false,
    };

    pub const MIGRATING_READ: Self = Self {
        write_legacy: true,
        write_unified: true,
        read_unified: true,
        synchronous_secondary: true,
        error_tolerant: false,
        unified_authoritative: false,
    };

    pub const UNIFIED_PRIMARY: Self = Self {
        write_legacy: true,
        write_unified: true,
        read_unified: true,
        synchronous_secondary: true,
        error_tolerant: false,
        unified_authoritative: true,
    };

    pub const UNIFIED_ONLY: Self = Self {
        write_legacy: false,
        write_unified: true,
        read_unified: true,
        synchronous_secondary: false,
        error_tolerant: true,
        unified_authoritative: true,
    };

    const CANONICAL: [Self; 6] = [
        Self::LEGACY_ONLY,
        Self::SHADOW_WRITE,
        Self::VALIDATED_DUAL_WRITE,
        Self::MIGRATING_READ,
        Self::UNIFIED_PRIMARY,
        Self::UNIFIED_ONLY,
    ];

    /// Policy for a static configuration id (0–5).
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        Self::CANONICAL.get(id as usize).copied()
    }

    /// The canonical id this policy corresponds to, if it is one of the six points.
    #[must_use]
    pub fn canonical_id(&self) -> Option<u8> {
        Self::CANONICAL.iter().position(|p| p == self).map(|i| i as u8)
    }

    /// Derive the policy of a runtime-configurable type from its status record.
    ///
    /// Dual writes with legacy reads write the unified copy inline but never
    /// fail the caller for it; once reads move to unified, unified is
    /// authoritative.
    #[must_use]
    pub fn from_status(record: &StatusRecord) -> Self {
        match (record.write_legacy, record.write_unified, record.read_unified) {
            (_, false, _) => Self::LEGACY_ONLY,
            (false, true, _) => Self::UNIFIED_ONLY,
            (true, true, false) => Self {
                synchronous_secondary: true,
                ..Self::SHADOW_WRITE
            },
            (true, true, true) => Self::UNIFIED_PRIMARY,
        }
    }

    /// Store that reads are routed to.
    #[must_use]
    pub fn read_store(&self) -> Store {
        if self.read_unified { Store::Unified } else { Store::Legacy }
    }

    /// Whether writes go to both stores.
    #[must_use]
    pub fn is_dual_write(&self) -> bool {
        self.write_legacy && self.write_unified
    }

    /// Store whose result is returned for a write.
    #[must_use]
    pub fn write_authority(&self) -> Store {
        if !self.write_legacy || (self.write_unified && self.unified_authoritative) {
            Store::Unified
        } else {
            Store::Legacy
        }
    }

    /// Id of the canonical point this policy behaves like.
    ///
    /// Runtime-derived tuples are not always exactly canonical; they still get
    /// a stable integer so lock keys agree across instances.
    #[must_use]
    pub fn id(&self) -> u8 {
        if let Some(id) = self.canonical_id() {
            return id;
        }
        match (self.write_legacy, self.write_unified, self.read_unified) {
            (_, false, _) => 0,
            (false, true, _) => 5,
            (true, true, false) if !self.synchronous_secondary || self.error_tolerant => 1,
            (true, true, false) => 2,
            (true, true, true) if self.unified_authoritative => 4,
            (true, true, true) => 3,
        }
    }

    /// Label for logs, metrics and lock keys.
    #[must_use]
    pub fn label(&self) -> String {
        self.id().to_string()
    }
}

impl std::fmt::Display for RoutingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "policy({}: wl={} wu={} ru={} sync={} tolerant={} unified_auth={})",
            self.label(),
            self.write_legacy,
            self.write_unified,
            self.read_unified,
            self.synchronous_secondary,
            self.error_tolerant,
            self.unified_authoritative
        )
    }
}
