// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Continuation tokens spanning both stores.
//!
//! Wire format: `base64(legacyToken + "," + unifiedToken)`. Store tokens are
//! themselves base64 and never contain the separator.
//!
//! ```
//! use dualwrite_engine::continuation::{encode, decode};
//! use dualwrite_engine::Store;
//!
//! let token = encode("bGVnYWN5", "dW5pZmllZA==");
//! assert_eq!(decode(&token, Store::Legacy).unwrap(), ("bGVnYWN5".into(), "dW5pZmllZA==".into()));
//! assert_eq!(encode("", ""), "");
//! ```

use base64::{engine::general_purpose, Engine};

use crate::error::MigrationError;
use crate::policy::Store;

pub const SEPARATOR: char = ',';

/// Combine the two stores' tokens into one opaque token.
#[must_use]
pub fn encode(legacy: &str, unified: &str) -> String {
    if legacy.is_empty() && unified.is_empty() {
        return String::new();
    }
    general_purpose::STANDARD.encode(format!("{}{}{}", legacy, SEPARATOR, unified))
}

/// Split a token into `(legacy, unified)`.
///
/// A token without the separator predates combined tokens; it is handed back
/// whole to `authority`, the store currently serving reads.
pub fn decode(token: &str, authority: Store) -> Result<(String, String), MigrationError> {
    if token.is_empty() {
        return Ok((String::new(), String::new()));
    }

    let bytes = general_purpose::STANDARD
        .decode(token)
        .map_err(|e| MigrationError::Invalid(format!("malformed continue token: {}", e)))?;

    // Store cursors may be binary; only a split token has to be text.
    match bytes.iter().position(|&b| b == SEPARATOR as u8) {
        Some(at) => Ok((half(&bytes[..at])?, half(&bytes[at + 1..])?)),
        None => match authority {
            Store::Legacy => Ok((token.to_string(), String::new())),
            Store::Unified => Ok((String::new(), token.to_string())),
        },
    }
}

fn half(bytes: &[u8]) -> Result<String, MigrationError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| MigrationError::Invalid(format!("malformed continue token: {}", e)))
}

/// The piece of a combined token belonging to `store`.
pub fn token_for(token: &str, store: Store, authority: Store) -> Result<String, MigrationError> {
    let (legacy, unified) = decode(token, authority)?;
    Ok(match store {
        Store::Legacy => legacy,
        Store::Unified => unified,
    })
}
