// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage contracts and backends.
//!
//! - [`traits`]: the resource store, status store and lock service contracts
//! - [`memory`]: in-process implementations of all three
//! - [`redis`]: Redis-backed status store and lock service

pub mod traits;
pub mod memory;
pub mod redis;
