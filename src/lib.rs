//! # StashKV
//!
//! A static, file-backed, set-associative hashtable with:
//! - Bulk-load-once / query-many design (no mutation after publish)
//! - 7-bit slot marks scanned 8-at-a-time with a SWAR routine
//! - Lock-free multi-threaded builds (per-slot CAS, one worker per stream)
//! - Pipelined batched lookups with prefetch-ahead windows
//! - Incremental rebuilds that merge an existing artifact with new inputs
//!
//! ## Architecture Overview
//!
//! ```text
//!              build                              query
//! ┌──────────────────────────┐      ┌──────────────────────────────┐
//! │  DataReader streams      │      │  Hashtable (mmap or owned)   │
//! │   │  one worker each     │      │   │                          │
//! │   ▼                      │      │   ▼                          │
//! │  ┌────────┐ ┌─────────┐  │      │  ┌──────┐  ┌─────────────┐   │
//! │  │ Guide  │ │ Content │  │      │  │ View │─▶│ search      │   │
//! │  │ (CAS)  │ │ (lines) │  │      │  └──────┘  │ batch_search│   │
//! │  └───┬────┘ └────┬────┘  │      │            │ batch_fetch │   │
//! │      └─────┬─────┘       │      │            └─────────────┘   │
//! │            ▼             │      └──────────────────────────────┘
//! │       DataWriter sink    │
//! └──────────────────────────┘
//! ```
//!
//! Three artifact shapes share one format: a pure key set, a fixed-length
//! inline key/value dictionary, and a key/variable-length value dictionary
//! whose values live in a trailing extend region.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod io;
pub(crate) mod hash;
pub mod table;
pub mod build;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StashError};
pub use config::LoadPolicy;
pub use io::{DataReader, DataWriter, FileWriter, Record, SliceReader};
pub use table::{Hashtable, TableKind, MAX_INLINE_VALUE_LEN, MAX_KEY_LEN, MAX_VALUE_LEN};
pub use build::{build_dict, build_dict_varied, build_set};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of StashKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
