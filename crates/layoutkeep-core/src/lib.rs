//! layoutkeep-core: Core library for layoutkeep
//!
//! Captures the complete window and pane arrangement of a multi-window
//! document editor into a portable snapshot, stores it, and rebuilds it later
//! on a possibly different screen, even after documents were moved or
//! renamed.
//!
//! # Architecture
//!
//! ```text
//! LayoutHost ─→ Capturer ─→ Snapshot ─→ ArrangementStore (debounced) ─→ backend
//!                              │    └──→ wire (compact) ─→ document front matter
//!                              ↓
//!               Restorer (FileResolver, CoordinateTransformer) ─→ LayoutHost
//! ```
//!
//! # Modules
//!
//! - `snapshot`: Versioned snapshot model and the v1 upgrade
//! - `geometry`: Virtual coordinate frame, validation and tiling
//! - `resolver`: Path → stable id → unique name document resolution
//! - `host`: The host adapter trait and an in-memory host
//! - `capture`: Live layout → snapshot
//! - `restore`: Snapshot → live layout, in ordered stages
//! - `store`: Bounded per-key history with debounced persistence
//! - `backup`: Whole-store backup files
//! - `wire`: Compact base64 snapshot encoding
//! - `document`: Arrangement context and stable ids inside documents
//! - `service`: Save/restore calling layer with self-healing
//! - `config`: Configuration management
//! - `logging`: Tracing subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod backup;
pub mod capture;
pub mod config;
pub mod document;
pub mod error;
pub mod geometry;
pub mod host;
pub mod logging;
pub mod resolver;
pub mod restore;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod wire;

pub use error::{Error, Result};

/// Version of the layoutkeep-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
