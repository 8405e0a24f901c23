// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # crosswalk
//!
//! A client for curating relationships between elements of reference
//! documents (standards catalogs, control frameworks, technique matrices).
//! A curator walks the elements of a *target* document one by one, picks
//! related elements from a searchable *source* document, and commits each
//! batch under an auto-generated provenance document.
//!
//! ## Architecture
//!
//! - **Gateway** (`client`): typed operations over one `Transport` primitive;
//!   HTTP via `ureq`, or the in-process `demo` service
//! - **Session store** (`session`): the only place session state changes;
//!   every mutation bumps a version the renderer keys off
//! - **Transfer codec** (`transfer`): versioned drag payloads with legacy and
//!   positional fallbacks
//! - **Commit workflow** (`commit`): validate, create provenance, bulk save
//! - **Controller** (`controller`): intents in, background jobs out (`loader`)
//! - **TUI** (`tui`): ratatui projection of the controller state
//!
//! ## Library usage
//!
//! ```no_run
//! use crosswalk::client::Gateway;
//! use crosswalk::controller::{ControllerOptions, MappingController};
//! use crosswalk::demo::DemoService;
//! use crosswalk::loader::LoadMode;
//!
//! let mut mapper = MappingController::new(
//!     Gateway::new(DemoService::seeded()),
//!     ControllerOptions { mode: LoadMode::Inline, ..Default::default() },
//! );
//! mapper.open();
//! mapper.select_target_document("CSF").unwrap();
//! mapper.select_source_document("ATTACK").unwrap();
//! mapper.grab(0);
//! mapper.drop_grabbed();
//! mapper.cycle_relationship_type();
//! mapper.save().unwrap();
//! ```

pub mod client;
pub mod commit;
pub mod config;
pub mod controller;
pub mod demo;
pub mod error;
pub mod export;
pub mod loader;
pub mod model;
pub mod notice;
pub mod paths;
pub mod provenance;
pub mod session;
pub mod transfer;
pub mod tui;
