//! psik — core library.
//!
//! Job-submission layer: a filesystem-backed state machine (`job`,
//! `statuslog`) over a pluggable set of execution `backend`s,
//! orchestrated by a `Manager`. The CLI in `main.rs` is thin glue over
//! this library; it carries no lifecycle logic of its own.
pub mod archive;
pub mod backend;
pub mod callback;
pub mod config;
pub mod error;
pub mod job;
pub mod jobdir;
pub mod manager;
pub mod model;
pub mod statuslog;
