//! Structured logging for the Parley runtime.
//!
//! Handles subscriber setup, log redaction, and lifecycle event logging.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{log_plugin_event, spawn_event_logger};
pub use logger::init_logger;
pub use redact::{log_preview, redact_sensitive_data};
