// src/lib.rs
//! Herald - alert notification delivery to chat, paging, ticketing and
//! messaging integrations.

pub mod alert;
pub mod cli;
pub mod config;
pub mod error;
pub mod notify;
pub mod template;
pub mod transport;

// Re-export commonly used types
pub use alert::{Alert, AlertGroup, AlertStatus, GroupKey, LabelSet};
pub use cli::LogFormat;
pub use error::{ConfigError, NotifyError, TransportError};
pub use notify::{DispatchOutcome, Notifier, NotifierDeps, NotifierRegistry};
pub use template::{RenderContext, TemplateEngine};
