//! # Bot Runtime
//!
//! Wires the storage, session and admission layers into a running bot:
//! configuration, routing, the built-in handlers and the event loop.

pub mod config;
pub mod context;
pub mod eligibility;
pub mod event;
pub mod handlers;
pub mod i18n;
pub mod router;
pub mod runtime;
pub mod transport;

// Re-exports
pub use config::{BackendKind, BotConfig, ConfigError};
pub use context::{BotContext, BotContextBuilder, BuildError};
pub use eligibility::SqliteEligibility;
pub use event::{EventPayload, IncomingEvent};
pub use i18n::{BuiltinCatalog, Localizer};
pub use router::{Handler, HandlerContext, HandlerError, Route, Router};
pub use runtime::{process_event, run, EventOutcome, RunSummary};
pub use transport::{MemoryTransport, OutgoingMessage, StdoutTransport, Transport};
