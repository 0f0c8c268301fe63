//! # Switchboard: in-process application plumbing
//!
//! Switchboard bundles the small shared services an application wires
//! together once at start-up and then reaches from everywhere:
//!
//! - Named singletons ([`registry`]): every other service is stored here
//!   under a well-known identifier, so independent call sites share one
//!   instance.
//! - Publish/subscribe ([`event::bus`]): topic-addressed synchronous
//!   callbacks with stable, never reused subscriber ids.
//! - Commands ([`event::command`]): request/response on top of the bus,
//!   correlated through a shared sequence counter and resolved as futures.
//! - State ([`store`]): keyed values with explicit save/load to local and
//!   session storage.
//! - Translation ([`i18n`]): per-language tables with namespaces and `{option}`
//!   interpolation.
//! - Runtime mode ([`mode`]): development or production, switching the i18n
//!   diagnostics on and off.
//!
//! ## Wiring
//!
//! ```text
//! SwitchboardConfig ──apply──▶ Registry ◀── Commands / Store / I18n handles
//!                                 │
//!                     "_MODE" "_STORE" "_I18N_STORE" "_COMMAND_BUS_NAME" ...
//! ```
//!
//! Handles are cheap to create: each constructor looks its state up in the
//! registry and only creates it when absent.

pub mod config;
pub mod error;
pub mod event;
pub mod i18n;
pub mod mode;
pub mod registry;
pub mod store;

// Re-exports
pub use error::*;
pub use event::*;
pub use registry::Registry;
