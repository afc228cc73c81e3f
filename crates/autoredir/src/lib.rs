//! USB/IP auto-redirection
//!
//! Watches the device set of the local host (export) or of configured remote
//! endpoints (import) and, once a change has settled, binds or attaches every
//! device the filter rules allow.
//!
//! # Example
//!
//! ```no_run
//! use autoredir::action::{ExportAction, Utilities};
//! use autoredir::engine::{AutoRedirEngine, EngineSettings};
//! use common::{SystemRunner, parse_rules};
//!
//! # async fn example() {
//! let action = ExportAction::new(SystemRunner::new(), Utilities::default());
//! let rules = parse_rules(["+ hid", "- *"]);
//! let mut engine = AutoRedirEngine::new(action, rules, EngineSettings::default());
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! engine.run(shutdown_rx).await;
//! # }
//! ```

pub mod action;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod registry;

pub use action::{ActionError, AutoAction, ExportAction, ImportAction, UsbipAction, Utilities};
pub use config::AutoRedirConfig;
pub use debounce::{DebounceState, Debouncer};
pub use engine::{AutoRedirEngine, DispatchReport, EngineSettings, TickOutcome};
pub use registry::{
    DEFAULT_ENDPOINT_RULES, EndpointConfig, ReconcileSummary, RegistryError, RegistryStore,
    ServerEndpoint, ServerRegistry, StoreError, default_endpoint_rules,
};
