//! LUN Reconciler
//!
//! Declarative reconciliation of block-storage LUNs on an ONTAP storage
//! controller, over the legacy ZAPI interface and the REST application
//! template interface.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                Host parameters (YAML / JSON)                       │
//! │                 LunParams ──► DesiredState                         │
//! ├───────────────────────────────────────────────────────────────────┤
//! │                          Reconciler                                │
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────────────┐  │
//! │  │    State     │──►│   decide()   │──►│    Action Executor    │  │
//! │  │  Discovery   │   │    (pure)    │   │ rename→resize→modify  │  │
//! │  └──────┬───────┘   └──────────────┘   └───────────┬───────────┘  │
//! ├─────────┼──────────────────────────────────────────┼──────────────┤
//! │         ▼               Gateway ports              ▼              │
//! │  ┌─────────────────────────┐   ┌───────────────────────────────┐  │
//! │  │ ManagementGateway (ZAPI)│   │ ApplicationGateway (REST san) │  │
//! │  └─────────────────────────┘   └───────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: discovery, decision, execution and gateway adapters
//! - [`domain`]: core domain types and port traits
//! - [`params`]: host parameter document and normalization
//! - [`error`]: error types and classification

pub mod controlplane;
pub mod domain;
pub mod error;
pub mod params;

// Re-export commonly used types
pub use controlplane::{
    decide, Action, ActionExecutor, ConnectionConfig, Decision, Discovered, GatewayFactory,
    InMemoryController, ReconcileOutcome, Reconciler, ReconcilerConfig, ResizeOutcome,
    StateDiscovery,
};

pub use domain::model::{
    AttributeKind, AttributeValue, CurrentRecord, DesiredState, LunState, OwnershipMode, SizeUnit,
};

pub use domain::ports::{ApplicationGateway, AuditSink, ManagementGateway};

pub use error::{Error, ErrorClass, Result};

pub use params::LunParams;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
