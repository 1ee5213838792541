//! Reconciliation Control Plane
//!
//! Discovery, decision and execution for one desired LUN, plus the gateway
//! adapters they run against.

pub mod backends;
pub mod decision;
pub mod discovery;
pub mod executor;
pub mod reconciler;

pub use backends::*;
pub use decision::*;
pub use discovery::*;
pub use executor::*;
pub use reconciler::*;
