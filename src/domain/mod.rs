//! Domain layer - Core types and port definitions
//!
//! This module defines the desired/observed LUN model and the traits (ports)
//! that gateway adapters implement, following hexagonal architecture
//! principles.

pub mod element;
pub mod model;
pub mod ports;

pub use element::*;
pub use model::*;
pub use ports::*;
