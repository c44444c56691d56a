//! Domain layer - Core entity types and port definitions
//!
//! This module defines the instance document, the location parser, and the
//! store trait (port) that backends implement.

pub mod instance;
pub mod location;
pub mod ports;

pub use instance::*;
pub use location::Location;
pub use ports::*;
