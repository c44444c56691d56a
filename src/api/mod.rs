//! API Module
//!
//! REST surface for instance registration, membership and lookups.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
