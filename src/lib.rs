//! Instance Discovery - World Instance Registry
//!
//! Tracks live game world instances for matchmaking and social discovery:
//! registration, membership, liveness and lookups by world, player and
//! short name. Instances are ephemeral JSON documents indexed for search.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          REST API (axum)                            │
//! │      /register  /unregister  /player  /world  /s  /ping  /block     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                        Instance Registry                            │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐   │
//! │  │    Lifecycle     │  │   Secure Names   │  │     Metrics      │   │
//! │  └────────┬─────────┘  └──────────────────┘  └──────────────────┘   │
//! │           │                                                         │
//! │  ┌────────┴─────────┐  ┌──────────────────┐                         │
//! │  │  InstanceStore   │──│  Search Queries  │                         │
//! │  │      (port)      │  │  and Replies     │                         │
//! │  └────────┬─────────┘  └──────────────────┘                         │
//! ├───────────┼─────────────────────────────────────────────────────────┤
//! │  ┌────────┴───────────────────┐  ┌──────────────────────────────┐   │
//! │  │  Redis (JSON + Search)     │  │  Memory (DashMap)            │   │
//! │  └────────────────────────────┘  └──────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`api`]: REST routes and server
//! - [`domain`]: Instance documents, location strings and the store port
//! - [`registry`]: Lifecycle operations over a store
//! - [`search`]: Tag queries and search reply decoding
//! - [`store`]: Redis and in-memory store backends
//! - [`error`]: Error types and handling

pub mod api;
pub mod domain;
pub mod error;
pub mod registry;
pub mod search;
pub mod store;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use domain::{
    InstanceStore, InstanceType, InstanceUpdate, Location, PlayerCount, SharedInstanceStore,
    UpdateOutcome, WorldInstance,
};

pub use error::{Error, Result};

pub use registry::{InstanceRegistry, MonotonicClock, RegistryConfig, RegistryMetrics};

pub use search::{SearchQuery, TagField};

pub use store::{
    MemoryInstanceStore, RedisInstanceStore, RedisStoreConfig, StoreBackend, StoreFactory,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
