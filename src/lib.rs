//! sensor-hub: collects readings from a fixed set of remote producers and
//! serves the latest value per producer plus bounded history.
//!
//! the same crate carries the producer-side agent, so a node and the hub
//! are one binary with a different `cluster.role`.

pub mod agent;
pub mod config;
pub mod domain;
pub mod error;
pub mod hal;
pub mod ingest;
pub mod logging;
pub mod sensor;
pub mod server;
pub mod shutdown;
pub mod snapshot;
pub mod store;
pub mod supervisor;
