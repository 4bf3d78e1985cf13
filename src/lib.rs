//! Fire-fighting drone fleet: a dispatcher serving fire events to drones over
//! a UDP request/reply protocol, with incident feeds and injected faults.

pub mod client;
pub mod config;
pub mod drone;
pub mod error;
pub mod event_queue;
pub mod logging;
pub mod producer;
pub mod protocol;
pub mod rpc;
pub mod scheduler;
pub mod server;
pub mod sim;
pub mod types;
pub mod watchdog;
pub mod zones;
