//! Failover Transport — a resilient, composite transport that presents a
//! single logical connection while, underneath, selecting, establishing,
//! monitoring, and replacing connections across a pool of candidate broker
//! endpoints.
//!
//! A consumer registers one [`transport::TransportFactory`] per URI scheme it
//! understands, optionally supplies a [`state_tracker::StateTracker`] to
//! replay protocol-visible state across a reconnect, and drives everything
//! else through [`core::FailoverTransport`]: `start`, `oneway`, endpoint
//! mutation, and listener wiring. The wire protocol, concrete socket
//! transports, and the broader session/producer/consumer object graph are
//! external collaborators reached only through the trait seams in
//! [`transport`], [`state_tracker`], and [`listener`].

pub mod backup_pool;
pub mod close_worker;
pub mod command;
pub mod config;
pub mod core;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod reconnect_worker;
pub mod request_map;
pub mod state_tracker;
pub mod transport;
pub mod uri_pool;

pub use command::{Command, CommandKind, ConnectionControl};
pub use config::FailoverConfig;
pub use core::FailoverTransport;
pub use endpoint::Endpoint;
pub use error::FailoverError;
pub use listener::TransportListener;
pub use state_tracker::{NullStateTracker, StateTracker, Tracked};
pub use transport::{FactoryRegistry, TransportFactory, UnderlyingTransport};
