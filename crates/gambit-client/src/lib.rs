//! Realtime connection manager for the Gambit chess server.
//!
//! One [`ConnectionManager`] owns one Socket.IO session: it connects,
//! reconnects with backoff, answers heartbeats, fans inbound events out to
//! subscribers and exposes typed game actions that refuse to run while
//! disconnected.

pub mod backoff;
pub mod bus;
pub mod config;
pub mod diag;
pub mod error;
pub mod events;
mod facade;
pub mod health;
pub mod manager;
mod requests;
pub mod session;
pub mod transport;

pub use bus::{EventBus, Subscription, SubscriptionId};
pub use config::ClientConfig;
pub use diag::ConnectionDiagnostics;
pub use error::ClientError;
pub use events::{ClientEvent, ConnectionStatus};
pub use health::{HealthAction, HealthReport};
pub use manager::ConnectionManager;
pub use session::SessionState;
pub use transport::{Connector, Link, LinkEvent, Outbound, SocketIoConnector, TransportKind};

pub use gambit_core::net::messages::{ClientMessage, ServerMessage};
