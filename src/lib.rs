//! A transport-agnostic Model Context Protocol runtime: schema
//! validation, a pluggable transport boundary, a sync↔async handler
//! bridge, a feature registry, the session state machine, and typed
//! client/server cores built on top of it.

pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;
pub mod validation;

pub use client::McpClient;
pub use config::Config;
pub use error::{Error, Result};
pub use server::{McpServer, StatelessMcpServer};
pub use session::{Session, SessionState};
pub use transport::{Transport, TransportContext};
