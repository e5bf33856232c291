//! Servlet Connector Library
//!
//! Network core of a servlet container: HTTP, HTTPS and AJP13 acceptors, a
//! bounded dispatch pool, keep-alive connection sessions and the response
//! pipeline. Applications plug in through [`server::Router`].

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pool;
pub mod protocol;
pub mod request;
pub mod response;
pub mod server;

pub use config::schema::ConnectorConfig;
pub use lifecycle::Shutdown;
pub use protocol::{Protocol, ProtocolError};
pub use request::Request;
pub use response::Response;
pub use server::{BoundServer, EchoRouter, Router, RouterError, Server, ServerError};
