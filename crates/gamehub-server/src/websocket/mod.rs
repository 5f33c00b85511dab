//! WebSocket connection lifecycle and event fan-out.

pub mod broadcast;
pub mod connection;
pub mod registry;
pub mod session;

pub use broadcast::{BroadcastEngine, DispatchReport};
pub use connection::{ClientConnection, CloseRequest, ConnectionState, SendError};
pub use registry::ConnectionRegistry;
