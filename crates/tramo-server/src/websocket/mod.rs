//! WebSocket connection handling: per-connection state, first-message
//! dispatch, and the session read/write loops.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod session;
