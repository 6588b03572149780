//! API server for the Castline publish pipeline.
//!
//! Provides the publish REST endpoints and the realtime WebSocket.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;
