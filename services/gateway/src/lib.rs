//! HTTP and WebSocket front of the perpetuals matching engine
//!
//! Owns the per-market serialization point, the freeze/confirm admission
//! flow and the query surface. `main` wires it to the journal, the chain
//! node, the reference price feed and the settlement relay.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod history;
pub mod markets;
pub mod models;
pub mod router;
pub mod state;

pub use config::EngineSettings;
pub use router::create_router;
pub use state::{AppState, Collaborators};
