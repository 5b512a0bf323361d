// Morphcast API Library
//
// Viewer-facing WebSocket endpoint and per-connection envelope routing

pub mod http;
pub mod impls;

// Re-export commonly used types
pub use http::{create_router, AppState};
pub use impls::{SessionHandler, StreamMessage};
