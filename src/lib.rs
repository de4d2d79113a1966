// Re-export needed modules for testing
pub mod backend;
pub mod chat;
pub mod models;
pub mod utils;

// Re-export main types for convenience
pub use backend::{MemoryBackend, MemoryObjectStore};
pub use chat::ChatClient;
pub use models::*;
