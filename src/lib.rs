//! Phloem - Long-term memory for AI coding assistants
//!
//! Content-addressed memories with semantic recall, a causal/temporal edge
//! graph, file citations with confidence decay, and a stdio JSON-RPC tool
//! server. All state lives in a single SQLite database under the user's home;
//! no network is used unless a remote embedder is explicitly configured.

pub mod causal;
pub mod citations;
pub mod config;
pub mod embedding;
pub mod error;
pub mod graft;
pub mod mcp;
pub mod scope;
pub mod search;
pub mod storage;
pub mod types;

pub use config::EngineConfig;
pub use error::{PhloemError, Result};
pub use storage::Store;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
