//! Durable memory: learned facts with optional semantic recall, the
//! cross-channel conversation log, and system-prompt context assembly.

pub mod context;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod facts;
pub mod history;
pub mod types;

pub use context::{load_user_context, UserContext};
pub use embeddings::{EmbeddingClient, EMBEDDING_DIM};
pub use error::{MemoryError, Result};
pub use facts::{FactStore, Recall};
pub use history::HistoryStore;
