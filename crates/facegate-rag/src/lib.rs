//! facegate-rag — question answering over registered users.
//!
//! Registration records become short sentences, MiniLM embeds them into a
//! flat L2 index, and questions are routed either through retrieval or
//! straight to the language model.

pub mod chatbot;
pub mod documents;
pub mod embedder;
pub mod generator;
pub mod index;
pub mod intent;

pub use chatbot::{ChatError, Chatbot, Reply, DEFAULT_TOP_K};
pub use embedder::{MiniLmEmbedder, TextEmbedError, TextEmbedder};
pub use generator::{AnswerGenerator, GenerateError, RigGenerator, DEFAULT_MAX_TOKENS};
pub use index::{FlatL2Index, IndexError, Neighbor, RetrievalIndex};
pub use intent::{route, Intent};
