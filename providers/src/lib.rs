pub mod completion;
pub mod embedder;
pub mod factory;
pub mod fallback;
pub mod http_embedder;
pub mod openai_chat;

pub use completion::{ChatMessage, ChatRole, Completer, CompletionError, CompletionOptions, ModelTier, TokenStream};
pub use embedder::{Embedder, EmbedderCapabilities, EmbedderError};
pub use fallback::FallbackCompleter;
