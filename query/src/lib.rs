pub mod context;
pub mod engine;
pub mod prompts;
pub mod stream;
pub mod think;

pub use engine::{EventStream, QueryOptions, QueryPipeline};
pub use stream::{encode_sse, Citation, StreamEvent};
