pub mod adaptive;
pub mod blob;
pub mod chunker;
pub mod extract;
pub mod pipeline;

pub use blob::{BlobError, BlobObject, BlobStore, FsBlobStore, MemoryBlobStore};
pub use chunker::{Chunker, ChunkerSettings};
pub use pipeline::{IngestOutcome, IngestionError, IngestionPipeline};
