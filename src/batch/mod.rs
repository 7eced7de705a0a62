// Durable batch queue: chunked submission, consumers and progress tracking

pub mod consumer;
pub mod processor;
pub mod progress;
pub mod sqlite_store;
pub mod store;

pub use consumer::{ChunkConsumer, ChunkOutcome};
pub use processor::{BatchQueueProcessor, EnqueueReceipt};
pub use progress::{BatchProgress, BatchStatus, ChunkTally};
pub use sqlite_store::SqliteBatchStore;
pub use store::{BatchStore, ChunkCompletion, ChunkEntry, MemoryBatchStore};
