// In-process job dispatch: a coordinator feeding resolution workers over channels

pub mod messages;
pub mod pool;

pub use pool::{PoolReport, WorkerPool};
