// Core layers
pub mod common;
pub mod config;
pub mod observability;

// Resolution pipeline and the ways of feeding it
pub mod batch;
pub mod dispatch;
pub mod pipeline;
pub mod tasks;

// Layered boundaries for application ports and infrastructure adapters
pub mod app;
pub mod infra;

pub mod server;

pub use common::error::{PoolError, ResolveError, Result};
pub use common::types::{Identifier, Job, PostalHint, ResolutionResult, ResultRecord, SaleRecord, SourceTag};
