pub mod models;
pub mod repository;
pub mod rest;

pub use models::SinkRow;
pub use repository::Repository;
pub use rest::RestSink;

use crate::error::Result;
use async_trait::async_trait;

/// A destination that accepts or rejects a whole batch at once.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Insert all rows as one request and return how many the sink
    /// acknowledged. Acknowledging nothing is an error.
    async fn insert_batch(&self, rows: &[SinkRow]) -> Result<usize>;

    /// Short human-readable target description for logs.
    fn describe(&self) -> String;
}
