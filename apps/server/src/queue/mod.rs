//! Enrichment task queue
//!
//! Identifier writes are deferred to this queue so that their volume is bounded
//! by the worker's dispatch rate rather than by the size of the imported file.

mod memory;
mod models;
mod postgres;
mod traits;

pub use memory::MemoryTaskQueue;
pub use models::*;
pub use postgres::PostgresTaskQueue;
pub use traits::TaskQueue;
