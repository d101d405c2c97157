//! Stage L: the persisted store — schema/migrations, the CRUD/atomic-batch
//! API, and R-Tree-backed radius queries.

pub mod rtree;
pub mod schema;
pub mod store;

pub use store::{Store, StoreStats};
