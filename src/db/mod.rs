//! Database layer: MongoDB client, document schemas, and storage traits

pub mod mongo;
pub mod schemas;
pub mod store;
