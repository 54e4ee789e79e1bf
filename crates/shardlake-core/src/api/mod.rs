//! Public API: the metastore handle and the table builder.

pub mod builders;
pub mod metastore;

pub use builders::TableBuilder;
pub use metastore::Metastore;
