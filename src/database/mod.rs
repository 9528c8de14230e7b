pub mod error;
pub mod migrate;
pub mod provision;
pub mod records;
pub mod repo;
pub mod schema;
