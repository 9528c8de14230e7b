pub mod database;
pub mod ingest;
pub mod media;
pub mod utils;
