pub mod cli;
pub mod daemon;
pub mod errors;
pub mod ingest;
pub mod models;
pub mod server;
pub mod sources;
pub mod storage;
