pub mod broadcast;
pub mod cli;
pub mod client;
pub mod config;
pub mod ingest;
pub mod storage;
