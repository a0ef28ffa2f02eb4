pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod raw_store;
pub mod report;
pub mod retry;
pub mod staged;
pub mod transform;
