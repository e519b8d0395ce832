pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod retry_queue;
pub mod scheduler;
pub mod scraper;
pub mod search;
pub mod store;
