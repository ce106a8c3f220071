pub mod block_locator;
pub mod client;
pub mod env_log;
pub mod indexer;
pub mod lending;
pub mod token;
pub mod transfer_logs;
