pub mod app;
pub mod cli;
pub mod config;
pub mod envelope;
pub mod filter;
pub mod kafka;
pub mod metrics_consts;
pub mod offsets;
pub mod output;
pub mod partition_worker;
pub mod publisher;
pub mod source;
pub mod topic_processor;
pub mod types;

#[cfg(test)]
mod test_utils;
