//! docbench: load, index and point-query benchmark for a document cluster.

pub mod cli;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod load;
pub mod metrics;
pub mod provision;
pub mod query;
pub mod startup;
pub mod storage;
pub mod timing;
pub mod types;
