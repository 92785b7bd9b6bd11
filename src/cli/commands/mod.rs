//! Command implementations.

pub mod crawl;
pub mod jobs;
pub mod serve;
pub mod worker;
