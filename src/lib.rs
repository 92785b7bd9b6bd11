//! Documentation crawling service.
//!
//! Ingests declarative job definitions, executes crawl tasks with a headless
//! browser, and produces per-job JSON knowledge files for LLM indexing.
//! Three subsystems carry the weight: the durable queue with its worker
//! pool, the browser-driven crawl engine, and the streaming aggregation
//! pipeline for multi-task jobs.

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod dataset;
pub mod matcher;
pub mod models;
pub mod output;
pub mod registry;
pub mod runner;
pub mod server;
pub mod store;
pub mod submit;
pub mod worker;
