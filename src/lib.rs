//! latmon - network latency monitor.
//!
//! Probes HTTP, HTTPS and ICMP targets on a fixed interval, records the
//! duration of every protocol phase and persists fixed-size batches as CSV
//! files and HTML charts.

pub mod cli;
pub mod config;
pub mod http;
pub mod models;
pub mod probe;
pub mod scheduler;
pub mod stats;
