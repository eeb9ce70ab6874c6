//! Flow-statistics DDoS detection for software-defined networks.
//!
//! A [`monitor::MonitorLoop`] polls every connected datapath for its flow
//! table, [`features`] turns the replies into fixed-width records, and an
//! [`inference::InferenceEngine`] labels each record with a random forest
//! trained at startup and reduces the labels to one verdict per cycle.

pub mod collector;
pub mod config;
pub mod controller;
pub mod error;
pub mod features;
pub mod flow;
pub mod forest;
pub mod inference;
pub mod monitor;
pub mod registry;
pub mod schema;
pub mod sim;
pub mod snapshot;
pub mod training;

mod tests;

pub use error::{MonitorError, Result};
pub use flow::{FlowRecord, FlowStatsEntry};
pub use inference::{InferenceEngine, InferenceOutcome, Verdict};
