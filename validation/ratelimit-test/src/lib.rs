//! Rate-limit test framework for a tiered object-storage gateway.
//!
//! This crate provides tools to:
//! - Build synthetic credentials for several auth schemes and tenants
//! - Drive paced, concurrent probe traffic against the gateway
//! - Classify responses and aggregate per-group statistics
//! - Output results as tables or as export documents for ingestion

pub mod accounts;
pub mod aggregator;
pub mod auth;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod generator;
pub mod report;

pub use accounts::{ServiceAccount, TenantRegistry};
pub use aggregator::{compare_runs, Aggregator, AggregatorHandle, ComparisonRow};
pub use auth::{AuthSettings, AuthSimulator, Credentials};
pub use classifier::{classify, throttle_window, Classification, ErrorCause};
pub use config::{ClassifierConfig, PathPattern, RunConfig, RunSpec, ScenarioConfig, TargetSpec};
pub use engine::{ProbeEngine, RunHandle, SingleProbe};
pub use generator::PathGenerator;
pub use report::{RunReport, StoreReport};
