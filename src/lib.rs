//! kogito-bdd - Behaviour-driven end-to-end tests for the Kogito operator
//!
//! Runs Gherkin feature files against a live cluster: every scenario gets
//! its own namespace, installs the operators it needs through the package
//! manager, applies Kogito workload resources, waits for them to become
//! healthy and tears everything down again.
//!
//! # Example (Rust)
//!
//! ```no_run
//! use std::sync::Arc;
//! use kogito_bdd::config::RunConfig;
//! use kogito_bdd::context::Services;
//! use kogito_bdd::runner::ScenarioRunner;
//! use kogito_bdd::steps::default_registry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let features = kogito_bdd::feature::load("features".as_ref())?;
//!     let services = Services::connect(RunConfig::default().tag_filter("@smoke")).await?;
//!
//!     let runner = ScenarioRunner::new(Arc::new(services), default_registry()?);
//!     let summary = runner.run(&features).await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Run every scenario tagged @smoke
//! kogito-bdd features/ --tags @smoke
//!
//! # Install the operator from a bundle catalog
//! OPERATOR_CATALOG_IMAGE=quay.io/kiegroup/kogito-operator-catalog:1.0 kogito-bdd features/
//! ```

pub mod command;
pub mod config;
pub mod context;
pub mod crd;
pub mod diagnostics;
pub mod feature;
pub mod gateway;
pub mod image;
pub mod olm;
pub mod runner;
pub mod source;
pub mod steps;
pub mod telemetry;
pub mod wait;
pub mod workload;

pub use kogito_bdd_macros::test;

// Re-export commonly used types
pub use config::{ConfigError, Platform, RunConfig, Timeouts};
pub use context::{ContextError, ScenarioContext, Services, TeardownReport};
pub use feature::{Feature, FeatureError, Scenario, ScenarioFilter};
pub use gateway::{ClusterClient, Gateway, GatewayError, KubeClient, MemoryCluster};
pub use image::{ImageRef, ImageRole};
pub use runner::{RunSummary, ScenarioResult, ScenarioRunner, ScenarioStatus};
pub use steps::{default_registry, FailureKind, StepError, StepRegistry};
pub use wait::{wait_until, ConditionError};
