//! STAC API Conformance Probe
//!
//! Validates that a live STAC API deployment conforms to the published API
//! specification: the core landing page behavior plus whichever optional
//! capabilities (item search, sort, fields, query, filter, transaction,
//! OGC API - Features) the deployment advertises in its `conformsTo` list.
//!
//! The probe discovers the advertised capability set, exercises each
//! capability's endpoints with a registered battery of scenarios, validates
//! returned documents against the specification's document schemas, applies
//! behavioral rules (pagination, parameter semantics, content negotiation)
//! and aggregates everything into one grouped [`Report`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use stac_probe::{
//!     ApiClient, CancelFlag, CheckRegistry, RetryPolicy, RunOptions, SchemaRegistry,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(Duration::from_secs(10), RetryPolicy::default())?;
//! let registry = CheckRegistry::v1();
//! let schemas = SchemaRegistry::builtin()?;
//!
//! let report = stac_probe::run(
//!     &client,
//!     &registry,
//!     &schemas,
//!     "https://stac.example.com",
//!     &RunOptions::default(),
//!     &CancelFlag::new(),
//! )?;
//!
//! for finding in report.findings() {
//!     println!("{} {} {}", finding.severity.label(), finding.rule, finding.message);
//! }
//! assert!(report.is_ok());
//! # Ok(())
//! # }
//! ```
//!
//! # Severities
//!
//! | Severity | Meaning |
//! |----------|---------|
//! | `PASS` | The scenario behaved as specified |
//! | `WARN` | Advisory: legal but questionable behavior |
//! | `FAIL` | A specification violation; the run exits non-zero |
//! | `SKIP` | The owning capability is unadvertised, excluded, or the run was cancelled |
//!
//! Every advertised capability's registered checks produce at least one
//! finding; unadvertised capabilities are never probed.

mod checks;
mod client;
mod discovery;
mod error;
mod probe;
mod report;
mod rules;
mod runner;
mod schemas;
mod types;

pub use checks::{CheckDef, CheckRegistry};
pub use client::{ApiClient, Body, ProbeResponse, RetryPolicy, DEFAULT_TIMEOUT};
pub use discovery::{discover, LandingPage};
pub use error::{DiscoverError, FetchError, SchemaCompileError, ValidationIssue};
pub use probe::{ProbeContext, ProbeOptions};
pub use report::{CheckReport, ClassReport, Finding, Report, Severity};
pub use rules::{PageRecord, PageTrace};
pub use runner::{run, CancelFlag, RunOptions};
pub use schemas::{SchemaOutcome, SchemaRegistry};
pub use types::{ConformanceClass, DocumentKind, SearchRequest};
