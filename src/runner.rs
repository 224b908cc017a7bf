//! Orchestration: discovery, a bounded worker pool per capability, fault
//! isolation, and cooperative cancellation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use tracing::{info, warn};

use crate::checks::CheckRegistry;
use crate::client::ApiClient;
use crate::discovery;
use crate::error::DiscoverError;
use crate::probe::{ProbeContext, ProbeOptions};
use crate::report::{Finding, Report};
use crate::schemas::SchemaRegistry;
use crate::types::ConformanceClass;

/// Orchestrator-level rule ids (not tied to a registered battery).
const RULE_LANDING_PAGE: &str = "core/landing-page";
const RULE_UNRECOGNIZED: &str = "unrecognized-capability";

/// Run-level cancellation signal.
///
/// Cancelling stops the scheduling of further checks; in-flight HTTP calls
/// finish (or time out) on their own, and the run still produces a
/// well-formed report with SKIP findings for everything unscheduled.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Options for one validation run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Classes whose batteries are suppressed (SKIP, no requests issued).
    pub exclude: Vec<ConformanceClass>,
    /// Worker threads for independent batteries. 0 picks a small default.
    pub concurrency: usize,
    pub probe: ProbeOptions,
}

fn worker_count(requested: usize, jobs: usize) -> usize {
    let cap = jobs.max(1);
    match requested {
        0 => cap.min(4),
        n => n.min(cap),
    }
}

/// Run the full battery against a deployment and finalize the report.
///
/// Only an unreachable root aborts with an error. A reachable root whose
/// landing page is unusable yields a report with a single FAIL finding, and
/// any failure confined to one capability never stops the others.
pub fn run(
    client: &ApiClient,
    registry: &CheckRegistry,
    schemas: &SchemaRegistry,
    root_url: &str,
    opts: &RunOptions,
    cancel: &CancelFlag,
) -> Result<Report, DiscoverError> {
    let landing = match discovery::discover(client, root_url) {
        Ok(landing) => landing,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!(%e, "root responded but its landing page is unusable");
            let finding =
                Finding::fail(ConformanceClass::Core, RULE_LANDING_PAGE, e.to_string())
                    .with_context(root_url.to_string());
            return Ok(Report::from_findings(root_url, vec![finding]));
        }
    };

    let mut findings: Vec<Finding> = Vec::new();

    // Forward compatibility: advertised capabilities nobody registered
    // checks for are surfaced, never crashed on.
    for class in &landing.classes {
        if let ConformanceClass::Unknown(uri) = class {
            findings.push(Finding::skip(
                class.clone(),
                RULE_UNRECOGNIZED,
                format!("no checks registered for advertised capability {uri}"),
            ));
        }
    }

    let mut jobs: VecDeque<ConformanceClass> = VecDeque::new();
    for class in registry.classes() {
        if opts.exclude.contains(&class) {
            for check in registry.battery(&class) {
                findings.push(Finding::skip(
                    class.clone(),
                    check.id,
                    "suppressed by --exclude flag",
                ));
            }
        } else if !landing.advertises(&class) {
            // Never issue a request for an unadvertised capability.
            for check in registry.battery(&class) {
                findings.push(Finding::skip(
                    class.clone(),
                    check.id,
                    "capability not advertised in 'conformsTo'",
                ));
            }
        } else {
            jobs.push_back(class);
        }
    }

    let workers = worker_count(opts.concurrency, jobs.len());
    info!(
        jobs = jobs.len(),
        workers,
        registry = registry.version(),
        "starting batteries"
    );

    let queue = Mutex::new(jobs);
    let (tx, rx) = mpsc::channel::<Vec<Finding>>();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            let landing = &landing;
            scope.spawn(move || {
                let ctx = ProbeContext {
                    client,
                    landing,
                    schemas,
                    opts: &opts.probe,
                };
                loop {
                    let job = {
                        let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
                        queue.pop_front()
                    };
                    let Some(class) = job else { break };

                    info!(class = %class, "running battery");
                    for check in registry.battery(&class) {
                        if cancel.is_cancelled() {
                            let _ = tx.send(vec![Finding::skip(
                                class.clone(),
                                check.id,
                                "run cancelled before this check was scheduled",
                            )]);
                            continue;
                        }
                        let mut batch = (check.run)(&ctx);
                        if batch.is_empty() {
                            // No scenario may drop silently.
                            batch.push(Finding::warn(
                                class.clone(),
                                check.id,
                                "check produced no findings",
                            ));
                        }
                        let _ = tx.send(batch);
                    }
                }
            });
        }
        drop(tx);
    });

    for batch in rx {
        findings.extend(batch);
    }

    Ok(Report::from_findings(landing.url.clone(), findings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn worker_count_defaults_and_caps() {
        assert_eq!(worker_count(0, 8), 4);
        assert_eq!(worker_count(0, 2), 2);
        assert_eq!(worker_count(16, 3), 3);
        assert_eq!(worker_count(2, 8), 2);
        // No jobs still needs one worker so the scope drains cleanly.
        assert_eq!(worker_count(0, 0), 1);
    }
}
