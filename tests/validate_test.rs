//! End-to-end runs against a mock STAC deployment.

use std::time::Duration;

use mockito::{Matcher, Server, ServerGuard};
use serde_json::{json, Value};
use stac_probe::{
    ApiClient, CancelFlag, CheckRegistry, ConformanceClass, ProbeOptions, Report, RetryPolicy,
    RunOptions, SchemaRegistry, Severity,
};

const CORE_URI: &str = "https://api.stacspec.org/v1.0.0/core";
const SEARCH_URI: &str = "https://api.stacspec.org/v1.0.0/item-search";
const TRANSACTION_URI: &str =
    "https://api.stacspec.org/v1.0.0/ogcapi-features/extensions/transaction";

fn client() -> ApiClient {
    ApiClient::new(Duration::from_secs(5), RetryPolicy::none()).unwrap()
}

fn run_against(server_url: &str, opts: &RunOptions) -> Report {
    let registry = CheckRegistry::v1();
    let schemas = SchemaRegistry::builtin().unwrap();
    stac_probe::run(
        &client(),
        &registry,
        &schemas,
        server_url,
        opts,
        &CancelFlag::new(),
    )
    .unwrap()
}

fn landing_body(base: &str, conforms: &[&str], extra_links: Vec<Value>) -> Value {
    let mut links = vec![
        json!({"rel": "self", "href": base, "type": "application/json"}),
        json!({"rel": "root", "href": base, "type": "application/json"}),
        json!({
            "rel": "service-desc",
            "href": format!("{base}/api"),
            "type": "application/vnd.oai.openapi+json;version=3.0"
        }),
        json!({
            "rel": "service-doc",
            "href": format!("{base}/api.html"),
            "type": "text/html"
        }),
    ];
    links.extend(extra_links);

    json!({
        "type": "Catalog",
        "stac_version": "1.0.0",
        "id": "mock-catalog",
        "description": "A mock deployment for conformance tests",
        "conformsTo": conforms,
        "links": links
    })
}

/// Mount a landing page plus healthy service-desc and service-doc endpoints.
fn mount_core(server: &mut ServerGuard, conforms: &[&str], extra_links: Vec<Value>) {
    let base = server.url();
    let body = landing_body(&base, conforms, extra_links);
    server
        .mock("GET", "/")
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create();
    server
        .mock("GET", "/api")
        .with_header(
            "content-type",
            "application/vnd.oai.openapi+json;version=3.0",
        )
        .with_body(r#"{"openapi": "3.0.3"}"#)
        .create();
    server
        .mock("GET", "/api.html")
        .with_header("content-type", "text/html")
        .with_body("<html><body>docs</body></html>")
        .create();
}

fn item_collection_body() -> Value {
    json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "stac_version": "1.0.0",
            "id": "item-1",
            "geometry": {"type": "Point", "coordinates": [102.0, 0.5]},
            "bbox": [102.0, 0.5, 102.0, 0.5],
            "properties": {"datetime": "2020-01-01T00:00:00Z"}
        }],
        "links": []
    })
}

/// Scenario A: only core advertised, no search link. Every search check is
/// SKIP, core passes, and no FAIL appears anywhere.
#[test]
fn core_only_deployment_passes_with_search_skipped() {
    let mut server = Server::new();
    mount_core(&mut server, &[CORE_URI], vec![]);

    let report = run_against(&server.url(), &RunOptions::default());

    assert!(report.is_ok(), "expected no failures: {:?}", report);
    assert_eq!(report.failed, 0);

    let search_findings: Vec<_> = report
        .findings()
        .filter(|f| f.class == ConformanceClass::ItemSearch)
        .collect();
    assert!(!search_findings.is_empty());
    assert!(search_findings.iter().all(|f| f.severity == Severity::Skip));

    let core_failed = report
        .findings()
        .any(|f| f.class == ConformanceClass::Core && f.severity == Severity::Fail);
    assert!(!core_failed);
}

/// No request is issued for an unadvertised capability's scenarios: the
/// registered search battery never touches the wire when item-search is
/// absent from `conformsTo` (the only /search hit is the core battery's
/// undocumented-endpoint probe, which sends limit=1).
#[test]
fn unadvertised_search_battery_issues_no_requests() {
    let mut server = Server::new();
    mount_core(&mut server, &[CORE_URI], vec![]);

    let search = server
        .mock("GET", "/search")
        .match_query(Matcher::Any)
        .with_header("content-type", "application/geo+json")
        .with_body(item_collection_body().to_string())
        .expect_at_most(1)
        .create();

    let report = run_against(&server.url(), &RunOptions::default());
    search.assert();

    // The responding endpoint on an unadvertised class is a WARN, not a pass.
    assert!(report
        .findings()
        .any(|f| f.rule == "core/undocumented-search" && f.severity == Severity::Warn));
}

/// Scenario B: search advertised, but malformed bbox values come back 200.
/// The report must carry a FAIL naming the bbox-validation rule.
#[test]
fn lenient_bbox_handling_fails_the_bbox_malformed_rule() {
    let mut server = Server::new();
    let base = server.url();
    mount_core(
        &mut server,
        &[CORE_URI, SEARCH_URI],
        vec![json!({
            "rel": "search",
            "href": format!("{base}/search"),
            "type": "application/geo+json"
        })],
    );
    // A deployment that answers every search with 200, malformed input included.
    server
        .mock("GET", "/search")
        .match_query(Matcher::Any)
        .with_header("content-type", "application/geo+json")
        .with_body(item_collection_body().to_string())
        .create();

    let report = run_against(&server.url(), &RunOptions::default());

    assert!(!report.is_ok());
    let bbox_fail = report
        .findings()
        .find(|f| f.rule == "item-search/bbox-malformed" && f.severity == Severity::Fail)
        .expect("expected a bbox-malformed FAIL finding");
    assert!(bbox_fail.message.contains("400"));

    // limit=0 must surface as a well-formed finding, never a crash.
    assert!(report
        .findings()
        .any(|f| f.rule == "item-search/limit" && f.message.contains("limit=0")));
}

/// Two runs against an unchanged deployment produce identical grouped
/// reports, whatever the worker scheduling did.
#[test]
fn repeated_runs_are_deterministic() {
    let mut server = Server::new();
    mount_core(&mut server, &[CORE_URI], vec![]);

    let first = run_against(&server.url(), &RunOptions::default());
    let second = run_against(&server.url(), &RunOptions::default());

    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}

/// Excluded classes are suppressed without probing, and their findings say so.
#[test]
fn excluded_class_is_skipped_with_reason() {
    let mut server = Server::new();
    mount_core(&mut server, &[CORE_URI, SEARCH_URI], vec![]);

    let opts = RunOptions {
        exclude: vec![ConformanceClass::ItemSearch],
        ..RunOptions::default()
    };
    let report = run_against(&server.url(), &opts);

    let search_findings: Vec<_> = report
        .findings()
        .filter(|f| f.class == ConformanceClass::ItemSearch)
        .collect();
    assert!(!search_findings.is_empty());
    assert!(search_findings
        .iter()
        .all(|f| f.severity == Severity::Skip && f.message.contains("--exclude")));
}

/// Unknown conformance URIs are retained and reported as SKIP, never a crash.
#[test]
fn unknown_capability_uri_becomes_skip() {
    let mut server = Server::new();
    mount_core(
        &mut server,
        &[CORE_URI, "https://api.example.com/extensions/teleport"],
        vec![],
    );

    let report = run_against(&server.url(), &RunOptions::default());
    assert!(report.is_ok());
    assert!(report.findings().any(|f| {
        f.severity == Severity::Skip
            && f.rule == "unrecognized-capability"
            && f.message.contains("teleport")
    }));
}

/// A cancelled run still yields a well-formed report: everything that was
/// not scheduled appears as SKIP.
#[test]
fn cancelled_run_reports_partial_results() {
    let mut server = Server::new();
    mount_core(&mut server, &[CORE_URI], vec![]);

    let cancel = CancelFlag::new();
    cancel.cancel();

    let registry = CheckRegistry::v1();
    let schemas = SchemaRegistry::builtin().unwrap();
    let report = stac_probe::run(
        &client(),
        &registry,
        &schemas,
        &server.url(),
        &RunOptions::default(),
        &cancel,
    )
    .unwrap();

    assert_eq!(report.failed, 0);
    let core_findings: Vec<_> = report
        .findings()
        .filter(|f| f.class == ConformanceClass::Core)
        .collect();
    assert!(!core_findings.is_empty());
    assert!(core_findings
        .iter()
        .all(|f| f.severity == Severity::Skip && f.message.contains("cancelled")));
}

/// An unreachable root is the only fatal outcome.
#[test]
fn unreachable_root_aborts_with_fatal_error() {
    let registry = CheckRegistry::v1();
    let schemas = SchemaRegistry::builtin().unwrap();
    let client = ApiClient::new(Duration::from_millis(500), RetryPolicy::none()).unwrap();

    let err = stac_probe::run(
        &client,
        &registry,
        &schemas,
        "http://127.0.0.1:9",
        &RunOptions::default(),
        &CancelFlag::new(),
    )
    .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.exit_code(), 3);
}

/// A reachable root without `conformsTo` yields a single-FAIL report rather
/// than an abort.
#[test]
fn malformed_root_yields_single_fail_report() {
    let mut server = Server::new();
    server
        .mock("GET", "/")
        .with_header("content-type", "application/json")
        .with_body(r#"{"links": [{"rel": "self", "href": "/"}]}"#)
        .create();

    let report = run_against(&server.url(), &RunOptions::default());
    assert!(!report.is_ok());
    assert_eq!(report.failed, 1);
    assert!(report
        .findings()
        .any(|f| f.rule == "core/landing-page" && f.severity == Severity::Fail));
}

/// Pagination exhaustion over multiple pages yields unique ids and a PASS.
#[test]
fn pagination_walk_reaches_exhaustion_with_unique_ids() {
    let mut server = Server::new();
    let base = server.url();
    mount_core(
        &mut server,
        &[CORE_URI, SEARCH_URI],
        vec![json!({
            "rel": "search",
            "href": format!("{base}/search"),
            "type": "application/geo+json"
        })],
    );

    let page = |id: &str, next: Option<String>| {
        let mut body = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "stac_version": "1.0.0",
                "id": id,
                "geometry": {"type": "Point", "coordinates": [102.0, 0.5]},
                "bbox": [102.0, 0.5, 102.0, 0.5],
                "properties": {"datetime": "2020-01-01T00:00:00Z"}
            }],
            "links": []
        });
        if let Some(next) = next {
            body["links"] = json!([{"rel": "next", "href": next}]);
        }
        body.to_string()
    };

    // Catch-all first; more specific mocks registered later take priority.
    server
        .mock("GET", "/search")
        .match_query(Matcher::Any)
        .with_header("content-type", "application/geo+json")
        .with_body(page("item-1", Some(format!("{base}/search-page-2"))))
        .create();
    server
        .mock("GET", "/search-page-2")
        .with_header("content-type", "application/geo+json")
        .with_body(page("item-2", Some(format!("{base}/search-page-3"))))
        .create();
    server
        .mock("GET", "/search-page-3")
        .with_header("content-type", "application/geo+json")
        .with_body(page("item-3", None))
        .create();

    let report = run_against(&server.url(), &RunOptions::default());
    let pagination = report
        .findings()
        .find(|f| f.rule == "item-search/pagination")
        .expect("pagination check must produce a finding");
    assert_eq!(pagination.severity, Severity::Pass, "{:?}", pagination);
    assert!(pagination.message.contains("3 unique"));
}

/// Scenario C: the transaction check records the created item's id when the
/// deployment refuses to delete it.
#[test]
fn failed_transaction_cleanup_surfaces_created_item_id() {
    let mut server = Server::new();
    let base = server.url();
    mount_core(
        &mut server,
        &[CORE_URI, TRANSACTION_URI],
        vec![json!({
            "rel": "data",
            "href": format!("{base}/collections"),
            "type": "application/json"
        })],
    );

    server
        .mock("GET", "/collections")
        .with_header("content-type", "application/json")
        .with_body(
            json!({"collections": [{
                "type": "Collection",
                "stac_version": "1.0.0",
                "id": "test-collection",
                "description": "fixture",
                "license": "proprietary",
                "extent": {
                    "spatial": {"bbox": [[-180.0, -90.0, 180.0, 90.0]]},
                    "temporal": {"interval": [[null, null]]}
                },
                "links": []
            }]})
            .to_string(),
        )
        .create();

    let expected_id = format!("stac-probe-txn-{}", std::process::id());
    server
        .mock("POST", "/collections/test-collection/items")
        .with_status(201)
        .create();
    server
        .mock(
            "GET",
            format!("/collections/test-collection/items/{expected_id}").as_str(),
        )
        .with_header("content-type", "application/geo+json")
        .with_body(json!({"type": "Feature", "id": expected_id}).to_string())
        .create();
    let delete = server
        .mock(
            "DELETE",
            format!("/collections/test-collection/items/{expected_id}").as_str(),
        )
        .with_status(500)
        .create();

    let report = run_against(&server.url(), &RunOptions::default());
    delete.assert();

    let cleanup_fail = report
        .findings()
        .find(|f| f.rule == "transaction/create-read-delete" && f.severity == Severity::Fail)
        .expect("expected a cleanup FAIL finding");
    assert!(
        cleanup_fail
            .context
            .as_deref()
            .unwrap_or_default()
            .contains(&expected_id),
        "finding must surface the stranded item id: {:?}",
        cleanup_fail
    );
}

/// A clean transaction round-trip passes and leaves nothing behind.
#[test]
fn transaction_round_trip_passes() {
    let mut server = Server::new();
    let base = server.url();
    mount_core(
        &mut server,
        &[CORE_URI, TRANSACTION_URI],
        vec![json!({
            "rel": "data",
            "href": format!("{base}/collections"),
            "type": "application/json"
        })],
    );

    server
        .mock("GET", "/collections")
        .with_header("content-type", "application/json")
        .with_body(
            json!({"collections": [{
                "type": "Collection",
                "stac_version": "1.0.0",
                "id": "test-collection",
                "description": "fixture",
                "license": "proprietary",
                "extent": {
                    "spatial": {"bbox": [[-180.0, -90.0, 180.0, 90.0]]},
                    "temporal": {"interval": [[null, null]]}
                },
                "links": []
            }]})
            .to_string(),
        )
        .create();

    let expected_id = format!("stac-probe-txn-{}", std::process::id());
    let item_path = format!("/collections/test-collection/items/{expected_id}");
    server
        .mock("POST", "/collections/test-collection/items")
        .with_status(201)
        .create();
    server
        .mock("GET", item_path.as_str())
        .with_header("content-type", "application/geo+json")
        .with_body(json!({"type": "Feature", "id": expected_id}).to_string())
        .create();
    server
        .mock("DELETE", item_path.as_str())
        .with_status(204)
        .create();

    let report = run_against(&server.url(), &RunOptions::default());
    let txn = report
        .findings()
        .find(|f| f.rule == "transaction/create-read-delete")
        .expect("transaction check must produce a finding");
    assert_eq!(txn.severity, Severity::Pass, "{:?}", txn);
}

/// Every advertised capability's registered battery produces findings.
#[test]
fn advertised_batteries_never_drop_silently() {
    let mut server = Server::new();
    let base = server.url();
    mount_core(
        &mut server,
        &[CORE_URI, SEARCH_URI],
        vec![json!({
            "rel": "search",
            "href": format!("{base}/search"),
            "type": "application/geo+json"
        })],
    );
    server
        .mock("GET", "/search")
        .match_query(Matcher::Any)
        .with_header("content-type", "application/geo+json")
        .with_body(item_collection_body().to_string())
        .create();

    let opts = RunOptions {
        probe: ProbeOptions {
            post: false,
            max_pages: 3,
        },
        ..RunOptions::default()
    };
    let report = run_against(&server.url(), &opts);

    let registry = CheckRegistry::v1();
    for class in [ConformanceClass::Core, ConformanceClass::ItemSearch] {
        for check in registry.battery(&class) {
            assert!(
                report.findings().any(|f| f.rule == check.id),
                "check {} produced no finding",
                check.id
            );
        }
    }
}
