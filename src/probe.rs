//! Scenario execution: the per-capability check batteries.
//!
//! Each check probes one aspect of one conformance class and returns its
//! findings. Fetch failures inside a check become FAIL findings rather than
//! errors, so one broken capability never stops the others. Chained
//! scenarios (pagination walks, create-read-delete) run strictly
//! sequentially inside their check.

use serde_json::{json, Value};
use tracing::info;

use crate::client::{ApiClient, ProbeResponse};
use crate::discovery::LandingPage;
use crate::error::FetchError;
use crate::report::Finding;
use crate::rules::{self, PageRecord, PageTrace};
use crate::schemas::SchemaRegistry;
use crate::types::{
    ConformanceClass, SearchRequest, GEOJSON_MEDIA_TYPE, HTML_MEDIA_TYPE, JSON_MEDIA_TYPE,
    OPENAPI_MEDIA_TYPE,
};

// Check ids, one per registered scenario. Findings carry these so every
// report entry traces back to a registry row.
pub const CORE_LANDING_LINKS: &str = "core/landing-links";
pub const CORE_CONFORMANCE_URIS: &str = "core/conformance-uris";
pub const CORE_SERVICE_DESC: &str = "core/service-desc";
pub const CORE_SERVICE_DOC: &str = "core/service-doc";
pub const CORE_CATALOG_SCHEMA: &str = "core/catalog-schema";
pub const CORE_UNDOCUMENTED_SEARCH: &str = "core/undocumented-search";

pub const FEATURES_CONFORMANCE: &str = "features/conformance-link";
pub const FEATURES_DATA_LINK: &str = "features/data-link";
pub const FEATURES_COLLECTIONS: &str = "features/collections-schema";

pub const SEARCH_LINK: &str = "item-search/link";
pub const SEARCH_BASIC: &str = "item-search/basic";
pub const SEARCH_LIMIT: &str = "item-search/limit";
pub const SEARCH_BBOX: &str = "item-search/bbox";
pub const SEARCH_BBOX_MALFORMED: &str = "item-search/bbox-malformed";
pub const SEARCH_DATETIME: &str = "item-search/datetime";
pub const SEARCH_DATETIME_MALFORMED: &str = "item-search/datetime-malformed";
pub const SEARCH_IDS: &str = "item-search/ids";
pub const SEARCH_COLLECTIONS: &str = "item-search/collections";
pub const SEARCH_INTERSECTS: &str = "item-search/intersects";
pub const SEARCH_PAGINATION: &str = "item-search/pagination";
pub const SEARCH_CONTENT_NEGOTIATION: &str = "item-search/content-negotiation";

pub const SORT_SORTBY: &str = "sort/sortby";
pub const FIELDS_FIELDS: &str = "fields/fields";
pub const QUERY_QUERY: &str = "query/query";
pub const FILTER_FILTER: &str = "filter/filter";

pub const TRANSACTION_CRD: &str = "transaction/create-read-delete";

/// Tunables for scenario execution.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Also exercise POST variants of the search scenarios.
    pub post: bool,
    /// Upper bound on pagination walks.
    pub max_pages: usize,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        ProbeOptions {
            post: false,
            max_pages: 10,
        }
    }
}

/// Everything a check needs, borrowed for the duration of the run.
pub struct ProbeContext<'a> {
    pub client: &'a ApiClient,
    pub landing: &'a LandingPage,
    pub schemas: &'a SchemaRegistry,
    pub opts: &'a ProbeOptions,
}

impl ProbeContext<'_> {
    /// The search endpoint: rel=search, or the spec-default path.
    pub fn search_url(&self) -> String {
        self.landing
            .link("search")
            .map(str::to_string)
            .unwrap_or_else(|| self.landing.default_endpoint("search"))
    }

    /// The collections endpoint: rel=data, or the spec-default path.
    pub fn collections_url(&self) -> String {
        self.landing
            .link("data")
            .map(str::to_string)
            .unwrap_or_else(|| self.landing.default_endpoint("collections"))
    }
}

// --- shared helpers ---

fn fetch_failed(
    class: &ConformanceClass,
    rule: &'static str,
    what: &str,
    err: &FetchError,
) -> Finding {
    Finding::fail(class.clone(), rule, format!("{what} failed: {err}"))
}

/// Record a FAIL unless the response status is 200. Returns whether it was.
fn require_200(
    out: &mut Vec<Finding>,
    class: &ConformanceClass,
    rule: &'static str,
    what: &str,
    resp: &ProbeResponse,
) -> bool {
    if resp.status == 200 {
        true
    } else {
        out.push(
            Finding::fail(
                class.clone(),
                rule,
                format!("{what} returned status {} instead of 200", resp.status),
            )
            .with_context(resp.url.clone()),
        );
        false
    }
}

/// Malformed input must produce 400 with a structured (JSON) error body.
fn require_400(
    out: &mut Vec<Finding>,
    class: &ConformanceClass,
    rule: &'static str,
    what: &str,
    resp: &ProbeResponse,
) {
    if resp.status != 400 {
        out.push(
            Finding::fail(
                class.clone(),
                rule,
                format!("{what} returned status {} instead of 400", resp.status),
            )
            .with_context(resp.url.clone()),
        );
    } else if resp.json().is_none() {
        out.push(
            Finding::warn(
                class.clone(),
                rule,
                format!("{what} returned 400 without a structured JSON error body"),
            )
            .with_context(resp.url.clone()),
        );
    }
}

fn features_of(resp: &ProbeResponse) -> Option<&Vec<Value>> {
    resp.json()?.get("features")?.as_array()
}

fn link_object<'v>(body: &'v Value, rel: &str) -> Option<&'v Value> {
    body.get("links")?
        .as_array()?
        .iter()
        .find(|l| l.get("rel").and_then(|r| r.as_str()) == Some(rel))
}

/// Close out a check: a battery that found nothing wrong reports one PASS,
/// so no scenario ever drops silently.
fn or_pass(
    mut findings: Vec<Finding>,
    class: &ConformanceClass,
    rule: &'static str,
    message: &str,
) -> Vec<Finding> {
    if findings.is_empty() {
        findings.push(Finding::pass(class.clone(), rule, message));
    }
    findings
}

// --- core battery ---

pub fn core_landing_links(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::Core;
    let mut out = Vec::new();

    for rel in ["self", "root"] {
        match link_object(&ctx.landing.body, rel) {
            None => out.push(Finding::warn(
                class.clone(),
                CORE_LANDING_LINKS,
                format!("Link[rel={rel}] should exist on the landing page"),
            )),
            Some(link) => {
                let declared = link.get("type").and_then(|t| t.as_str());
                if declared != Some(JSON_MEDIA_TYPE) {
                    out.push(Finding::fail(
                        class.clone(),
                        CORE_LANDING_LINKS,
                        format!(
                            "Link[rel={rel}] type should be '{JSON_MEDIA_TYPE}', actually {declared:?}"
                        ),
                    ));
                }
            }
        }
    }

    or_pass(out, &class, CORE_LANDING_LINKS, "rel=self and rel=root links are well-formed")
}

pub fn core_conformance_uris(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::Core;
    let mut out = Vec::new();

    let req_form: Vec<&str> = ctx
        .landing
        .raw_classes
        .iter()
        .map(String::as_str)
        .filter(|uri| uri.starts_with("http://www.opengis.net/spec/ogcapi-features-1/1.0/req/"))
        .collect();
    if !req_form.is_empty() {
        out.push(Finding::warn(
            class.clone(),
            CORE_CONFORMANCE_URIS,
            format!(
                "'conformsTo' uses OGC 'req' URIs instead of 'conf': {}",
                req_form.join(", ")
            ),
        ));
    }

    or_pass(out, &class, CORE_CONFORMANCE_URIS, "'conformsTo' URIs are well-formed")
}

pub fn core_service_desc(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::Core;
    let mut out = Vec::new();

    let Some(link) = link_object(&ctx.landing.body, "service-desc") else {
        return vec![Finding::warn(
            class,
            CORE_SERVICE_DESC,
            "Link[rel=service-desc] should exist on the landing page",
        )];
    };

    let declared = link.get("type").and_then(|t| t.as_str());
    if declared != Some(OPENAPI_MEDIA_TYPE) {
        out.push(Finding::fail(
            class.clone(),
            CORE_SERVICE_DESC,
            format!(
                "Link[rel=service-desc] type should be '{OPENAPI_MEDIA_TYPE}', actually {declared:?}"
            ),
        ));
    }

    let Some(href) = ctx.landing.link("service-desc") else {
        out.push(Finding::fail(
            class,
            CORE_SERVICE_DESC,
            "Link[rel=service-desc] has no usable href",
        ));
        return out;
    };
    match ctx.client.get(href, &[]) {
        Err(e) => out.push(fetch_failed(&class, CORE_SERVICE_DESC, "GET service-desc", &e)),
        Ok(resp) => {
            if require_200(&mut out, &class, CORE_SERVICE_DESC, "service-desc", &resp) {
                if resp.media_type() != Some(OPENAPI_MEDIA_TYPE.split(';').next().unwrap_or(""))
                    && resp.content_type.as_deref() != Some(OPENAPI_MEDIA_TYPE)
                {
                    out.push(Finding::fail(
                        class.clone(),
                        CORE_SERVICE_DESC,
                        format!(
                            "service-desc content-type should be '{OPENAPI_MEDIA_TYPE}', actually {:?}",
                            resp.content_type
                        ),
                    ));
                }
                if resp.json().is_none() {
                    out.push(Finding::fail(
                        class.clone(),
                        CORE_SERVICE_DESC,
                        "service-desc should return JSON, got non-JSON text",
                    ));
                }
            }
        }
    }

    or_pass(out, &class, CORE_SERVICE_DESC, "service-desc is reachable OpenAPI JSON")
}

pub fn core_service_doc(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::Core;
    let mut out = Vec::new();

    let Some(link) = link_object(&ctx.landing.body, "service-doc") else {
        return vec![Finding::warn(
            class,
            CORE_SERVICE_DOC,
            "Link[rel=service-doc] should exist on the landing page",
        )];
    };

    if link.get("type").and_then(|t| t.as_str()) != Some(HTML_MEDIA_TYPE) {
        out.push(Finding::fail(
            class.clone(),
            CORE_SERVICE_DOC,
            format!("Link[rel=service-doc] type should be '{HTML_MEDIA_TYPE}'"),
        ));
    }

    let Some(href) = ctx.landing.link("service-doc") else {
        out.push(Finding::fail(
            class,
            CORE_SERVICE_DOC,
            "Link[rel=service-doc] has no usable href",
        ));
        return out;
    };
    match ctx.client.get(href, &[]) {
        Err(e) => out.push(fetch_failed(&class, CORE_SERVICE_DOC, "GET service-doc", &e)),
        Ok(resp) => {
            if require_200(&mut out, &class, CORE_SERVICE_DOC, "service-doc", &resp)
                && resp.media_type() != Some(HTML_MEDIA_TYPE)
            {
                out.push(Finding::fail(
                    class.clone(),
                    CORE_SERVICE_DOC,
                    format!(
                        "service-doc content-type should be '{HTML_MEDIA_TYPE}', actually {:?}",
                        resp.content_type
                    ),
                ));
            }
        }
    }

    or_pass(out, &class, CORE_SERVICE_DOC, "service-doc is reachable HTML")
}

pub fn core_catalog_schema(ctx: &ProbeContext) -> Vec<Finding> {
    let outcome = ctx.schemas.validate(&ctx.landing.body);
    ctx.schemas.outcome_findings(
        ConformanceClass::Core,
        CORE_CATALOG_SCHEMA,
        &ctx.landing.url,
        outcome,
    )
}

/// Advertisement consistency: a responding search endpoint on a deployment
/// that does not advertise item-search is an undocumented capability.
pub fn core_undocumented_search(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::Core;

    if ctx.landing.advertises(&ConformanceClass::ItemSearch) {
        return vec![Finding::pass(
            class,
            CORE_UNDOCUMENTED_SEARCH,
            "item-search is advertised; endpoint checks run in its battery",
        )];
    }

    let url = ctx.landing.default_endpoint("search");
    match ctx.client.get(&url, &[("limit", "1".to_string())]) {
        Ok(resp) if resp.status == 200 => vec![Finding::warn(
            class,
            CORE_UNDOCUMENTED_SEARCH,
            "search endpoint responds but item-search is not in 'conformsTo'",
        )
        .with_context(url)],
        _ => vec![Finding::pass(
            class,
            CORE_UNDOCUMENTED_SEARCH,
            "no undocumented search endpoint",
        )],
    }
}

// --- ogcapi-features battery ---

pub fn features_conformance(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::Features;
    let mut out = Vec::new();

    let Some(href) = ctx.landing.link("conformance") else {
        return vec![Finding::fail(
            class,
            FEATURES_CONFORMANCE,
            "prerequisite absent: Link[rel=conformance] is required by ogcapi-features",
        )];
    };

    if !href.trim_end_matches('/').ends_with("/conformance") {
        out.push(Finding::fail(
            class.clone(),
            FEATURES_CONFORMANCE,
            format!("Link[rel=conformance] should href /conformance, actually {href}"),
        ));
    }

    match ctx.client.get(href, &[]) {
        Err(e) => out.push(fetch_failed(&class, FEATURES_CONFORMANCE, "GET conformance", &e)),
        Ok(resp) => {
            if require_200(&mut out, &class, FEATURES_CONFORMANCE, "conformance", &resp) {
                if !rules::is_json_media_type(resp.content_type.as_deref()) {
                    out.push(Finding::fail(
                        class.clone(),
                        FEATURES_CONFORMANCE,
                        format!(
                            "conformance content-type should be '{JSON_MEDIA_TYPE}', actually {:?}",
                            resp.content_type
                        ),
                    ));
                }
                match resp.json().and_then(|b| b.get("conformsTo")) {
                    None => out.push(Finding::fail(
                        class.clone(),
                        FEATURES_CONFORMANCE,
                        "conformance body should carry a 'conformsTo' array",
                    )),
                    Some(conforms) => {
                        let landing = ctx.landing.body.get("conformsTo");
                        if landing != Some(conforms) {
                            out.push(Finding::warn(
                                class.clone(),
                                FEATURES_CONFORMANCE,
                                "landing page and /conformance 'conformsTo' lists differ",
                            ));
                        }
                    }
                }
            }
        }
    }

    or_pass(out, &class, FEATURES_CONFORMANCE, "conformance endpoint agrees with landing page")
}

pub fn features_data_link(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::Features;
    let mut out = Vec::new();

    if ctx.landing.link("data").is_none() {
        out.push(Finding::fail(
            class.clone(),
            FEATURES_DATA_LINK,
            "prerequisite absent: Link[rel=data] should href the collections endpoint",
        ));
    }
    // Widespread legacy relation; most deployments can't drop it.
    if ctx.landing.link("collections").is_some() {
        out.push(Finding::warn(
            class.clone(),
            FEATURES_DATA_LINK,
            "Link[rel=collections] is a nonstandard relation, use Link[rel=data]",
        ));
    }

    or_pass(out, &class, FEATURES_DATA_LINK, "collection links are well-formed")
}

pub fn features_collections(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::Features;
    let mut out = Vec::new();
    let url = ctx.collections_url();

    match ctx.client.get(&url, &[]) {
        Err(e) => out.push(fetch_failed(&class, FEATURES_COLLECTIONS, "GET collections", &e)),
        Ok(resp) => {
            if require_200(&mut out, &class, FEATURES_COLLECTIONS, "collections", &resp) {
                match resp.json().and_then(|b| b.get("collections")).and_then(|c| c.as_array()) {
                    None => out.push(
                        Finding::fail(
                            class.clone(),
                            FEATURES_COLLECTIONS,
                            "collections body should carry a 'collections' array",
                        )
                        .with_context(url.clone()),
                    ),
                    Some(collections) => {
                        info!(count = collections.len(), "validating collection documents");
                        for collection in collections {
                            let outcome = ctx.schemas.validate(collection);
                            let source = collection
                                .get("id")
                                .and_then(|i| i.as_str())
                                .map(|id| format!("{url}/{id}"))
                                .unwrap_or_else(|| url.clone());
                            out.extend(ctx.schemas.outcome_findings(
                                class.clone(),
                                FEATURES_COLLECTIONS,
                                &source,
                                outcome,
                            ));
                        }
                    }
                }
            }
        }
    }

    // Collapse per-collection passes into the overall tally; failures and
    // warnings keep their individual messages.
    let passes = out
        .iter()
        .filter(|f| f.severity == crate::report::Severity::Pass)
        .count();
    out.retain(|f| f.severity != crate::report::Severity::Pass);
    if out.is_empty() {
        return vec![Finding::pass(
            class,
            FEATURES_COLLECTIONS,
            format!("{passes} collection document(s) validate"),
        )];
    }
    out
}

// --- item-search battery ---

pub fn search_link(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::ItemSearch;
    match ctx.landing.link("search") {
        Some(href) => vec![Finding::pass(
            class,
            SEARCH_LINK,
            format!("Link[rel=search] advertises {href}"),
        )],
        None => vec![Finding::fail(
            class,
            SEARCH_LINK,
            "prerequisite absent: Link[rel=search] is required when item-search is advertised \
             (probing the spec-default /search path)",
        )],
    }
}

pub fn search_basic(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::ItemSearch;
    let mut out = Vec::new();
    let url = ctx.search_url();

    match ctx.client.get(&url, &[]) {
        Err(e) => out.push(fetch_failed(&class, SEARCH_BASIC, "GET search", &e)),
        Ok(resp) => {
            if require_200(&mut out, &class, SEARCH_BASIC, "search", &resp) {
                if !rules::is_geojson_media_type(resp.content_type.as_deref()) {
                    out.push(Finding::fail(
                        class.clone(),
                        SEARCH_BASIC,
                        format!(
                            "search content-type should be '{GEOJSON_MEDIA_TYPE}', actually {:?}",
                            resp.content_type
                        ),
                    ));
                }
                match resp.json() {
                    None => out.push(Finding::fail(
                        class.clone(),
                        SEARCH_BASIC,
                        "search should return JSON, got non-JSON text",
                    )),
                    Some(body) => {
                        let outcome = ctx.schemas.validate(body);
                        out.extend(ctx.schemas.outcome_findings(
                            class.clone(),
                            SEARCH_BASIC,
                            &url,
                            outcome,
                        ));
                    }
                }
            }
        }
    }

    if ctx.opts.post {
        match ctx.client.post_json(&url, &SearchRequest::new().body()) {
            Err(e) => out.push(fetch_failed(&class, SEARCH_BASIC, "POST search", &e)),
            Ok(resp) => {
                require_200(&mut out, &class, SEARCH_BASIC, "POST search", &resp);
            }
        }
    }

    // A lone pass from the schema outcome is already in `out`; otherwise the
    // helper keeps the no-silent-drop invariant.
    or_pass(out, &class, SEARCH_BASIC, "search endpoint returns GeoJSON")
}

pub fn search_limit(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::ItemSearch;
    let mut out = Vec::new();
    let url = ctx.search_url();

    for &limit in rules::VALID_LIMITS {
        let req = SearchRequest::new().limit(limit);
        match ctx.client.get(&url, &req.query_pairs()) {
            Err(e) => out.push(fetch_failed(
                &class,
                SEARCH_LIMIT,
                &format!("GET search with limit={limit}"),
                &e,
            )),
            Ok(resp) => {
                let what = format!("search with limit={limit}");
                if require_200(&mut out, &class, SEARCH_LIMIT, &what, &resp) {
                    if let Some(features) = features_of(&resp) {
                        if features.len() as i64 > limit {
                            out.push(Finding::fail(
                                class.clone(),
                                SEARCH_LIMIT,
                                format!(
                                    "search with limit={limit} returned {} features",
                                    features.len()
                                ),
                            ));
                        }
                    } else {
                        out.push(Finding::fail(
                            class.clone(),
                            SEARCH_LIMIT,
                            format!("{what} returned no parseable 'features' array"),
                        ));
                    }
                }
            }
        }

        if ctx.opts.post {
            match ctx.client.post_json(&url, &SearchRequest::new().limit(limit).body()) {
                Err(e) => out.push(fetch_failed(
                    &class,
                    SEARCH_LIMIT,
                    &format!("POST search with limit={limit}"),
                    &e,
                )),
                Ok(resp) => {
                    require_200(
                        &mut out,
                        &class,
                        SEARCH_LIMIT,
                        &format!("POST search with limit={limit}"),
                        &resp,
                    );
                }
            }
        }
    }

    // Boundary abuse, limit=0 included: a well-formed finding either way.
    for &limit in rules::INVALID_LIMITS {
        let req = SearchRequest::new().limit(limit);
        match ctx.client.get(&url, &req.query_pairs()) {
            Err(e) => out.push(fetch_failed(
                &class,
                SEARCH_LIMIT,
                &format!("GET search with limit={limit}"),
                &e,
            )),
            Ok(resp) => require_400(
                &mut out,
                &class,
                SEARCH_LIMIT,
                &format!("search with invalid limit={limit}"),
                &resp,
            ),
        }

        if ctx.opts.post {
            match ctx.client.post_json(&url, &SearchRequest::new().limit(limit).body()) {
                Err(e) => out.push(fetch_failed(
                    &class,
                    SEARCH_LIMIT,
                    &format!("POST search with limit={limit}"),
                    &e,
                )),
                Ok(resp) => require_400(
                    &mut out,
                    &class,
                    SEARCH_LIMIT,
                    &format!("POST search with invalid limit={limit}"),
                    &resp,
                ),
            }
        }
    }

    or_pass(out, &class, SEARCH_LIMIT, "limit boundaries behave")
}

pub fn search_bbox(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::ItemSearch;
    let mut out = Vec::new();
    let url = ctx.search_url();

    for &bbox in rules::VALID_BBOXES {
        match ctx.client.get(&url, &[("bbox", bbox.to_string())]) {
            Err(e) => out.push(fetch_failed(
                &class,
                SEARCH_BBOX,
                &format!("GET search with bbox={bbox}"),
                &e,
            )),
            Ok(resp) => {
                let what = format!("search with bbox={bbox}");
                if require_200(&mut out, &class, SEARCH_BBOX, &what, &resp) {
                    match features_of(&resp) {
                        None => out.push(Finding::fail(
                            class.clone(),
                            SEARCH_BBOX,
                            format!("{what} returned no parseable 'features' array"),
                        )),
                        Some(features) => {
                            let probe: Vec<f64> = bbox
                                .split(',')
                                .filter_map(|c| c.trim().parse().ok())
                                .collect();
                            for feature in features {
                                if rules::item_overlaps_bbox(feature, &probe) == Some(false) {
                                    let id = feature
                                        .get("id")
                                        .and_then(|i| i.as_str())
                                        .unwrap_or("(no id)");
                                    out.push(Finding::fail(
                                        class.clone(),
                                        SEARCH_BBOX,
                                        format!(
                                            "item {id} does not overlap requested bbox {bbox}"
                                        ),
                                    ));
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    if ctx.opts.post {
        for bbox in [json!([100.0, 0.0, 105.0, 1.0]), json!([100.0, 0.0, 0.0, 105.0, 1.0, 1.0])] {
            let body = json!({ "bbox": bbox });
            match ctx.client.post_json(&url, &body) {
                Err(e) => out.push(fetch_failed(&class, SEARCH_BBOX, "POST search with bbox", &e)),
                Ok(resp) => {
                    require_200(
                        &mut out,
                        &class,
                        SEARCH_BBOX,
                        &format!("POST search with bbox={}", body["bbox"]),
                        &resp,
                    );
                }
            }
        }
    }

    or_pass(out, &class, SEARCH_BBOX, "bbox filtering returns overlapping items")
}

pub fn search_bbox_malformed(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::ItemSearch;
    let mut out = Vec::new();
    let url = ctx.search_url();

    for &bbox in rules::MALFORMED_BBOXES {
        match ctx.client.get(&url, &[("bbox", bbox.to_string())]) {
            Err(e) => out.push(fetch_failed(
                &class,
                SEARCH_BBOX_MALFORMED,
                &format!("GET search with bbox={bbox}"),
                &e,
            )),
            Ok(resp) => require_400(
                &mut out,
                &class,
                SEARCH_BBOX_MALFORMED,
                &format!("search with malformed bbox={bbox}"),
                &resp,
            ),
        }
    }

    if ctx.opts.post {
        // CSV string where an array is required, plus wrong-arity arrays.
        let bodies = [
            json!({"bbox": "100.0, 0.0, 105.0, 1.0"}),
            json!({"bbox": [0]}),
            json!({"bbox": [0, 0, 0, 1, 1]}),
            json!({"bbox": [100.0, 1.0, 105.0, 0.0]}),
        ];
        for body in bodies {
            match ctx.client.post_json(&url, &body) {
                Err(e) => out.push(fetch_failed(
                    &class,
                    SEARCH_BBOX_MALFORMED,
                    "POST search with malformed bbox",
                    &e,
                )),
                Ok(resp) => require_400(
                    &mut out,
                    &class,
                    SEARCH_BBOX_MALFORMED,
                    &format!("POST search with malformed bbox={}", body["bbox"]),
                    &resp,
                ),
            }
        }
    }

    or_pass(
        out,
        &class,
        SEARCH_BBOX_MALFORMED,
        "malformed bbox values are rejected with 400",
    )
}

pub fn search_datetime(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::ItemSearch;
    let mut out = Vec::new();
    let url = ctx.search_url();

    // Seed scenario: a datetime lifted from a live item must match it.
    match ctx.client.get(&url, &[("limit", "1".to_string())]) {
        Err(e) => out.push(fetch_failed(&class, SEARCH_DATETIME, "GET search", &e)),
        Ok(resp) => {
            let item_datetime = features_of(&resp)
                .and_then(|f| f.first())
                .and_then(|i| i.get("properties"))
                .and_then(|p| p.get("datetime"))
                .and_then(|d| d.as_str())
                .map(str::to_string);
            match item_datetime {
                None => out.push(Finding::warn(
                    class.clone(),
                    SEARCH_DATETIME,
                    "no item with a datetime available to seed the live-value scenario",
                )),
                Some(dt) => match ctx.client.get(&url, &[("datetime", dt.clone())]) {
                    Err(e) => out.push(fetch_failed(
                        &class,
                        SEARCH_DATETIME,
                        &format!("GET search with datetime={dt}"),
                        &e,
                    )),
                    Ok(resp) => {
                        let what = format!("search with item-derived datetime={dt}");
                        if require_200(&mut out, &class, SEARCH_DATETIME, &what, &resp)
                            && features_of(&resp).map(Vec::len).unwrap_or(0) == 0
                        {
                            out.push(Finding::fail(
                                class.clone(),
                                SEARCH_DATETIME,
                                format!("{what} returned no results"),
                            ));
                        }
                    }
                },
            }
        }
    }

    for &dt in rules::VALID_DATETIMES {
        match ctx.client.get(&url, &[("datetime", dt.to_string())]) {
            Err(e) => out.push(fetch_failed(
                &class,
                SEARCH_DATETIME,
                &format!("GET search with datetime={dt}"),
                &e,
            )),
            Ok(resp) => {
                let what = format!("search with datetime={dt}");
                if require_200(&mut out, &class, SEARCH_DATETIME, &what, &resp)
                    && resp.json().is_none()
                {
                    out.push(Finding::fail(
                        class.clone(),
                        SEARCH_DATETIME,
                        format!("{what} returned a non-JSON response"),
                    ));
                }
            }
        }
    }

    or_pass(out, &class, SEARCH_DATETIME, "datetime instants and intervals are accepted")
}

pub fn search_datetime_malformed(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::ItemSearch;
    let mut out = Vec::new();
    let url = ctx.search_url();

    for &dt in rules::INVALID_DATETIMES {
        match ctx.client.get(&url, &[("datetime", dt.to_string())]) {
            Err(e) => out.push(fetch_failed(
                &class,
                SEARCH_DATETIME_MALFORMED,
                &format!("GET search with datetime={dt}"),
                &e,
            )),
            Ok(resp) => require_400(
                &mut out,
                &class,
                SEARCH_DATETIME_MALFORMED,
                &format!("search with malformed datetime={dt}"),
                &resp,
            ),
        }
    }

    or_pass(
        out,
        &class,
        SEARCH_DATETIME_MALFORMED,
        "malformed datetime values are rejected with 400",
    )
}

pub fn search_ids(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::ItemSearch;
    let mut out = Vec::new();
    let url = ctx.search_url();

    let first_page = match ctx.client.get(&url, &[("limit", "10".to_string())]) {
        Err(e) => return vec![fetch_failed(&class, SEARCH_IDS, "GET search", &e)],
        Ok(resp) => resp,
    };
    let ids: Vec<String> = features_of(&first_page)
        .map(|features| {
            features
                .iter()
                .filter_map(|f| f.get("id").and_then(|i| i.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if ids.is_empty() {
        return vec![Finding::warn(
            class,
            SEARCH_IDS,
            "search with no parameters returned zero results; ids scenarios not exercised",
        )];
    }

    let mut subsets: Vec<Vec<String>> = vec![vec![ids[0].clone()]];
    if ids.len() > 1 {
        subsets.push(vec![ids[0].clone(), ids[1].clone()]);
    }
    subsets.push(ids.clone());

    for subset in subsets {
        let req = SearchRequest::new().ids(&subset);
        match ctx.client.get(&url, &req.query_pairs()) {
            Err(e) => out.push(fetch_failed(
                &class,
                SEARCH_IDS,
                &format!("GET search with ids={}", subset.join(",")),
                &e,
            )),
            Ok(resp) => {
                check_only_matching(
                    &mut out,
                    &class,
                    SEARCH_IDS,
                    &format!("search with ids={}", subset.join(",")),
                    &resp,
                    "id",
                    &subset,
                );
            }
        }

        if ctx.opts.post {
            match ctx.client.post_json(&url, &SearchRequest::new().ids(&subset).body()) {
                Err(e) => out.push(fetch_failed(&class, SEARCH_IDS, "POST search with ids", &e)),
                Ok(resp) => check_only_matching(
                    &mut out,
                    &class,
                    SEARCH_IDS,
                    &format!("POST search with ids={}", subset.join(",")),
                    &resp,
                    "id",
                    &subset,
                ),
            }
        }
    }

    or_pass(out, &class, SEARCH_IDS, "ids filtering returns only the requested items")
}

/// Every returned feature must carry one of the allowed values in `field`.
fn check_only_matching(
    out: &mut Vec<Finding>,
    class: &ConformanceClass,
    rule: &'static str,
    what: &str,
    resp: &ProbeResponse,
    field: &str,
    allowed: &[String],
) {
    if !require_200(out, class, rule, what, resp) {
        return;
    }
    let Some(features) = features_of(resp) else {
        out.push(Finding::fail(
            class.clone(),
            rule,
            format!("{what} returned no parseable 'features' array"),
        ));
        return;
    };
    let stray = features.iter().any(|f| {
        f.get(field)
            .and_then(|v| v.as_str())
            .map(|v| !allowed.iter().any(|a| a == v))
            .unwrap_or(true)
    });
    if stray {
        out.push(Finding::fail(
            class.clone(),
            rule,
            format!("{what} returned items outside the requested set"),
        ));
    }
}

pub fn search_collections(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::ItemSearch;
    let mut out = Vec::new();
    let url = ctx.search_url();

    let collection_ids: Vec<String> = match ctx.client.get(&ctx.collections_url(), &[]) {
        Err(e) => return vec![fetch_failed(&class, SEARCH_COLLECTIONS, "GET collections", &e)],
        Ok(resp) => resp
            .json()
            .and_then(|b| b.get("collections"))
            .and_then(|c| c.as_array())
            .map(|collections| {
                collections
                    .iter()
                    .filter_map(|c| c.get("id").and_then(|i| i.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    };

    if collection_ids.is_empty() {
        return vec![Finding::warn(
            class,
            SEARCH_COLLECTIONS,
            "no collections advertised; collections scenarios not exercised",
        )];
    }

    let mut subsets: Vec<Vec<String>> = vec![collection_ids.clone()];
    for cid in collection_ids.iter().take(3) {
        subsets.push(vec![cid.clone()]);
    }

    for subset in subsets {
        let req = SearchRequest::new().collections(&subset);
        match ctx.client.get(&url, &req.query_pairs()) {
            Err(e) => out.push(fetch_failed(
                &class,
                SEARCH_COLLECTIONS,
                &format!("GET search with collections={}", subset.join(",")),
                &e,
            )),
            Ok(resp) => check_only_matching(
                &mut out,
                &class,
                SEARCH_COLLECTIONS,
                &format!("search with collections={}", subset.join(",")),
                &resp,
                "collection",
                &subset,
            ),
        }

        if ctx.opts.post {
            match ctx
                .client
                .post_json(&url, &SearchRequest::new().collections(&subset).body())
            {
                Err(e) => out.push(fetch_failed(
                    &class,
                    SEARCH_COLLECTIONS,
                    "POST search with collections",
                    &e,
                )),
                Ok(resp) => check_only_matching(
                    &mut out,
                    &class,
                    SEARCH_COLLECTIONS,
                    &format!("POST search with collections={}", subset.join(",")),
                    &resp,
                    "collection",
                    &subset,
                ),
            }
        }
    }

    or_pass(
        out,
        &class,
        SEARCH_COLLECTIONS,
        "collections filtering returns only the requested collections",
    )
}

pub fn search_intersects(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::ItemSearch;
    let mut out = Vec::new();
    let url = ctx.search_url();

    for (name, geometry) in rules::intersects_fixtures() {
        let req = SearchRequest::new().intersects(geometry.clone());
        match ctx.client.get(&url, &req.query_pairs()) {
            Err(e) => out.push(fetch_failed(
                &class,
                SEARCH_INTERSECTS,
                &format!("GET search with intersects={name}"),
                &e,
            )),
            Ok(resp) => {
                let what = format!("search with intersects={name}");
                if require_200(&mut out, &class, SEARCH_INTERSECTS, &what, &resp)
                    && resp.json().is_none()
                {
                    out.push(Finding::fail(
                        class.clone(),
                        SEARCH_INTERSECTS,
                        format!("{what} returned a non-JSON response"),
                    ));
                }
            }
        }

        if ctx.opts.post {
            match ctx
                .client
                .post_json(&url, &json!({ "intersects": geometry }))
            {
                Err(e) => out.push(fetch_failed(
                    &class,
                    SEARCH_INTERSECTS,
                    &format!("POST search with intersects={name}"),
                    &e,
                )),
                Ok(resp) => {
                    require_200(
                        &mut out,
                        &class,
                        SEARCH_INTERSECTS,
                        &format!("POST search with intersects={name}"),
                        &resp,
                    );
                }
            }
        }
    }

    or_pass(out, &class, SEARCH_INTERSECTS, "every GeoJSON geometry type is accepted")
}

pub fn search_pagination(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::ItemSearch;
    let url = ctx.search_url();

    let trace = match walk_pages(ctx, &url, 1) {
        Ok(trace) => trace,
        Err(e) => return vec![fetch_failed(&class, SEARCH_PAGINATION, "pagination walk", &e)],
    };
    rules::check_pagination(class, SEARCH_PAGINATION, &trace)
}

/// Follow `next` links from a limit-bounded search until exhaustion or the
/// page cap. Strictly sequential: each request depends on the last.
fn walk_pages(ctx: &ProbeContext, url: &str, limit: i64) -> Result<PageTrace, FetchError> {
    let mut trace = PageTrace::default();

    let mut resp = ctx.client.get(url, &[("limit", limit.to_string())])?;
    loop {
        let ids = features_of(&resp)
            .map(|features| {
                features
                    .iter()
                    .filter_map(|f| f.get("id").and_then(|i| i.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let next = resp
            .json()
            .and_then(|b| link_object(b, "next"))
            .and_then(|l| l.get("href"))
            .and_then(|h| h.as_str())
            .map(str::to_string);

        trace.pages.push(PageRecord {
            url: resp.url.clone(),
            status: resp.status,
            ids,
            next: next.clone(),
        });

        let Some(next_url) = next else { break };
        if trace.pages.len() >= ctx.opts.max_pages {
            trace.truncated = true;
            break;
        }
        resp = ctx.client.get(&next_url, &[])?;
    }

    Ok(trace)
}

pub fn search_content_negotiation(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::ItemSearch;
    let mut out = Vec::new();
    let url = ctx.search_url();

    match ctx.client.get_accept(&url, &[], GEOJSON_MEDIA_TYPE) {
        Err(e) => out.push(fetch_failed(
            &class,
            SEARCH_CONTENT_NEGOTIATION,
            "GET search with Accept: application/geo+json",
            &e,
        )),
        Ok(resp) => {
            let what = "search with Accept: application/geo+json";
            if require_200(&mut out, &class, SEARCH_CONTENT_NEGOTIATION, what, &resp)
                && !rules::is_geojson_media_type(resp.content_type.as_deref())
            {
                out.push(Finding::fail(
                    class.clone(),
                    SEARCH_CONTENT_NEGOTIATION,
                    format!(
                        "{what} answered with content-type {:?}",
                        resp.content_type
                    ),
                ));
            }
        }
    }

    match ctx.client.get_accept(&url, &[], "application/xml") {
        Err(e) => out.push(fetch_failed(
            &class,
            SEARCH_CONTENT_NEGOTIATION,
            "GET search with Accept: application/xml",
            &e,
        )),
        Ok(resp) => {
            if resp.status == 200 {
                if rules::is_geojson_media_type(resp.content_type.as_deref()) {
                    out.push(Finding::warn(
                        class.clone(),
                        SEARCH_CONTENT_NEGOTIATION,
                        "unsupported Accept value was ignored instead of answered with 406",
                    ));
                } else {
                    out.push(Finding::fail(
                        class.clone(),
                        SEARCH_CONTENT_NEGOTIATION,
                        format!(
                            "search claimed to satisfy Accept: application/xml with \
                             content-type {:?}",
                            resp.content_type
                        ),
                    ));
                }
            } else if resp.status != 406 {
                out.push(Finding::warn(
                    class.clone(),
                    SEARCH_CONTENT_NEGOTIATION,
                    format!(
                        "unsupported Accept value answered with status {} instead of 406",
                        resp.status
                    ),
                ));
            }
        }
    }

    or_pass(
        out,
        &class,
        SEARCH_CONTENT_NEGOTIATION,
        "content negotiation honors Accept semantics",
    )
}

// --- search extension batteries ---

fn probe_search_parameter(
    ctx: &ProbeContext,
    class: ConformanceClass,
    rule: &'static str,
    param: &'static str,
    value: String,
) -> Vec<Finding> {
    let mut out = Vec::new();
    let url = ctx.search_url();

    if ctx.landing.link("search").is_none() {
        return vec![Finding::fail(
            class,
            rule,
            format!("prerequisite absent: {param} rides on the search endpoint, which is not linked"),
        )];
    }

    match ctx.client.get(&url, &[(param, value.clone())]) {
        Err(e) => out.push(fetch_failed(&class, rule, &format!("GET search with {param}"), &e)),
        Ok(resp) => {
            let what = format!("search with {param}={value}");
            if require_200(&mut out, &class, rule, &what, &resp) && resp.json().is_none() {
                out.push(Finding::fail(
                    class.clone(),
                    rule,
                    format!("{what} returned a non-JSON response"),
                ));
            }
        }
    }

    or_pass(out, &class, rule, &format!("{param} parameter is accepted"))
}

pub fn sort_sortby(ctx: &ProbeContext) -> Vec<Finding> {
    probe_search_parameter(
        ctx,
        ConformanceClass::Sort,
        SORT_SORTBY,
        "sortby",
        "properties.datetime".to_string(),
    )
}

pub fn fields_fields(ctx: &ProbeContext) -> Vec<Finding> {
    probe_search_parameter(
        ctx,
        ConformanceClass::Fields,
        FIELDS_FIELDS,
        "fields",
        "id".to_string(),
    )
}

pub fn query_query(ctx: &ProbeContext) -> Vec<Finding> {
    probe_search_parameter(
        ctx,
        ConformanceClass::Query,
        QUERY_QUERY,
        "query",
        json!({"datetime": {"gte": "1900-01-01T00:00:00Z"}}).to_string(),
    )
}

pub fn filter_filter(ctx: &ProbeContext) -> Vec<Finding> {
    probe_search_parameter(
        ctx,
        ConformanceClass::Filter,
        FILTER_FILTER,
        "filter",
        "id IS NOT NULL".to_string(),
    )
}

// --- transaction battery ---

/// Holds a created test item until released; deletion is attempted on every
/// exit path, the drop impl included, so a failed check never strands data.
struct ItemGuard<'a> {
    client: &'a ApiClient,
    url: String,
    released: bool,
}

impl ItemGuard<'_> {
    fn release(&mut self) -> Result<u16, FetchError> {
        self.released = true;
        self.client.delete(&self.url).map(|r| r.status)
    }
}

impl Drop for ItemGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.client.delete(&self.url);
        }
    }
}

fn transaction_test_item(collection: &str, id: &str) -> Value {
    json!({
        "type": "Feature",
        "stac_version": "1.0.0",
        "id": id,
        "collection": collection,
        "geometry": {"type": "Point", "coordinates": [102.0, 0.5]},
        "bbox": [102.0, 0.5, 102.0, 0.5],
        "properties": {"datetime": "2020-01-01T00:00:00Z"},
        "links": [],
        "assets": {}
    })
}

pub fn transaction_crd(ctx: &ProbeContext) -> Vec<Finding> {
    let class = ConformanceClass::Transaction;
    let mut out = Vec::new();

    let collection_id = match ctx.client.get(&ctx.collections_url(), &[]) {
        Err(e) => return vec![fetch_failed(&class, TRANSACTION_CRD, "GET collections", &e)],
        Ok(resp) => resp
            .json()
            .and_then(|b| b.get("collections"))
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("id"))
            .and_then(|i| i.as_str())
            .map(str::to_string),
    };
    let Some(collection_id) = collection_id else {
        return vec![Finding::fail(
            class,
            TRANSACTION_CRD,
            "prerequisite absent: no collection available to create a test item in",
        )];
    };

    let item_id = format!("stac-probe-txn-{}", std::process::id());
    let items_url = format!(
        "{}/{}/items",
        ctx.collections_url().trim_end_matches('/'),
        collection_id
    );
    let item_url = format!("{items_url}/{item_id}");
    let item = transaction_test_item(&collection_id, &item_id);

    info!(collection = %collection_id, item = %item_id, "transaction check creating test item");
    match ctx.client.post_json(&items_url, &item) {
        Err(e) => {
            out.push(fetch_failed(&class, TRANSACTION_CRD, "POST item", &e));
            return out;
        }
        Ok(resp) if !matches!(resp.status, 200 | 201) => {
            out.push(
                Finding::fail(
                    class,
                    TRANSACTION_CRD,
                    format!("create returned status {} instead of 201", resp.status),
                )
                .with_context(items_url),
            );
            return out;
        }
        Ok(_) => {}
    }

    // Created; everything below runs under the guard.
    let mut guard = ItemGuard {
        client: ctx.client,
        url: item_url.clone(),
        released: false,
    };

    match ctx.client.get(&item_url, &[]) {
        Err(e) => out.push(fetch_failed(&class, TRANSACTION_CRD, "GET created item", &e)),
        Ok(resp) => {
            if require_200(&mut out, &class, TRANSACTION_CRD, "read-after-create", &resp) {
                let read_id = resp.json().and_then(|b| b.get("id")).and_then(|i| i.as_str());
                if read_id != Some(item_id.as_str()) {
                    out.push(Finding::fail(
                        class.clone(),
                        TRANSACTION_CRD,
                        format!("read-after-create returned id {read_id:?}, expected \"{item_id}\""),
                    ));
                }
            }
        }
    }

    match guard.release() {
        Ok(status) if matches!(status, 200 | 204) => {}
        Ok(status) => out.push(
            Finding::fail(
                class.clone(),
                TRANSACTION_CRD,
                format!("delete returned status {status}; manual cleanup needed"),
            )
            .with_context(format!("created item id: {item_id} at {item_url}")),
        ),
        Err(e) => out.push(
            Finding::fail(
                class.clone(),
                TRANSACTION_CRD,
                format!("delete failed: {e}; manual cleanup needed"),
            )
            .with_context(format!("created item id: {item_id} at {item_url}")),
        ),
    }

    or_pass(out, &class, TRANSACTION_CRD, "create, read and delete round-trip")
}
