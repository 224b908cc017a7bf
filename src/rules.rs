//! Behavioral rules not expressible as schema checks.
//!
//! Pure functions over captured probe results: pagination walks, geometric
//! bbox semantics, content negotiation. The scenario fixtures (datetime
//! corpora, bbox batteries, limit boundaries, intersects geometries) live
//! here as versioned data so the permutations track the specification
//! instead of drifting inside call sites.

use serde_json::{json, Value};

use crate::report::Finding;
use crate::types::ConformanceClass;

/// Datetime values a conforming search endpoint must accept with 200.
///
/// Covers instants with fractional seconds of every precision, `,` as the
/// fraction separator, positive/negative/zero offsets, lowercase `t`/`z`,
/// and open and closed interval notation.
pub const VALID_DATETIMES: &[&str] = &[
    "1985-04-12T23:20:50.52Z",
    "1985-04-12T23:20:50,52Z",
    "1996-12-19T16:39:57-00:00",
    "1996-12-19T16:39:57+00:00",
    "1996-12-19T16:39:57-08:00",
    "1996-12-19T16:39:57+08:00",
    "../1985-04-12T23:20:50.52Z",
    "1985-04-12T23:20:50.52Z/..",
    "/1985-04-12T23:20:50.52Z",
    "1985-04-12T23:20:50.52Z/",
    "1985-04-12T23:20:50.52Z/1986-04-12T23:20:50.52Z",
    "1985-04-12T23:20:50.52+01:00/1986-04-12T23:20:50.52+01:00",
    "1985-04-12T23:20:50.52-01:00/1986-04-12T23:20:50.52-01:00",
    "1937-01-01T12:00:27.87+01:00",
    "1937-01-01T12:00:27.8710+01:00",
    "1937-01-01T12:00:27.8+01:00",
    "1937-01-01T12:00:27.8Z",
    "2020-07-23T00:00:00.000+03:00",
    "2020-07-23T00:00:00+03:00",
    "1985-04-12t23:20:50.000z",
    "2020-07-23T00:00:00Z",
    "2020-07-23T00:00:00.0Z",
    "2020-07-23T00:00:00.01Z",
    "2020-07-23T00:00:00.012Z",
    "2020-07-23T00:00:00.0123Z",
    "2020-07-23T00:00:00.01234Z",
    "2020-07-23T00:00:00.012345Z",
    "2020-07-23T00:00:00.0123456Z",
    "2020-07-23T00:00:00.01234567Z",
    "2020-07-23T00:00:00.012345678Z",
];

/// Datetime values a conforming search endpoint must reject with 400.
pub const INVALID_DATETIMES: &[&str] = &[
    "1985-04-12",                    // date only
    "1937-01-01T12:00:27.87+0100",   // offset missing ':' separator
    "37-01-01T12:00:27.87Z",         // year must be 4 digits
    "1985-12-12T23:20:50.52",        // no timezone
    "21985-12-12T23:20:50.52Z",      // year must be 4 digits
    "1985-13-12T23:20:50.52Z",       // month > 12
    "1985-12-32T23:20:50.52Z",       // day > 31
    "1985-12-01T25:20:50.52Z",       // hour > 24
    "1985-12-01T00:60:50.52Z",       // minute > 59
    "1985-12-01T00:06:61.52Z",       // second > 60
    "1985-04-12T23:20:50.Z",         // '.' but no fractional seconds
    "1985-04-12T23:20:50,Z",         // ',' but no fractional seconds
    "1990-12-31T23:59:61Z",          // second > 60 without fraction
    "1986-04-12T23:20:50.52Z/1985-04-12T23:20:50.52Z", // inverted interval
];

/// Limit values a conforming search endpoint must accept.
pub const VALID_LIMITS: &[i64] = &[1, 2, 10, 10000];

/// Limit values a conforming search endpoint must reject with 400.
/// Includes 0, which must produce a finding and never an unhandled fault.
pub const INVALID_LIMITS: &[i64] = &[-1, 0, 10001];

/// Well-formed bbox parameters (2D and 3D GET forms).
pub const VALID_BBOXES: &[&str] = &["100.0,0.0,105.0,1.0", "100.0,0.0,0.0,105.0,1.0,1.0"];

/// The 2D bbox fixture as numbers, for geometric overlap assertions.
pub const PROBE_BBOX: [f64; 4] = [100.0, 0.0, 105.0, 1.0];

/// Malformed bbox parameters: bracketed string, inverted latitudes, and
/// 1/2/3/5/7-element coordinate lists. Each must yield 400.
pub const MALFORMED_BBOXES: &[&str] = &[
    "[100.0, 0.0, 105.0, 1.0]",
    "100.0,1.0,105.0,0.0",
    "0",
    "0,0",
    "0,0,0",
    "0,0,0,1,1",
    "0,0,0,1,1,1,1",
];

/// GeoJSON geometries for the intersects battery, one per geometry type.
pub fn intersects_fixtures() -> Vec<(&'static str, Value)> {
    vec![
        ("Point", json!({"type": "Point", "coordinates": [102.0, 0.5]})),
        (
            "LineString",
            json!({"type": "LineString", "coordinates": [[102.0, 0.0], [103.0, 1.0], [104.0, 0.0]]}),
        ),
        (
            "Polygon",
            json!({"type": "Polygon", "coordinates": [
                [[100.0, 0.0], [101.0, 0.0], [101.0, 1.0], [100.0, 1.0], [100.0, 0.0]]
            ]}),
        ),
        (
            "Polygon with hole",
            json!({"type": "Polygon", "coordinates": [
                [[100.0, 0.0], [101.0, 0.0], [101.0, 1.0], [100.0, 1.0], [100.0, 0.0]],
                [[100.8, 0.8], [100.8, 0.2], [100.2, 0.2], [100.2, 0.8], [100.8, 0.8]]
            ]}),
        ),
        (
            "MultiPoint",
            json!({"type": "MultiPoint", "coordinates": [[100.0, 0.0], [101.0, 1.0]]}),
        ),
        (
            "MultiLineString",
            json!({"type": "MultiLineString", "coordinates": [
                [[100.0, 0.0], [101.0, 1.0]],
                [[102.0, 2.0], [103.0, 3.0]]
            ]}),
        ),
        (
            "MultiPolygon",
            json!({"type": "MultiPolygon", "coordinates": [
                [[[102.0, 2.0], [103.0, 2.0], [103.0, 3.0], [102.0, 3.0], [102.0, 2.0]]],
                [[[100.0, 0.0], [101.0, 0.0], [101.0, 1.0], [100.0, 1.0], [100.0, 0.0]]]
            ]}),
        ),
        (
            "GeometryCollection",
            json!({"type": "GeometryCollection", "geometries": [
                {"type": "Point", "coordinates": [100.0, 0.0]},
                {"type": "LineString", "coordinates": [[101.0, 0.0], [102.0, 1.0]]}
            ]}),
        ),
    ]
}

/// True when the content type (parameters stripped) is `application/json`.
pub fn is_json_media_type(content_type: Option<&str>) -> bool {
    media_type(content_type) == Some("application/json")
}

/// True for `application/geo+json`, with or without a charset parameter.
pub fn is_geojson_media_type(content_type: Option<&str>) -> bool {
    media_type(content_type) == Some("application/geo+json")
}

fn media_type(content_type: Option<&str>) -> Option<&str> {
    content_type.map(|ct| ct.split(';').next().unwrap_or(ct).trim())
}

/// Compute the 2D bounds of any GeoJSON geometry.
///
/// Walks nested coordinate arrays at any depth; returns `None` for a
/// geometry with no positions (or no geometry at all).
pub fn geometry_bounds(geometry: &Value) -> Option<[f64; 4]> {
    let mut bounds: Option<[f64; 4]> = None;

    if let Some(geometries) = geometry.get("geometries").and_then(|g| g.as_array()) {
        for inner in geometries {
            if let Some(b) = geometry_bounds(inner) {
                bounds = Some(merge(bounds, b));
            }
        }
        return bounds;
    }

    let coordinates = geometry.get("coordinates")?;
    accumulate(coordinates, &mut bounds);
    bounds
}

fn accumulate(value: &Value, bounds: &mut Option<[f64; 4]>) {
    let Some(arr) = value.as_array() else {
        return;
    };
    // A position is an array whose first element is a number.
    if let Some(x) = arr.first().and_then(|v| v.as_f64()) {
        if let Some(y) = arr.get(1).and_then(|v| v.as_f64()) {
            *bounds = Some(merge(*bounds, [x, y, x, y]));
        }
        return;
    }
    for inner in arr {
        accumulate(inner, bounds);
    }
}

fn merge(current: Option<[f64; 4]>, next: [f64; 4]) -> [f64; 4] {
    match current {
        None => next,
        Some(c) => [
            c[0].min(next[0]),
            c[1].min(next[1]),
            c[2].max(next[2]),
            c[3].max(next[3]),
        ],
    }
}

/// True when an item overlaps the 2D part of a 4- or 6-element bbox.
///
/// Prefers the item's declared `bbox`; falls back to bounds computed from
/// its geometry. Items with neither are not counted as violations.
pub fn item_overlaps_bbox(item: &Value, bbox: &[f64]) -> Option<bool> {
    let (min_x, min_y, max_x, max_y) = match bbox.len() {
        4 => (bbox[0], bbox[1], bbox[2], bbox[3]),
        6 => (bbox[0], bbox[1], bbox[3], bbox[4]),
        _ => return None,
    };

    let item_bounds = item
        .get("bbox")
        .and_then(|b| b.as_array())
        .and_then(|b| {
            let nums: Vec<f64> = b.iter().filter_map(|v| v.as_f64()).collect();
            match nums.len() {
                4 => Some([nums[0], nums[1], nums[2], nums[3]]),
                6 => Some([nums[0], nums[1], nums[3], nums[4]]),
                _ => None,
            }
        })
        .or_else(|| item.get("geometry").and_then(geometry_bounds))?;

    Some(
        item_bounds[0] <= max_x
            && item_bounds[2] >= min_x
            && item_bounds[1] <= max_y
            && item_bounds[3] >= min_y,
    )
}

/// One page captured during a pagination walk.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub url: String,
    pub status: u16,
    pub ids: Vec<String>,
    pub next: Option<String>,
}

/// The full trace of a pagination walk.
#[derive(Debug, Clone, Default)]
pub struct PageTrace {
    pub pages: Vec<PageRecord>,
    /// The walk hit the page cap while a `next` link was still present.
    pub truncated: bool,
}

/// Evaluate pagination semantics over a captured walk.
///
/// Requires pairwise-disjoint item ids across pages and a final page with no
/// `next` link (unless the walk was truncated at the cap, where the missing
/// terminal page is reported as a WARN rather than claimed either way).
pub fn check_pagination(
    class: ConformanceClass,
    rule: &'static str,
    trace: &PageTrace,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    if trace.pages.is_empty() {
        findings.push(Finding::fail(
            class,
            rule,
            "pagination walk captured no pages",
        ));
        return findings;
    }

    for page in &trace.pages {
        if page.status != 200 {
            findings.push(
                Finding::fail(
                    class.clone(),
                    rule,
                    format!("page returned status {} instead of 200", page.status),
                )
                .with_context(page.url.clone()),
            );
        }
    }

    let mut seen = std::collections::HashSet::new();
    let mut duplicates = Vec::new();
    for page in &trace.pages {
        for id in &page.ids {
            if !seen.insert(id.clone()) {
                duplicates.push(id.clone());
            }
        }
    }
    if !duplicates.is_empty() {
        duplicates.sort();
        duplicates.dedup();
        findings.push(Finding::fail(
            class.clone(),
            rule,
            format!(
                "item ids repeat across pages: {}",
                duplicates.join(", ")
            ),
        ));
    }

    let final_has_next = trace.pages.last().and_then(|p| p.next.as_ref()).is_some();
    if trace.truncated {
        findings.push(Finding::warn(
            class.clone(),
            rule,
            format!(
                "stopped after {} pages with a 'next' link still present",
                trace.pages.len()
            ),
        ));
    } else if final_has_next {
        findings.push(Finding::fail(
            class.clone(),
            rule,
            "final page still carries a 'next' link",
        ));
    }

    if findings.is_empty() {
        findings.push(Finding::pass(
            class,
            rule,
            format!(
                "followed {} page(s) to exhaustion, {} unique item id(s), no repeats",
                trace.pages.len(),
                seen.len()
            ),
        ));
    }
    findings
}
