//! Core domain types for STAC API conformance probing.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use serde_json::Value;

/// Media type required for catalog endpoints.
pub const JSON_MEDIA_TYPE: &str = "application/json";

/// Media type required for search responses.
pub const GEOJSON_MEDIA_TYPE: &str = "application/geo+json";

/// Media type required for the rel=service-desc OpenAPI document.
pub const OPENAPI_MEDIA_TYPE: &str = "application/vnd.oai.openapi+json;version=3.0";

/// Media type required for the rel=service-doc page.
pub const HTML_MEDIA_TYPE: &str = "text/html";

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A capability a deployment can advertise in its `conformsTo` list.
///
/// Known classes map to registered check batteries. URIs the probe does not
/// recognize are retained as [`ConformanceClass::Unknown`] so a future
/// deployment never crashes the run; they surface as SKIP findings instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConformanceClass {
    Core,
    Features,
    ItemSearch,
    Sort,
    Fields,
    Query,
    Filter,
    Transaction,
    Unknown(String),
}

impl ConformanceClass {
    /// Classify a `conformsTo` URI.
    ///
    /// Matching is version-agnostic: any `api.stacspec.org` URI ending in the
    /// class path matches, whatever the version segment says.
    pub fn classify(uri: &str) -> ConformanceClass {
        if !uri.starts_with("https://api.stacspec.org/") {
            return ConformanceClass::Unknown(uri.to_string());
        }
        if uri.ends_with("/core") {
            ConformanceClass::Core
        } else if uri.ends_with("/ogcapi-features") {
            ConformanceClass::Features
        } else if uri.ends_with("/item-search") {
            ConformanceClass::ItemSearch
        } else if uri.ends_with("#sort") {
            ConformanceClass::Sort
        } else if uri.ends_with("#fields") {
            ConformanceClass::Fields
        } else if uri.ends_with("#query") {
            ConformanceClass::Query
        } else if uri.ends_with("#filter") {
            ConformanceClass::Filter
        } else if uri.ends_with("/ogcapi-features/extensions/transaction")
            || uri.ends_with("#transaction")
        {
            ConformanceClass::Transaction
        } else {
            ConformanceClass::Unknown(uri.to_string())
        }
    }

    /// Short slug used in reports and `--exclude` flags.
    pub fn as_str(&self) -> &str {
        match self {
            ConformanceClass::Core => "core",
            ConformanceClass::Features => "features",
            ConformanceClass::ItemSearch => "item-search",
            ConformanceClass::Sort => "sort",
            ConformanceClass::Fields => "fields",
            ConformanceClass::Query => "query",
            ConformanceClass::Filter => "filter",
            ConformanceClass::Transaction => "transaction",
            ConformanceClass::Unknown(uri) => uri,
        }
    }
}

impl fmt::Display for ConformanceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ConformanceClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl FromStr for ConformanceClass {
    type Err = String;

    /// Parse an `--exclude` slug. Unrecognized slugs are an error rather than
    /// `Unknown` so typos in flags fail loudly.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core" => Ok(ConformanceClass::Core),
            "features" | "ogcapi-features" => Ok(ConformanceClass::Features),
            "item-search" | "search" => Ok(ConformanceClass::ItemSearch),
            "sort" => Ok(ConformanceClass::Sort),
            "fields" => Ok(ConformanceClass::Fields),
            "query" => Ok(ConformanceClass::Query),
            "filter" => Ok(ConformanceClass::Filter),
            "transaction" => Ok(ConformanceClass::Transaction),
            other => Err(format!(
                "unknown conformance class \"{}\": expected core, features, item-search, \
                 sort, fields, query, filter, or transaction",
                other
            )),
        }
    }
}

/// The four typed JSON documents a deployment returns.
///
/// Dispatch on the declared `type` field is closed: anything else is a
/// schema validation finding, never undefined behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Catalog,
    Collection,
    Item,
    ItemCollection,
}

impl DocumentKind {
    /// Closed dispatch on a document's `type` field.
    ///
    /// Returns `None` for a missing or unrecognized type (caller should
    /// produce a finding).
    pub fn from_type_field(doc: &Value) -> Option<DocumentKind> {
        match doc.get("type").and_then(|t| t.as_str()) {
            Some("Catalog") => Some(DocumentKind::Catalog),
            Some("Collection") => Some(DocumentKind::Collection),
            Some("Feature") => Some(DocumentKind::Item),
            Some("FeatureCollection") => Some(DocumentKind::ItemCollection),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentKind::Catalog => "Catalog",
            DocumentKind::Collection => "Collection",
            DocumentKind::Item => "Item",
            DocumentKind::ItemCollection => "ItemCollection",
        };
        f.write_str(name)
    }
}

/// A structured search query, renderable as GET parameters or a POST body.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intersects: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bbox(mut self, bbox: &[f64]) -> Self {
        self.bbox = Some(bbox.to_vec());
        self
    }

    pub fn datetime(mut self, datetime: impl Into<String>) -> Self {
        self.datetime = Some(datetime.into());
        self
    }

    pub fn intersects(mut self, geometry: Value) -> Self {
        self.intersects = Some(geometry);
        self
    }

    pub fn collections(mut self, ids: &[String]) -> Self {
        self.collections = ids.to_vec();
        self
    }

    pub fn ids(mut self, ids: &[String]) -> Self {
        self.ids = ids.to_vec();
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// GET form: list values become comma-separated, geometry is JSON-encoded.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(bbox) = &self.bbox {
            let csv: Vec<String> = bbox.iter().map(|c| c.to_string()).collect();
            pairs.push(("bbox", csv.join(",")));
        }
        if let Some(dt) = &self.datetime {
            pairs.push(("datetime", dt.clone()));
        }
        if let Some(geom) = &self.intersects {
            pairs.push(("intersects", geom.to_string()));
        }
        if !self.collections.is_empty() {
            pairs.push(("collections", self.collections.join(",")));
        }
        if !self.ids.is_empty() {
            pairs.push(("ids", self.ids.join(",")));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(token) = &self.token {
            pairs.push(("token", token.clone()));
        }
        pairs
    }

    /// POST form: the serialized struct is the request body.
    pub fn body(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_known_uris() {
        assert_eq!(
            ConformanceClass::classify("https://api.stacspec.org/v1.0.0/core"),
            ConformanceClass::Core
        );
        assert_eq!(
            ConformanceClass::classify("https://api.stacspec.org/v1.0.0/ogcapi-features"),
            ConformanceClass::Features
        );
        assert_eq!(
            ConformanceClass::classify("https://api.stacspec.org/v1.0.0/item-search"),
            ConformanceClass::ItemSearch
        );
        assert_eq!(
            ConformanceClass::classify("https://api.stacspec.org/v1.0.0/item-search#sort"),
            ConformanceClass::Sort
        );
        assert_eq!(
            ConformanceClass::classify(
                "https://api.stacspec.org/v1.0.0/ogcapi-features/extensions/transaction"
            ),
            ConformanceClass::Transaction
        );
    }

    #[test]
    fn classify_is_version_agnostic() {
        assert_eq!(
            ConformanceClass::classify("https://api.stacspec.org/v1.0.0-rc.2/item-search"),
            ConformanceClass::ItemSearch
        );
    }

    #[test]
    fn classify_retains_unknown_uris() {
        let uri = "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/core";
        match ConformanceClass::classify(uri) {
            ConformanceClass::Unknown(u) => assert_eq!(u, uri),
            other => panic!("expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn exclude_slug_round_trip() {
        assert_eq!(
            "item-search".parse::<ConformanceClass>().unwrap(),
            ConformanceClass::ItemSearch
        );
        assert_eq!(ConformanceClass::ItemSearch.as_str(), "item-search");
        assert!("bogus".parse::<ConformanceClass>().is_err());
    }

    #[test]
    fn document_kind_closed_dispatch() {
        assert_eq!(
            DocumentKind::from_type_field(&json!({"type": "Catalog"})),
            Some(DocumentKind::Catalog)
        );
        assert_eq!(
            DocumentKind::from_type_field(&json!({"type": "Feature"})),
            Some(DocumentKind::Item)
        );
        assert_eq!(
            DocumentKind::from_type_field(&json!({"type": "FeatureCollection"})),
            Some(DocumentKind::ItemCollection)
        );
        assert_eq!(DocumentKind::from_type_field(&json!({"type": "Widget"})), None);
        assert_eq!(DocumentKind::from_type_field(&json!({})), None);
    }

    #[test]
    fn search_request_query_pairs() {
        let req = SearchRequest::new()
            .bbox(&[100.0, 0.0, 105.0, 1.0])
            .datetime("2020-01-01T00:00:00Z/..")
            .ids(&["a".into(), "b".into()])
            .limit(10);

        let pairs = req.query_pairs();
        assert!(pairs.contains(&("bbox", "100,0,105,1".to_string())));
        assert!(pairs.contains(&("datetime", "2020-01-01T00:00:00Z/..".to_string())));
        assert!(pairs.contains(&("ids", "a,b".to_string())));
        assert!(pairs.contains(&("limit", "10".to_string())));
    }

    #[test]
    fn search_request_body_skips_empty_fields() {
        let body = SearchRequest::new().limit(5).body();
        assert_eq!(body, json!({"limit": 5}));
    }
}
