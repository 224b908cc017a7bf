//! Document schema selection and validation.
//!
//! Schema bundles are JSON data files embedded at build time, one bundle per
//! specification version, compiled into validators once at startup. Document
//! dispatch is closed over the four STAC document kinds.

use std::collections::BTreeMap;

use jsonschema::Validator;
use serde_json::Value;
use tracing::debug;

use crate::error::{SchemaCompileError, ValidationIssue};
use crate::report::Finding;
use crate::types::{ConformanceClass, DocumentKind};

/// Bundle used for documents that do not declare a version themselves
/// (ItemCollection bodies commonly omit `stac_version`).
pub const DEFAULT_VERSION: &str = "1.0.0";

const V1_0_0_BUNDLE: &[(DocumentKind, &str)] = &[
    (
        DocumentKind::Catalog,
        include_str!("../schemas/v1.0.0/catalog.json"),
    ),
    (
        DocumentKind::Collection,
        include_str!("../schemas/v1.0.0/collection.json"),
    ),
    (
        DocumentKind::Item,
        include_str!("../schemas/v1.0.0/item.json"),
    ),
    (
        DocumentKind::ItemCollection,
        include_str!("../schemas/v1.0.0/itemcollection.json"),
    ),
];

/// Outcome of validating one document.
#[derive(Debug)]
pub enum SchemaOutcome {
    Valid(DocumentKind),
    Invalid {
        kind: DocumentKind,
        issues: Vec<ValidationIssue>,
    },
    /// The `type` field is missing or not one of the four document kinds.
    UnknownType { actual: String },
    /// The declared `stac_version` has no embedded bundle. Degrades the one
    /// check that hit it; the run continues.
    UnsupportedVersion { version: String },
}

/// Compiled schema bundles keyed by specification version.
pub struct SchemaRegistry {
    bundles: BTreeMap<&'static str, BTreeMap<DocumentKind, Validator>>,
}

impl SchemaRegistry {
    /// Compile the embedded bundles. Built once at startup and passed
    /// explicitly to the runner.
    pub fn builtin() -> Result<Self, SchemaCompileError> {
        let mut bundles = BTreeMap::new();
        bundles.insert("1.0.0", Self::compile("1.0.0", V1_0_0_BUNDLE)?);
        Ok(SchemaRegistry { bundles })
    }

    fn compile(
        version: &str,
        sources: &[(DocumentKind, &str)],
    ) -> Result<BTreeMap<DocumentKind, Validator>, SchemaCompileError> {
        let mut validators = BTreeMap::new();
        for (kind, source) in sources {
            let schema: Value =
                serde_json::from_str(source).map_err(|e| SchemaCompileError {
                    version: version.to_string(),
                    kind: kind.to_string(),
                    message: e.to_string(),
                })?;
            let validator = jsonschema::validator_for(&schema).map_err(|e| SchemaCompileError {
                version: version.to_string(),
                kind: kind.to_string(),
                message: e.to_string(),
            })?;
            validators.insert(*kind, validator);
        }
        Ok(validators)
    }

    pub fn supported_versions(&self) -> Vec<&'static str> {
        self.bundles.keys().copied().collect()
    }

    /// Validate a document against the bundle its declared version selects.
    pub fn validate(&self, doc: &Value) -> SchemaOutcome {
        let Some(kind) = DocumentKind::from_type_field(doc) else {
            let actual = match doc.get("type") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => crate::types::json_type_name(other).to_string(),
                None => "(missing)".to_string(),
            };
            return SchemaOutcome::UnknownType { actual };
        };

        let declared = doc
            .get("stac_version")
            .and_then(|v| v.as_str())
            .or_else(|| {
                // ItemCollections usually carry the version on their features.
                doc.get("features")
                    .and_then(|f| f.as_array())
                    .and_then(|f| f.first())
                    .and_then(|i| i.get("stac_version"))
                    .and_then(|v| v.as_str())
            });

        let version = declared.unwrap_or(DEFAULT_VERSION);
        let Some(bundle) = self.bundles.get(version) else {
            return SchemaOutcome::UnsupportedVersion {
                version: version.to_string(),
            };
        };
        let Some(validator) = bundle.get(&kind) else {
            return SchemaOutcome::UnsupportedVersion {
                version: version.to_string(),
            };
        };

        debug!(%kind, version, "validating document");
        let issues: Vec<ValidationIssue> = validator
            .iter_errors(doc)
            .map(|e| ValidationIssue {
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();

        if issues.is_empty() {
            SchemaOutcome::Valid(kind)
        } else {
            SchemaOutcome::Invalid { kind, issues }
        }
    }

    /// Turn a validation outcome into findings for one check.
    pub fn outcome_findings(
        &self,
        class: ConformanceClass,
        rule: &'static str,
        source_url: &str,
        outcome: SchemaOutcome,
    ) -> Vec<Finding> {
        match outcome {
            SchemaOutcome::Valid(kind) => vec![Finding::pass(
                class,
                rule,
                format!("document validates as {}", kind),
            )
            .with_context(source_url.to_string())],
            SchemaOutcome::Invalid { kind, issues } => issues
                .into_iter()
                .map(|issue| {
                    Finding::fail(
                        class.clone(),
                        rule,
                        format!("{} schema violation: {}", kind, issue.message),
                    )
                    .with_context(format!("{} at {}", source_url, issue.path))
                })
                .collect(),
            SchemaOutcome::UnknownType { actual } => vec![Finding::fail(
                class,
                rule,
                format!(
                    "document 'type' must be Catalog, Collection, Feature, or \
                     FeatureCollection, got \"{}\"",
                    actual
                ),
            )
            .with_context(source_url.to_string())],
            SchemaOutcome::UnsupportedVersion { version } => vec![Finding::warn(
                class,
                rule,
                format!(
                    "no schema bundle for stac_version \"{}\" (supported: {})",
                    version,
                    self.supported_versions().join(", ")
                ),
            )
            .with_context(source_url.to_string())],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Severity;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builtin().unwrap()
    }

    fn valid_catalog() -> Value {
        json!({
            "type": "Catalog",
            "stac_version": "1.0.0",
            "id": "test-catalog",
            "description": "A test catalog",
            "links": [
                {"rel": "self", "href": "https://stac.example.com", "type": "application/json"}
            ]
        })
    }

    #[test]
    fn valid_catalog_passes() {
        let outcome = registry().validate(&valid_catalog());
        assert!(matches!(outcome, SchemaOutcome::Valid(DocumentKind::Catalog)));
    }

    #[test]
    fn catalog_missing_description_fails_with_path() {
        let mut doc = valid_catalog();
        doc.as_object_mut().unwrap().remove("description");
        match registry().validate(&doc) {
            SchemaOutcome::Invalid { kind, issues } => {
                assert_eq!(kind, DocumentKind::Catalog);
                assert!(!issues.is_empty());
            }
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_closed_dispatch() {
        let doc = json!({"type": "Widget", "stac_version": "1.0.0"});
        match registry().validate(&doc) {
            SchemaOutcome::UnknownType { actual } => assert_eq!(actual, "Widget"),
            other => panic!("expected UnknownType, got {:?}", other),
        }
    }

    #[test]
    fn unsupported_version_degrades_not_aborts() {
        let mut doc = valid_catalog();
        doc["stac_version"] = json!("9.9.9");
        match registry().validate(&doc) {
            SchemaOutcome::UnsupportedVersion { version } => assert_eq!(version, "9.9.9"),
            other => panic!("expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn item_with_geometry_requires_bbox() {
        let doc = json!({
            "type": "Feature",
            "stac_version": "1.0.0",
            "id": "item-1",
            "geometry": {"type": "Point", "coordinates": [0.0, 0.0]},
            "properties": {"datetime": "2020-01-01T00:00:00Z"},
            "links": [],
            "assets": {}
        });
        assert!(matches!(
            registry().validate(&doc),
            SchemaOutcome::Invalid { .. }
        ));
    }

    #[test]
    fn item_collection_without_version_uses_default_bundle() {
        let doc = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "id": "item-1",
                "geometry": null,
                "properties": {"datetime": null}
            }]
        });
        assert!(matches!(
            registry().validate(&doc),
            SchemaOutcome::Valid(DocumentKind::ItemCollection)
        ));
    }

    #[test]
    fn outcome_findings_severity_mapping() {
        let reg = registry();
        let passes = reg.outcome_findings(
            crate::types::ConformanceClass::Core,
            "core/catalog-schema",
            "https://stac.example.com",
            SchemaOutcome::Valid(DocumentKind::Catalog),
        );
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].severity, Severity::Pass);

        let warns = reg.outcome_findings(
            crate::types::ConformanceClass::Core,
            "core/catalog-schema",
            "https://stac.example.com",
            SchemaOutcome::UnsupportedVersion {
                version: "9.9.9".into(),
            },
        );
        assert_eq!(warns[0].severity, Severity::Warn);
    }
}
