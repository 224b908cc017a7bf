//! The versioned capability → checks registry.
//!
//! One immutable table, built once at process start and passed explicitly to
//! the runner. The scenario permutations per class are specification-version
//! data; a future spec revision gets a new constructor, not edits to ambient
//! state.

use crate::probe::{self, ProbeContext};
use crate::report::Finding;
use crate::types::ConformanceClass;

/// One registered scenario of one conformance class.
pub struct CheckDef {
    pub id: &'static str,
    pub class: ConformanceClass,
    pub run: fn(&ProbeContext) -> Vec<Finding>,
}

/// Ordered, immutable check table for one specification version.
pub struct CheckRegistry {
    version: &'static str,
    checks: Vec<CheckDef>,
}

impl CheckRegistry {
    /// The STAC API v1 battery.
    pub fn v1() -> Self {
        use ConformanceClass::*;
        let checks = vec![
            CheckDef { id: probe::CORE_LANDING_LINKS, class: Core, run: probe::core_landing_links },
            CheckDef { id: probe::CORE_CONFORMANCE_URIS, class: Core, run: probe::core_conformance_uris },
            CheckDef { id: probe::CORE_SERVICE_DESC, class: Core, run: probe::core_service_desc },
            CheckDef { id: probe::CORE_SERVICE_DOC, class: Core, run: probe::core_service_doc },
            CheckDef { id: probe::CORE_CATALOG_SCHEMA, class: Core, run: probe::core_catalog_schema },
            CheckDef { id: probe::CORE_UNDOCUMENTED_SEARCH, class: Core, run: probe::core_undocumented_search },
            CheckDef { id: probe::FEATURES_CONFORMANCE, class: Features, run: probe::features_conformance },
            CheckDef { id: probe::FEATURES_DATA_LINK, class: Features, run: probe::features_data_link },
            CheckDef { id: probe::FEATURES_COLLECTIONS, class: Features, run: probe::features_collections },
            CheckDef { id: probe::SEARCH_LINK, class: ItemSearch, run: probe::search_link },
            CheckDef { id: probe::SEARCH_BASIC, class: ItemSearch, run: probe::search_basic },
            CheckDef { id: probe::SEARCH_LIMIT, class: ItemSearch, run: probe::search_limit },
            CheckDef { id: probe::SEARCH_BBOX, class: ItemSearch, run: probe::search_bbox },
            CheckDef { id: probe::SEARCH_BBOX_MALFORMED, class: ItemSearch, run: probe::search_bbox_malformed },
            CheckDef { id: probe::SEARCH_DATETIME, class: ItemSearch, run: probe::search_datetime },
            CheckDef { id: probe::SEARCH_DATETIME_MALFORMED, class: ItemSearch, run: probe::search_datetime_malformed },
            CheckDef { id: probe::SEARCH_IDS, class: ItemSearch, run: probe::search_ids },
            CheckDef { id: probe::SEARCH_COLLECTIONS, class: ItemSearch, run: probe::search_collections },
            CheckDef { id: probe::SEARCH_INTERSECTS, class: ItemSearch, run: probe::search_intersects },
            CheckDef { id: probe::SEARCH_PAGINATION, class: ItemSearch, run: probe::search_pagination },
            CheckDef { id: probe::SEARCH_CONTENT_NEGOTIATION, class: ItemSearch, run: probe::search_content_negotiation },
            CheckDef { id: probe::SORT_SORTBY, class: Sort, run: probe::sort_sortby },
            CheckDef { id: probe::FIELDS_FIELDS, class: Fields, run: probe::fields_fields },
            CheckDef { id: probe::QUERY_QUERY, class: Query, run: probe::query_query },
            CheckDef { id: probe::FILTER_FILTER, class: Filter, run: probe::filter_filter },
            CheckDef { id: probe::TRANSACTION_CRD, class: Transaction, run: probe::transaction_crd },
        ];
        CheckRegistry {
            version: "v1",
            checks,
        }
    }

    pub fn version(&self) -> &'static str {
        self.version
    }

    pub fn iter(&self) -> impl Iterator<Item = &CheckDef> {
        self.checks.iter()
    }

    /// The classes with registered batteries, in registry order.
    pub fn classes(&self) -> Vec<ConformanceClass> {
        let mut classes = Vec::new();
        for check in &self.checks {
            if !classes.contains(&check.class) {
                classes.push(check.class.clone());
            }
        }
        classes
    }

    /// The ordered battery for one class.
    pub fn battery(&self, class: &ConformanceClass) -> Vec<&CheckDef> {
        self.checks.iter().filter(|c| &c.class == class).collect()
    }
}
