//! Landing page discovery: the advertised capability set and endpoint links.

use std::collections::{BTreeMap, HashSet};

use reqwest::Url;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::ApiClient;
use crate::error::DiscoverError;
use crate::types::ConformanceClass;

/// The parsed API root document.
#[derive(Debug, Clone)]
pub struct LandingPage {
    /// The root URL as probed (after redirects).
    pub url: String,
    /// Advertised capabilities, deduplicated, first-seen order. Unknown URIs
    /// are retained.
    pub classes: Vec<ConformanceClass>,
    /// The raw `conformsTo` URIs, deduplicated, first-seen order.
    pub raw_classes: Vec<String>,
    /// Link relation -> resolved href. The first link per relation wins.
    pub links: BTreeMap<String, String>,
    /// The full landing page body, for schema validation.
    pub body: Value,
}

impl LandingPage {
    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links.get(rel).map(String::as_str)
    }

    pub fn advertises(&self, class: &ConformanceClass) -> bool {
        self.classes.contains(class)
    }

    /// A spec-default endpoint under the root, used when a link is absent.
    pub fn default_endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), path)
    }
}

/// Fetch the root document and extract capabilities and links.
///
/// A single GET through the shared client, so the retry policy applies. An
/// unreachable host or non-success status is fatal; a reachable root whose
/// body lacks the required fields is a non-fatal [`DiscoverError`] the
/// runner reports as a single FAIL finding.
pub fn discover(client: &ApiClient, root_url: &str) -> Result<LandingPage, DiscoverError> {
    let resp = client
        .get(root_url, &[])
        .map_err(|source| DiscoverError::Unreachable {
            url: root_url.to_string(),
            source,
        })?;

    if !resp.is_success() {
        return Err(DiscoverError::BadStatus {
            url: root_url.to_string(),
            status: resp.status,
        });
    }

    let body = resp
        .json()
        .cloned()
        .ok_or_else(|| DiscoverError::NotJson {
            message: format!("content type {:?}", resp.content_type),
        })?;

    let conforms_to = body
        .get("conformsTo")
        .and_then(|v| v.as_array())
        .filter(|a| !a.is_empty())
        .ok_or(DiscoverError::MissingConformance)?;

    let link_values = body
        .get("links")
        .and_then(|v| v.as_array())
        .filter(|a| !a.is_empty())
        .ok_or(DiscoverError::MissingLinks)?;

    let mut seen = HashSet::new();
    let mut raw_classes = Vec::new();
    let mut classes = Vec::new();
    for uri in conforms_to.iter().filter_map(|v| v.as_str()) {
        if !seen.insert(uri.to_string()) {
            continue;
        }
        raw_classes.push(uri.to_string());
        let class = ConformanceClass::classify(uri);
        if !classes.contains(&class) {
            classes.push(class);
        }
    }
    if raw_classes.is_empty() {
        return Err(DiscoverError::MissingConformance);
    }
    if classes
        .iter()
        .all(|c| matches!(c, ConformanceClass::Unknown(_)))
    {
        return Err(DiscoverError::NoStacClass);
    }

    let links = resolve_links(&resp.url, link_values);

    info!(
        url = %resp.url,
        classes = classes.len(),
        links = links.len(),
        "discovered landing page"
    );

    Ok(LandingPage {
        url: resp.url.clone(),
        classes,
        raw_classes,
        links,
        body,
    })
}

/// Build the rel -> href map, resolving relative hrefs against the root.
fn resolve_links(root_url: &str, link_values: &[Value]) -> BTreeMap<String, String> {
    let base = Url::parse(root_url).ok();

    let mut links = BTreeMap::new();
    for link in link_values {
        let (Some(rel), Some(href)) = (
            link.get("rel").and_then(|v| v.as_str()),
            link.get("href").and_then(|v| v.as_str()),
        ) else {
            debug!(?link, "skipping link without rel and href");
            continue;
        };

        let resolved = match &base {
            Some(base) => match base.join(href) {
                Ok(url) => url.to_string(),
                Err(err) => {
                    warn!(rel, href, %err, "skipping unresolvable link href");
                    continue;
                }
            },
            None => href.to_string(),
        };

        links.entry(rel.to_string()).or_insert(resolved);
    }
    links
}
