//! Locator resolution against a hierarchy document.
//!
//! Tiers are tried in order: xpath, exact bounds, attribute scoring. A tier
//! that finds an element ends the search; a tier that finds nothing hands
//! over to the next.

use serde::{Deserialize, Serialize};

use crate::domain::ElementLocator;
use crate::xml::xpath::XPath;
use crate::xml::{ElementRef, NodeId, UiElement, XmlDocument};

/// Minimum share of compared attributes that must match.
pub const ACCEPT_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    XPath,
    Bounds,
    Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedElement {
    pub node: NodeId,
    pub element: UiElement,
    pub tier: MatchTier,
    /// 1.0 for xpath and bounds matches.
    pub score: f64,
}

/// Find the element `locator` points at, or `None`.
pub fn resolve(doc: &XmlDocument, locator: &ElementLocator) -> Option<ResolvedElement> {
    if locator.is_empty() {
        tracing::warn!(event = "locator.empty");
        return None;
    }

    if let Some(expr) = locator.xpath() {
        match XPath::parse(expr) {
            Ok(xpath) => {
                if let Some(el) = xpath.first_element(doc) {
                    return Some(resolved(el, MatchTier::XPath, 1.0));
                }
            }
            Err(e) => {
                tracing::warn!(event = "locator.bad_xpath", xpath = %expr, error = %e);
            }
        }
    }

    if let Some(bounds) = locator.bounds {
        let wanted = bounds.to_string();
        if let Some(el) = doc
            .elements()
            .find(|e| e.attr("bounds").map(str::trim) == Some(wanted.as_str()))
        {
            return Some(resolved(el, MatchTier::Bounds, 1.0));
        }
    }

    let found = doc.elements().find_map(|el| {
        let score = attribute_score(&el, locator)?;
        (score >= ACCEPT_SCORE).then_some((el, score))
    });
    match found {
        Some((el, score)) => Some(resolved(el, MatchTier::Attributes, score)),
        None => {
            tracing::debug!(event = "locator.unresolved", locator = ?locator);
            None
        }
    }
}

/// Parse `content` and resolve. Unparsable content resolves to `None`.
pub fn resolve_in(content: &str, locator: &ElementLocator) -> Option<ResolvedElement> {
    match XmlDocument::parse(content) {
        Ok(doc) => resolve(&doc, locator),
        Err(e) => {
            tracing::debug!(event = "locator.unparsable", error = %e);
            None
        }
    }
}

/// Locator describing a resolved element as it appears in its new document.
pub fn refresh_locator(resolved: &ResolvedElement) -> ElementLocator {
    let el = &resolved.element;
    ElementLocator {
        xpath: Some(el.path.clone()),
        resource_id: el.resource_id.clone(),
        text: el.text.clone(),
        content_desc: el.content_desc.clone(),
        class_name: el.class_name.clone(),
        bounds: el.bounds,
    }
}

/// Share of the locator's attributes that `el` matches. `None` when the
/// locator has no attributes to compare.
fn attribute_score(el: &ElementRef<'_>, locator: &ElementLocator) -> Option<f64> {
    let pairs = [
        (locator.resource_id(), "resource-id"),
        (locator.text(), "text"),
        (locator.content_desc(), "content-desc"),
        (locator.class_name(), "class"),
    ];
    let mut compared = 0u32;
    let mut matched = 0u32;
    for (wanted, attr) in pairs {
        if let Some(wanted) = wanted {
            compared += 1;
            if el.attr(attr) == Some(wanted) {
                matched += 1;
            }
        }
    }
    (compared > 0).then(|| f64::from(matched) / f64::from(compared))
}

fn resolved(el: ElementRef<'_>, tier: MatchTier, score: f64) -> ResolvedElement {
    ResolvedElement {
        node: el.id(),
        element: el.summary(),
        tier,
        score,
    }
}
