//! Recorded automation scripts and their steps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::digest::ContentHash;
use super::snapshot::{Rect, Snapshot};

/// Attributes used to re-find an element in a hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementLocator {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Rect>,
}

fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl ElementLocator {
    pub fn xpath(&self) -> Option<&str> {
        present(&self.xpath)
    }

    pub fn resource_id(&self) -> Option<&str> {
        present(&self.resource_id)
    }

    pub fn text(&self) -> Option<&str> {
        present(&self.text)
    }

    pub fn content_desc(&self) -> Option<&str> {
        present(&self.content_desc)
    }

    pub fn class_name(&self) -> Option<&str> {
        present(&self.class_name)
    }

    /// No identifying field is set (blank strings count as absent).
    pub fn is_empty(&self) -> bool {
        self.xpath().is_none()
            && self.resource_id().is_none()
            && self.text().is_none()
            && self.content_desc().is_none()
            && self.class_name().is_none()
            && self.bounds.is_none()
    }
}

/// One recorded action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Action kind understood by the executor (`click`, `input`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub locator: ElementLocator,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
}

impl Step {
    pub fn new(id: impl Into<String>, locator: ElementLocator) -> Self {
        Self {
            id: id.into(),
            locator,
            ..Self::default()
        }
    }

    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Name for reports: the step name when set, the id otherwise.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Deduplicated snapshot content stored once per hash in an exported script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolEntry {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
    pub usage_count: u32,
}

/// Free-form script metadata. Only `platform` is interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A recorded script: ordered steps plus the optional snapshot pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_pool: Option<BTreeMap<ContentHash, PoolEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ScriptMetadata>,
}

impl Script {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
            ..Self::default()
        }
    }

    pub fn has_version(&self) -> bool {
        self.version.as_deref().is_some_and(|v| !v.trim().is_empty())
    }

    pub fn platform(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.platform.as_deref())
            .filter(|p| !p.trim().is_empty())
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}
