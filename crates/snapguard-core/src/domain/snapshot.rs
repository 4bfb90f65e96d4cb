//! Snapshot model: one captured UI hierarchy plus its provenance.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::digest::ContentHash;
use super::recovery::StrategyId;

/// Screen rectangle in device pixels, written as `[left,top][right,bottom]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    /// Scale every coordinate, rounding to the nearest pixel.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        let x = |v: i32| (f64::from(v) * sx).round() as i32;
        let y = |v: i32| (f64::from(v) * sy).round() as i32;
        Self::new(x(self.left), y(self.top), x(self.right), y(self.bottom))
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{}][{},{}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

impl FromStr for Rect {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || format!("invalid bounds: {s}");
        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .ok_or_else(invalid)?;
        let (first, second) = inner.split_once("][").ok_or_else(invalid)?;
        let pair = |p: &str| -> Option<(i32, i32)> {
            let (a, b) = p.split_once(',')?;
            Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
        };
        let (left, top) = pair(first).ok_or_else(invalid)?;
        let (right, bottom) = pair(second).ok_or_else(invalid)?;
        Ok(Self::new(left, top, right, bottom))
    }
}

impl TryFrom<String> for Rect {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Rect> for String {
    fn from(r: Rect) -> Self {
        r.to_string()
    }
}

/// Physical screen size of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// Identity of the device a snapshot was captured on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_name: String,
    pub app_package: String,
    pub activity_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen: Option<ScreenSize>,
}

impl DeviceInfo {
    pub fn new(device_id: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            ..Self::default()
        }
    }

    pub fn with_app(mut self, app_package: impl Into<String>, activity: impl Into<String>) -> Self {
        self.app_package = app_package.into();
        self.activity_name = activity.into();
        self
    }

    pub fn with_screen(mut self, width: u32, height: u32) -> Self {
        self.screen = Some(ScreenSize { width, height });
        self
    }

    /// Device id and name are both present.
    pub fn has_identity(&self) -> bool {
        !self.device_id.trim().is_empty() && !self.device_name.trim().is_empty()
    }
}

/// Identity of the page (screen) a snapshot shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageInfo {
    pub title: String,
    pub page_type: String,
    pub element_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

impl PageInfo {
    pub fn new(title: impl Into<String>, page_type: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            page_type: page_type.into(),
            ..Self::default()
        }
    }

    pub fn has_identity(&self) -> bool {
        !self.title.trim().is_empty()
    }
}

/// Provenance attached to snapshots produced by a recovery strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairProvenance {
    pub strategy: StrategyId,
    pub repaired_at: DateTime<Utc>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// One captured UI hierarchy.
///
/// Snapshots are values: repairs and pool codecs build new snapshots instead
/// of editing one that a step already references. `content` is empty when the
/// step was exported with a pool reference; `content_hash` then carries the key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,

    #[serde(rename = "hash", default, skip_serializing_if = "ContentHash::is_empty")]
    pub content_hash: ContentHash,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub device: DeviceInfo,

    #[serde(default)]
    pub page: PageInfo,

    /// Set only on documents generated from locator fields, never on captures.
    #[serde(default, skip_serializing_if = "is_false")]
    pub synthetic: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairProvenance>,
}

impl Snapshot {
    /// Build a snapshot for content captured now.
    pub fn capture(content: impl Into<String>, device: DeviceInfo, page: PageInfo) -> Self {
        let content = content.into();
        Self {
            content_hash: hash_or_empty(&content),
            content,
            captured_at: Some(Utc::now()),
            device,
            page,
            synthetic: false,
            repair: None,
        }
    }

    pub fn with_captured_at(mut self, captured_at: Option<DateTime<Utc>>) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Same provenance, different content (hash recomputed).
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            content_hash: hash_or_empty(&content),
            content,
            ..self.clone()
        }
    }

    /// Same provenance and hash, content stripped (pool reference form).
    pub fn as_reference(&self) -> Self {
        Self {
            content: String::new(),
            ..self.clone()
        }
    }

    pub fn repaired_by(mut self, strategy: StrategyId) -> Self {
        self.repair = Some(RepairProvenance {
            strategy,
            repaired_at: Utc::now(),
        });
        self
    }

    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    /// Content bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

fn hash_or_empty(content: &str) -> ContentHash {
    if content.is_empty() {
        ContentHash::default()
    } else {
        ContentHash::of(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_display_fromstr_roundtrip() {
        let r = Rect::new(0, 84, 1080, 2340);
        assert_eq!(r.to_string(), "[0,84][1080,2340]");
        assert_eq!("[0,84][1080,2340]".parse::<Rect>().unwrap(), r);
    }

    #[test]
    fn rect_rejects_garbage() {
        assert!("0,0,10,10".parse::<Rect>().is_err());
        assert!("[a,b][c,d]".parse::<Rect>().is_err());
        assert!("[1,2]".parse::<Rect>().is_err());
    }

    #[test]
    fn rect_scaled_rounds() {
        let r = Rect::new(100, 100, 980, 200).scaled(0.5, 2.0);
        assert_eq!(r, Rect::new(50, 200, 490, 400));
    }

    #[test]
    fn capture_hashes_content() {
        let s = Snapshot::capture("<hierarchy/>", DeviceInfo::default(), PageInfo::default());
        assert!(s.content_hash.matches("<hierarchy/>"));
        assert!(s.captured_at.is_some());
    }

    #[test]
    fn equal_content_equal_hash() {
        let a = Snapshot::capture("<a/>", DeviceInfo::new("d1", "Pixel"), PageInfo::default());
        let b = Snapshot::capture("<a/>", DeviceInfo::new("d2", "Galaxy"), PageInfo::default());
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn empty_content_has_empty_hash() {
        let s = Snapshot::capture("", DeviceInfo::default(), PageInfo::default());
        assert!(s.content_hash.is_empty());
    }

    #[test]
    fn reference_form_omits_content_in_json() {
        let s = Snapshot::capture("<a/>", DeviceInfo::new("d1", "Pixel"), PageInfo::default());
        let json = serde_json::to_value(s.as_reference()).unwrap();
        assert!(json.get("content").is_none());
        assert_eq!(json["hash"], s.content_hash.as_str());
        assert_eq!(json["device"]["deviceId"], "d1");
    }

    #[test]
    fn synthetic_flag_survives_serde() {
        let mut s = Snapshot::capture("<a/>", DeviceInfo::default(), PageInfo::default());
        s.synthetic = true;
        let json = serde_json::to_string(&s).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert!(back.synthetic);
    }
}
