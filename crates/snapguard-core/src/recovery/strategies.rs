//! Recovery strategies and the ordered chain that dispatches them.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::{Captures, Regex};

use crate::domain::{
    DeviceInfo, FailureKind, IssueCode, PageInfo, Rect, RecoveryResult, Snapshot, Step,
    StrategyId, ValidationIssue,
};
use crate::xml::repair;
use crate::xml::XmlDocument;

use super::source::{lookup_with_timeout, LookupKey, SnapshotSource};

/// Screen used for synthetic hierarchies when the device size is unknown.
const DEFAULT_SCREEN: (u32, u32) = (1080, 2340);
const DEFAULT_TARGET_BOUNDS: Rect = Rect {
    left: 100,
    top: 100,
    right: 980,
    bottom: 200,
};

/// Everything a strategy may look at for one failing step.
pub struct RecoveryContext<'a> {
    pub step_index: usize,
    pub step: &'a Step,
    pub failure: FailureKind,
    /// Findings on the step before recovery, in validator order.
    pub issues: &'a [ValidationIssue],
    /// Device the script should be adapted to, if any.
    pub target_device: Option<&'a DeviceInfo>,
    /// Sources scoped to this recovery pass, consulted before shared ones.
    pub local_sources: &'a [Arc<dyn SnapshotSource>],
}

impl RecoveryContext<'_> {
    fn snapshot_with_content(&self) -> Option<&Snapshot> {
        self.step.snapshot.as_ref().filter(|s| s.has_content())
    }
}

#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn id(&self) -> StrategyId;

    async fn attempt(&self, ctx: &RecoveryContext<'_>) -> RecoveryResult;
}

/// Pre-parse text repair of a malformed capture.
#[derive(Debug, Default)]
pub struct XmlRepairStrategy;

#[async_trait]
impl RecoveryStrategy for XmlRepairStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::XmlRepair
    }

    async fn attempt(&self, ctx: &RecoveryContext<'_>) -> RecoveryResult {
        let Some(snapshot) = ctx.snapshot_with_content() else {
            return RecoveryResult::failed(self.id(), "xml content is missing; nothing to repair")
                .with_recommendation("capture a new snapshot of the page");
        };

        let outcome = repair::repair(&snapshot.content);
        if let Err(e) = XmlDocument::parse(&outcome.content) {
            return RecoveryResult::failed(self.id(), format!("xml repair failed: {e}"))
                .with_recommendation("capture a new snapshot of the page");
        }
        if !outcome.changed() {
            return RecoveryResult::failed(self.id(), "xml parses already; no repair applied");
        }

        let mut result = RecoveryResult::recovered(
            self.id(),
            snapshot
                .with_content(outcome.content)
                .repaired_by(self.id()),
        )
        .with_recommendation("xml format repaired; check that the content is complete");
        for step in &outcome.applied {
            result = result.with_warning(format!("repair: {}", step.describe()));
        }
        result
    }
}

/// Borrow a snapshot of the same page from the script or a shared source.
pub struct CacheLookupStrategy {
    sources: Vec<Arc<dyn SnapshotSource>>,
    timeout: Duration,
}

impl CacheLookupStrategy {
    pub fn new(sources: Vec<Arc<dyn SnapshotSource>>, timeout: Duration) -> Self {
        Self { sources, timeout }
    }
}

#[async_trait]
impl RecoveryStrategy for CacheLookupStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::CacheLookup
    }

    async fn attempt(&self, ctx: &RecoveryContext<'_>) -> RecoveryResult {
        let Some(key) = LookupKey::for_step(ctx.step) else {
            return RecoveryResult::failed(self.id(), "step has no page identity to look up")
                .with_recommendation("record the page title with each snapshot");
        };

        for source in ctx.local_sources.iter().chain(self.sources.iter()) {
            let Some(found) = lookup_with_timeout(source.as_ref(), &key, self.timeout).await
            else {
                continue;
            };
            let mut recovered = found.repaired_by(self.id());
            recovered.synthetic = false;
            return RecoveryResult::recovered(self.id(), recovered)
                .with_warning(format!(
                    "used a snapshot from {}; it may differ from the original environment",
                    source.name()
                ))
                .with_recommendation("verify the borrowed snapshot matches the current scenario");
        }

        RecoveryResult::failed(self.id(), "no matching snapshot found")
            .with_recommendation("provide a snapshot manually or try another strategy")
    }
}

/// Re-target a capture to the configured device, rescaling bounds.
#[derive(Debug, Default)]
pub struct DeviceAdaptationStrategy;

fn bounds_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"bounds="(\[-?\d+,-?\d+\]\[-?\d+,-?\d+\])""#)
            .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
    })
}

/// Rewrite every `bounds` attribute scaled by `(sx, sy)`.
pub fn rescale_bounds(content: &str, sx: f64, sy: f64) -> String {
    bounds_pattern()
        .replace_all(content, |caps: &Captures<'_>| match caps[1].parse::<Rect>() {
            Ok(rect) => format!("bounds=\"{}\"", rect.scaled(sx, sy)),
            Err(_) => caps[0].to_string(),
        })
        .into_owned()
}

#[async_trait]
impl RecoveryStrategy for DeviceAdaptationStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::DeviceAdaptation
    }

    async fn attempt(&self, ctx: &RecoveryContext<'_>) -> RecoveryResult {
        let (Some(snapshot), Some(target)) = (ctx.snapshot_with_content(), ctx.target_device)
        else {
            return RecoveryResult::failed(self.id(), "xml content or target device is missing")
                .with_recommendation("provide full target device information");
        };

        let mut device = target.clone();
        if device.app_package.is_empty() {
            device.app_package = snapshot.device.app_package.clone();
        }
        if device.activity_name.is_empty() {
            device.activity_name = snapshot.device.activity_name.clone();
        }

        let mut result_warnings = Vec::new();
        let content = match (snapshot.device.screen, target.screen) {
            (Some(from), Some(to)) if from != to && from.width > 0 && from.height > 0 => {
                let sx = f64::from(to.width) / f64::from(from.width);
                let sy = f64::from(to.height) / f64::from(from.height);
                rescale_bounds(&snapshot.content, sx, sy)
            }
            (None, _) | (_, None) => {
                result_warnings.push("screen size unknown; bounds were not rescaled".to_string());
                snapshot.content.clone()
            }
            _ => snapshot.content.clone(),
        };

        let mut adapted = snapshot.with_content(content).repaired_by(self.id());
        adapted.device = device;

        let mut result = RecoveryResult::recovered(self.id(), adapted)
            .with_warning("snapshot adapted to the target device; verify on the device")
            .with_recommendation("run the script on the target device to confirm");
        for w in result_warnings {
            result = result.with_warning(w);
        }
        result
    }
}

/// Build a minimal hierarchy holding just the element the locator describes.
#[derive(Debug, Default)]
pub struct RegenerationStrategy;

/// Synthetic hierarchy for `step`. The target element carries every locator
/// attribute, so any locator with bounds or attributes resolves against it.
pub fn synthetic_hierarchy(step: &Step, app_package: &str, screen: (u32, u32)) -> String {
    let esc = |s: &str| quick_xml::escape::escape(s).into_owned();
    let loc = &step.locator;
    let bounds = loc.bounds.unwrap_or(DEFAULT_TARGET_BOUNDS);
    let class = loc.class_name().unwrap_or("android.widget.TextView");
    let app = esc(app_package);

    let mut xml = String::new();
    xml.push_str(repair::XML_DECLARATION);
    xml.push('\n');
    xml.push_str("<hierarchy rotation=\"0\">\n");
    xml.push_str(&format!(
        "  <node index=\"0\" text=\"\" resource-id=\"\" class=\"android.widget.FrameLayout\" package=\"{app}\" content-desc=\"\" clickable=\"false\" enabled=\"true\" bounds=\"[0,0][{},{}]\">\n",
        screen.0, screen.1
    ));
    xml.push_str(&format!(
        "    <node index=\"0\" text=\"{}\" resource-id=\"{}\" class=\"{}\" package=\"{app}\" content-desc=\"{}\" clickable=\"true\" enabled=\"true\" bounds=\"{}\"/>\n",
        esc(loc.text().unwrap_or_default()),
        esc(loc.resource_id().unwrap_or_default()),
        esc(class),
        esc(loc.content_desc().unwrap_or_default()),
        bounds
    ));
    xml.push_str("  </node>\n</hierarchy>\n");
    xml
}

#[async_trait]
impl RecoveryStrategy for RegenerationStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::XmlRegeneration
    }

    async fn attempt(&self, ctx: &RecoveryContext<'_>) -> RecoveryResult {
        let step = ctx.step;
        if step.locator.is_empty() {
            return RecoveryResult::failed(self.id(), "step has no locator to regenerate from")
                .with_recommendation("re-record the step on a real device");
        }

        let original = step.snapshot.as_ref();
        let key = LookupKey::for_step(step);
        let app_package = key
            .as_ref()
            .map(|k| k.app_package.clone())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| "com.unknown.app".to_string());
        let page_title = key
            .map(|k| k.page_title)
            .unwrap_or_else(|| "Generated".to_string());
        let screen = original
            .and_then(|s| s.device.screen)
            .map(|s| (s.width, s.height))
            .unwrap_or(DEFAULT_SCREEN);

        let content = synthetic_hierarchy(step, &app_package, screen);
        let mut page = PageInfo::new(page_title, "synthetic");
        page.element_count = 2;
        let device = DeviceInfo::new("synthetic", "Synthetic").with_app(
            app_package,
            original
                .map(|s| s.device.activity_name.clone())
                .unwrap_or_default(),
        );

        let mut snapshot = Snapshot::capture(content, device, page).repaired_by(self.id());
        snapshot.synthetic = true;

        RecoveryResult::recovered(self.id(), snapshot)
            .with_warning("used a synthetic xml hierarchy; replay may be limited")
            .with_recommendation("capture a real snapshot in the target environment")
            .with_recommendation("test the synthetic snapshot before relying on it")
    }
}

/// Terminal fallback: never recovers, always explains.
#[derive(Debug, Default)]
pub struct ManualGuidanceStrategy;

#[async_trait]
impl RecoveryStrategy for ManualGuidanceStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::FallbackManual
    }

    async fn attempt(&self, ctx: &RecoveryContext<'_>) -> RecoveryResult {
        let mut result = RecoveryResult::failed(
            self.id(),
            "automatic recovery failed; manual intervention required",
        )
        .with_recommendation(format!(
            "step {} ({}) needs manual handling:",
            ctx.step_index + 1,
            ctx.step.label()
        ))
        .with_recommendation("1. capture a new snapshot on the same app page")
        .with_recommendation("2. check the device connection and adb permissions")
        .with_recommendation("3. make sure the target app is open")
        .with_recommendation("4. confirm the page state matches what the script expects");

        if !ctx.issues.is_empty() {
            result = result.with_recommendation("issues:");
            for issue in ctx.issues {
                result = result.with_recommendation(format!("- {}: {}", issue.code, issue.message));
                if let Some(suggestion) = &issue.suggestion {
                    result = result.with_recommendation(format!("  suggestion: {suggestion}"));
                }
            }
        }
        result
    }
}

/// When a chain link applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The step failed this way.
    Failure(FailureKind),
    /// A corrupted step carries this issue.
    Issue(IssueCode),
}

/// Ordered `(trigger, strategy)` links plus a terminal fallback.
#[derive(Clone)]
pub struct StrategyChain {
    links: Vec<(Trigger, Arc<dyn RecoveryStrategy>)>,
    fallback: Arc<dyn RecoveryStrategy>,
}

impl StrategyChain {
    pub fn new(fallback: Arc<dyn RecoveryStrategy>) -> Self {
        Self {
            links: Vec::new(),
            fallback,
        }
    }

    pub fn link(mut self, trigger: Trigger, strategy: Arc<dyn RecoveryStrategy>) -> Self {
        self.links.push((trigger, strategy));
        self
    }

    /// The standard chain.
    ///
    /// Missing: lookup, then regeneration. Corrupted, per issue in order:
    /// format → repair then lookup, too small → lookup, structure →
    /// regeneration.
    /// Device mismatch: adaptation. Regeneration links are left out when
    /// `allow_regeneration` is false.
    pub fn standard(
        sources: Vec<Arc<dyn SnapshotSource>>,
        lookup_timeout: Duration,
        allow_regeneration: bool,
    ) -> Self {
        let lookup: Arc<dyn RecoveryStrategy> =
            Arc::new(CacheLookupStrategy::new(sources, lookup_timeout));
        let regenerate: Arc<dyn RecoveryStrategy> = Arc::new(RegenerationStrategy);

        let mut chain = Self::new(Arc::new(ManualGuidanceStrategy))
            .link(Trigger::Failure(FailureKind::Missing), lookup.clone());
        if allow_regeneration {
            chain = chain.link(Trigger::Failure(FailureKind::Missing), regenerate.clone());
        }
        chain = chain
            .link(
                Trigger::Issue(IssueCode::InvalidXmlFormat),
                Arc::new(XmlRepairStrategy),
            )
            .link(Trigger::Issue(IssueCode::InvalidXmlFormat), lookup.clone())
            .link(Trigger::Issue(IssueCode::XmlTooSmall), lookup);
        if allow_regeneration {
            chain = chain.link(Trigger::Issue(IssueCode::InvalidXmlStructure), regenerate);
        }
        chain.link(
            Trigger::Failure(FailureKind::DeviceIncompatible),
            Arc::new(DeviceAdaptationStrategy),
        )
    }

    /// Strategies to try for a step, in order, each at most once. The
    /// fallback is not included.
    pub fn plan(
        &self,
        failure: FailureKind,
        issues: &[ValidationIssue],
    ) -> Vec<Arc<dyn RecoveryStrategy>> {
        let mut plan: Vec<Arc<dyn RecoveryStrategy>> = Vec::new();
        let mut push = |strategy: &Arc<dyn RecoveryStrategy>| {
            if !plan.iter().any(|s| s.id() == strategy.id()) {
                plan.push(strategy.clone());
            }
        };

        match failure {
            FailureKind::Corrupted => {
                for issue in issues {
                    for (trigger, strategy) in &self.links {
                        if *trigger == Trigger::Issue(issue.code) {
                            push(strategy);
                        }
                    }
                }
            }
            kind => {
                for (trigger, strategy) in &self.links {
                    if *trigger == Trigger::Failure(kind) {
                        push(strategy);
                    }
                }
            }
        }
        plan
    }

    pub fn fallback(&self) -> &Arc<dyn RecoveryStrategy> {
        &self.fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ElementLocator, IssueSeverity};
    use crate::locator;
    use crate::validator::validate_snapshot;

    fn issue(code: IssueCode) -> ValidationIssue {
        ValidationIssue::new(code, IssueSeverity::Error, code.as_str())
    }

    fn ids(plan: &[Arc<dyn RecoveryStrategy>]) -> Vec<StrategyId> {
        plan.iter().map(|s| s.id()).collect()
    }

    fn ctx<'a>(step: &'a Step, issues: &'a [ValidationIssue]) -> RecoveryContext<'a> {
        RecoveryContext {
            step_index: 0,
            step,
            failure: FailureKind::Corrupted,
            issues,
            target_device: None,
            local_sources: &[],
        }
    }

    fn locator() -> ElementLocator {
        ElementLocator {
            resource_id: Some("app:id/buy".to_string()),
            text: Some("Buy <now> & save".to_string()),
            ..ElementLocator::default()
        }
    }

    #[test]
    fn plan_follows_issue_order_without_repeats() {
        let chain = StrategyChain::standard(Vec::new(), Duration::from_millis(10), true);
        let issues = [
            issue(IssueCode::InvalidXmlFormat),
            issue(IssueCode::XmlTooSmall),
            issue(IssueCode::InvalidXmlStructure),
        ];
        assert_eq!(
            ids(&chain.plan(FailureKind::Corrupted, &issues)),
            vec![
                StrategyId::XmlRepair,
                StrategyId::CacheLookup,
                StrategyId::XmlRegeneration
            ]
        );
        assert_eq!(
            ids(&chain.plan(FailureKind::Corrupted, &issues[..1])),
            vec![StrategyId::XmlRepair, StrategyId::CacheLookup]
        );
        assert_eq!(
            ids(&chain.plan(FailureKind::Missing, &[])),
            vec![StrategyId::CacheLookup, StrategyId::XmlRegeneration]
        );
        assert_eq!(
            ids(&chain.plan(FailureKind::DeviceIncompatible, &[])),
            vec![StrategyId::DeviceAdaptation]
        );
    }

    #[test]
    fn plan_without_regeneration() {
        let chain = StrategyChain::standard(Vec::new(), Duration::from_millis(10), false);
        assert_eq!(
            ids(&chain.plan(FailureKind::Missing, &[])),
            vec![StrategyId::CacheLookup]
        );
    }

    #[test]
    fn unmatched_issue_has_empty_plan() {
        let chain = StrategyChain::standard(Vec::new(), Duration::from_millis(10), true);
        assert!(chain
            .plan(FailureKind::Corrupted, &[issue(IssueCode::MissingLocator)])
            .is_empty());
        assert_eq!(chain.fallback().id(), StrategyId::FallbackManual);
    }

    #[tokio::test]
    async fn regeneration_is_valid_flagged_and_resolvable() {
        let step = Step::new("buy", locator());
        let result = RegenerationStrategy.attempt(&ctx(&step, &[])).await;
        assert!(result.success);
        let snapshot = result.recovered.unwrap();
        assert!(snapshot.synthetic);
        assert_eq!(snapshot.device.device_name, "Synthetic");
        assert_eq!(snapshot.page.title, "Generated");
        assert!(validate_snapshot(&snapshot).is_valid());

        let hit = locator::resolve_in(&snapshot.content, &step.locator).unwrap();
        assert_eq!(hit.score, 1.0);
        assert_eq!(hit.element.text.as_deref(), Some("Buy <now> & save"));
    }

    #[tokio::test]
    async fn regeneration_needs_a_locator() {
        let step = Step::new("blank", ElementLocator::default());
        let result = RegenerationStrategy.attempt(&ctx(&step, &[])).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn repair_fixes_bare_ampersand() {
        let content = r#"<hierarchy><node class="a" text="R&D" bounds="[0,0][10,10]"/></hierarchy>"#;
        let step = Step::new("s", locator()).with_snapshot(Snapshot::capture(
            content,
            DeviceInfo::new("d", "n"),
            PageInfo::new("Home", "list"),
        ));
        let result = XmlRepairStrategy.attempt(&ctx(&step, &[])).await;
        assert!(result.success);
        let repaired = result.recovered.unwrap();
        assert!(XmlDocument::parse(&repaired.content).is_ok());
        assert_eq!(repaired.repair.unwrap().strategy, StrategyId::XmlRepair);
        assert_ne!(repaired.content_hash, step.snapshot.unwrap().content_hash);
    }

    #[tokio::test]
    async fn repair_gives_up_on_mismatched_tags() {
        let step = Step::new("s", locator()).with_snapshot(Snapshot::capture(
            "<hierarchy><node></other></hierarchy>",
            DeviceInfo::default(),
            PageInfo::default(),
        ));
        let result = XmlRepairStrategy.attempt(&ctx(&step, &[])).await;
        assert!(!result.success);
        assert!(result.warnings[0].starts_with("xml repair failed"));
    }

    #[tokio::test]
    async fn adaptation_rescales_bounds() {
        let content = r#"<hierarchy><node class="a" bounds="[0,0][1080,2340]"><node bounds="[100,200][540,400]"/></node></hierarchy>"#;
        let step = Step::new("s", locator()).with_snapshot(Snapshot::capture(
            content,
            DeviceInfo::new("pixel", "Pixel").with_app("com.shop", ".Main").with_screen(1080, 2340),
            PageInfo::new("Home", "list"),
        ));
        let target = DeviceInfo::new("tablet", "Tab").with_screen(540, 1170);
        let mut context = ctx(&step, &[]);
        context.failure = FailureKind::DeviceIncompatible;
        context.target_device = Some(&target);

        let result = DeviceAdaptationStrategy.attempt(&context).await;
        assert!(result.success);
        let adapted = result.recovered.unwrap();
        assert_eq!(adapted.device.device_id, "tablet");
        assert_eq!(adapted.device.app_package, "com.shop");
        assert!(adapted.content.contains(r#"bounds="[0,0][540,1170]""#));
        assert!(adapted.content.contains(r#"bounds="[50,100][270,200]""#));
    }

    #[tokio::test]
    async fn manual_guidance_never_succeeds() {
        let step = Step::new("s", locator());
        let issues = [issue(IssueCode::MissingXmlSnapshot).with_suggestion("re-record")];
        let result = ManualGuidanceStrategy.attempt(&ctx(&step, &issues)).await;
        assert!(!result.success);
        assert!(result.recommendations.iter().any(|r| r.starts_with("1. ")));
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.contains("MISSING_XML_SNAPSHOT")));
        assert!(result.recommendations.iter().any(|r| r.contains("re-record")));
    }
}
