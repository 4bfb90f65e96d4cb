use snapguard_core::{
    optimize, render_validation_md, ContentHash, DeviceInfo, ElementLocator, IssueCode, PageInfo,
    Script, Severity, Snapshot, SnapshotCheck, Step, Validator,
};

fn device() -> DeviceInfo {
    DeviceInfo::new("emulator-5554", "Pixel 7").with_app("com.bank", ".LoginActivity")
}

fn page() -> PageInfo {
    PageInfo::new("Login", "form")
}

fn login_xml() -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><hierarchy rotation="0">"#);
    xml.push_str(r#"<node class="android.widget.FrameLayout" bounds="[0,0][1080,2340]">"#);
    xml.push_str(r#"<node class="android.widget.EditText" resource-id="app:id/user" text="" bounds="[60,400][1020,520]"/>"#);
    xml.push_str(r#"<node class="android.widget.Button" resource-id="app:id/login" text="Log in" bounds="[60,600][1020,720]"/>"#);
    xml.push_str("</node></hierarchy>");
    xml
}

fn locator() -> ElementLocator {
    ElementLocator {
        resource_id: Some("app:id/login".to_string()),
        ..ElementLocator::default()
    }
}

// ---------------------------------------------------------------------------
// Snapshot scenarios
// ---------------------------------------------------------------------------

#[test]
fn empty_content_without_pool_entry_is_critical() {
    let mut snapshot = Snapshot::capture("", device(), page());
    snapshot.content_hash = ContentHash::of(&login_xml());
    let script = Script::new("login", vec![Step::new("tap", locator()).with_snapshot(snapshot)]);

    let result = Validator::default().validate_script(&script);
    assert!(!result.is_valid);
    let step = &result.steps[0];
    let validation = step.validation.as_ref().expect("snapshot validated");
    assert_eq!(validation.severity, Severity::Critical);
    assert!(step.has_issue(IssueCode::MissingXmlContent));
}

#[test]
fn tiny_hierarchy_is_too_small_and_major() {
    let xml = r#"<hierarchy><node bounds="[0,0][10,10]"/></hierarchy>"#;
    let result = Validator::default().validate_snapshot(&Snapshot::capture(xml, device(), page()));

    assert!(result.has_issue(IssueCode::XmlTooSmall));
    assert_eq!(result.severity, Severity::Major);
    assert!(!result.passed(SnapshotCheck::Size));
    assert!(result.passed(SnapshotCheck::Format));
    assert!(result.passed(SnapshotCheck::Structure));
    assert!(!result.is_valid());
}

#[test]
fn score_stays_in_range_and_100_means_all_passed() {
    let validator = Validator::default();
    let samples = vec![
        Snapshot::capture(login_xml(), device(), page()),
        Snapshot::capture(login_xml(), DeviceInfo::default(), PageInfo::default()),
        Snapshot::capture("", DeviceInfo::default(), PageInfo::default()).with_captured_at(None),
        Snapshot::capture("<hierarchy><node", device(), page()),
        Snapshot::capture("plain text, not xml at all", device(), page()),
        Snapshot::capture(r#"<hierarchy><node bounds="[0,0][1,1]"/></hierarchy>"#, device(), page()),
    ];

    for snapshot in &samples {
        let result = validator.validate_snapshot(snapshot);
        assert!(result.score <= 100);
        let all_passed = SnapshotCheck::ALL.iter().all(|c| result.passed(*c));
        assert_eq!(result.score == 100, all_passed, "score {}", result.score);
        let must_have_failed = !result.passed(SnapshotCheck::Content)
            || !result.passed(SnapshotCheck::Format);
        if must_have_failed {
            assert_eq!(result.severity, Severity::Critical);
        }
    }
}

// ---------------------------------------------------------------------------
// Script scenarios
// ---------------------------------------------------------------------------

#[test]
fn pooled_export_validates_like_inline_script() {
    let xml = login_xml();
    let script = Script::new(
        "login",
        vec![
            Step::new("user", locator()).with_snapshot(Snapshot::capture(&xml, device(), page())),
            Step::new("tap", locator()).with_snapshot(Snapshot::capture(&xml, device(), page())),
        ],
    );
    let validator = Validator::default();
    let inline = validator.validate_script(&script);
    let pooled = validator.validate_script(&optimize(&script));

    assert!(inline.is_valid);
    assert_eq!(pooled.valid_steps, inline.valid_steps);
    assert_eq!(pooled.compatibility_score, inline.compatibility_score);
}

#[test]
fn mixed_script_reports_failing_steps() {
    let script = Script::new(
        "login",
        vec![
            Step::new("ok", locator()).with_snapshot(Snapshot::capture(login_xml(), device(), page())),
            Step::new("bare", ElementLocator::default()),
        ],
    );
    let result = Validator::default().validate_script(&script);

    assert_eq!(result.total_steps, 2);
    assert_eq!(result.valid_steps, 1);
    assert!(result.steps[1].has_issue(IssueCode::MissingXmlSnapshot));
    assert!(result.steps[1].has_issue(IssueCode::MissingLocator));
    assert!(result.warnings.iter().any(|w| w.contains("1 step(s) have no xml snapshot")));

    let md = render_validation_md(&result);
    assert!(md.contains("- steps: 1/2 valid"));
    assert!(md.contains("2 `bare`: MISSING_XML_SNAPSHOT, MISSING_LOCATOR"));
}

#[test]
fn garbage_json_is_invalid_script_format() {
    let result = Validator::default().validate_script_json("{\"name\": 3");
    assert!(!result.is_valid);
    assert_eq!(result.issues[0].code, IssueCode::InvalidScriptFormat);
}
