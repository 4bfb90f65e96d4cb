use snapguard_core::{
    export_script, import_script, optimize, pool_stats, read_script_file, restore,
    write_script_file, DeviceInfo, ElementLocator, PageInfo, Script, Snapshot, Step,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn page_xml(title: &str, rows: usize) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><hierarchy rotation="0">"#);
    xml.push_str(r#"<node class="android.widget.FrameLayout" bounds="[0,0][1080,2340]">"#);
    for i in 0..rows {
        xml.push_str(&format!(
            r#"<node index="{i}" class="android.widget.TextView" resource-id="app:id/row_{i}" text="{title} row {i}" bounds="[0,{}][1080,{}]"/>"#,
            i * 100,
            i * 100 + 100
        ));
    }
    xml.push_str("</node></hierarchy>");
    xml
}

fn step(id: &str, content: &str) -> Step {
    Step::new(
        id,
        ElementLocator {
            resource_id: Some("app:id/row_0".to_string()),
            ..ElementLocator::default()
        },
    )
    .with_snapshot(Snapshot::capture(
        content,
        DeviceInfo::new("emu-5554", "Pixel 7").with_app("com.shop", ".MainActivity"),
        PageInfo::new("Catalog", "list"),
    ))
}

fn contents(script: &Script) -> Vec<String> {
    script
        .steps
        .iter()
        .map(|s| {
            s.snapshot
                .as_ref()
                .map(|snap| snap.content.clone())
                .unwrap_or_default()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

#[test]
fn identical_5kb_content_is_pooled_once() {
    let big = page_xml("Catalog", 60);
    assert!(big.len() >= 5 * 1024, "fixture is {} bytes", big.len());

    let script = Script::new("browse", vec![step("s1", &big), step("s2", &big)]);
    let pooled = optimize(&script);

    let pool = pooled.snapshot_pool.as_ref().expect("pool present");
    assert_eq!(pool.len(), 1);
    let entry = pool.values().next().expect("one entry");
    assert_eq!(entry.usage_count, 2);
    assert_eq!(entry.content, big);

    for s in &pooled.steps {
        let snap = s.snapshot.as_ref().expect("reference kept");
        assert!(snap.content.is_empty());
        assert!(pool.contains_key(&snap.content_hash));
    }

    let stats = pool_stats(&pooled);
    assert_eq!(stats.unique_contents, 1);
    assert_eq!(stats.references, 2);
    assert_eq!(stats.bytes_saved, big.len() as u64);
}

#[test]
fn restore_of_optimize_preserves_every_step() {
    let a = page_xml("Catalog", 3);
    let b = page_xml("Cart", 2);
    let mut script = Script::new("mixed", vec![step("s1", &a), step("s2", &b), step("s3", &a)]);
    script.steps.push(Step::new("no-snapshot", ElementLocator::default()));

    let pooled = optimize(&script);
    assert_eq!(pooled.snapshot_pool.as_ref().map(|p| p.len()), Some(2));
    assert_eq!(optimize(&pooled), pooled, "optimize is idempotent");

    let back = restore(&pooled);
    assert!(back.snapshot_pool.is_none());
    assert_eq!(contents(&back), contents(&script));
    assert_eq!(back, script);
}

#[test]
fn optimize_leaves_input_untouched() {
    let xml = page_xml("Catalog", 2);
    let script = Script::new("browse", vec![step("s1", &xml)]);
    let before = script.clone();
    let _ = optimize(&script);
    assert_eq!(script, before);
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[test]
fn export_import_preserves_effective_content() {
    let xml = page_xml("Catalog", 4);
    let script = Script::new("browse", vec![step("s1", &xml), step("s2", &xml)]);

    let json = export_script(&script).expect("export");
    let value: serde_json::Value = serde_json::from_str(&json).expect("json");
    assert!(value["snapshotPool"].is_object());
    assert!(value["steps"][0]["snapshot"]["hash"].is_string());
    assert!(value["steps"][0]["snapshot"].get("content").is_none());

    let imported = import_script(&json).expect("import");
    assert_eq!(contents(&imported), contents(&script));
}

#[test]
fn synthetic_flag_survives_pool_and_serde() {
    let mut snap = Snapshot::capture(
        page_xml("Generated", 1),
        DeviceInfo::new("synthetic", "Synthetic"),
        PageInfo::new("Generated", "synthetic"),
    );
    snap.synthetic = true;
    let mut s = step("s1", "");
    s.snapshot = Some(snap);
    let script = Script::new("regen", vec![s, step("s2", &page_xml("Catalog", 1))]);

    let json = export_script(&script).expect("export");
    let imported = import_script(&json).expect("import");
    let flags: Vec<bool> = imported
        .steps
        .iter()
        .map(|s| s.snapshot.as_ref().is_some_and(|x| x.synthetic))
        .collect();
    assert_eq!(flags, vec![true, false]);

    let pooled = optimize(&script);
    assert!(pooled.steps[0].snapshot.as_ref().expect("ref").synthetic);
    assert!(restore(&pooled).steps[0].snapshot.as_ref().expect("snap").synthetic);
}

#[test]
fn script_file_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("browse.json");
    let xml = page_xml("Catalog", 2);
    let script = Script::new("browse", vec![step("s1", &xml), step("s2", &xml)]);

    write_script_file(&script, &path).expect("write");
    let raw = std::fs::read_to_string(&path).expect("read raw");
    assert!(raw.contains("snapshotPool"));

    let loaded = read_script_file(&path).expect("read");
    assert_eq!(contents(&loaded), contents(&script));
}
