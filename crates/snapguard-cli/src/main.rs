//! Snapguard CLI
//!
//! The `snapguard` command checks and repairs the UI snapshots stored in
//! recorded automation scripts.
//!
//! ## Commands
//!
//! - `validate`: Grade every step snapshot and the script as a whole
//! - `optimize`: Deduplicate snapshot content into the pool
//! - `restore`: Inline pooled content back into each step
//! - `recover`: Run the recovery chain over failing steps
//! - `locate`: Resolve an element locator against a hierarchy dump

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use snapguard_core::{
    import_script, optimize, pool_stats, read_script_file, refresh_locator,
    render_recovery_report_md, render_validation_md, resolve_in, write_atomic,
    write_recovery_artifact, write_script_file, CacheEntry, DeviceInfo, ElementLocator, Rect,
    RecoveryEngine, SnapguardConfig, SnapshotCache, SnapshotSource, Validator,
};

#[derive(Parser)]
#[command(name = "snapguard")]
#[command(author = "Stevedores Org")]
#[command(version = snapguard_core::VERSION)]
#[command(about = "Validate and recover UI snapshots in recorded scripts", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(long, global = true, env = "SNAPGUARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a script file
    Validate {
        /// Script file (JSON, pooled or inline)
        script: PathBuf,

        /// Print a markdown summary instead of JSON
        #[arg(long)]
        markdown: bool,

        /// Exit with an error when any step is invalid
        #[arg(long)]
        strict: bool,
    },

    /// Move snapshot content into the deduplicated pool
    Optimize {
        script: PathBuf,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inline pooled snapshot content into every step
    Restore {
        script: PathBuf,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Recover failing steps
    Recover {
        script: PathBuf,

        /// Write the recovered script (pooled) here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Scripts whose valid snapshots seed the lookup cache
        #[arg(long = "seed", value_name = "SCRIPT")]
        seeds: Vec<PathBuf>,

        /// Adapt steps to this device id
        #[arg(long)]
        target_device: Option<String>,

        /// Display name of the target device
        #[arg(long, requires = "target_device")]
        target_name: Option<String>,

        /// Target screen size, e.g. 1080x2340
        #[arg(long, value_parser = parse_screen, requires = "target_device")]
        target_screen: Option<(u32, u32)>,

        /// Directory for digest-verified report artifacts
        #[arg(long)]
        artifact_dir: Option<PathBuf>,

        /// Artifact run id (default: generated)
        #[arg(long, requires = "artifact_dir")]
        run_id: Option<String>,

        /// Print a markdown report instead of JSON
        #[arg(long)]
        markdown: bool,
    },

    /// Resolve a locator against a hierarchy dump
    Locate {
        /// Hierarchy XML file
        #[arg(long)]
        xml: PathBuf,

        #[arg(long)]
        xpath: Option<String>,

        /// Exact bounds, e.g. [0,0][100,50]
        #[arg(long)]
        bounds: Option<Rect>,

        #[arg(long)]
        resource_id: Option<String>,

        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        content_desc: Option<String>,

        #[arg(long)]
        class_name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    snapguard_core::init_tracing(cli.json, level);

    let config = SnapguardConfig::load(cli.config.as_deref())
        .context("Failed to load snapguard configuration")?;

    match cli.command {
        Commands::Validate {
            script,
            markdown,
            strict,
        } => cmd_validate(&config, &script, markdown, strict),
        Commands::Optimize { script, output } => cmd_optimize(&script, output.as_deref()),
        Commands::Restore { script, output } => cmd_restore(&script, output.as_deref()),
        Commands::Recover {
            script,
            output,
            seeds,
            target_device,
            target_name,
            target_screen,
            artifact_dir,
            run_id,
            markdown,
        } => {
            let target = target_device.map(|id| {
                let name = target_name.unwrap_or_else(|| id.clone());
                let device = DeviceInfo::new(id, name);
                match target_screen {
                    Some((w, h)) => device.with_screen(w, h),
                    None => device,
                }
            });
            let opts = RecoverOptions {
                output,
                seeds,
                target,
                artifact_dir,
                run_id,
                markdown,
            };
            cmd_recover(&config, &script, opts).await
        }
        Commands::Locate {
            xml,
            xpath,
            bounds,
            resource_id,
            text,
            content_desc,
            class_name,
        } => {
            let locator = ElementLocator {
                xpath,
                resource_id,
                text,
                content_desc,
                class_name,
                bounds,
            };
            cmd_locate(&xml, &locator)
        }
    }
}

fn parse_screen(s: &str) -> std::result::Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s}"))?;
    let dim = |v: &str| v.trim().parse::<u32>().map_err(|e| format!("{v}: {e}"));
    Ok((dim(w)?, dim(h)?))
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
}

fn emit(output: Option<&Path>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))
        }
        None => {
            println!("{}", content);
            Ok(())
        }
    }
}

/// Validate a script file. Shape problems are reported as findings, not errors.
fn cmd_validate(config: &SnapguardConfig, path: &Path, markdown: bool, strict: bool) -> Result<()> {
    let raw = read_text(path)?;
    let validator = Validator::new(config.validation.clone());
    let result = validator.validate_script_json(&raw);

    if markdown {
        print!("{}", render_validation_md(&result));
    } else {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    if strict && !result.is_valid {
        anyhow::bail!(
            "{} of {} steps failed validation",
            result.total_steps - result.valid_steps,
            result.total_steps
        );
    }
    Ok(())
}

fn cmd_optimize(path: &Path, output: Option<&Path>) -> Result<()> {
    let script = read_script_file(path).with_context(|| format!("Failed to load {:?}", path))?;
    let pooled = optimize(&script);
    let stats = pool_stats(&pooled);
    let json = serde_json::to_string_pretty(&pooled)?;
    info!(
        unique = stats.unique_contents,
        references = stats.references,
        bytes_saved = stats.bytes_saved,
        "snapshot pool built"
    );

    match output {
        Some(out) => {
            write_atomic(&json, out).with_context(|| format!("Failed to write {:?}", out))?;
            println!(
                "Pooled {} references into {} entries ({} bytes saved) -> {:?}",
                stats.references, stats.unique_contents, stats.bytes_saved, out
            );
            Ok(())
        }
        None => emit(None, &json),
    }
}

fn cmd_restore(path: &Path, output: Option<&Path>) -> Result<()> {
    let raw = read_text(path)?;
    let script = import_script(&raw).with_context(|| format!("Failed to import {:?}", path))?;
    let json = serde_json::to_string_pretty(&script)?;
    emit(output, &json)?;
    if let Some(out) = output {
        println!("Restored {} steps to {:?}", script.steps.len(), out);
    }
    Ok(())
}

struct RecoverOptions {
    output: Option<PathBuf>,
    seeds: Vec<PathBuf>,
    target: Option<DeviceInfo>,
    artifact_dir: Option<PathBuf>,
    run_id: Option<String>,
    markdown: bool,
}

/// Fill a cache with the valid snapshots of the seed scripts.
fn seed_cache(validator: &Validator, seeds: &[PathBuf]) -> Result<SnapshotCache> {
    let cache = SnapshotCache::new();
    for path in seeds {
        let script =
            read_script_file(path).with_context(|| format!("Failed to load seed {:?}", path))?;
        let validation = validator.validate_script(&script);
        for sv in validation.steps.iter().filter(|sv| sv.is_valid) {
            if let Some(snapshot) = script.steps[sv.step_index].snapshot.clone() {
                let id = cache.put(CacheEntry::new(snapshot));
                cache.link(&sv.step_id, &id, Some(path.display().to_string()));
            }
        }
    }
    Ok(cache)
}

async fn cmd_recover(config: &SnapguardConfig, path: &Path, opts: RecoverOptions) -> Result<()> {
    let script = read_script_file(path).with_context(|| format!("Failed to load {:?}", path))?;
    let validator = Validator::new(config.validation.clone());

    let cache = Arc::new(seed_cache(&validator, &opts.seeds)?);
    cache.sweep(config.cache.max_age());
    let sources: Vec<Arc<dyn SnapshotSource>> = vec![cache];

    let mut engine = RecoveryEngine::from_config(config, sources);
    if let Some(device) = opts.target {
        engine = engine.with_target_device(device);
    }
    let report = engine.recover(&script).await;

    if let Some(out) = &opts.output {
        write_script_file(&report.recovered_script, out)
            .with_context(|| format!("Failed to write {:?}", out))?;
    }
    if let Some(dir) = &opts.artifact_dir {
        let run_id = opts
            .run_id
            .clone()
            .unwrap_or_else(|| format!("recover-{}", report.evaluated_at.timestamp_millis()));
        let artifact = write_recovery_artifact(&report, dir, &run_id)
            .with_context(|| format!("Failed to write recovery artifact to {:?}", dir))?;
        info!(run_id = %run_id, path = ?artifact, "recovery artifact written");
    }

    if opts.markdown {
        print!("{}", render_recovery_report_md(&report));
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn cmd_locate(xml_path: &Path, locator: &ElementLocator) -> Result<()> {
    if locator.is_empty() {
        anyhow::bail!(
            "Provide at least one of --xpath, --bounds, --resource-id, --text, \
             --content-desc, --class-name"
        );
    }
    let content = read_text(xml_path)?;
    let Some(found) = resolve_in(&content, locator) else {
        anyhow::bail!("No element in {:?} matches the locator", xml_path);
    };

    let out = serde_json::json!({
        "match": found,
        "locator": refresh_locator(&found),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapguard_core::{PageInfo, Script, Snapshot, Step};

    const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><hierarchy rotation="0"><node class="android.widget.FrameLayout" bounds="[0,0][1080,2340]"><node class="android.widget.Button" resource-id="app:id/send" text="Send" bounds="[40,2200][1040,2300]"/></node></hierarchy>"#;

    fn script() -> Script {
        let step = |id: &str| {
            Step::new(
                id,
                ElementLocator {
                    resource_id: Some("app:id/send".to_string()),
                    ..ElementLocator::default()
                },
            )
            .with_snapshot(Snapshot::capture(
                XML,
                DeviceInfo::new("emu", "Emulator").with_app("com.chat", ".Main"),
                PageInfo::new("Chat", "conversation"),
            ))
        };
        Script::new("chat", vec![step("type"), step("send")])
    }

    #[test]
    fn cli_parses_recover_flags() {
        let cli = Cli::try_parse_from([
            "snapguard",
            "--json",
            "recover",
            "in.json",
            "--target-device",
            "tab",
            "--target-screen",
            "540x1170",
            "--seed",
            "a.json",
            "--seed",
            "b.json",
        ])
        .expect("parse");
        assert!(cli.json);
        match cli.command {
            Commands::Recover {
                target_screen,
                seeds,
                ..
            } => {
                assert_eq!(target_screen, Some((540, 1170)));
                assert_eq!(seeds.len(), 2);
            }
            _ => panic!("expected recover"),
        }
    }

    #[test]
    fn target_name_requires_device() {
        let parsed = Cli::try_parse_from(["snapguard", "recover", "in.json", "--target-name", "x"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn screen_parser_rejects_garbage() {
        assert_eq!(parse_screen("1080X2340"), Ok((1080, 2340)));
        assert!(parse_screen("1080").is_err());
        assert!(parse_screen("axb").is_err());
    }

    #[test]
    fn optimize_then_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("chat.json");
        let pooled = dir.path().join("chat.pooled.json");
        let restored = dir.path().join("chat.restored.json");
        let original = script();
        std::fs::write(&input, serde_json::to_string(&original).unwrap()).unwrap();

        cmd_optimize(&input, Some(&pooled)).unwrap();
        let raw = std::fs::read_to_string(&pooled).unwrap();
        assert!(raw.contains("\"usageCount\": 2"));

        cmd_restore(&pooled, Some(&restored)).unwrap();
        let back: Script =
            serde_json::from_str(&std::fs::read_to_string(&restored).unwrap()).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn strict_validate_fails_on_invalid_steps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"name":"bad","steps":[{"id":"s1"}]}"#).unwrap();
        let config = SnapguardConfig::default();
        assert!(cmd_validate(&config, &path, false, false).is_ok());
        assert!(cmd_validate(&config, &path, true, true).is_err());
    }

    #[test]
    fn seed_cache_links_valid_steps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        write_script_file(&script(), &path).unwrap();

        let cache = seed_cache(&Validator::default(), &[path]).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.resolve("send").is_some());
    }

    #[tokio::test]
    async fn recover_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        let mut broken = script();
        broken.steps[1].snapshot = None;
        std::fs::write(&path, serde_json::to_string(&broken).unwrap()).unwrap();

        let opts = RecoverOptions {
            output: Some(dir.path().join("out.json")),
            seeds: Vec::new(),
            target: None,
            artifact_dir: Some(dir.path().join("runs")),
            run_id: Some("r1".to_string()),
            markdown: true,
        };
        cmd_recover(&SnapguardConfig::default(), &path, opts)
            .await
            .unwrap();

        assert!(dir.path().join("runs/r1/recovery.json").exists());
        assert!(dir.path().join("runs/r1/recovery.digest").exists());
        let recovered = read_script_file(&dir.path().join("out.json")).unwrap();
        assert!(recovered.steps[1].snapshot.is_some());
    }

    #[test]
    fn locate_requires_a_locator() {
        let dir = tempfile::tempdir().unwrap();
        let xml = dir.path().join("page.xml");
        std::fs::write(&xml, XML).unwrap();
        assert!(cmd_locate(&xml, &ElementLocator::default()).is_err());

        let by_text = ElementLocator {
            text: Some("Send".to_string()),
            ..ElementLocator::default()
        };
        assert!(cmd_locate(&xml, &by_text).is_ok());

        let nowhere = ElementLocator {
            text: Some("Nope".to_string()),
            ..ElementLocator::default()
        };
        assert!(cmd_locate(&xml, &nowhere).is_err());
    }
}
