//! `lk`: inspect, encode and dry-run layoutkeep arrangements.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::json;

use layoutkeep_core::backup::{self, RestoreMode};
use layoutkeep_core::config::{Config, LogFormat};
use layoutkeep_core::document::{DocumentContextStore, FrontmatterAdapter, ensure_stable_id};
use layoutkeep_core::error::format_error_with_remediation;
use layoutkeep_core::geometry::{CoordinateTransformer, Rect};
use layoutkeep_core::host::memory::InMemoryHost;
use layoutkeep_core::logging::init_logging;
use layoutkeep_core::restore::{LayoutSnapshotRestorer, RestoreOptions};
use layoutkeep_core::snapshot::{LayoutNode, ScreenInfo, Snapshot, VersionedSnapshot};
use layoutkeep_core::store::{ArrangementStore, FileBackend};
use layoutkeep_core::{Error, wire};

#[derive(Parser)]
#[command(name = "lk")]
#[command(version)]
#[command(about = "Inspect, encode and dry-run editor layout arrangements")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true, env = "LAYOUTKEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty or json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Machine-readable output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a compact arrangement string to snapshot JSON
    Decode {
        /// Encoded string, or `-` for stdin
        encoded: String,
    },
    /// Encode snapshot JSON (any version) to the compact form
    Encode {
        /// Snapshot JSON file, or `-` for stdin
        input: String,
    },
    /// Summarize a snapshot given as JSON or compact string
    Inspect {
        /// File, or `-` for stdin
        input: String,
    },
    /// Show the tiled layout for a window count on a screen
    Tile {
        /// Number of windows
        #[arg(long)]
        count: usize,
        /// Screen size as WIDTHxHEIGHT
        #[arg(long, value_parser = parse_size)]
        screen: (f64, f64),
        /// Capture screen size; reports whether it would trigger tiling
        #[arg(long, value_parser = parse_size)]
        source: Option<(f64, f64)>,
    },
    /// Dry-run a restore into an in-memory host
    Simulate {
        /// Snapshot file (JSON or compact), or `-` for stdin
        input: String,
        /// Screen size as WIDTHxHEIGHT
        #[arg(long, value_parser = parse_size, default_value = "1728x1117")]
        screen: (f64, f64),
        /// Treat this document as deleted (repeatable)
        #[arg(long)]
        missing: Vec<String>,
        /// Treat a document as moved, OLD=NEW (repeatable)
        #[arg(long, value_parser = parse_rename)]
        rename: Vec<(String, String)>,
        /// Document the restore was requested from
        #[arg(long)]
        context: Option<String>,
    },
    /// Stored arrangements
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },
    /// Whole-store backups
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Arrangements embedded in documents
    Doc {
        #[command(subcommand)]
        command: DocCommands,
    },
    /// Configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum StoreCommands {
    /// List keys with history length and newest save time
    List,
    /// Show the history for a key, newest first
    Show { key: String },
    /// Delete a key, or one record with --saved-at
    Delete {
        key: String,
        #[arg(long)]
        saved_at: Option<u64>,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Write a backup of the whole store
    Create,
    /// List backups, newest first
    List,
    /// Apply a backup file to the store
    Restore {
        path: PathBuf,
        /// Merge into current contents instead of replacing them
        #[arg(long)]
        merge: bool,
    },
    /// Delete all but the newest backups
    Prune {
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[derive(Subcommand)]
enum DocCommands {
    /// Show a document's front matter and embedded arrangement
    Show {
        path: String,
        /// Directory document paths are relative to
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
    /// Print a document's stable id, assigning one if missing
    Id {
        path: String,
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
}

fn parse_size(raw: &str) -> Result<(f64, f64), String> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {raw}"))?;
    let w: f64 = w.trim().parse().map_err(|_| format!("bad width in {raw}"))?;
    let h: f64 = h.trim().parse().map_err(|_| format!("bad height in {raw}"))?;
    if !(w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0) {
        return Err(format!("size must be positive: {raw}"));
    }
    Ok((w, h))
}

fn parse_rename(raw: &str) -> Result<(String, String), String> {
    let (old, new) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected OLD=NEW, got {raw}"))?;
    if old.is_empty() || new.is_empty() {
        return Err(format!("expected OLD=NEW, got {raw}"));
    }
    Ok((old.to_string(), new.to_string()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        if let Some(core) = err.downcast_ref::<Error>() {
            eprintln!("{}", format_error_with_remediation(core));
        } else {
            eprintln!("Error: {err:#}");
        }
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    let mut log = config.logging.clone();
    if let Some(level) = cli.log_level {
        log.level = level;
    }
    if let Some(format) = cli.log_format {
        log.format = format;
    }
    init_logging(&log)?;

    let json = cli.json;
    match cli.command {
        Commands::Decode { encoded } => {
            let encoded = read_arg(&encoded)?;
            let snapshot = wire::decode(encoded.trim()).map_err(Error::from)?;
            println!("{}", snapshot.to_json_pretty()?);
        }
        Commands::Encode { input } => {
            let text = read_arg_or_file(&input)?;
            let snapshot = Snapshot::from_json(&text).map_err(Error::from)?;
            println!("{}", wire::encode(&snapshot));
        }
        Commands::Inspect { input } => inspect(&read_arg_or_file(&input)?, json)?,
        Commands::Tile {
            count,
            screen,
            source,
        } => tile(&config, count, screen, source, json),
        Commands::Simulate {
            input,
            screen,
            missing,
            rename,
            context,
        } => {
            let snapshot = parse_any(&read_arg_or_file(&input)?)?;
            simulate(&config, snapshot, screen, &missing, &rename, context, json).await?;
        }
        Commands::Store { command } => store_command(&config, command, json).await?,
        Commands::Backup { command } => backup_command(&config, command, json).await?,
        Commands::Doc { command } => doc_command(command, json).await?,
        Commands::Config {
            command: ConfigCommands::Show,
        } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", config.to_toml().map_err(Error::from)?);
            }
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .map_err(Error::from)?;
    config.validate().map_err(Error::from)?;
    Ok(config)
}

fn read_stdin() -> anyhow::Result<String> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("reading stdin")?;
    Ok(text)
}

/// The argument itself, or stdin for `-`.
fn read_arg(arg: &str) -> anyhow::Result<String> {
    if arg == "-" { read_stdin() } else { Ok(arg.to_string()) }
}

/// File contents, or stdin for `-`.
fn read_arg_or_file(arg: &str) -> anyhow::Result<String> {
    if arg == "-" {
        return read_stdin();
    }
    std::fs::read_to_string(arg).with_context(|| format!("reading {arg}"))
}

/// JSON of any version, or the compact form.
fn parse_any(text: &str) -> anyhow::Result<Snapshot> {
    let text = text.trim();
    let snapshot = if text.starts_with('{') {
        Snapshot::from_json(text)
    } else {
        wire::decode(text)
    };
    Ok(snapshot.map_err(Error::from)?)
}

fn outline(node: &LayoutNode) -> String {
    match node {
        LayoutNode::TabGroup { tabs } => {
            let names: Vec<String> = tabs
                .iter()
                .map(|t| {
                    if t.active && tabs.len() > 1 {
                        format!("{}*", t.path)
                    } else {
                        t.path.clone()
                    }
                })
                .collect();
            format!("[{}]", names.join(", "))
        }
        LayoutNode::Split {
            direction,
            children,
            sizes,
        } => {
            let inner: Vec<String> = children.iter().map(outline).collect();
            let sized = sizes.as_ref().map_or_else(String::new, |sizes| {
                let s: Vec<String> = sizes.iter().map(|s| format!("{}", s.round())).collect();
                format!("{{{}}}", s.join(","))
            });
            format!("{}{sized}({})", direction.as_short(), inner.join(" | "))
        }
    }
}

fn inspect(text: &str, json: bool) -> anyhow::Result<()> {
    let text = text.trim();
    let (version, snapshot) = if text.starts_with('{') {
        let versioned = VersionedSnapshot::from_json(text).map_err(Error::from)?;
        (versioned.version(), versioned.into_current())
    } else {
        (2, wire::decode(text).map_err(Error::from)?)
    };

    let windows: Vec<_> = snapshot
        .windows()
        .enumerate()
        .map(|(idx, w)| {
            json!({
                "window": if idx == 0 { "main".to_string() } else { format!("popout {}", idx - 1) },
                "tabs": w.root.tab_count(),
                "groups": w.root.group_count(),
                "depth": w.root.depth(),
                "geometry": w.geometry(),
                "proxy": w.is_proxy(),
                "layout": outline(&w.root),
            })
        })
        .collect();

    if json {
        let summary = json!({
            "version": version,
            "ts": snapshot.ts,
            "tabs": snapshot.tab_count(),
            "focusedWindow": snapshot.focused_window,
            "sourceScreen": snapshot.source_screen,
            "windows": windows,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("version: {version}");
    println!("saved: {}", snapshot.ts);
    println!("tabs: {}", snapshot.tab_count());
    if let Some(screen) = &snapshot.source_screen {
        println!(
            "screen: {}x{} (aspect {:.3})",
            screen.width, screen.height, screen.aspect_ratio
        );
    }
    for w in &windows {
        println!("{}: {}", w["window"].as_str().unwrap_or("?"), w["layout"].as_str().unwrap_or(""));
    }
    Ok(())
}

fn tile(
    config: &Config,
    count: usize,
    (width, height): (f64, f64),
    source: Option<(f64, f64)>,
    json: bool,
) {
    let transformer =
        CoordinateTransformer::new(Rect::new(0.0, 0.0, width, height), config.geometry.clone());
    let rects = transformer.calculate_tiled_layout(count);
    let needs_tiling = source.map(|(w, h)| {
        transformer.needs_tiling(&ScreenInfo::from_rect(&Rect::new(0.0, 0.0, w, h)))
    });

    if json {
        let out = json!({ "needsTiling": needs_tiling, "windows": rects });
        println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
        return;
    }
    if let Some(needs) = needs_tiling {
        println!("needs tiling: {needs}");
    }
    for r in rects {
        println!("{} {} {} {}", r.x, r.y, r.width, r.height);
    }
}

async fn simulate(
    config: &Config,
    snapshot: Snapshot,
    (width, height): (f64, f64),
    missing: &[String],
    rename: &[(String, String)],
    context: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let host = Arc::new(InMemoryHost::new(Rect::new(0.0, 0.0, width, height)));
    let missing: BTreeSet<&str> = missing.iter().map(String::as_str).collect();
    let renames: BTreeMap<&str, &str> = rename
        .iter()
        .map(|(old, new)| (old.as_str(), new.as_str()))
        .collect();
    for window in snapshot.windows() {
        for tab in window.root.tabs() {
            if missing.contains(tab.path.as_str()) {
                continue;
            }
            let path = renames
                .get(tab.path.as_str())
                .copied()
                .unwrap_or(tab.path.as_str());
            host.add_document(path, tab.stable_id.as_deref());
        }
    }

    let restorer = LayoutSnapshotRestorer::new(
        host.clone(),
        host.clone(),
        config.geometry.clone(),
        config.restore.clone(),
    );
    let mut report = restorer
        .restore(
            snapshot,
            RestoreOptions {
                context_document: context,
            },
        )
        .await?;
    let view_states = match report.scroll.take() {
        Some(handle) => handle.join().await.unwrap_or(0),
        None => 0,
    };

    let windows: Vec<_> = host
        .window_ids()
        .into_iter()
        .map(|id| {
            json!({
                "window": id.to_string(),
                "bounds": host.bounds_of(id),
                "layout": host.render_window(id),
                "focused": host.focused() == Some(id),
            })
        })
        .collect();

    if json {
        let out = json!({
            "windowsOpened": report.windows_opened,
            "tabsOpened": report.tabs_opened,
            "tabsSkipped": report.tabs_skipped,
            "popoutsSkipped": report.popouts_skipped,
            "tiled": report.tiled,
            "viewStatesApplied": view_states,
            "corrections": report.corrections,
            "notifications": host.notifications(),
            "windows": windows,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for w in &windows {
        let marker = if w["focused"].as_bool().unwrap_or(false) { " (focused)" } else { "" };
        println!(
            "window {}{marker}: {}",
            w["window"].as_str().unwrap_or("?"),
            w["layout"].as_str().unwrap_or("")
        );
    }
    println!(
        "opened {} tabs in {} windows, skipped {} tabs and {} popouts{}",
        report.tabs_opened,
        report.windows_opened,
        report.tabs_skipped,
        report.popouts_skipped,
        if report.tiled { ", tiled" } else { "" }
    );
    for c in &report.corrections {
        println!("moved: {} -> {}", c.old_path, c.new_path);
    }
    for n in host.notifications() {
        println!("notice: {n}");
    }
    Ok(())
}

fn open_store(config: &Config) -> anyhow::Result<ArrangementStore> {
    let dir = config.data_dir().map_err(Error::from)?;
    Ok(ArrangementStore::new(
        Arc::new(FileBackend::new(dir)),
        config.store.clone(),
    ))
}

async fn store_command(config: &Config, command: StoreCommands, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    match command {
        StoreCommands::List => {
            let all = store.export_all().await.map_err(Error::from)?;
            if json {
                let out: Vec<_> = all
                    .iter()
                    .map(|(key, history)| {
                        json!({
                            "key": key,
                            "records": history.len(),
                            "newest": history.last().map(|r| r.saved_at),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if all.is_empty() {
                println!("no stored arrangements");
            } else {
                for (key, history) in &all {
                    let newest = history.last().map_or(0, |r| r.saved_at);
                    println!("{key}\t{} record(s)\tnewest {newest}", history.len());
                }
            }
        }
        StoreCommands::Show { key } => {
            let history = store.get_all(&key).await.map_err(Error::from)?;
            if history.is_empty() {
                return Err(Error::NoArrangement(key).into());
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else {
                for record in &history {
                    println!(
                        "{}\t{} tab(s)\t{}",
                        record.saved_at,
                        record.arrangement.tab_count(),
                        outline(&record.arrangement.main.root)
                    );
                }
            }
        }
        StoreCommands::Delete { key, saved_at } => {
            let removed = match saved_at {
                Some(saved_at) => store.delete_arrangement(&key, saved_at).await,
                None => store.delete_key(&key).await,
            }
            .map_err(Error::from)?;
            if !removed {
                return Err(Error::NoArrangement(key).into());
            }
            store.cleanup().await.map_err(Error::from)?;
            println!("deleted {key}");
        }
    }
    Ok(())
}

async fn backup_command(
    config: &Config,
    command: BackupCommands,
    json: bool,
) -> anyhow::Result<()> {
    let dir = config.backup_dir().map_err(Error::from)?;
    match command {
        BackupCommands::Create => {
            let store = open_store(config)?;
            let entry = backup::create_backup(&store, &dir).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!(
                    "wrote {} ({} arrangements)",
                    entry.path.display(),
                    entry.arrangement_count
                );
            }
        }
        BackupCommands::List => {
            let entries = backup::list_backups(&dir)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for e in &entries {
                    println!(
                        "{}\t{}\t{} arrangements",
                        e.created_at.to_rfc3339(),
                        e.path.display(),
                        e.arrangement_count
                    );
                }
            }
        }
        BackupCommands::Restore { path, merge } => {
            let store = open_store(config)?;
            let unit = backup::read_backup(&path)?;
            let mode = if merge { RestoreMode::Merge } else { RestoreMode::Replace };
            let keys = backup::restore_backup(&store, unit, mode).await?;
            store.cleanup().await.map_err(Error::from)?;
            println!("restored {keys} arrangements");
        }
        BackupCommands::Prune { keep } => {
            let keep = keep.unwrap_or(config.backup.keep);
            if keep == 0 {
                bail!("--keep must be at least 1");
            }
            let summary = backup::prune_backups(&dir, keep)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("removed {}, kept {}", summary.removed, summary.kept);
            }
        }
    }
    Ok(())
}

async fn doc_command(command: DocCommands, json: bool) -> anyhow::Result<()> {
    match command {
        DocCommands::Show { path, root } => {
            let adapter = FrontmatterAdapter::new(root);
            let fields = adapter.describe(&path).await.map_err(Error::from)?;
            let context = adapter.get_context(&path).await.map_err(Error::from)?;
            if json {
                let out = json!({
                    "path": path,
                    "stableId": adapter.get_stable_id(&path).await.map_err(Error::from)?,
                    "arrangement": context,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
                return Ok(());
            }
            print!("{fields}");
            match context {
                Some(snapshot) => {
                    println!("arrangement: {} tab(s)", snapshot.tab_count());
                    for w in snapshot.windows() {
                        println!("  {}", outline(&w.root));
                    }
                }
                None => println!("arrangement: none"),
            }
        }
        DocCommands::Id { path, root } => {
            let adapter = FrontmatterAdapter::new(root);
            let id = ensure_stable_id(&adapter, &path).await.map_err(Error::from)?;
            println!("{id}");
        }
    }
    Ok(())
}
