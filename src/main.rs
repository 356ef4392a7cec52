//! edgesight CLI entry point

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::EnvFilter;

use edgesight::cli::{Cli, Commands, OutputFormat, SettingsOperation, WatchArgs};
use edgesight::settings::load_settings_or_default;
use edgesight::{
    BuildProfile, ClientUpdate, ConfigurationError, DetectionClient, EdgeSightError,
    MemorySettingsStore, RegistrySnapshot, Settings, SettingsStore, Sighting, TomlSettingsStore,
};

/// Most recent sightings listed in the `watch` summary
const SIGHTINGS_SHOWN: usize = 10;

fn main() -> ExitCode {
    match run() {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<EdgeSightError>()
                .map(EdgeSightError::exit_code)
                .unwrap_or(ExitCode::FAILURE)
        }
    }
}

fn run() -> anyhow::Result<String> {
    let cli = Cli::parse();
    let store = match &cli.settings {
        Some(path) => TomlSettingsStore::new(path),
        None => TomlSettingsStore::at_default_path(),
    };

    match &cli.command {
        Commands::Settings(args) => run_settings(&store, &args.operation),
        Commands::Watch(args) => run_watch(&cli, store, args),
    }
}

fn run_settings(store: &TomlSettingsStore, operation: &SettingsOperation) -> anyhow::Result<String> {
    match operation {
        SettingsOperation::Show => {
            let settings = store.load()?;
            Ok(format!("# {}\n{}", store.path().display(), settings.display()))
        }
        SettingsOperation::Get { key } => {
            let settings = store.load()?;
            let value = settings
                .get(key)
                .ok_or_else(|| EdgeSightError::from(ConfigurationError::UnknownKey { key: key.clone() }))?;
            Ok(format!("{}\n", value))
        }
        SettingsOperation::Set { key, value } => {
            let mut settings = store.load()?;
            settings
                .set(key, value)
                .map_err(EdgeSightError::from)
                .with_context(|| format!("Cannot set {}", key))?;
            settings
                .validate(BuildProfile::current())
                .map_err(EdgeSightError::from)
                .context("Refusing to save invalid settings")?;
            store.save(&settings)?;
            Ok(format!("Set {} = {}\n", key, value))
        }
        SettingsOperation::Reset => {
            store.save(&Settings::default())?;
            Ok("Settings reset to defaults\n".to_string())
        }
    }
}

/// Logs go to stderr so `watch --format json` output stays clean
fn init_logging(level: &str) {
    let directive = format!("edgesight={}", level)
        .parse::<Directive>()
        .unwrap_or_else(|_| LevelFilter::INFO.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_watch(cli: &Cli, store: TomlSettingsStore, args: &WatchArgs) -> anyhow::Result<String> {
    let settings = load_settings_or_default(&store);
    init_logging(if cli.verbose {
        "debug"
    } else {
        settings.log_level.as_str()
    });

    // A --url override lives in memory only
    let store: Arc<dyn SettingsStore> = match &args.url {
        Some(url) => Arc::new(MemorySettingsStore::with_settings(Settings {
            server_url: url.clone(),
            ..settings
        })),
        None => Arc::new(store),
    };

    let runtime = tokio::runtime::Runtime::new()
        .map_err(EdgeSightError::from)
        .context("Failed to start the async runtime")?;
    runtime.block_on(watch(store, args))
}

async fn watch(store: Arc<dyn SettingsStore>, args: &WatchArgs) -> anyhow::Result<String> {
    let client = DetectionClient::new(store);
    let mut updates = client.subscribe();
    let settings = client.settings();

    client
        .connect()
        .await
        .with_context(|| format!("Cannot reach {}", settings.server_url))?;

    let deadline = args.duration.map(Duration::from_secs);
    let shutdown = async move {
        match deadline {
            Some(after) => {
                tokio::select! {
                    _ = tokio::time::sleep(after) => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    };
    tokio::pin!(shutdown);

    let mut frames = 0u64;
    let mut batches = 0u64;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            update = updates.recv() => {
                match update {
                    Ok(ClientUpdate::ObjectsUpdated { .. }) => {
                        batches += 1;
                        let mut snapshot = client.snapshot();
                        if let Some(id) = args.track.as_deref() {
                            if !snapshot.tracking_enabled && snapshot.objects.iter().any(|o| o.id == id) {
                                client.select(Some(id));
                                client.start_tracking();
                                snapshot = client.snapshot();
                            }
                        }
                        println!("{}", render_snapshot(&snapshot, &settings, args.format));
                    }
                    Ok(ClientUpdate::FrameUpdated) => frames += 1,
                    Ok(ClientUpdate::Disconnected { reason }) => {
                        match reason {
                            Some(reason) => tracing::error!("Session ended: {}", reason),
                            None => tracing::info!("Session ended"),
                        }
                        break;
                    }
                    Ok(other) => tracing::debug!("{:?}", other),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Output fell behind, skipped {} updates", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    client.disconnect();
    let stats = client.decoder_stats();
    let mut summary = format!(
        "{} frames, {} detection batches, {} messages rejected, {} records dropped\n",
        frames, batches, stats.messages_rejected, stats.records_dropped
    );
    summary.push_str(&render_sightings(&client.sightings()));
    Ok(summary)
}

fn render_sightings(sightings: &[(String, Sighting)]) -> String {
    let mut out = format!("{} distinct objects seen\n", sightings.len());
    for (id, sighting) in sightings.iter().take(SIGHTINGS_SHOWN) {
        out.push_str(&format!(
            "  {}#{} x{} last {:.2} at {}\n",
            sighting.label,
            id,
            sighting.times_detected,
            sighting.last_confidence,
            sighting.last_seen.format("%H:%M:%S"),
        ));
    }
    out
}

fn render_snapshot(snapshot: &RegistrySnapshot, settings: &Settings, format: OutputFormat) -> String {
    let visible: Vec<_> = snapshot
        .visible_objects(settings.confidence_threshold)
        .collect();

    match format {
        OutputFormat::Json => serde_json::json!({
            "objects": visible,
            "selectedId": snapshot.selected_id,
            "trackingEnabled": snapshot.tracking_enabled,
        })
        .to_string(),
        OutputFormat::Text => {
            if visible.is_empty() {
                return "no objects".to_string();
            }
            visible
                .iter()
                .map(|o| {
                    let (cx, cy) = o.bbox.center();
                    let mut line = format!(
                        "{}#{} {:.2} @{:.2},{:.2}",
                        o.label, o.id, o.confidence, cx, cy
                    );
                    if settings.show_depth_overlay {
                        if let Some(depth) = o.depth {
                            line.push_str(&format!(" {:.1}m", depth));
                        }
                    }
                    if o.is_tracked {
                        line.push_str(" [tracked]");
                    } else if snapshot.selected_id.as_deref() == Some(o.id.as_str()) {
                        line.push_str(" [selected]");
                    }
                    line
                })
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}
