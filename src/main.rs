use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use clap::Parser;
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use vigil_lib::{system_collectors, MonitorConfig, Supervisor, SystemClock, SystemSnapshot};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(version, about = "Headless runner for the vigil system monitor core")]
struct Cli {
    /// JSON config file (defaults to $VIGIL_CONFIG, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base update interval in seconds: 0.5, 1, 2, 5 or 10
    #[arg(short, long)]
    interval: Option<f64>,

    /// Print each published snapshot as a JSON line
    #[arg(long)]
    json: bool,

    /// Exit after this many snapshots
    #[arg(short = 'n', long)]
    count: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    vigil_lib::init_logging();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => MonitorConfig::load_default().context("loading default config")?,
    };
    if let Some(interval) = cli.interval {
        config.update_interval_secs = interval;
    }

    let supervisor = Supervisor::new(config, system_collectors(), Arc::new(SystemClock));
    let mut snapshots = supervisor.subscribe();
    let mut alerts = supervisor.alert_events();
    let handle = supervisor.start();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut published = 0u64;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received, stopping");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if cli.json {
                    println!("{}", serde_json::to_string(&*snapshot)?);
                } else {
                    info!("{}", summary(&snapshot));
                }
                published += 1;
                if cli.count.is_some_and(|limit| published >= limit) {
                    break;
                }
            }
            event = alerts.recv() => match event {
                Ok(event) => warn!("{}: {}", event.title, event.message),
                Err(RecvError::Lagged(missed)) => warn!("dropped {} alert events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    }

    handle.stop().await;
    Ok(())
}

fn summary(snapshot: &SystemSnapshot) -> String {
    let cpu = snapshot
        .cpu
        .value
        .as_ref()
        .map(|c| format!("{:.1}%", c.usage_percent))
        .unwrap_or_else(|| "--".into());
    let memory = snapshot
        .memory
        .value
        .as_ref()
        .map(|m| {
            format!(
                "{:.1}% ({} / {})",
                m.used_percentage,
                ByteSize(m.reading.used_bytes),
                ByteSize(m.reading.total_bytes)
            )
        })
        .unwrap_or_else(|| "--".into());
    let network = snapshot
        .network
        .value
        .as_ref()
        .map(|n| format!("down {:.2} up {:.2} Mbps", n.download_mbps, n.upload_mbps))
        .unwrap_or_else(|| "--".into());
    let disk = snapshot
        .disk
        .value
        .as_ref()
        .map(|d| format!("{:.1}% ({} free)", d.usage_percentage, ByteSize(d.free_bytes)))
        .unwrap_or_else(|| "--".into());
    let battery = match snapshot.battery.value.as_ref() {
        Some(Some(b)) if b.is_charging => format!("{:.0}% charging", b.percentage),
        Some(Some(b)) => format!("{:.0}%", b.percentage),
        Some(None) => "none".into(),
        None => "--".into(),
    };
    let smart = snapshot
        .smart_summary()
        .map(|s| format!("{:?}", s))
        .unwrap_or_else(|| "--".into());

    format!(
        "#{} cpu {} | mem {} | net {} | disk {} | battery {} | smart {}",
        snapshot.sequence, cpu, memory, network, disk, battery, smart
    )
}
