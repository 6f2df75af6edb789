//! Command-line front end for BitHive.
//!
//! Device list, preferences and history live in a store directory with one
//! file per entry. Most subcommands edit it directly; `status` and `watch`
//! start a monitor against it and print what it sees. A running `watch`
//! picks up devices added or removed by other invocations on its next cycle.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use bithive::aggregator::FleetSnapshot;
use bithive::api_client::Client;
use bithive::api_client::types::DeviceSettingsPatch;
use bithive::config::MonitorConfig;
use bithive::metrics::{
    TemperatureStatus, acceptance_percent, efficiency_j_per_th, format_hashrate_th,
};
use bithive::monitor::Monitor;
use bithive::registry::DeviceRegistry;
use bithive::settings::{Column, Settings, THEMES};
use bithive::storage::{self, FileStore, KeyValueStore};
use bithive::timeseries::{SeriesKey, TimeSeriesStore};
use bithive::tracing::prelude::*;
use bithive::types::format_difficulty;

/// Monitor a fleet of Bitaxe miners
#[derive(Parser, Debug)]
#[command(name = "bithive", version, about, long_about = None)]
struct Cli {
    /// Store directory holding devices, settings and history
    #[arg(long, env = "BITHIVE_STORE", value_name = "DIR")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered devices
    List,
    /// Register a device by IP or host name
    Add { address: String },
    /// Unregister a device
    Remove { address: String },
    /// Show or set the refresh interval in seconds
    Interval { seconds: Option<f64> },
    /// Show or change which table columns are visible
    Columns {
        #[arg(long, value_name = "COLUMN")]
        show: Vec<Column>,
        #[arg(long, value_name = "COLUMN")]
        hide: Vec<Column>,
    },
    /// Show or set the theme
    Theme { name: Option<String> },
    /// Poll every device once and print the fleet. Exits with status 2 if
    /// any device failed to answer
    Status,
    /// Keep polling and reprint the fleet after every cycle
    Watch,
    /// Print the stored history of a device
    History {
        /// Host name the device reports, or `fleet`
        hostname: String,
    },
    /// Reboot a device
    Restart { address: String },
    /// Change device settings
    Configure {
        address: String,
        /// ASIC clock in MHz
        #[arg(long)]
        frequency: Option<u32>,
        /// Core voltage in mV
        #[arg(long)]
        core_voltage: Option<u32>,
        /// Fan duty cycle in percent
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        fan_speed: Option<u8>,
        /// Let the device control its fan
        #[arg(long)]
        auto_fan: Option<bool>,
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Delete history, keeping devices and settings
    ResetCharts,
    /// Delete everything except the theme
    ResetAll,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    bithive::tracing::init();
    let cli = Cli::parse();
    let config = MonitorConfig::from_env();

    let path = match cli.store {
        Some(path) => path,
        None => default_store_path()?,
    };
    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::open(&path).with_context(|| format!("opening store {}", path.display()))?,
    );
    debug!(path = %path.display(), "Store opened");

    match cli.command {
        Command::List => {
            let registry = DeviceRegistry::load(store, config.duplicates);
            if registry.is_empty() {
                println!("No devices registered.");
            }
            for address in registry.list() {
                println!("{address}");
            }
        }
        Command::Add { address } => {
            let mut registry = DeviceRegistry::load(store, config.duplicates);
            if registry.add(&address)? {
                println!("Added {}", address.trim());
            } else {
                println!("Not added: {} is blank or already registered", address.trim());
            }
        }
        Command::Remove { address } => {
            let mut registry = DeviceRegistry::load(store, config.duplicates);
            match registry.remove(&address)? {
                0 => println!("{address} is not registered"),
                n => println!("Removed {address} ({n} entr{})", if n == 1 { "y" } else { "ies" }),
            }
        }
        Command::Interval { seconds } => {
            let settings = Settings::new(store, &config);
            if let Some(seconds) = seconds {
                let Ok(interval) = Duration::try_from_secs_f64(seconds) else {
                    bail!("interval must be a positive number of seconds");
                };
                settings.set_refresh_interval(interval)?;
            }
            println!("{}s", settings.refresh_interval().as_secs_f64());
        }
        Command::Columns { show, hide } => {
            let settings = Settings::new(store, &config);
            for column in show {
                settings.set_column_visible(column, true)?;
            }
            for column in hide {
                settings.set_column_visible(column, false)?;
            }
            let visible = settings.visible_columns();
            for column in <Column as strum::IntoEnumIterator>::iter() {
                let mark = if visible.contains(&column) { "x" } else { " " };
                println!("[{mark}] {column}");
            }
        }
        Command::Theme { name } => {
            let settings = Settings::new(store, &config);
            if let Some(name) = name {
                settings
                    .set_theme(&name)
                    .with_context(|| format!("available themes: {}", THEMES.join(", ")))?;
            }
            println!("{}", settings.theme());
        }
        Command::Status => {
            let settings = Settings::new(store.clone(), &config);
            let snapshot = run_monitor(config, store, |snapshot| {
                print_fleet(snapshot, &settings.visible_columns());
                false
            })
            .await?;
            return Ok(ExitCode::from(status_exit_code(&snapshot)));
        }
        Command::Watch => {
            let settings = Settings::new(store.clone(), &config);
            run_monitor(config, store, |snapshot| {
                print_fleet(snapshot, &settings.visible_columns());
                true
            })
            .await?;
        }
        Command::History { hostname } => {
            let key = if hostname == "fleet" {
                SeriesKey::Fleet
            } else {
                SeriesKey::Device(hostname)
            };
            let mut history =
                TimeSeriesStore::new(store, config.history_window, config.average_window);
            print_history(history.series(&key));
        }
        Command::Restart { address } => {
            Client::with_timeout(config.request_timeout)
                .restart(&address)
                .await
                .with_context(|| format!("restarting {address}"))?;
            println!("Restart requested for {address}");
        }
        Command::Configure {
            address,
            frequency,
            core_voltage,
            fan_speed,
            auto_fan,
            hostname,
        } => {
            let patch = DeviceSettingsPatch {
                frequency,
                core_voltage,
                fan_speed,
                auto_fan_speed: auto_fan,
                hostname,
            };
            if patch.is_empty() {
                bail!("nothing to change; pass at least one setting");
            }
            Client::with_timeout(config.request_timeout)
                .update_settings(&address, &patch)
                .await
                .with_context(|| format!("updating {address}"))?;
            println!("Settings sent to {address}");
        }
        Command::ResetCharts => {
            storage::reset_charts(store.as_ref())?;
            println!("History cleared.");
        }
        Command::ResetAll => {
            storage::reset_everything(store.as_ref())?;
            println!("Everything but the theme cleared.");
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Exit status of `status`: 2 when some device failed to answer.
fn status_exit_code(snapshot: &FleetSnapshot) -> u8 {
    if snapshot.any_error { 2 } else { 0 }
}

fn default_store_path() -> Result<PathBuf> {
    let base = match std::env::var_os("XDG_DATA_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = std::env::var_os("HOME").context("neither XDG_DATA_HOME nor HOME is set")?;
            PathBuf::from(home).join(".local").join("share")
        }
    };
    Ok(base.join("bithive").join("store"))
}

/// Run a monitor, handing every settled snapshot to `on_snapshot` until it
/// returns false or Ctrl-C is pressed. Returns the last snapshot seen.
async fn run_monitor(
    config: MonitorConfig,
    store: Arc<dyn KeyValueStore>,
    mut on_snapshot: impl FnMut(&FleetSnapshot) -> bool,
) -> Result<FleetSnapshot> {
    let fetcher = Arc::new(Client::with_timeout(config.request_timeout));
    let (monitor, handle) = Monitor::new(config, store, fetcher);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(monitor.run(cancel.clone()));

    let mut last = FleetSnapshot::default();
    loop {
        tokio::select! {
            snapshot = handle.settled_after(last.cycle) => {
                last = snapshot?;
                if !on_snapshot(&last) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    cancel.cancel();
    task.await.context("monitor task panicked")?;
    Ok(last)
}

fn print_fleet(snapshot: &FleetSnapshot, columns: &BTreeSet<Column>) {
    let summary = &snapshot.summary;
    println!();
    println!(
        "Fleet: {} ({} online, {} offline){}",
        summary
            .hash_rate
            .map(format_hashrate_th)
            .unwrap_or_else(|| "N/A".into()),
        snapshot.devices_with_data,
        snapshot.devices_without_data,
        if snapshot.any_error { "  [errors]" } else { "" },
    );
    if let Some(avg) = snapshot.avg_hash_rate {
        println!("  Average:    {}", format_hashrate_th(avg));
    }
    if snapshot.devices_with_data > 0 {
        println!("  Power:      {:.1} W", summary.power);
        if let Some(eff) = summary.hash_rate.and_then(|h| efficiency_j_per_th(summary.power, h)) {
            println!("  Efficiency: {eff:.2} J/TH");
        }
        println!(
            "  Avg temp:   {:.1} °C ({})",
            summary.temp,
            TemperatureStatus::classify(summary.temp).label()
        );
        println!("  Best diff:  {}", format_difficulty(summary.best_diff));
        println!(
            "  Shares:     {} accepted, {} rejected{}",
            summary.shares_accepted,
            summary.shares_rejected,
            acceptance_percent(summary.shares_accepted, summary.shares_rejected)
                .map(|p| format!(" ({p:.2}%)"))
                .unwrap_or_default()
        );
    }
    println!();

    let header: Vec<&str> = columns.iter().map(|c| c.title()).collect();
    println!("{}", header.join("\t"));
    for row in &snapshot.rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| match (column, &row.status) {
                (Column::Address, _) => row.address.clone(),
                (_, None) => "N/A".into(),
                (Column::AsicModel, Some(status)) => status.asic_model.clone(),
                (Column::BestDiff, Some(status)) => status.best_diff.to_string(),
                (Column::HashRate, Some(status)) => match row.expected_hash_rate {
                    Some(expected) if expected > 0.0 => format!(
                        "{} / {}",
                        format_hashrate_th(status.hash_rate),
                        format_hashrate_th(expected)
                    ),
                    _ => format_hashrate_th(status.hash_rate),
                },
                (Column::Temp, Some(status)) => format!("{:.1} °C", status.temp),
                (Column::Frequency, Some(status)) => format!("{} MHz", status.frequency),
                (Column::Voltage, Some(status)) => format!("{} mV", status.voltage),
                (Column::Power, Some(status)) => format!("{:.1} W", status.power),
            })
            .collect();
        println!("{}", cells.join("\t"));
        if let Some(error) = &row.error {
            println!("  {}: {error}", row.address);
        }
    }
}

fn print_history(samples: &[bithive::timeseries::TimeSeriesSample]) {
    if samples.is_empty() {
        println!("No history.");
        return;
    }
    println!("timestamp\thashrate\taverage\ttemp");
    for sample in samples {
        let when = time::OffsetDateTime::from_unix_timestamp_nanos(
            i128::from(sample.timestamp) * 1_000_000,
        )
        .map(|t| t.to_string())
        .unwrap_or_else(|_| sample.timestamp.to_string());
        println!(
            "{when}\t{}\t{}\t{:.1}",
            format_hashrate_th(sample.hash_rate),
            format_hashrate_th(sample.avg_hash_rate),
            sample.temp
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_exits_nonzero_only_on_errors() {
        let mut snapshot = FleetSnapshot::default();
        assert_eq!(status_exit_code(&snapshot), 0);

        snapshot.any_error = true;
        assert_eq!(status_exit_code(&snapshot), 2);
    }
}
