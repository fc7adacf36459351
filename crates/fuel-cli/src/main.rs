//! OBD Fuel - Main Entry Point
//!
//! `obd-fuel [config]` connects to the adapter, polls the vehicle and
//! optionally runs a quick fuel test. Ctrl-C disconnects cleanly.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fuel_monitor::{run_tick_loop, FuelMonitor, RefuelKind, TracingAnnouncer};
use obd_protocol::SerialTransport;
use obd_session::{ConnectionSession, ConnectionState};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, DEFAULT_CONFIG_FILE};

/// Initialize logging; `RUST_LOG` overrides the default `info` level
fn init_logging(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to set tracing subscriber: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let config = AppConfig::load(&path).with_context(|| format!("loading configuration from {path}"))?;

    init_logging(config.log_json)?;

    info!("=== OBD Fuel v{} ===", env!("CARGO_PKG_VERSION"));

    let transport = Arc::new(SerialTransport::new(&config.device, config.baud_rate));
    let session = ConnectionSession::new(transport, config.session.clone());

    session
        .connect()
        .await
        .with_context(|| format!("connecting to {}", config.device))?;

    match session.vehicle() {
        Some(vehicle) => info!(
            "Vehicle {} ({}, {})",
            vehicle.vin,
            vehicle.manufacturer.as_deref().unwrap_or("unknown make"),
            vehicle
                .model_year
                .map_or_else(|| "unknown year".to_string(), |y| y.to_string())
        ),
        None => info!("Vehicle did not report a VIN"),
    }

    session.start_polling()?;

    tokio::spawn(log_states(session.clone()));
    tokio::spawn(log_snapshots(
        session.clone(),
        Duration::from_millis(config.snapshot_log_ms.max(1)),
    ));

    let quick_test = if config.quick_test.enabled {
        start_quick_test(&session, &config).await
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    info!("Shutting down");
    if let Some(cancel) = quick_test {
        cancel.cancel();
    }
    session.disconnect().await;
    Ok(())
}

async fn start_quick_test(session: &ConnectionSession, config: &AppConfig) -> Option<CancellationToken> {
    // Nothing changes the live settings from the command line
    let (_settings_tx, settings_rx) = watch::channel(config.monitor.clone());

    let mut monitor = FuelMonitor::new(Arc::new(session.clone()), Arc::new(TracingAnnouncer), settings_rx);
    monitor.set_vin(session.vehicle().map(|v| v.vin));

    if let Err(e) = monitor
        .start_refuel_mode(config.quick_test.context, RefuelKind::Quick)
        .await
    {
        warn!("Quick fuel test not started: {}", e);
        return None;
    }

    let cancel = monitor.cancel_handle();
    let monitor = Arc::new(Mutex::new(monitor));
    tokio::spawn(async move {
        run_tick_loop(monitor.clone()).await;

        if let Some(result) = monitor.lock().await.result() {
            match serde_json::to_string(result) {
                Ok(json) => info!("Quick test result: {}", json),
                Err(e) => warn!("Failed to serialize quick test result: {}", e),
            }
        }
    });
    Some(cancel)
}

async fn log_states(session: ConnectionSession) {
    let mut states = session.subscribe_state();
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        if state == ConnectionState::Error {
            warn!(
                "Connection error: {}",
                session.last_error().unwrap_or_else(|| "unknown".to_string())
            );
        }
    }
}

async fn log_snapshots(session: ConnectionSession, every: Duration) {
    let mut snapshots = session.subscribe_snapshot();
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;
        if !snapshots.has_changed().unwrap_or(false) {
            if session.state() == ConnectionState::Disconnected {
                break;
            }
            continue;
        }
        let s = *snapshots.borrow_and_update();
        info!(
            rpm = ?s.rpm,
            speed_kmh = ?s.speed_kmh,
            coolant_c = ?s.coolant_temp_c,
            battery_v = ?s.battery_voltage,
            fuel_pct = ?s.fuel_level_pct,
            load_pct = ?s.engine_load_pct,
            "Snapshot"
        );
    }
}
