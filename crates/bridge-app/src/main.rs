use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bridge_app::{BridgeConfig, Dispatcher};
use decoder_actor::{DecoderActor, DecoderConfig, DecoderError, DecoderExit};
use mqtt_publisher::Publisher;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();
    let mut config = BridgeConfig::load_with_path(args.config_path).context("load config failed")?;
    if args.dry_run {
        config.dry_run = true;
    }
    init_tracing(&config);
    if !config.log_level_recognized() {
        warn!(level = %config.log_level, "unrecognized log level, using INFO");
    }
    config.validate().context("config validation failed")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (publisher, mqtt_handle) = if config.dry_run {
        info!("dry run enabled, publishes are only logged");
        (Publisher::new_mock(), None)
    } else {
        match Publisher::connect(&config.mqtt, shutdown_rx.clone()).await {
            Ok((publisher, handle)) => (publisher, Some(handle)),
            Err(err) => {
                error!(
                    host = %config.mqtt.host,
                    port = config.mqtt.port,
                    error = %err,
                    "failed to connect to mqtt broker"
                );
                return Err(err).context("mqtt connect failed");
            }
        }
    };

    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let dispatcher = Dispatcher::new(publisher, config.discovery.clone());
    let dispatch_handle = tokio::spawn(dispatcher.run(rx, shutdown_rx.clone()));

    let mut decoder_handle = spawn_decoder(
        config.decoder.clone(),
        tx.clone(),
        shutdown_rx.clone(),
        Duration::ZERO,
    );

    notify_ready();
    let watchdog_handle = start_watchdog(shutdown_rx.clone());

    let signal = shutdown_signal();
    tokio::pin!(signal);
    let decoder_running = loop {
        tokio::select! {
            _ = &mut signal => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
                break true;
            }
            result = &mut decoder_handle => {
                match result {
                    Ok(Ok(DecoderExit::Shutdown)) => break false,
                    Ok(Ok(DecoderExit::ChannelClosed)) => {
                        warn!("dispatcher stopped, shutting down");
                        let _ = shutdown_tx.send(true);
                        break false;
                    }
                    Ok(Ok(DecoderExit::StreamClosed(status))) => {
                        warn!(%status, "decoder exited");
                    }
                    Ok(Err(err)) => {
                        warn!(error = %err, "decoder failed");
                    }
                    Err(err) => {
                        warn!(error = %err, "decoder task failed");
                    }
                }
                info!(delay_ms = config.respawn_delay_ms, "restarting decoder");
                decoder_handle = spawn_decoder(
                    config.decoder.clone(),
                    tx.clone(),
                    shutdown_rx.clone(),
                    Duration::from_millis(config.respawn_delay_ms),
                );
            }
        }
    };

    drop(tx);
    if decoder_running {
        match timeout(STOP_TIMEOUT, decoder_handle).await {
            Ok(Ok(Err(err))) => warn!(error = %err, "decoder stopped with error"),
            Ok(Err(err)) => warn!(error = %err, "decoder task join failed"),
            Ok(Ok(Ok(_))) => {}
            Err(_) => warn!("decoder did not stop in time"),
        }
    }

    if let Err(err) = dispatch_handle.await {
        warn!(error = %err, "dispatcher task join failed");
    }
    // No explicit DISCONNECT; the broker drops the session on its own.
    if let Some(handle) = mqtt_handle {
        handle.abort();
    }
    if let Some(handle) = watchdog_handle {
        let _ = handle.await;
    }
    info!("bridge stopped");
    Ok(())
}

fn spawn_decoder(
    config: DecoderConfig,
    sender: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
    delay: Duration,
) -> JoinHandle<Result<DecoderExit, DecoderError>> {
    tokio::spawn(async move {
        if delay > Duration::ZERO {
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }
        DecoderActor::new(config, sender, shutdown).run().await
    })
}

fn init_tracing(config: &BridgeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[derive(Debug, Default)]
struct CliArgs {
    config_path: Option<String>,
    dry_run: bool,
}

fn parse_args() -> CliArgs {
    let mut parsed = CliArgs::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            parsed.config_path = args.next();
        } else if let Some(path) = arg.strip_prefix("--config=") {
            parsed.config_path = Some(path.to_string());
        } else if arg == "--dry-run" {
            parsed.dry_run = true;
        }
    }
    parsed
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %err, "systemd ready notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}

#[cfg(target_os = "linux")]
fn start_watchdog(mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
    let interval = watchdog_interval()?;
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sleep(interval) => {
                    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
                        warn!(error = %err, "systemd watchdog notify failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }))
}

#[cfg(not(target_os = "linux"))]
fn start_watchdog(_shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
    None
}

#[cfg(target_os = "linux")]
fn watchdog_interval() -> Option<Duration> {
    let watchdog_usec = env::var("WATCHDOG_USEC").ok()?.parse::<u64>().ok()?;
    if let Some(pid) = env::var("WATCHDOG_PID")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        if pid != std::process::id() {
            return None;
        }
    }

    let interval = watchdog_usec.saturating_div(2).max(100_000);
    Some(Duration::from_micros(interval))
}
