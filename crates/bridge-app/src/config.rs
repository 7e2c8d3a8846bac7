use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use decoder_actor::DecoderConfig;
use discovery::DiscoveryConfig;
use mqtt_publisher::MqttConfig;

const DEFAULT_LOG_LEVEL: &str = "INFO";
const DEFAULT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_RESPAWN_DELAY_MS: u64 = 5_000;
const LOG_LEVELS: [&str; 6] = ["TRACE", "DEBUG", "INFO", "WARNING", "ERROR", "FATAL"];

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    pub discovery: DiscoveryConfig,
    pub decoder: DecoderConfig,
    pub log_level: String,
    pub channel_capacity: usize,
    pub respawn_delay_ms: u64,
    /// Log publishes instead of connecting to a broker.
    pub dry_run: bool,
}

impl BridgeConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mqtt.host.trim().is_empty() {
            anyhow::bail!("mqtt.host must be non-empty");
        }
        if self.mqtt.port == 0 {
            anyhow::bail!("mqtt.port must be between 1 and 65535");
        }
        if self.mqtt.client_id.trim().is_empty() {
            anyhow::bail!("mqtt.client_id must be non-empty");
        }
        if self.mqtt.keep_alive_secs == 0 {
            anyhow::bail!("mqtt.keep_alive_secs must be >= 1");
        }
        if self.mqtt.connect_timeout_ms == 0 {
            anyhow::bail!("mqtt.connect_timeout_ms must be >= 1");
        }
        if self.mqtt.reconnect_delay_ms == 0 {
            anyhow::bail!("mqtt.reconnect_delay_ms must be >= 1");
        }
        validate_topic_prefix("discovery.discovery_prefix", &self.discovery.discovery_prefix)?;
        validate_topic_prefix("discovery.topic_prefix", &self.discovery.topic_prefix)?;
        if self.decoder.binary.trim().is_empty() {
            anyhow::bail!("decoder.binary must be non-empty");
        }
        if self.channel_capacity == 0 {
            anyhow::bail!("bridge.channel_capacity must be >= 1");
        }
        if self.respawn_delay_ms == 0 {
            anyhow::bail!("bridge.respawn_delay_ms must be >= 1");
        }

        Ok(())
    }

    /// False for levels outside TRACE, DEBUG, INFO, WARNING, ERROR and FATAL;
    /// those fall back to `info`.
    pub fn log_level_recognized(&self) -> bool {
        LOG_LEVELS.contains(&self.log_level.to_ascii_uppercase().as_str())
    }

    /// `tracing` filter directive for the configured `LOG_LEVEL`.
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_ascii_uppercase().as_str() {
            "TRACE" => "trace",
            "DEBUG" => "debug",
            "WARNING" => "warn",
            "ERROR" | "FATAL" => "error",
            _ => "info",
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            discovery: DiscoveryConfig::default(),
            decoder: DecoderConfig::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            respawn_delay_ms: DEFAULT_RESPAWN_DELAY_MS,
            dry_run: false,
        }
    }
}

fn apply_env_overrides(config: &mut BridgeConfig) {
    if let Ok(value) = env::var("MQTT_HOST") {
        config.mqtt.host = value;
    }
    if let Some(port) = parse_env_u16("MQTT_PORT") {
        config.mqtt.port = port;
    }
    if let Ok(value) = env::var("MQTT_USER") {
        config.mqtt.username = value;
    }
    if let Ok(value) = env::var("MQTT_PASSWORD") {
        config.mqtt.password = value;
    }
    if let Ok(value) = env::var("MQTT_CLIENT_ID") {
        config.mqtt.client_id = value;
    }

    if let Ok(value) = env::var("MQTT_DISCOVERY_PREFIX") {
        config.discovery.discovery_prefix = value;
    }
    if let Ok(value) = env::var("MQTT_TOPIC_PREFIX") {
        config.discovery.topic_prefix = value;
    }
    if let Some(retain) = parse_env_flag("MQTT_RETAIN") {
        config.discovery.retain = retain;
    }

    if let Ok(value) = env::var("RTL_433_BINARY") {
        config.decoder.binary = value;
    }
    if let Ok(value) = env::var("RTL_433_PROTOCOL_PARAMS") {
        config.decoder.protocol_params = value;
    }
    if let Ok(value) = env::var("RTL_433_ADVANCED_PARAMS") {
        config.decoder.advanced_params = value;
    }

    if let Ok(value) = env::var("LOG_LEVEL") {
        config.log_level = value;
    }

    config.channel_capacity =
        parse_env_usize("RTL433_BRIDGE_CHANNEL_CAPACITY").unwrap_or(config.channel_capacity);
    config.respawn_delay_ms =
        parse_env_u64("RTL433_BRIDGE_RESPAWN_DELAY_MS").unwrap_or(config.respawn_delay_ms);
    config.dry_run = parse_env_flag("RTL433_BRIDGE_DRY_RUN").unwrap_or(config.dry_run);
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    mqtt: Option<FileMqttConfig>,
    discovery: Option<FileDiscoveryConfig>,
    decoder: Option<FileDecoderConfig>,
    logging: Option<FileLoggingConfig>,
    bridge: Option<FileBridgeConfig>,
}

#[derive(Debug, Deserialize)]
struct FileMqttConfig {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    client_id: Option<String>,
    keep_alive_secs: Option<u64>,
    connect_timeout_ms: Option<u64>,
    reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileDiscoveryConfig {
    discovery_prefix: Option<String>,
    topic_prefix: Option<String>,
    retain: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct FileDecoderConfig {
    binary: Option<String>,
    protocol_params: Option<String>,
    advanced_params: Option<String>,
    stop_grace_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileLoggingConfig {
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileBridgeConfig {
    channel_capacity: Option<usize>,
    respawn_delay_ms: Option<u64>,
    dry_run: Option<bool>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("RTL433_BRIDGE_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut BridgeConfig, file: FileConfig) {
    if let Some(mqtt) = file.mqtt {
        if let Some(host) = mqtt.host {
            config.mqtt.host = host;
        }
        if let Some(port) = mqtt.port {
            config.mqtt.port = port;
        }
        if let Some(username) = mqtt.username {
            config.mqtt.username = username;
        }
        if let Some(password) = mqtt.password {
            config.mqtt.password = password;
        }
        if let Some(client_id) = mqtt.client_id {
            config.mqtt.client_id = client_id;
        }
        if let Some(keep_alive) = mqtt.keep_alive_secs {
            config.mqtt.keep_alive_secs = keep_alive;
        }
        if let Some(timeout_ms) = mqtt.connect_timeout_ms {
            config.mqtt.connect_timeout_ms = timeout_ms;
        }
        if let Some(delay) = mqtt.reconnect_delay_ms {
            config.mqtt.reconnect_delay_ms = delay;
        }
    }

    if let Some(discovery) = file.discovery {
        if let Some(prefix) = discovery.discovery_prefix {
            config.discovery.discovery_prefix = prefix;
        }
        if let Some(prefix) = discovery.topic_prefix {
            config.discovery.topic_prefix = prefix;
        }
        if let Some(retain) = discovery.retain {
            config.discovery.retain = retain;
        }
    }

    if let Some(decoder) = file.decoder {
        if let Some(binary) = decoder.binary {
            config.decoder.binary = binary;
        }
        if let Some(params) = decoder.protocol_params {
            config.decoder.protocol_params = params;
        }
        if let Some(params) = decoder.advanced_params {
            config.decoder.advanced_params = params;
        }
        if let Some(grace) = decoder.stop_grace_ms {
            config.decoder.stop_grace_ms = grace;
        }
    }

    if let Some(level) = file.logging.and_then(|logging| logging.level) {
        config.log_level = level;
    }

    if let Some(bridge) = file.bridge {
        if let Some(capacity) = bridge.channel_capacity {
            config.channel_capacity = capacity;
        }
        if let Some(delay) = bridge.respawn_delay_ms {
            config.respawn_delay_ms = delay;
        }
        if let Some(dry_run) = bridge.dry_run {
            config.dry_run = dry_run;
        }
    }
}

fn parse_env_u16(key: &str) -> Option<u16> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

/// Only a case-insensitive `true` enables a flag; any other value disables it.
fn parse_env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|value| value.eq_ignore_ascii_case("true"))
}

fn validate_topic_prefix(name: &str, prefix: &str) -> Result<()> {
    if prefix.trim().is_empty() {
        anyhow::bail!("{name} must be non-empty");
    }
    if prefix.contains(['+', '#']) {
        anyhow::bail!("{name} must not contain MQTT wildcards");
    }
    if prefix.starts_with('/') || prefix.ends_with('/') {
        anyhow::bail!("{name} must not start or end with '/'");
    }
    if prefix.contains('\0') {
        anyhow::bail!("{name} must not contain NUL characters");
    }
    Ok(())
}
