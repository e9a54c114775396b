// src/config.rs
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::info;

use crate::drivers::Retention;
use crate::settings::Settings;
use crate::types::{Channel, ConnectionMode};

pub const KEY_LOG_PATH: &str = "log_path";
pub const KEY_LOG_INTERVAL: &str = "log_interval_secs";
pub const KEY_FILE_SIZE_LIMIT: &str = "file_size_limit_mb";
pub const KEY_LOGGING_ENABLED: &str = "logging_enabled";
pub const KEY_RENDER_TICK: &str = "render_tick_ms";
pub const KEY_CHANNELS: &str = "channels";
pub const KEY_CONNECTION: &str = "connection";
pub const KEY_POLL_TIMEOUT: &str = "poll_timeout_ms";
pub const KEY_BUFFER_CAPACITY: &str = "buffer_capacity";

/// Everything a session needs, resolved from the settings store.
#[derive(Clone, Debug, PartialEq)]
pub struct BenchConfig {
    pub log_path: PathBuf,
    pub log_interval: Duration,
    pub file_size_limit_mb: f64,
    pub logging_enabled: bool,
    pub render_tick: Duration,
    pub channels: Vec<Channel>,
    pub connection: ConnectionMode,
    pub poll_timeout: Duration,
    pub retention: Retention,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("logs"),
            log_interval: Duration::from_secs(1),
            file_size_limit_mb: 15.0,
            logging_enabled: true,
            render_tick: Duration::from_millis(25),
            channels: vec![Channel::A, Channel::B, Channel::C],
            connection: ConnectionMode::Hardware,
            poll_timeout: Duration::from_millis(1000),
            retention: Retention::Unbounded,
        }
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("invalid value '{raw}' for setting '{key}'"))
}

pub fn parse_channels(raw: &str) -> Result<Vec<Channel>> {
    let mut channels = Vec::new();
    for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let channel: Channel = parse(KEY_CHANNELS, part)?;
        if channels.contains(&channel) {
            bail!("channel {} listed twice in '{raw}'", channel.letter());
        }
        channels.push(channel);
    }
    if channels.is_empty() {
        bail!("setting '{KEY_CHANNELS}' names no channel");
    }
    Ok(channels)
}

fn format_channels(channels: &[Channel]) -> String {
    channels
        .iter()
        .map(|c| c.letter())
        .collect::<Vec<_>>()
        .join(",")
}

impl BenchConfig {
    /// Reads every key, writing the default for keys seen for the first time.
    pub fn load(settings: &Settings) -> Result<Self> {
        let d = Self::default();
        if !settings.contains(KEY_LOG_PATH)? {
            info!("no stored settings in {}, writing defaults", settings.path().display());
        }
        let get = |key: &str, default: String| settings.get_or_insert(key, &default);

        let log_path = PathBuf::from(get(KEY_LOG_PATH, d.log_path.display().to_string())?);
        let interval: f64 = parse(
            KEY_LOG_INTERVAL,
            &get(KEY_LOG_INTERVAL, d.log_interval.as_secs_f64().to_string())?,
        )?;
        if !interval.is_finite() || interval < 0.0 {
            bail!("setting '{KEY_LOG_INTERVAL}' must be a non-negative number of seconds");
        }
        let file_size_limit_mb: f64 = parse(
            KEY_FILE_SIZE_LIMIT,
            &get(KEY_FILE_SIZE_LIMIT, d.file_size_limit_mb.to_string())?,
        )?;
        if !file_size_limit_mb.is_finite() || file_size_limit_mb < 0.0 {
            bail!("setting '{KEY_FILE_SIZE_LIMIT}' must be a non-negative number of megabytes");
        }
        let logging_enabled: bool = parse(
            KEY_LOGGING_ENABLED,
            &get(KEY_LOGGING_ENABLED, d.logging_enabled.to_string())?.to_ascii_lowercase(),
        )?;
        let render_tick_ms: u64 = parse(
            KEY_RENDER_TICK,
            &get(KEY_RENDER_TICK, d.render_tick.as_millis().to_string())?,
        )?;
        let channels = parse_channels(&get(KEY_CHANNELS, format_channels(&d.channels))?)?;
        let connection: ConnectionMode =
            parse(KEY_CONNECTION, &get(KEY_CONNECTION, d.connection.to_string())?)?;
        let poll_timeout_ms: u64 = parse(
            KEY_POLL_TIMEOUT,
            &get(KEY_POLL_TIMEOUT, d.poll_timeout.as_millis().to_string())?,
        )?;
        let capacity: usize = parse(KEY_BUFFER_CAPACITY, &get(KEY_BUFFER_CAPACITY, "0".into())?)?;

        Ok(Self {
            log_path,
            log_interval: Duration::from_secs_f64(interval),
            file_size_limit_mb,
            logging_enabled,
            render_tick: Duration::from_millis(render_tick_ms.max(1)),
            channels,
            connection,
            poll_timeout: Duration::from_millis(poll_timeout_ms),
            retention: Retention::from_capacity(capacity),
        })
    }
}
