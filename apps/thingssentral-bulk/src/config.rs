use crate::ntp::{TimeConfig, DEFAULT_NTP_SERVERS, MAX_NTP_SERVERS};
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: String,
    pub node_id: String,
    pub http_timeout: Option<Duration>,

    pub tz_offset_hours: i32,
    pub ntp_servers: Vec<String>,
    pub ntp_timeout: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url = env_string(&lookup, "THINGSSENTRAL_SERVER_URL", None)?;
        let parsed = Url::parse(&server_url).context("invalid THINGSSENTRAL_SERVER_URL")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("THINGSSENTRAL_SERVER_URL must be http or https");
        }
        if parsed.host_str().is_none() {
            bail!("THINGSSENTRAL_SERVER_URL missing host");
        }

        let node_id = env_string(&lookup, "THINGSSENTRAL_NODE_ID", None)?;
        if node_id.is_empty() {
            bail!("THINGSSENTRAL_NODE_ID must not be empty");
        }

        let http_timeout = env_optional(&lookup, "THINGSSENTRAL_HTTP_TIMEOUT_MS")
            .map(|raw| {
                raw.parse::<u64>()
                    .context("invalid THINGSSENTRAL_HTTP_TIMEOUT_MS")
            })
            .transpose()?
            .map(Duration::from_millis);

        let tz_offset_hours = match env_optional(&lookup, "THINGSSENTRAL_TZ_OFFSET_HOURS") {
            Some(raw) => raw
                .parse::<i32>()
                .context("invalid THINGSSENTRAL_TZ_OFFSET_HOURS")?,
            None => 0,
        };
        if !(-23..=23).contains(&tz_offset_hours) {
            bail!("THINGSSENTRAL_TZ_OFFSET_HOURS out of range: {tz_offset_hours}");
        }

        let ntp_servers = match env_optional(&lookup, "THINGSSENTRAL_NTP_SERVERS") {
            Some(raw) => {
                let servers: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .take(MAX_NTP_SERVERS)
                    .map(str::to_string)
                    .collect();
                if servers.is_empty() {
                    return Err(anyhow!("THINGSSENTRAL_NTP_SERVERS has no hostnames"));
                }
                servers
            }
            None => DEFAULT_NTP_SERVERS.iter().map(|s| s.to_string()).collect(),
        };

        let ntp_timeout = env_optional(&lookup, "THINGSSENTRAL_NTP_TIMEOUT_SECONDS")
            .map(|raw| {
                raw.parse::<u64>()
                    .context("invalid THINGSSENTRAL_NTP_TIMEOUT_SECONDS")
            })
            .transpose()?
            .map(Duration::from_secs);

        Ok(Self {
            server_url,
            node_id,
            http_timeout,
            tz_offset_hours,
            ntp_servers,
            ntp_timeout,
        })
    }

    pub fn time_config(&self) -> TimeConfig {
        TimeConfig {
            tz_offset_hours: self.tz_offset_hours,
            servers: self.ntp_servers.clone(),
            timeout: self.ntp_timeout,
            ..TimeConfig::default()
        }
    }
}

fn env_string<F>(lookup: &F, key: &str, default: Option<String>) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => Ok(value.trim().to_string()),
        None => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
