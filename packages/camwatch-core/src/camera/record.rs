//! Persisted camera record shape.

use super::{CameraBrand, CameraConfig, DEFAULT_CHANNEL, DEFAULT_PORT, DEFAULT_USERNAME};
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// A camera row as stored on disk.
///
/// Every field except `ip` may be missing. Numbers may be written as text
/// (`"554"`) and `channel` may be `null`. `rtsp_url` is written for
/// readers of the file but ignored on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraRecord {
    #[serde(default)]
    pub name: Option<String>,
    pub ip: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub brand: Option<CameraBrand>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub channel: Option<u32>,
    #[serde(default)]
    pub rtsp_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(u64),
    Text(String),
}

fn lenient_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let raw = match Option::<NumberOrText>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(NumberOrText::Number(n)) => n,
        Some(NumberOrText::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            text.parse::<u64>()
                .map_err(|_| D::Error::custom(format!("invalid number '{}'", text)))?
        }
    };
    T::try_from(raw)
        .map(Some)
        .map_err(|_| D::Error::custom(format!("number {} out of range", raw)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<CameraRecord> for CameraConfig {
    fn from(record: CameraRecord) -> Self {
        let brand = record.brand.unwrap_or_default();
        let name = non_empty(record.name)
            .unwrap_or_else(|| format!("{} Camera", brand.label()));

        CameraConfig {
            name,
            brand,
            ip: record.ip.trim().to_string(),
            port: record.port.unwrap_or(DEFAULT_PORT),
            username: non_empty(record.username).unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
            password: record.password.unwrap_or_default(),
            channel: record.channel.unwrap_or(DEFAULT_CHANNEL),
            location: non_empty(record.location),
            added_at: record.added_at,
        }
    }
}

impl From<CameraConfig> for CameraRecord {
    fn from(config: CameraConfig) -> Self {
        let rtsp_url = Some(config.stream_url());
        CameraRecord {
            name: Some(config.name),
            ip: config.ip,
            port: Some(config.port),
            username: Some(config.username),
            password: Some(config.password),
            brand: Some(config.brand),
            channel: Some(config.channel),
            rtsp_url,
            location: config.location,
            added_at: config.added_at,
        }
    }
}
