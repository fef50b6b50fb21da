//! Environment-driven configuration.
//!
//! The catalog fallback endpoints ship inside the binary as base64-encoded
//! URLs; a `SQUID_URL` override is prepended when it differs from the
//! default head, so the operator's endpoint is tried first.

use std::env;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;
use tracing::info;

const DEFAULT_GATEWAY_URL: &str = "https://triton.squid.wtf";

/// Embedded fallback endpoints, base64-encoded.
const ENCODED_GATEWAY_URLS: &[&str] = &[
    "aHR0cHM6Ly90cml0b24uc3F1aWQud3Rm",
    "aHR0cHM6Ly90aWRhbC5raW5vcGx1cy5vbmxpbmU=",
    "aHR0cHM6Ly90aWRhbC1hcGkuYmluaW11bS5vcmc=",
    "aHR0cHM6Ly9tb25vY2hyb21lLWFwaS5zYW1pZHkuY29t",
    "aHR0cHM6Ly9oaWZpLW9uZS5zcG90aXNhdmVyLm5ldA==",
    "aHR0cHM6Ly9oaWZpLXR3by5zcG90aXNhdmVyLm5ldA==",
    "aHR0cHM6Ly93b2xmLnFxZGwuc2l0ZQ==",
    "aHR0cDovL2h1bmQucXFkbC5zaXRl",
    "aHR0cHM6Ly9tYXVzLnFxZGwuc2l0ZQ==",
    "aHR0cHM6Ly92b2dlbC5xcWRsLnNpdGU=",
    "aHR0cHM6Ly9rYXR6ZS5xcWRsLnNpdGU=",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Target format for synced tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFormat {
    Opus,
    Mp3,
    Aac,
}

impl DownloadFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "opus" => Some(Self::Opus),
            "mp3" => Some(Self::Mp3),
            "aac" => Some(Self::Aac),
            _ => None,
        }
    }

    /// File extension of the published file.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
        }
    }

    /// ffmpeg audio codec name.
    pub fn codec(self) -> &'static str {
        match self {
            Self::Opus => "libopus",
            Self::Mp3 => "libmp3lame",
            Self::Aac => "aac",
        }
    }

    /// ffmpeg container format, needed because the transcoder writes to a
    /// `.tmp` path ffmpeg cannot infer the format from.
    pub fn container(self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Mp3 => "mp3",
            Self::Aac => "adts",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Base URL of the Subsonic library being fronted.
    pub library_url: String,
    /// Catalog endpoints in fallback order.
    pub gateway_urls: Vec<String>,
    pub music_folder: PathBuf,
    pub download_format: DownloadFormat,
    pub search_limit: usize,
    pub redis_addr: String,
}

fn env_or(name: &str, fallback: &str) -> String {
    env::var(name).unwrap_or_else(|_| fallback.to_string())
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let library_url = env::var("NAVIDROME_URL")
            .or_else(|_| env::var("UPSTREAM_URL"))
            .or_else(|_| env::var("SUBSONIC_URL"))
            .unwrap_or_else(|_| "http://navidrome:4533".to_string());

        let primary = env_or("SQUID_URL", DEFAULT_GATEWAY_URL);
        let gateway_urls = gateway_urls_with_primary(&primary);

        let port_raw = env_or("PORT", "8080");
        let port = port_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "PORT",
            value: port_raw,
        })?;

        let format_raw = env_or("DOWNLOAD_FORMAT", "opus");
        let download_format =
            DownloadFormat::parse(&format_raw).ok_or_else(|| ConfigError::Invalid {
                name: "DOWNLOAD_FORMAT",
                value: format_raw,
            })?;

        let search_limit = env::var("SEARCH_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);

        let config = Self {
            port,
            library_url: library_url.trim_end_matches('/').to_string(),
            gateway_urls,
            music_folder: PathBuf::from(env_or("MUSIC_FOLDER", "/music")),
            download_format,
            search_limit,
            redis_addr: env_or("REDIS_ADDR", "localhost:6379"),
        };

        info!(
            endpoints = config.gateway_urls.len(),
            redis = %config.redis_addr,
            "configuration loaded"
        );
        Ok(config)
    }
}

/// Decode the embedded endpoint list, prepending `primary` when it is not
/// already the default head.
fn gateway_urls_with_primary(primary: &str) -> Vec<String> {
    let mut urls: Vec<String> = ENCODED_GATEWAY_URLS
        .iter()
        .filter_map(|encoded| BASE64.decode(encoded).ok())
        .filter_map(|bytes| String::from_utf8(bytes).ok())
        .collect();

    if !primary.is_empty() && primary != DEFAULT_GATEWAY_URL {
        urls.insert(0, primary.to_string());
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_urls_decode() {
        let urls = gateway_urls_with_primary(DEFAULT_GATEWAY_URL);
        assert_eq!(urls.len(), ENCODED_GATEWAY_URLS.len());
        assert_eq!(urls[0], DEFAULT_GATEWAY_URL);
        assert!(urls.iter().all(|u| u.starts_with("http")));
    }

    #[test]
    fn custom_primary_is_prepended_once() {
        let urls = gateway_urls_with_primary("https://gateway.example.org");
        assert_eq!(urls[0], "https://gateway.example.org");
        assert_eq!(urls.len(), ENCODED_GATEWAY_URLS.len() + 1);

        // The default head must not be duplicated.
        let urls = gateway_urls_with_primary(DEFAULT_GATEWAY_URL);
        assert_eq!(
            urls.iter().filter(|u| *u == DEFAULT_GATEWAY_URL).count(),
            1
        );
    }

    #[test]
    fn download_format_parsing() {
        assert_eq!(DownloadFormat::parse("opus"), Some(DownloadFormat::Opus));
        assert_eq!(DownloadFormat::parse("mp3"), Some(DownloadFormat::Mp3));
        assert_eq!(DownloadFormat::parse("aac"), Some(DownloadFormat::Aac));
        assert_eq!(DownloadFormat::parse("flac"), None);
        assert_eq!(DownloadFormat::Aac.container(), "adts");
        assert_eq!(DownloadFormat::Opus.codec(), "libopus");
    }
}
