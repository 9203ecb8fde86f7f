//! Process configuration, loaded once at startup and passed explicitly.

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use ipnet::IpNet;
use serde::Deserialize;
use std::collections::HashMap;

fn default_port() -> u16 {
    8088
}

fn default_base_path() -> String {
    "/files/".to_owned()
}

fn default_max_upload_size() -> u64 {
    // 10 MiB
    10 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_shutdown_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base path uploads are served under; a plain path or a full URL.
    #[serde(default = "default_base_path")]
    pub base_path: String,
    pub database_url: String,
    /// Reverse proxy ranges whose forwarded-address claims are honored.
    #[serde(default)]
    pub trusted_proxy_ranges: Vec<IpNet>,
    /// Issuer identifier to shared HMAC secret, for bearer-claim verification.
    #[serde(default)]
    pub jwt_secrets_by_issuer: HashMap<String, String>,
    /// Exact-match CORS origin allow-list. `*` is not supported.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum declared upload length in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seconds to let in-flight requests drain on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Config {
    /// Merge `parcel.toml` (if present) with `PARCEL_`-prefixed environment
    /// variables; the environment wins.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("parcel.toml"))
            .merge(Env::prefixed("PARCEL_"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = figment::Figment::new()
            .merge(figment::providers::Serialized::defaults(
                serde_json::json!({"database_url": "postgres://localhost/parcel"}),
            ))
            .extract()
            .unwrap();
        assert_eq!(config.port, 8088);
        assert_eq!(config.base_path, "/files/");
        assert_eq!(config.max_upload_size, 10 * 1024 * 1024);
        assert!(config.trusted_proxy_ranges.is_empty());
    }

    #[test]
    fn trusted_ranges_parse_as_cidr() {
        let config: Config = figment::Figment::new()
            .merge(figment::providers::Serialized::defaults(serde_json::json!({
                "database_url": "postgres://localhost/parcel",
                "trusted_proxy_ranges": ["10.0.0.0/8", "2001:db8::/32"],
                "jwt_secrets_by_issuer": {"irc.example.com": "hunter2"},
            })))
            .extract()
            .unwrap();
        assert_eq!(config.trusted_proxy_ranges.len(), 2);
        assert_eq!(
            config.jwt_secrets_by_issuer.get("irc.example.com").unwrap(),
            "hunter2"
        );
    }
}
