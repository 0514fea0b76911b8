use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub sidecar: SidecarConfig,
    pub dedup: DedupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8002,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub webhook_path: String,
    pub request_timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8001".to_string(),
            webhook_path: "/api/whatsapp/webhook".to_string(),
            request_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub url: String,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:4040".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            sweep_interval_seconds: 60,
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn resolve_config_path() -> PathBuf {
    env::var("WA_GATEWAY_CONFIG")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde("~/.wa-gateway/wa-gateway.json"))
}

pub fn load_config() -> Config {
    let config_path = resolve_config_path();

    let mut cfg = Config::default();

    if config_path.exists() {
        if let Ok(raw) = fs::read_to_string(&config_path) {
            if let Ok(file_cfg) = serde_json::from_str::<Config>(&raw) {
                cfg = file_cfg;
            }
        }
    }

    // Override from environment
    if let Ok(port) = env::var("PORT") {
        if let Ok(port) = port.trim().parse::<u16>() {
            cfg.server.port = port;
        }
    }

    if let Ok(url) = env::var("BACKEND_URL") {
        if !url.trim().is_empty() {
            cfg.backend.url = url.trim().to_string();
        }
    }

    if let Ok(url) = env::var("WA_GATEWAY_SIDECAR_URL") {
        if !url.trim().is_empty() {
            cfg.sidecar.url = url.trim().to_string();
        }
    }

    cfg
}
