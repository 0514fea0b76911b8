use std::io::Write;
use wa_gateway::config::{expand_tilde, load_config, resolve_config_path, Config};

#[test]
fn test_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 8002);
    assert_eq!(cfg.backend.webhook_path, "/api/whatsapp/webhook");
    assert_eq!(cfg.backend.request_timeout_seconds, 60);
    assert_eq!(cfg.sidecar.url, "http://127.0.0.1:4040");
    assert_eq!(cfg.dedup.ttl_seconds, 300);
    assert_eq!(cfg.dedup.sweep_interval_seconds, 60);
}

#[test]
fn test_expand_tilde() {
    let path = expand_tilde("~/x/y.json");
    assert!(path.to_string_lossy().ends_with("x/y.json"));
    assert_eq!(
        expand_tilde("/etc/wa-gateway.json"),
        std::path::PathBuf::from("/etc/wa-gateway.json")
    );
}

#[test]
fn test_round_trip_serialization() {
    let cfg = Config::default();
    let raw = serde_json::to_string(&cfg).unwrap();
    let parsed: Config = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.server.port, cfg.server.port);
    assert_eq!(parsed.backend.url, cfg.backend.url);
}

#[test]
fn test_partial_file_keeps_defaults() {
    let cfg: Config = serde_json::from_str(r#"{"backend": {"url": "https://api.example.com"}}"#)
        .expect("parse partial config");
    assert_eq!(cfg.backend.url, "https://api.example.com");
    assert_eq!(cfg.backend.webhook_path, "/api/whatsapp/webhook");
    assert_eq!(cfg.server.port, 8002);
}

// File loading and env overrides share process-wide environment variables, so
// they live in one test to avoid racing parallel test threads.
#[test]
fn test_load_config_file_and_env_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wa-gateway.json");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(
        file,
        r#"{{"server": {{"port": 9100}}, "backend": {{"url": "https://from-file.example.com"}}}}"#
    )
    .unwrap();

    std::env::set_var("WA_GATEWAY_CONFIG", &path);
    std::env::set_var("PORT", "9200");
    std::env::set_var("BACKEND_URL", "https://from-env.example.com");
    std::env::set_var("WA_GATEWAY_SIDECAR_URL", "http://sidecar:5050");

    assert_eq!(resolve_config_path(), path);
    let cfg = load_config();

    std::env::remove_var("WA_GATEWAY_CONFIG");
    std::env::remove_var("PORT");
    std::env::remove_var("BACKEND_URL");
    std::env::remove_var("WA_GATEWAY_SIDECAR_URL");

    assert_eq!(cfg.server.port, 9200);
    assert_eq!(cfg.backend.url, "https://from-env.example.com");
    assert_eq!(cfg.sidecar.url, "http://sidecar:5050");
    // Untouched sections keep file/default values.
    assert_eq!(cfg.backend.webhook_path, "/api/whatsapp/webhook");
}

#[test]
fn test_malformed_file_content_is_rejected() {
    assert!(serde_json::from_str::<Config>("{not json").is_err());
}
