use std::io::Write;

use tw_core::config::{join_url, Config, ConfigError, URL_ENV};

#[test]
fn default_config() {
    let cfg = Config::default();
    assert_eq!(cfg.daemon.base_url, "http://127.0.0.1:3001");
    assert_eq!(cfg.stream.reconnect_initial_ms, 1_000);
    assert_eq!(cfg.stream.reconnect_max_ms, 16_000);
    assert_eq!(cfg.logging.level, "info");
    assert!(!cfg.logging.json);
    cfg.validate().expect("defaults validate");
}

#[test]
fn config_roundtrip() {
    let cfg = Config::default();
    let toml_str = cfg.to_toml().expect("serialize to toml");
    assert!(toml_str.contains("127.0.0.1:3001"));

    let parsed: Config = toml::from_str(&toml_str).expect("parse toml back");
    assert_eq!(parsed.daemon.base_url, cfg.daemon.base_url);
    assert_eq!(parsed.stream.reconnect_max_ms, cfg.stream.reconnect_max_ms);
    parsed.validate().expect("config validates");
}

#[test]
fn config_partial_toml() {
    let partial = r#"
[daemon]
base_url = "http://10.0.0.5:4000/"

[logging]
json = true
"#;
    let cfg: Config = toml::from_str(partial).expect("parse partial");
    assert_eq!(cfg.daemon.base_url, "http://10.0.0.5:4000/");
    assert!(cfg.logging.json);
    // defaults should fill in the rest
    assert_eq!(cfg.logging.level, "info");
    assert_eq!(cfg.stream.reconnect_initial_ms, 1_000);
    assert_eq!(cfg.daemon.url("/v1/events"), "http://10.0.0.5:4000/v1/events");
}

#[test]
fn load_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        "[stream]\nreconnect_initial_ms = 250\nreconnect_max_ms = 2000"
    )
    .expect("write config");

    let cfg = Config::load_from(file.path()).expect("load");
    assert_eq!(cfg.stream.reconnect_initial_ms, 250);
    assert_eq!(cfg.stream.reconnect_max_ms, 2_000);
}

#[test]
fn load_from_missing_file_is_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = Config::load_from(dir.path().join("absent.toml")).expect_err("should fail");
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn malformed_toml_is_parse_error() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "[daemon\nbase_url = ").expect("write config");
    let err = Config::load_from(file.path()).expect_err("should fail");
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn inverted_backoff_fails_validation() {
    let mut cfg = Config::default();
    cfg.stream.reconnect_initial_ms = 5_000;
    cfg.stream.reconnect_max_ms = 1_000;
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("reconnect_max_ms"));
}

#[test]
fn zero_initial_backoff_fails_validation() {
    let mut cfg = Config::default();
    cfg.stream.reconnect_initial_ms = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn non_http_url_fails_validation() {
    let mut cfg = Config::default();
    cfg.daemon.base_url = "ftp://example.com".into();
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("base_url"));

    cfg.daemon.base_url = "  ".into();
    assert!(cfg.validate().is_err());
}

#[test]
fn env_overrides_base_url() {
    let mut cfg = Config::default();
    cfg.apply_env(|key| (key == URL_ENV).then(|| " http://daemon:9000 ".to_string()));
    assert_eq!(cfg.daemon.base_url, "http://daemon:9000");

    // Empty values are ignored.
    cfg.apply_env(|_| Some(String::new()));
    assert_eq!(cfg.daemon.base_url, "http://daemon:9000");
}

#[test]
fn join_url_never_doubles_slashes() {
    assert_eq!(join_url("http://h/", "/v1/task"), "http://h/v1/task");
    assert_eq!(join_url("http://h", "v1/task"), "http://h/v1/task");
}
