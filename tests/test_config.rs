use std::collections::HashMap;
use std::time::Duration;

use hookline::config::{Config, ConfigError, DEFAULT_THREADS};

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}

#[test]
fn test_config_defaults() {
    let cfg = Config::default();

    assert_eq!(cfg.server.bind_addr, "0.0.0.0");
    assert_eq!(cfg.server.bind_port, 8081);
    assert!(!cfg.server.use_threads);
    assert_eq!(cfg.worker_threads(), None);
    assert_eq!(cfg.limits.max_header_bytes, 8192);
    assert_eq!(cfg.limits.max_body_bytes, 1024 * 1024);
    assert_eq!(cfg.read_timeout(), Duration::from_secs(60));
    assert_eq!(cfg.socket_addr().unwrap().to_string(), "0.0.0.0:8081");
}

#[test]
fn test_config_from_yaml() {
    let cfg = Config::from_yaml(
        r#"
server:
  bind_addr: "127.0.0.1"
  bind_port: 9000
  use_threads: true
  num_threads: 2
  server_name: "Hi there!"
limits:
  max_body_bytes: 64
"#,
    )
    .unwrap();

    assert_eq!(cfg.socket_addr().unwrap().to_string(), "127.0.0.1:9000");
    assert_eq!(cfg.worker_threads(), Some(2));
    assert_eq!(cfg.server.server_name.as_deref(), Some("Hi there!"));
    assert_eq!(cfg.limits.max_body_bytes, 64);
    // Unset fields keep their defaults.
    assert_eq!(cfg.limits.max_header_bytes, 8192);
}

#[test]
fn test_config_rejects_bad_yaml() {
    let result = Config::from_yaml("server:\n  bind_port: lots\n");

    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_config_env_overrides() {
    let mut cfg = Config::default();
    cfg.apply_env(env(&[("BIND_ADDR", "::1"), ("BIND_PORT", "3000"), ("THREADS", "3")]))
        .unwrap();

    assert_eq!(cfg.socket_addr().unwrap().to_string(), "[::1]:3000");
    assert_eq!(cfg.worker_threads(), Some(3));
}

#[test]
fn test_config_threads_zero_disables_pool() {
    let mut cfg = Config::from_yaml("server:\n  use_threads: true\n").unwrap();
    assert_eq!(cfg.worker_threads(), Some(DEFAULT_THREADS));

    cfg.apply_env(env(&[("THREADS", "0")])).unwrap();

    assert_eq!(cfg.worker_threads(), None);
}

#[test]
fn test_config_env_rejects_garbage() {
    let mut cfg = Config::default();

    let port = cfg.apply_env(env(&[("BIND_PORT", "eighty")]));
    let threads = cfg.apply_env(env(&[("THREADS", "-1")]));

    assert!(matches!(port, Err(ConfigError::InvalidEnv { var: "BIND_PORT", .. })));
    assert!(matches!(threads, Err(ConfigError::InvalidEnv { var: "THREADS", .. })));
}

#[test]
fn test_config_validation() {
    let mut cfg = Config::default();

    cfg.server.bind_addr = "localhost".to_string();
    assert!(matches!(cfg.validate(), Err(ConfigError::InvalidAddress(_))));

    cfg.server.bind_addr = "127.0.0.1".to_string();
    cfg.server.bind_port = 0;
    assert!(matches!(cfg.validate(), Err(ConfigError::InvalidPort(0))));

    cfg.server.bind_port = 70000;
    assert!(matches!(cfg.validate(), Err(ConfigError::InvalidPort(70000))));

    cfg.server.bind_port = 65535;
    assert!(cfg.validate().is_ok());

    cfg.server.read_timeout_secs = 0;
    assert!(matches!(cfg.validate(), Err(ConfigError::ZeroTimeout)));
}

#[test]
fn test_config_missing_file() {
    let result = Config::from_file("/nonexistent/hookline.yaml");

    assert!(matches!(result, Err(ConfigError::Read { .. })));
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::default();
    let cfg2 = cfg1.clone();

    assert_eq!(cfg1.server.bind_port, cfg2.server.bind_port);
}
