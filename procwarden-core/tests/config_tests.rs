use procwarden_core::config::{Config, DEFAULT_LOG_BYTES};
use procwarden_core::{Error, StopStrategy};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

const SAMPLE: &str = r#"{
    "daemon": {
        "mode": "prod",
        "root_dir": "/opt/app",
        "log_dir": "var/log",
        "log_max_bytes": 2097152,
        "log_max_files": 3,
        "print": true,
        "respawn_interval_ms": 100,
        "pidfile_poll_attempts": 4,
        "pidfile_poll_interval_ms": 50
    },
    "services": [
        {
            "name": "api",
            "start": { "execute": "bin/api --port 80" },
            "stop": { "execute": "__console__", "arguments": ["quit"] },
            "success_flag": "listening"
        },
        {
            "name": "worker",
            "start": { "execute": "bin/worker" },
            "pidfile": "run/worker.pid",
            "mode": "batch",
            "disabled": true
        }
    ]
}"#;

#[tokio::test]
async fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("procwarden.json");
    tokio::fs::write(&path, SAMPLE).await.unwrap();

    let config = Config::load(&path).await.unwrap();

    assert_eq!(config.daemon.mode, "prod");
    assert_eq!(config.daemon.log_path(), PathBuf::from("/opt/app/var/log"));
    assert_eq!(config.daemon.log_max_bytes, 2 * 1024 * 1024);
    assert_eq!(config.daemon.log_max_files, 3);
    assert!(config.daemon.print);
    assert_eq!(config.daemon.respawn_interval, Duration::from_millis(100));
    assert_eq!(config.daemon.pidfile_poll_attempts, 4);
    assert_eq!(config.daemon.liveness_interval, Duration::from_secs(60));

    assert_eq!(config.services.len(), 2);
    let api = &config.services[0];
    assert_eq!(api.start.argv(), ("bin/api".to_string(), vec!["--port".to_string(), "80".to_string()]));
    assert_eq!(api.stop.as_ref().unwrap().strategy(), StopStrategy::Console);

    let worker = &config.services[1];
    assert_eq!(worker.pidfile, Some(PathBuf::from("/opt/app/run/worker.pid")));
    assert_eq!(worker.mode, "batch");
    assert!(worker.disabled);
}

#[tokio::test]
async fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let result = Config::load(dir.path().join("absent.json")).await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_malformed_json() {
    let result = Config::parse("{ services: [ }");
    match result {
        Err(Error::Config(msg)) => assert!(msg.contains("Failed to parse config")),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_small_log_limits_are_raised() {
    let config = Config::parse(r#"{ "daemon": { "log_max_bytes": 1024, "log_max_files": 0 } }"#).unwrap();
    assert_eq!(config.daemon.log_max_bytes, DEFAULT_LOG_BYTES);
    assert_eq!(config.daemon.log_max_files, 5);
    assert!(config.services.is_empty());
}

#[test]
fn test_console_stop_allowed_without_pidfile() {
    let config = Config::parse(
        r#"{ "services": [ { "name": "a", "start": { "execute": "x" },
             "stop": { "execute": "__console__", "arguments": ["exit"] } } ] }"#,
    );
    assert!(config.is_ok());
}
