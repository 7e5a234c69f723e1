use std::sync::Mutex;

use tempfile::NamedTempFile;

use watchdog_core::config::{OperatingMode, WatchdogConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "WATCHDOG_CONFIG",
        "WATCHDOG_DB_PATH",
        "WATCHDOG_DEVICE",
        "WATCHDOG_STORAGE_ROOT",
        "WATCHDOG_MODE",
        "WATCHDOG_FRAME_RATE",
        "WATCHDOG_RETENTION_THRESHOLD",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "watchdog_prod.db",
        "mode": "normal",
        "capture": {
            "device": "stub://garden",
            "frame_rate": 12.5,
            "width": 800,
            "height": 600
        },
        "encoding": {
            "bit_rate": 900000,
            "quality": 30,
            "codec": "h265",
            "format": "mp4"
        },
        "storage": {
            "root": "/var/lib/watchdog/feeds"
        },
        "processing": {
            "retention_threshold": 25,
            "voting_window": 7
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("WATCHDOG_CONFIG", file.path());
    std::env::set_var("WATCHDOG_MODE", "presence_aware");
    std::env::set_var("WATCHDOG_RETENTION_THRESHOLD", "60");

    let cfg = WatchdogConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.db_path, "watchdog_prod.db");
    assert_eq!(cfg.capture.device, "stub://garden");
    assert_eq!(cfg.capture.frame_rate, 12.5);
    assert_eq!(cfg.capture.width, 800);
    assert_eq!(cfg.encoding.bit_rate, 900_000);
    assert_eq!(cfg.encoding.quality, 30);
    assert_eq!(cfg.encoding.format, "mp4");
    assert_eq!(cfg.storage_root.to_str().unwrap(), "/var/lib/watchdog/feeds");
    assert_eq!(cfg.voting_window, 7);

    // env wins over the file
    assert_eq!(cfg.mode, OperatingMode::PresenceAware);
    assert_eq!(cfg.retention_threshold, 60);
}

#[test]
fn defaults_apply_without_a_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = WatchdogConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "watchdog.db");
    assert_eq!(cfg.mode, OperatingMode::PresenceAware);
    assert_eq!(cfg.capture.device, "stub://camera0");
    assert_eq!(cfg.capture.frame_rate, 5.0);
    assert_eq!(cfg.capture.width, 1280);
    assert_eq!(cfg.capture.height, 720);
    assert_eq!(cfg.encoding.bit_rate, 600_000);
    assert_eq!(cfg.encoding.quality, 40);
    assert_eq!(cfg.encoding.codec, "h264");
    assert_eq!(cfg.encoding.format, "mkv");
    assert_eq!(cfg.retention_threshold, 50);
    assert_eq!(cfg.voting_window, 10);
}

#[test]
fn invalid_quality_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "encoding": { "quality": 60 } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("WATCHDOG_CONFIG", file.path());

    let err = WatchdogConfig::load().unwrap_err();
    clear_env();
    assert!(err.to_string().contains("quality"));
}

#[test]
fn invalid_mode_env_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("WATCHDOG_MODE", "aggressive");
    let err = WatchdogConfig::load().unwrap_err();
    clear_env();
    assert!(err.to_string().contains("WATCHDOG_MODE"));
}
