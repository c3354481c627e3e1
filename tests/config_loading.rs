use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use proctor_kernel::config::{ProctorConfig, StorageBackend};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PROCTOR_CONFIG",
        "PROCTOR_SOURCE_URL",
        "PROCTOR_DETECTION_FPS",
        "PROCTOR_COOLDOWN_MS",
        "PROCTOR_BREACH_RATIO",
        "PROCTOR_FACE_MODEL",
        "PROCTOR_OBJECT_MODEL",
        "PROCTOR_OBJECT_INPUT_SIZE",
        "PROCTOR_OBJECT_CLASSES",
        "PROCTOR_OBJECT_CONFIDENCE",
        "PROCTOR_OBJECT_FRAME_INTERVAL",
        "PROCTOR_STORAGE",
        "PROCTOR_DB_PATH",
        "PROCTOR_API_URL",
        "PROCTOR_API_TOKEN",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source_url": "stub://desk?width=320&height=240",
        "detection_fps": 6,
        "cooldown_ms": 2500,
        "flush_interval_ms": 500,
        "focus": {
            "looking_away_seconds": 3,
            "yaw_degrees": 25,
            "breach_ratio": 0.5
        },
        "objects": {
            "classes": ["phone", "book"],
            "confidence_threshold": 0.4,
            "inference_interval": 2
        },
        "storage": {
            "backend": "memory"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("PROCTOR_CONFIG", file.path());
    std::env::set_var("PROCTOR_COOLDOWN_MS", "1000");
    std::env::set_var("PROCTOR_OBJECT_CLASSES", "phone, laptop ,,");

    let cfg = ProctorConfig::load().expect("load config");

    assert_eq!(cfg.source_url, "stub://desk?width=320&height=240");
    assert_eq!(cfg.detection_fps, 6);
    assert_eq!(cfg.focus.sampling_fps, 6);
    assert_eq!(cfg.cooldown_ms, 1000);
    assert_eq!(cfg.flush_interval, Duration::from_millis(500));
    assert_eq!(cfg.focus.looking_away_ms(), 3000);
    assert_eq!(cfg.focus.yaw_degrees, 25.0);
    assert_eq!(cfg.focus.breach_ratio, 0.5);
    // Unset fields keep their defaults.
    assert_eq!(cfg.focus.no_face_seconds, 10.0);
    assert_eq!(cfg.objects.classes, vec!["phone", "laptop"]);
    assert_eq!(cfg.objects.confidence_threshold, 0.4);
    assert_eq!(cfg.objects.inference_interval, 2);
    assert_eq!(cfg.storage.backend, StorageBackend::Memory);

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
detection_fps = 4
thumbnail_max_width = 96

[face]
analysis_max_side = 320

[storage]
backend = "sqlite"
db_path = "/tmp/proctor-test.db"
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("PROCTOR_CONFIG", file.path());

    let cfg = ProctorConfig::load().expect("load config");
    assert_eq!(cfg.detection_fps, 4);
    assert_eq!(cfg.thumbnail_max_width, 96);
    assert_eq!(cfg.face.analysis_max_side, 320);
    assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
    assert_eq!(cfg.storage.db_path, "/tmp/proctor-test.db");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PROCTOR_DETECTION_FPS", "fast");
    assert!(ProctorConfig::load().is_err());
    clear_env();

    std::env::set_var("PROCTOR_OBJECT_CONFIDENCE", "1.5");
    assert!(ProctorConfig::load().is_err());
    clear_env();

    std::env::set_var("PROCTOR_COOLDOWN_MS", "-1");
    assert!(ProctorConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PROCTOR_CONFIG", "/nonexistent/proctor.json");
    let err = ProctorConfig::load().unwrap_err();
    assert!(format!("{:#}", err).contains("failed to read config file"));

    clear_env();
}

#[test]
fn misspelled_storage_backend_in_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"storage": {"backend": "sqlight"}}"#)
        .expect("write config");
    std::env::set_var("PROCTOR_CONFIG", file.path());
    let err = ProctorConfig::load().unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("invalid storage.backend"));
    assert!(message.contains("unknown storage backend 'sqlight'"));

    clear_env();
}
