use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_DB_PATH: &str = "proctor.db";
const DEFAULT_DETECTION_FPS: u32 = 8;
const DEFAULT_COOLDOWN_MS: i64 = 1500;
const DEFAULT_LOOKING_AWAY_SECS: f64 = 5.0;
const DEFAULT_NO_FACE_SECS: f64 = 10.0;
const DEFAULT_MULTIPLE_FACES_SECS: f64 = 2.0;
const DEFAULT_YAW_DEGREES: f64 = 20.0;
const DEFAULT_PITCH_DEGREES: f64 = 15.0;
const DEFAULT_BREACH_RATIO: f64 = 0.7;
const DEFAULT_CONFIDENCE: f32 = 0.6;
const DEFAULT_NMS_IOU: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 256;
const DEFAULT_INFERENCE_INTERVAL: u32 = 3;
const DEFAULT_FACE_CAPTURE_SIDE: u32 = 360;
const DEFAULT_FACE_ANALYSIS_SIDE: u32 = 480;
const DEFAULT_OBJECT_CAPTURE_SIDE: u32 = 640;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 2000;
const DEFAULT_THUMBNAIL_WIDTH: u32 = 160;
const DEFAULT_CLASSES: [&str; 7] = [
    "phone", "book", "notebook", "paper", "laptop", "keyboard", "monitor",
];

#[derive(Debug, Deserialize, Default)]
struct ProctorConfigFile {
    source_url: Option<String>,
    detection_fps: Option<u32>,
    cooldown_ms: Option<i64>,
    flush_interval_ms: Option<u64>,
    thumbnail_max_width: Option<u32>,
    focus: Option<FocusConfigFile>,
    face: Option<FaceConfigFile>,
    objects: Option<ObjectConfigFile>,
    storage: Option<StorageConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct FocusConfigFile {
    looking_away_seconds: Option<f64>,
    no_face_seconds: Option<f64>,
    multiple_faces_seconds: Option<f64>,
    yaw_degrees: Option<f64>,
    pitch_degrees: Option<f64>,
    breach_ratio: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct FaceConfigFile {
    model_path: Option<PathBuf>,
    capture_max_side: Option<u32>,
    analysis_max_side: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ObjectConfigFile {
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    classes: Option<Vec<String>>,
    confidence_threshold: Option<f32>,
    nms_iou: Option<f32>,
    inference_interval: Option<u32>,
    capture_max_side: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    backend: Option<String>,
    db_path: Option<String>,
    api_url: Option<String>,
    api_token: Option<String>,
}

/// Session-wide configuration, built once at startup and passed down.
#[derive(Debug, Clone)]
pub struct ProctorConfig {
    pub source_url: String,
    pub detection_fps: u32,
    pub cooldown_ms: i64,
    pub flush_interval: Duration,
    pub thumbnail_max_width: u32,
    pub focus: FocusThresholds,
    pub face: FaceSettings,
    pub objects: ObjectSettings,
    pub storage: StorageSettings,
}

/// Thresholds driving the face-pose state machine. Immutable for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct FocusThresholds {
    pub looking_away_seconds: f64,
    pub no_face_seconds: f64,
    pub multiple_faces_seconds: f64,
    pub yaw_degrees: f64,
    pub pitch_degrees: f64,
    pub sampling_fps: u32,
    pub breach_ratio: f64,
}

impl Default for FocusThresholds {
    fn default() -> Self {
        Self {
            looking_away_seconds: DEFAULT_LOOKING_AWAY_SECS,
            no_face_seconds: DEFAULT_NO_FACE_SECS,
            multiple_faces_seconds: DEFAULT_MULTIPLE_FACES_SECS,
            yaw_degrees: DEFAULT_YAW_DEGREES,
            pitch_degrees: DEFAULT_PITCH_DEGREES,
            sampling_fps: DEFAULT_DETECTION_FPS,
            breach_ratio: DEFAULT_BREACH_RATIO,
        }
    }
}

impl FocusThresholds {
    pub fn looking_away_ms(&self) -> i64 {
        (self.looking_away_seconds * 1000.0) as i64
    }

    pub fn no_face_ms(&self) -> i64 {
        (self.no_face_seconds * 1000.0) as i64
    }

    pub fn multiple_faces_ms(&self) -> i64 {
        (self.multiple_faces_seconds * 1000.0) as i64
    }
}

#[derive(Debug, Clone)]
pub struct FaceSettings {
    /// Landmark model; the stub model is used when unset.
    pub model_path: Option<PathBuf>,
    pub capture_max_side: u32,
    pub analysis_max_side: u32,
}

#[derive(Debug, Clone)]
pub struct ObjectSettings {
    /// Detection model; the stub model is used when unset.
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub classes: Vec<String>,
    pub confidence_threshold: f32,
    pub nms_iou: f32,
    pub inference_interval: u32,
    pub capture_max_side: u32,
}

impl Default for ObjectSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            classes: DEFAULT_CLASSES.iter().map(|c| c.to_string()).collect(),
            confidence_threshold: DEFAULT_CONFIDENCE,
            nms_iou: DEFAULT_NMS_IOU,
            inference_interval: DEFAULT_INFERENCE_INTERVAL,
            capture_max_side: DEFAULT_OBJECT_CAPTURE_SIDE,
        }
    }
}

impl ObjectSettings {
    /// Minimum spacing between object inferences, in milliseconds.
    pub fn frame_interval_ms(&self, detection_fps: u32) -> f64 {
        let fps = detection_fps.max(1) as f64;
        (1000.0 / fps) * self.inference_interval.max(1) as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sqlite,
    Http,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "sqlite" => Ok(StorageBackend::Sqlite),
            "http" => Ok(StorageBackend::Http),
            other => Err(anyhow!("unknown storage backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub db_path: String,
    pub api_url: Option<String>,
    pub api_token: Option<String>,
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self::from_file(ProctorConfigFile::default())
    }
}

impl ProctorConfig {
    /// Load from `PROCTOR_CONFIG` (JSON, or TOML by extension), then apply
    /// `PROCTOR_*` overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PROCTOR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let file_cfg = file_cfg.unwrap_or_default();
        let backend = file_cfg
            .storage
            .as_ref()
            .and_then(|s| s.backend.as_deref())
            .map(str::parse::<StorageBackend>)
            .transpose()
            .with_context(|| {
                format!(
                    "invalid storage.backend in {}",
                    config_path.as_deref().unwrap_or_default()
                )
            })?;
        let mut cfg = Self::from_file(file_cfg);
        if let Some(backend) = backend {
            cfg.storage.backend = backend;
        }
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ProctorConfigFile) -> Self {
        let detection_fps = file.detection_fps.unwrap_or(DEFAULT_DETECTION_FPS);
        let focus_file = file.focus.unwrap_or_default();
        let focus = FocusThresholds {
            looking_away_seconds: focus_file
                .looking_away_seconds
                .unwrap_or(DEFAULT_LOOKING_AWAY_SECS),
            no_face_seconds: focus_file.no_face_seconds.unwrap_or(DEFAULT_NO_FACE_SECS),
            multiple_faces_seconds: focus_file
                .multiple_faces_seconds
                .unwrap_or(DEFAULT_MULTIPLE_FACES_SECS),
            yaw_degrees: focus_file.yaw_degrees.unwrap_or(DEFAULT_YAW_DEGREES),
            pitch_degrees: focus_file.pitch_degrees.unwrap_or(DEFAULT_PITCH_DEGREES),
            sampling_fps: detection_fps,
            breach_ratio: focus_file.breach_ratio.unwrap_or(DEFAULT_BREACH_RATIO),
        };
        let face_file = file.face.unwrap_or_default();
        let face = FaceSettings {
            model_path: face_file.model_path,
            capture_max_side: face_file
                .capture_max_side
                .unwrap_or(DEFAULT_FACE_CAPTURE_SIDE),
            analysis_max_side: face_file
                .analysis_max_side
                .unwrap_or(DEFAULT_FACE_ANALYSIS_SIDE),
        };
        let defaults = ObjectSettings::default();
        let objects_file = file.objects.unwrap_or_default();
        let objects = ObjectSettings {
            model_path: objects_file.model_path,
            input_size: objects_file.input_size.unwrap_or(defaults.input_size),
            classes: objects_file.classes.unwrap_or(defaults.classes),
            confidence_threshold: objects_file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            nms_iou: objects_file.nms_iou.unwrap_or(defaults.nms_iou),
            inference_interval: objects_file
                .inference_interval
                .unwrap_or(defaults.inference_interval),
            capture_max_side: objects_file
                .capture_max_side
                .unwrap_or(defaults.capture_max_side),
        };
        let storage_file = file.storage.unwrap_or_default();
        let storage = StorageSettings {
            // The file's backend name is parsed by `load`.
            backend: StorageBackend::Sqlite,
            db_path: storage_file
                .db_path
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            api_url: storage_file.api_url,
            api_token: storage_file.api_token,
        };
        Self {
            source_url: file
                .source_url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            detection_fps,
            cooldown_ms: file.cooldown_ms.unwrap_or(DEFAULT_COOLDOWN_MS),
            flush_interval: Duration::from_millis(
                file.flush_interval_ms.unwrap_or(DEFAULT_FLUSH_INTERVAL_MS),
            ),
            thumbnail_max_width: file.thumbnail_max_width.unwrap_or(DEFAULT_THUMBNAIL_WIDTH),
            focus,
            face,
            objects,
            storage,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_string("PROCTOR_SOURCE_URL") {
            self.source_url = url;
        }
        if let Some(fps) = env_parse::<u32>("PROCTOR_DETECTION_FPS")? {
            self.detection_fps = fps;
            self.focus.sampling_fps = fps;
        }
        if let Some(cooldown) = env_parse::<i64>("PROCTOR_COOLDOWN_MS")? {
            self.cooldown_ms = cooldown;
        }
        if let Some(ratio) = env_parse::<f64>("PROCTOR_BREACH_RATIO")? {
            self.focus.breach_ratio = ratio;
        }
        if let Some(path) = env_string("PROCTOR_FACE_MODEL") {
            self.face.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_string("PROCTOR_OBJECT_MODEL") {
            self.objects.model_path = Some(PathBuf::from(path));
        }
        if let Some(size) = env_parse::<u32>("PROCTOR_OBJECT_INPUT_SIZE")? {
            self.objects.input_size = size;
        }
        if let Some(classes) = env_string("PROCTOR_OBJECT_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.objects.classes = parsed;
            }
        }
        if let Some(conf) = env_parse::<f32>("PROCTOR_OBJECT_CONFIDENCE")? {
            self.objects.confidence_threshold = conf;
        }
        if let Some(interval) = env_parse::<u32>("PROCTOR_OBJECT_FRAME_INTERVAL")? {
            self.objects.inference_interval = interval;
        }
        if let Some(backend) = env_string("PROCTOR_STORAGE") {
            self.storage.backend = backend.parse()?;
        }
        if let Some(path) = env_string("PROCTOR_DB_PATH") {
            self.storage.db_path = path;
        }
        if let Some(url) = env_string("PROCTOR_API_URL") {
            self.storage.api_url = Some(url);
        }
        if let Some(token) = env_string("PROCTOR_API_TOKEN") {
            self.storage.api_token = Some(token);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.detection_fps == 0 {
            return Err(anyhow!("detection_fps must be greater than zero"));
        }
        if self.cooldown_ms < 0 {
            return Err(anyhow!("cooldown_ms must not be negative"));
        }
        if self.flush_interval.is_zero() {
            return Err(anyhow!("flush_interval_ms must be greater than zero"));
        }
        let focus = &mut self.focus;
        for (name, value) in [
            ("looking_away_seconds", focus.looking_away_seconds),
            ("no_face_seconds", focus.no_face_seconds),
            ("multiple_faces_seconds", focus.multiple_faces_seconds),
            ("yaw_degrees", focus.yaw_degrees),
            ("pitch_degrees", focus.pitch_degrees),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(anyhow!("focus.{} must be a positive number", name));
            }
        }
        if focus.breach_ratio.is_nan() {
            return Err(anyhow!("focus.breach_ratio must be a number"));
        }
        focus.breach_ratio = focus.breach_ratio.clamp(0.0, 1.0);

        let objects = &mut self.objects;
        if objects.input_size < 32 {
            return Err(anyhow!("objects.input_size must be at least 32"));
        }
        if !(0.0..=1.0).contains(&objects.confidence_threshold) {
            return Err(anyhow!("objects.confidence_threshold must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&objects.nms_iou) {
            return Err(anyhow!("objects.nms_iou must be within [0, 1]"));
        }
        if objects.classes.is_empty() {
            return Err(anyhow!("objects.classes must not be empty"));
        }
        objects.inference_interval = objects.inference_interval.max(1);

        if self.face.capture_max_side == 0
            || self.face.analysis_max_side == 0
            || objects.capture_max_side == 0
        {
            return Err(anyhow!("capture sizes must be greater than zero"));
        }
        if self.storage.backend == StorageBackend::Http && self.storage.api_url.is_none() {
            return Err(anyhow!("storage.api_url is required for the http backend"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ProctorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, raw)),
        None => Ok(None),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
