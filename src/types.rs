use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Signal-timing plan identifier as known by the controller. `0` is baseline.
pub type ProgramId = u32;

pub const BASELINE_PROGRAM: ProgramId = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub detector: DetectorConfig,
    pub analysis: AnalysisConfig,
    pub controller: ControllerConfig,
    /// Ordered by escalation priority: the first entry wins ties.
    pub directions: Vec<DirectionConfig>,
    /// camera id -> stream URI or file path
    pub cameras: BTreeMap<String, String>,
    pub mask_dir: String,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Auto,
    Ort,
    Opencv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLayout {
    Yolov5,
    Yolov8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: String,
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    #[serde(default = "default_output_layout")]
    pub output_layout: OutputLayout,
    #[serde(default = "default_input_size")]
    pub input_size: usize,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    #[serde(default = "default_input_name")]
    pub input_name: String,
    #[serde(default)]
    pub use_cuda: bool,
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_vehicle_classes")]
    pub vehicle_classes: Vec<usize>,
    pub confidence_threshold: f32,
    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub shots_per_phase: usize,
    pub congestion_threshold: f64,
    pub downgrade_cycles: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub api_base_url: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: f64,
    #[serde(default = "default_lead_time")]
    pub lead_time_secs: f64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,
    #[serde(default = "default_status_retry")]
    pub status_retry_secs: f64,
    #[serde(default = "default_cycle_guard")]
    pub cycle_guard_secs: f64,
    /// Green phases that precede a red transition. The pedestrian phase is never listed.
    #[serde(default = "default_trigger_phases")]
    pub trigger_phases: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionConfig {
    pub name: String,
    pub program: ProgramId,
    pub cameras: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Base path of the log file; rolled files get a date stamp before the extension.
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub rotation: LogRotation,
    /// Rolled files kept on disk, oldest removed first.
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            rotation: LogRotation::default(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_backend() -> BackendKind {
    BackendKind::Auto
}

fn default_output_layout() -> OutputLayout {
    OutputLayout::Yolov5
}

fn default_input_size() -> usize {
    640
}

fn default_num_classes() -> usize {
    80
}

fn default_input_name() -> String {
    "images".to_string()
}

fn default_num_threads() -> usize {
    4
}

fn default_vehicle_classes() -> Vec<usize> {
    vec![2] // COCO "car"
}

fn default_nms_threshold() -> f32 {
    0.45
}

fn default_http_timeout() -> f64 {
    2.0
}

fn default_lead_time() -> f64 {
    2.0
}

fn default_poll_interval() -> f64 {
    0.2
}

fn default_status_retry() -> f64 {
    1.0
}

fn default_cycle_guard() -> f64 {
    0.1
}

fn default_trigger_phases() -> Vec<u32> {
    vec![0, 1]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// RGB8 frame, row-major, tightly packed.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Frame {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.len() < self.width * self.height * 3
    }
}

/// Axis-aligned box in frame pixels: top-left corner plus size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: usize,
}

/// Snapshot of the controller's phase timer. Never cached across polls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseStatus {
    pub program: ProgramId,
    pub phase: u32,
    pub time_left: f64,
}
