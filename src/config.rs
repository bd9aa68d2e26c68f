use crate::types::{Config, BASELINE_PROGRAM};
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Config file not found: {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Malformed config file: {}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject anything that would leave the loop half-configured.
    pub fn validate(&self) -> Result<()> {
        let det = &self.detector;
        if !(0.0..=1.0).contains(&det.confidence_threshold) {
            bail!(
                "detector.confidence_threshold must be in [0,1], got {}",
                det.confidence_threshold
            );
        }
        if !(0.0..=1.0).contains(&det.nms_threshold) {
            bail!(
                "detector.nms_threshold must be in [0,1], got {}",
                det.nms_threshold
            );
        }
        if det.vehicle_classes.is_empty() {
            bail!("detector.vehicle_classes must not be empty");
        }
        if self.model.input_size == 0 {
            bail!("model.input_size must be positive");
        }

        if self.analysis.shots_per_phase == 0 {
            bail!("analysis.shots_per_phase must be at least 1");
        }
        if self.analysis.downgrade_cycles == 0 {
            bail!("analysis.downgrade_cycles must be at least 1");
        }

        let ctrl = &self.controller;
        for (name, value) in [
            ("http_timeout_secs", ctrl.http_timeout_secs),
            ("lead_time_secs", ctrl.lead_time_secs),
            ("poll_interval_secs", ctrl.poll_interval_secs),
            ("status_retry_secs", ctrl.status_retry_secs),
            ("cycle_guard_secs", ctrl.cycle_guard_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("controller.{} must be a non-negative number", name);
            }
        }
        if ctrl.http_timeout_secs == 0.0 {
            bail!("controller.http_timeout_secs must be positive");
        }

        if self.logging.max_files == 0 {
            bail!("logging.max_files must be at least 1");
        }

        if self.directions.len() < 2 {
            bail!(
                "at least two directions are required, got {}",
                self.directions.len()
            );
        }
        let mut programs = HashSet::new();
        for direction in &self.directions {
            if direction.program == BASELINE_PROGRAM {
                bail!(
                    "direction '{}' cannot escalate to the baseline program",
                    direction.name
                );
            }
            if !programs.insert(direction.program) {
                bail!(
                    "program {} is assigned to more than one direction",
                    direction.program
                );
            }
            if direction.cameras.is_empty() {
                bail!("direction '{}' has no cameras", direction.name);
            }
            for cam in &direction.cameras {
                if !self.cameras.contains_key(cam) {
                    bail!(
                        "direction '{}' references unknown camera '{}'",
                        direction.name,
                        cam
                    );
                }
            }
        }

        Ok(())
    }

    /// Model file must exist before any backend is built.
    pub fn check_model_path(&self) -> Result<()> {
        if !Path::new(&self.model.path).is_file() {
            bail!("Model file not found: {}", self.model.path);
        }
        Ok(())
    }
}

pub fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::LogRotation;

    pub(crate) const SAMPLE: &str = r#"
model:
  path: models/yolov5s.onnx
detector:
  confidence_threshold: 0.4
analysis:
  shots_per_phase: 3
  congestion_threshold: 5
  downgrade_cycles: 3
controller:
  api_base_url: http://127.0.0.1:5000/api
directions:
  - name: north_south
    program: 1
    cameras: ["1", "2"]
  - name: east_west
    program: 2
    cameras: ["3", "4"]
cameras:
  "1": rtsp://10.0.0.11/stream
  "2": rtsp://10.0.0.12/stream
  "3": rtsp://10.0.0.13/stream
  "4": rtsp://10.0.0.14/stream
mask_dir: masks
"#;

    pub(crate) fn sample_config() -> Config {
        serde_yaml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let cfg = sample_config();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.model.input_size, 640);
        assert_eq!(cfg.detector.vehicle_classes, vec![2]);
        assert_eq!(cfg.controller.trigger_phases, vec![0, 1]);
        assert_eq!(cfg.controller.lead_time_secs, 2.0);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.rotation, LogRotation::Daily);
        assert_eq!(cfg.logging.max_files, 5);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.directions.len(), 2);
        assert_eq!(cfg.directions[0].program, 1);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Config::load("/nonexistent/config.yaml").is_err());
    }

    #[test]
    fn test_rejects_unknown_camera() {
        let mut cfg = sample_config();
        cfg.directions[1].cameras.push("9".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_baseline_direction_program() {
        let mut cfg = sample_config();
        cfg.directions[0].program = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_programs() {
        let mut cfg = sample_config();
        cfg.directions[1].program = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_shots() {
        let mut cfg = sample_config();
        cfg.analysis.shots_per_phase = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_logging_section_parses() {
        let yaml = format!(
            "{}logging:\n  level: debug\n  file: logs/retimer.log\n  rotation: hourly\n  max_files: 3\n",
            SAMPLE
        );
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.logging.file.as_deref(), Some("logs/retimer.log"));
        assert_eq!(cfg.logging.rotation, LogRotation::Hourly);
        assert_eq!(cfg.logging.max_files, 3);
    }

    #[test]
    fn test_rejects_zero_log_files() {
        let mut cfg = sample_config();
        cfg.logging.max_files = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut cfg = sample_config();
        cfg.detector.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }
}
