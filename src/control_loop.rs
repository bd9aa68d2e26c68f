// src/control_loop.rs
//
// Poll -> (near the end of a trigger phase) measure -> decide -> apply.
// Strictly sequential; every wait is returned as data so the schedule can
// be driven by any `Sleeper`. Capture and inference block, so a cycle's
// measurement runs on the blocking pool while the loop task awaits it.

use crate::config::secs;
use crate::controller_client::SignalController;
use crate::decision::{Decision, DecisionEngine};
use crate::frame_source::FrameSource;
use crate::measurement::{measure, DirectionLoad};
use crate::metrics::LoopMetrics;
use crate::types::{Config, ControllerConfig, DirectionConfig, PhaseStatus, ProgramId};
use crate::vehicle_detection::VehicleDetector;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct LoopTiming {
    pub lead_time: Duration,
    pub poll_interval: Duration,
    pub status_retry: Duration,
    pub cycle_guard: Duration,
    pub trigger_phases: Vec<u32>,
}

impl LoopTiming {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            lead_time: secs(config.lead_time_secs),
            poll_interval: secs(config.poll_interval_secs),
            status_retry: secs(config.status_retry_secs),
            cycle_guard: secs(config.cycle_guard_secs),
            trigger_phases: config.trigger_phases.clone(),
        }
    }

    /// Wait after a cycle so the same phase instance is not measured twice.
    pub fn after_cycle(&self) -> Duration {
        self.lead_time + self.cycle_guard
    }

    pub fn should_measure(&self, status: &PhaseStatus) -> bool {
        self.trigger_phases.contains(&status.phase)
            && status.time_left <= self.lead_time.as_secs_f64()
    }
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub phase: u32,
    pub current: ProgramId,
    pub loads: Vec<DirectionLoad>,
    pub decision: Decision,
    /// `None` when no switch was needed.
    pub applied: Option<bool>,
}

#[derive(Debug, Clone)]
pub enum Tick {
    /// Status poll failed; no measurement without fresh status.
    StatusUnavailable,
    /// Not yet time to measure.
    Waiting { phase: u32, time_left: f64 },
    /// Cycle started but nothing was decided: measurement failed or the
    /// current program could not be read.
    CycleAborted { phase: u32 },
    CycleRun(CycleReport),
}

#[derive(Debug, Clone)]
pub struct Step {
    pub tick: Tick,
    pub sleep: Duration,
}

struct Sensors {
    source: Box<dyn FrameSource>,
    detector: VehicleDetector,
}

pub struct ControlLoop<C: SignalController> {
    controller: C,
    sensors: Arc<Mutex<Sensors>>,
    engine: DecisionEngine,
    directions: Arc<Vec<DirectionConfig>>,
    shots: usize,
    timing: LoopTiming,
    metrics: LoopMetrics,
}

impl<C: SignalController> ControlLoop<C> {
    pub fn new(
        config: &Config,
        controller: C,
        source: Box<dyn FrameSource>,
        detector: VehicleDetector,
        metrics: LoopMetrics,
    ) -> Self {
        Self {
            controller,
            sensors: Arc::new(Mutex::new(Sensors { source, detector })),
            engine: DecisionEngine::from_config(config),
            directions: Arc::new(config.directions.clone()),
            shots: config.analysis.shots_per_phase,
            timing: LoopTiming::from_config(&config.controller),
            metrics,
        }
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &LoopMetrics {
        &self.metrics
    }

    /// Run until `max_steps` polls have been made, or forever with `None`.
    pub async fn run(&mut self, sleeper: &dyn Sleeper, max_steps: Option<u64>) {
        let mut steps = 0u64;
        while max_steps.map_or(true, |max| steps < max) {
            let step = self.step().await;
            sleeper.sleep(step.sleep).await;
            steps += 1;
        }
    }

    /// One poll plus whatever it triggers. Returns how long to wait next.
    pub async fn step(&mut self) -> Step {
        self.metrics.inc(&self.metrics.polls);

        let status = match self.controller.get_phase_status().await {
            Ok(status) => status,
            Err(e) => {
                warn!("Phase status unavailable: {}", e);
                self.metrics.inc(&self.metrics.status_failures);
                return Step {
                    tick: Tick::StatusUnavailable,
                    sleep: self.timing.status_retry,
                };
            }
        };

        debug!(
            "program={}, phase={}, time_left={:.1}s",
            status.program, status.phase, status.time_left
        );

        if !self.timing.should_measure(&status) {
            return Step {
                tick: Tick::Waiting {
                    phase: status.phase,
                    time_left: status.time_left,
                },
                sleep: self.timing.poll_interval,
            };
        }

        info!(
            "Phase {} ends in {:.1}s, starting measurement cycle",
            status.phase, status.time_left
        );
        let tick = self.run_cycle(&status).await;

        Step {
            tick,
            sleep: self.timing.after_cycle(),
        }
    }

    async fn measure_blocking(&self) -> Result<Vec<DirectionLoad>, tokio::task::JoinError> {
        let sensors = self.sensors.clone();
        let directions = self.directions.clone();
        let metrics = self.metrics.clone();
        let shots = self.shots;

        tokio::task::spawn_blocking(move || {
            let mut guard = sensors.lock().unwrap_or_else(PoisonError::into_inner);
            let Sensors { source, detector } = &mut *guard;
            measure(source.as_mut(), detector, &directions, shots, &metrics)
        })
        .await
    }

    async fn run_cycle(&mut self, status: &PhaseStatus) -> Tick {
        let started = Instant::now();

        let loads = match self.measure_blocking().await {
            Ok(loads) => loads,
            Err(e) => {
                error!("Measurement task failed: {}", e);
                self.metrics.inc(&self.metrics.cycles_skipped);
                return Tick::CycleAborted {
                    phase: status.phase,
                };
            }
        };

        // The program may have moved while we were capturing.
        let current = match self.controller.get_current_program().await {
            Ok(program) => program,
            Err(e) => {
                warn!("Skipping decision, current program unknown: {}", e);
                self.metrics.inc(&self.metrics.cycles_skipped);
                return Tick::CycleAborted {
                    phase: status.phase,
                };
            }
        };

        let values: Vec<f64> = loads.iter().map(|l| l.congestion).collect();
        let decision = self.engine.decide(current, &values);

        let applied = if decision.next != current {
            let ok = self.controller.set_program(decision.next).await;
            if ok {
                self.metrics.inc(&self.metrics.program_changes);
            } else {
                self.metrics.inc(&self.metrics.program_change_failures);
                warn!(
                    "Program {} not applied, will reconsider next cycle",
                    decision.next
                );
            }
            Some(ok)
        } else {
            None
        };

        self.metrics.inc(&self.metrics.cycles_run);
        self.metrics.set_timing(
            &self.metrics.last_cycle_ms,
            started.elapsed().as_millis() as u64,
        );

        let summary: Vec<String> = loads
            .iter()
            .map(|l| format!("{}={:.1}", l.name, l.congestion))
            .collect();
        info!(
            "Cycle complete: prog={}, {}, new={}",
            current,
            summary.join(", "),
            decision.next
        );
        debug!("Metrics: {:?}", self.metrics.summary());

        Tick::CycleRun(CycleReport {
            phase: status.phase,
            current,
            loads,
            decision,
            applied,
        })
    }
}
