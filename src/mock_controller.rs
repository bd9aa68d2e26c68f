// src/mock_controller.rs
//
// Bench-test stand-in for the intersection controller. Serves the same
// HTTP surface the client consumes and runs its own 1 Hz phase timer.

use crate::controller_client::ProgramBody;
use crate::types::{PhaseStatus, ProgramId};
use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// Phase durations in seconds. Phase 0 favours directions 1-2, phase 1
/// favours 3-4, phase 2 is all-red for pedestrians.
pub fn default_programs() -> BTreeMap<ProgramId, Vec<f64>> {
    BTreeMap::from([
        (0, vec![15.0, 15.0, 10.0]),
        (1, vec![20.0, 15.0, 10.0]),
        (2, vec![15.0, 20.0, 10.0]),
    ])
}

#[derive(Debug, Serialize)]
struct SetProgramResponse {
    status: &'static str,
    program: ProgramId,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

pub struct MockController {
    programs: BTreeMap<ProgramId, Vec<f64>>,
    state: Mutex<PhaseStatus>,
}

impl MockController {
    pub fn new(programs: BTreeMap<ProgramId, Vec<f64>>) -> Result<Self> {
        let first = programs
            .get(&0)
            .and_then(|phases| phases.first().copied())
            .context("program 0 with at least one phase is required")?;

        Ok(Self {
            programs,
            state: Mutex::new(PhaseStatus {
                program: 0,
                phase: 0,
                time_left: first,
            }),
        })
    }

    pub async fn status(&self) -> PhaseStatus {
        *self.state.lock().await
    }

    /// Advance the phase timer by `secs`, wrapping phases cyclically.
    pub async fn tick(&self, secs: f64) {
        let mut state = self.state.lock().await;
        state.time_left -= secs;
        if state.time_left <= 0.0 {
            if let Some(phases) = self.programs.get(&state.program) {
                state.phase = (state.phase + 1) % phases.len() as u32;
                state.time_left = phases[state.phase as usize];
            }
        }
    }

    /// Switch program and restart it from phase 0. `false` if unknown.
    pub async fn switch(&self, program: ProgramId) -> bool {
        let Some(first) = self.programs.get(&program).and_then(|p| p.first().copied()) else {
            return false;
        };
        let mut state = self.state.lock().await;
        state.program = program;
        state.phase = 0;
        state.time_left = first;
        true
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/api/program", get(get_program).post(set_program))
            .route("/api/phase_status", get(phase_status))
            .with_state(self)
    }
}

async fn get_program(State(mock): State<Arc<MockController>>) -> Json<ProgramBody> {
    Json(ProgramBody {
        program: mock.status().await.program,
    })
}

async fn set_program(
    State(mock): State<Arc<MockController>>,
    Json(req): Json<ProgramBody>,
) -> Result<Json<SetProgramResponse>, (StatusCode, Json<ErrorBody>)> {
    if !mock.switch(req.program).await {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                detail: "Invalid program".to_string(),
            }),
        ));
    }
    info!("Mock controller switched to program {}", req.program);
    Ok(Json(SetProgramResponse {
        status: "ok",
        program: req.program,
    }))
}

async fn phase_status(State(mock): State<Arc<MockController>>) -> Json<PhaseStatus> {
    Json(mock.status().await)
}

pub async fn serve(bind_addr: &str) -> Result<()> {
    let mock = Arc::new(MockController::new(default_programs())?);

    let timer = mock.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.tick().await;
        loop {
            interval.tick().await;
            timer.tick(1.0).await;
        }
    });

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", bind_addr))?;
    info!("Mock controller listening on http://{}/api", bind_addr);
    axum::serve(listener, mock.router()).await?;
    Ok(())
}
