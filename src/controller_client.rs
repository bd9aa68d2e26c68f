// src/controller_client.rs
//
// HTTP client for the traffic-signal controller.
//
//   GET  {base}/program       -> {"program": <int>}
//   POST {base}/program       <- {"program": <int>}  -> {"status": "ok", "program": <int>}
//   GET  {base}/phase_status  -> {"program": <int>, "phase": <int>, "time_left": <float>}
//
// Reads propagate errors. The write reports a boolean and never raises.
// Nothing here retries.

use crate::error::ControllerError;
use crate::types::{PhaseStatus, ProgramId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

#[async_trait]
pub trait SignalController: Send + Sync {
    async fn get_phase_status(&self) -> Result<PhaseStatus, ControllerError>;

    async fn get_current_program(&self) -> Result<ProgramId, ControllerError>;

    /// `false` on any transport, timeout or status failure.
    async fn set_program(&self, program: ProgramId) -> bool;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgramBody {
    pub program: ProgramId,
}

pub struct ControllerClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ControllerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ControllerError> {
        let response = self
            .http_client
            .get(self.url(path))
            .send()
            .await
            .map_err(ControllerError::Transport)?;
        let response = check_status(response).await?;
        response.json::<T>().await.map_err(classify)
    }

    async fn try_set_program(&self, program: ProgramId) -> Result<(), ControllerError> {
        let response = self
            .http_client
            .post(self.url("program"))
            .json(&ProgramBody { program })
            .send()
            .await
            .map_err(ControllerError::Transport)?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ControllerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    Err(ControllerError::Status { status, body })
}

fn classify(e: reqwest::Error) -> ControllerError {
    if e.is_decode() {
        ControllerError::Decode(e)
    } else {
        ControllerError::Transport(e)
    }
}

#[async_trait]
impl SignalController for ControllerClient {
    async fn get_phase_status(&self) -> Result<PhaseStatus, ControllerError> {
        let status: PhaseStatus = self.get_json("phase_status").await?;
        debug!(
            "Phase status: program={}, phase={}, time_left={:.1}s",
            status.program, status.phase, status.time_left
        );
        Ok(status)
    }

    async fn get_current_program(&self) -> Result<ProgramId, ControllerError> {
        match self.get_json::<ProgramBody>("program").await {
            Ok(body) => {
                debug!("Current program from controller: {}", body.program);
                Ok(body.program)
            }
            Err(e) => {
                error!("Failed to get current program: {}", e);
                Err(e)
            }
        }
    }

    async fn set_program(&self, program: ProgramId) -> bool {
        match self.try_set_program(program).await {
            Ok(()) => {
                info!("Program changed to {}", program);
                true
            }
            Err(e) => {
                error!("Failed to set program to {}: {}", program, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_controller::tests::spawn_mock;
    use axum::{routing::get, Router};

    fn client(base_url: &str, timeout_ms: u64) -> ControllerClient {
        ControllerClient::new(base_url, Duration::from_millis(timeout_ms)).unwrap()
    }

    /// Accepts connections but never answers in time.
    async fn spawn_slow() -> String {
        let app = Router::new()
            .route(
                "/api/phase_status",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "{}"
                }),
            )
            .route(
                "/api/program",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "{}"
                })
                .post(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "{}"
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api", addr)
    }

    /// A port nobody listens on.
    fn dead_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}/api", addr)
    }

    #[tokio::test]
    async fn test_reads_phase_status() {
        let (base, _mock) = spawn_mock().await;
        let status = client(&base, 2000).get_phase_status().await.unwrap();
        assert_eq!(status.program, 0);
        assert_eq!(status.phase, 0);
        assert_eq!(status.time_left, 15.0);
    }

    #[tokio::test]
    async fn test_set_then_get_program() {
        let (base, _mock) = spawn_mock().await;
        let c = client(&base, 2000);
        assert!(c.set_program(2).await);
        assert_eq!(c.get_current_program().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_invalid_program_returns_false() {
        let (base, _mock) = spawn_mock().await;
        let c = client(&base, 2000);
        assert!(!c.set_program(42).await);
        assert_eq!(c.get_current_program().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_timeout_behaviour() {
        let base = spawn_slow().await;
        let c = client(&base, 200);

        assert!(!c.set_program(1).await);

        let err = c.get_phase_status().await.unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {}", err);
        assert!(c.get_current_program().await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_controller() {
        let c = client(&dead_url(), 500);
        assert!(matches!(
            c.get_phase_status().await,
            Err(ControllerError::Transport(_))
        ));
        assert!(!c.set_program(1).await);
    }

    #[tokio::test]
    async fn test_status_error_is_propagated() {
        let (base, _mock) = spawn_mock().await;
        let c = client(&format!("{}/missing", base), 2000);
        assert!(matches!(
            c.get_phase_status().await,
            Err(ControllerError::Status { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let app = Router::new().route("/api/program", get(|| async { "not json" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let c = client(&format!("http://{}/api", addr), 2000);
        assert!(matches!(
            c.get_current_program().await,
            Err(ControllerError::Decode(_))
        ));
    }
}
