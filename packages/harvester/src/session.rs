//! Session lifecycle management.
//!
//! One `SessionManager` owns at most one live automation session per
//! worker. It is injected into the engine rather than held as a process
//! global; "exactly one live session per worker" is an ownership fact,
//! not a singleton. All automation runs against the session sequentially,
//! so the manager is driven behind `&mut self`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::traits::{AutomationDriver, DriverFactory};

/// Lifecycle states, reported through `health_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Absent,
    Initializing,
    Healthy,
    Unhealthy,
    Closed,
}

/// The live session plus its bookkeeping.
pub struct SessionHandle {
    driver: Box<dyn AutomationDriver>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    consecutive_errors: u32,
}

impl SessionHandle {
    fn new(driver: Box<dyn AutomationDriver>) -> Self {
        let now = Utc::now();
        Self {
            driver,
            created_at: now,
            last_activity_at: now,
            consecutive_errors: 0,
        }
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Read-only snapshot for observability.
#[derive(Debug, Clone, Serialize)]
pub struct SessionHealth {
    pub state: SessionState,
    pub is_active: bool,
    pub is_healthy: bool,
    pub age_secs: Option<u64>,
    pub consecutive_errors: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_location: Option<String>,
}

pub struct SessionManager {
    factory: Arc<dyn DriverFactory>,
    config: HarvestConfig,
    handle: Option<SessionHandle>,
    state: SessionState,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn DriverFactory>, config: HarvestConfig) -> Self {
        Self {
            factory,
            config,
            handle: None,
            state: SessionState::Absent,
        }
    }

    /// Return a healthy session, creating one on first use.
    ///
    /// If a session exists, a health probe runs first: driver present,
    /// transport open, a trivial evaluation succeeds within the probe
    /// timeout, and the session is younger than the configured maximum
    /// age. On a failed probe the session is torn down and recreated when
    /// `reinitialize_if_unhealthy` is set; otherwise the existing
    /// (possibly unhealthy) session is returned unchanged so callers can
    /// opt out of implicit recovery mid-operation.
    pub async fn acquire(
        &mut self,
        reinitialize_if_unhealthy: bool,
    ) -> Result<&dyn AutomationDriver> {
        if self.handle.is_none() {
            self.initialize().await?;
            return Ok(self.driver());
        }

        if self.probe().await {
            self.state = SessionState::Healthy;
            if let Some(handle) = self.handle.as_mut() {
                handle.last_activity_at = Utc::now();
            }
            return Ok(self.driver());
        }

        self.state = SessionState::Unhealthy;
        if reinitialize_if_unhealthy {
            warn!("session failed health probe, recycling");
            self.teardown().await;
            self.initialize().await?;
        } else {
            debug!("session unhealthy but caller opted out of recovery");
        }
        Ok(self.driver())
    }

    /// Count a failure against the session. Once the consecutive-error
    /// threshold is reached a full recover runs unconditionally,
    /// regardless of any caller's `reinitialize_if_unhealthy` choice; a
    /// failed recovery is surfaced as `RecoveryFailed`.
    pub async fn record_error(&mut self, error: &anyhow::Error) -> Result<()> {
        let count = match self.handle.as_mut() {
            Some(handle) => {
                handle.consecutive_errors += 1;
                handle.consecutive_errors
            }
            None => return Ok(()),
        };
        warn!(consecutive_errors = count, error = %error, "session error recorded");

        if count >= self.config.max_consecutive_errors {
            info!(
                threshold = self.config.max_consecutive_errors,
                "error threshold reached, forcing session recovery"
            );
            self.recover()
                .await
                .map_err(|e| HarvestError::RecoveryFailed(format!("{e:#}")))?;
        }
        Ok(())
    }

    /// Reset the error streak after a successful operation.
    pub fn note_success(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.consecutive_errors = 0;
            handle.last_activity_at = Utc::now();
        }
    }

    /// Unconditional cleanup then reinit. Resets the error counter by
    /// virtue of the fresh handle.
    pub async fn recover(&mut self) -> Result<()> {
        info!("recovering session");
        self.teardown().await;
        self.initialize().await
    }

    /// Navigate with the configured per-navigation timeout, counting
    /// activity on success.
    pub async fn navigate(&mut self, url: &str) -> Result<()> {
        let timeout = self.config.navigation_timeout;
        let driver = self
            .handle
            .as_ref()
            .ok_or_else(|| HarvestError::Driver("no active session".into()))?;
        tokio::time::timeout(timeout, driver.driver.navigate(url))
            .await
            .map_err(|_| {
                HarvestError::Network(format!(
                    "navigation to {url} timed out after {}s",
                    timeout.as_secs()
                ))
            })?
            .with_context(|| format!("navigation to {url} failed"))?;
        self.note_success();
        Ok(())
    }

    /// Observability snapshot; queries the current location only when the
    /// session is healthy.
    ///
    /// The reported state reflects the live probe, not the last recorded
    /// transition: a session that went bad since its last use shows up as
    /// unhealthy here even though no operation has observed the failure
    /// yet.
    pub async fn health_status(&self) -> SessionHealth {
        let is_healthy = self.probe().await;
        let state = match self.state {
            SessionState::Closed => SessionState::Closed,
            SessionState::Initializing => SessionState::Initializing,
            _ if self.handle.is_none() => SessionState::Absent,
            _ if is_healthy => SessionState::Healthy,
            _ => SessionState::Unhealthy,
        };
        let (age_secs, consecutive_errors) = match self.handle.as_ref() {
            Some(handle) => (Some(handle.age().as_secs()), handle.consecutive_errors),
            None => (None, 0),
        };
        let current_location = if is_healthy {
            match self.handle.as_ref() {
                Some(handle) => handle.driver.current_url().await.ok(),
                None => None,
            }
        } else {
            None
        };
        SessionHealth {
            state,
            is_active: self.handle.is_some(),
            is_healthy,
            age_secs,
            consecutive_errors,
            current_location,
        }
    }

    /// Close and drop the session without replacing it.
    pub async fn close(&mut self) {
        self.teardown().await;
        self.state = SessionState::Closed;
    }

    fn driver(&self) -> &dyn AutomationDriver {
        self.handle
            .as_ref()
            .map(|h| h.driver.as_ref())
            .expect("driver accessed after successful initialize")
    }

    async fn initialize(&mut self) -> Result<()> {
        self.state = SessionState::Initializing;
        let attempts = self.config.max_consecutive_errors.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.factory.launch().await {
                Ok(driver) => {
                    let mut handle = SessionHandle::new(driver);
                    self.wait_for_challenge(&mut handle).await?;
                    info!(attempt, "session initialized");
                    self.handle = Some(handle);
                    self.state = SessionState::Healthy;
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "session initialization failed");
                    last_error = Some(e);
                }
            }
        }
        self.state = SessionState::Absent;
        let detail = last_error
            .map(|e| format!("{e:#}"))
            .unwrap_or_else(|| "no launch attempts made".to_string());
        Err(HarvestError::Driver(format!(
            "session initialization failed after {attempts} attempts: {detail}"
        ))
        .into())
    }

    /// Block until any pending security challenge is cleared.
    ///
    /// A zero challenge timeout means wait indefinitely: a human operator
    /// may need unbounded time to clear a manual challenge before
    /// automation resumes.
    async fn wait_for_challenge(&self, handle: &mut SessionHandle) -> Result<()> {
        let deadline = if self.config.challenge_timeout.is_zero() {
            None
        } else {
            Some(tokio::time::Instant::now() + self.config.challenge_timeout)
        };
        let started = std::time::Instant::now();
        loop {
            match handle.driver.challenge_pending().await {
                Ok(false) => return Ok(()),
                Ok(true) => {
                    info!("security challenge pending, waiting for operator");
                }
                Err(e) => {
                    return Err(e.context("challenge probe failed"));
                }
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return Err(HarvestError::ChallengeTimedOut {
                        waited_secs: started.elapsed().as_secs(),
                    }
                    .into());
                }
            }
            tokio::time::sleep(self.config.challenge_poll_interval).await;
        }
    }

    /// Health probe: transport open, trivial evaluation succeeds within
    /// the probe timeout, session younger than the maximum age. A dropped
    /// connection fails the probe immediately, age notwithstanding.
    async fn probe(&self) -> bool {
        let handle = match self.handle.as_ref() {
            Some(handle) => handle,
            None => return false,
        };
        if !handle.driver.is_connected() {
            return false;
        }
        if handle.age() >= self.config.session_max_age {
            return false;
        }
        matches!(
            tokio::time::timeout(
                self.config.health_probe_timeout,
                handle.driver.evaluate("1 + 1"),
            )
            .await,
            Ok(Ok(_))
        )
    }

    async fn teardown(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.driver.close().await {
                warn!(error = %e, "session close failed during teardown");
            }
        }
    }
}
