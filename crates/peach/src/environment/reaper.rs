//! Idle environment reaper.
//!
//! Ready environments without relay activity become idle after
//! `idle_timeout`. Idle environments have their pod and service deleted
//! after a further `reclaim_after`; their data directory stays in place so
//! the next resolve can bring them back.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::models::{Environment, EnvironmentStatus};
use super::service::{EnvironmentService, owner_key};
use anyhow::Result;

/// Reaper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub enabled: bool,
    /// Minutes without activity before a ready environment becomes idle.
    pub idle_timeout_minutes: i64,
    /// Further minutes before an idle environment's pod is deleted.
    pub reclaim_after_minutes: i64,
    /// Seconds between reaper passes.
    pub check_interval_seconds: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_timeout_minutes: 30,
            reclaim_after_minutes: 120,
            check_interval_seconds: 60,
        }
    }
}

/// Result of one reaper pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub idled: usize,
    pub reclaimed: usize,
}

fn inactive_for(environment: &Environment, now: DateTime<Utc>) -> Option<chrono::Duration> {
    match DateTime::parse_from_rfc3339(&environment.last_activity_at) {
        Ok(at) => Some(now - at.with_timezone(&Utc)),
        Err(e) => {
            warn!(
                "Environment {} has unparseable activity timestamp {:?}: {}",
                environment.environment_id, environment.last_activity_at, e
            );
            None
        }
    }
}

impl EnvironmentService {
    /// Run one reaper pass at `now`.
    pub async fn reap_idle(&self, now: DateTime<Utc>, config: &ReaperConfig) -> Result<ReapReport> {
        let idle_timeout = chrono::Duration::minutes(config.idle_timeout_minutes);
        let reclaim_at = idle_timeout + chrono::Duration::minutes(config.reclaim_after_minutes);
        let mut report = ReapReport::default();

        for environment in self.repo().list_by_status(EnvironmentStatus::Ready).await? {
            if self.activity().live_sessions(&environment.environment_id) > 0 {
                continue;
            }
            let Some(inactive) = inactive_for(&environment, now) else {
                continue;
            };
            if inactive < idle_timeout {
                continue;
            }
            if self
                .repo()
                .transition(
                    &environment.environment_id,
                    EnvironmentStatus::Ready,
                    EnvironmentStatus::Idle,
                    true,
                )
                .await?
            {
                debug!(
                    "Environment {} idle for {}m",
                    environment.environment_id,
                    inactive.num_minutes()
                );
                report.idled += 1;
            }
        }

        for environment in self.repo().list_by_status(EnvironmentStatus::Idle).await? {
            if self.activity().live_sessions(&environment.environment_id) > 0 {
                continue;
            }
            let Some(inactive) = inactive_for(&environment, now) else {
                continue;
            };
            if inactive < reclaim_at {
                continue;
            }

            match self.reclaim(&environment).await {
                Ok(true) => report.reclaimed += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    "Failed to reclaim environment {}: {:?}",
                    environment.environment_id, e
                ),
            }
        }

        if report.idled > 0 || report.reclaimed > 0 {
            info!(
                "Reaper marked {} environment(s) idle and reclaimed {}",
                report.idled, report.reclaimed
            );
        }

        Ok(report)
    }

    async fn reclaim(&self, environment: &Environment) -> Result<bool> {
        let key = owner_key(&environment.assignment_id, &environment.owner);
        self.with_owner_lock(&key, self.reclaim_unlocked(environment))
            .await
    }

    async fn reclaim_unlocked(&self, environment: &Environment) -> Result<bool> {
        if !self
            .repo()
            .transition(
                &environment.environment_id,
                EnvironmentStatus::Idle,
                EnvironmentStatus::Reclaimed,
                false,
            )
            .await?
        {
            // Touched since the listing.
            return Ok(false);
        }

        self.provisioner()
            .reclaim(&environment.environment_id)
            .await?;
        info!("Reclaimed environment {}", environment.environment_id);
        Ok(true)
    }

    /// Start the reaper as a background task.
    pub fn start_reaper_task(
        self: Arc<Self>,
        config: ReaperConfig,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        info!(
            "Starting environment reaper (check every {}s, idle after {}min, reclaim after {}min)",
            config.check_interval_seconds, config.idle_timeout_minutes, config.reclaim_after_minutes
        );

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(config.check_interval_seconds.max(1)));

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                if let Err(e) = self.reap_idle(Utc::now(), &config).await {
                    warn!("Environment reaper pass failed: {:?}", e);
                }
            }

            debug!("Environment reaper stopped");
        })
    }
}
