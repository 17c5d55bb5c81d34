// src/monitor/mod.rs — Periodic energy-flow polling
//
// One cycle: fetch a snapshot (renewing the session and retrying once when
// the fetch fails, or logging in first when there is no session), diff it
// against the previous snapshot and send one notification per changed field. The outcome of every cycle is published
// on a watch channel for the local API.

pub mod diff;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::api::webhooks::{build_notifications, Notifier};
use crate::infra::config::DeviceSuffixes;
use crate::infra::errors::Result;
use crate::portal::{EnergyFlowReader, EnergyFlowSnapshot};
use diff::Field;

/// Where snapshots come from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<EnergyFlowSnapshot>;
    /// Discard the current session and log in again.
    async fn renew(&self) -> Result<()>;
    /// False until a login succeeds, and again after a failed one.
    async fn is_connected(&self) -> bool;
    async fn station_id(&self) -> Option<String>;
}

#[async_trait]
impl SnapshotSource for EnergyFlowReader {
    async fn fetch(&self) -> Result<EnergyFlowSnapshot> {
        self.get_energy_flow().await
    }

    async fn renew(&self) -> Result<()> {
        self.session().renew_session().await
    }

    async fn is_connected(&self) -> bool {
        self.session().is_connected().await
    }

    async fn station_id(&self) -> Option<String> {
        self.session().station().await.map(|s| s.station_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Health {
    /// No cycle has finished yet.
    Starting,
    Healthy,
    Degraded {
        reason: String,
        since: DateTime<Utc>,
    },
}

/// What the monitor last observed.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorStatus {
    pub health: Health,
    pub snapshot: Option<EnergyFlowSnapshot>,
    pub consecutive_failures: u32,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self {
            health: Health::Starting,
            snapshot: None,
            consecutive_failures: 0,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// First snapshot; nothing to compare against.
    Baseline,
    Unchanged,
    Changed(Vec<Field>),
    /// Fetch, renewal or retry failed.
    Degraded(String),
}

pub struct Monitor {
    source: Arc<dyn SnapshotSource>,
    notifier: Arc<dyn Notifier>,
    suffixes: DeviceSuffixes,
    interval: Duration,
    last: Option<EnergyFlowSnapshot>,
    status: watch::Sender<MonitorStatus>,
}

impl Monitor {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        notifier: Arc<dyn Notifier>,
        suffixes: DeviceSuffixes,
        interval: Duration,
    ) -> Self {
        let (status, _) = watch::channel(MonitorStatus::default());
        Self {
            source,
            notifier,
            suffixes,
            interval,
            last: None,
            status,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorStatus> {
        self.status.subscribe()
    }

    pub fn last_snapshot(&self) -> Option<EnergyFlowSnapshot> {
        self.last
    }

    /// Run a single poll cycle and publish its outcome.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let snapshot = match self.fetch_with_recovery().await {
            Ok(s) => s,
            Err(reason) => {
                self.mark_degraded(&reason);
                return CycleOutcome::Degraded(reason);
            }
        };

        let outcome = match self.last {
            None => {
                tracing::info!(
                    "Baseline snapshot: solar {} kW, battery {} kW ({}%), grid {} kW, house {} kW",
                    snapshot.solar_generation_kw,
                    snapshot.battery_flow_kw,
                    snapshot.battery_charge_level_pct,
                    snapshot.grid_flow_kw,
                    snapshot.house_consumption_kw
                );
                CycleOutcome::Baseline
            }
            Some(previous) => {
                let changes = diff::diff(&previous, &snapshot);
                if changes.is_empty() {
                    tracing::debug!("No energy flow changes");
                    CycleOutcome::Unchanged
                } else {
                    self.dispatch(&changes, &snapshot).await;
                    CycleOutcome::Changed(changes)
                }
            }
        };

        self.last = Some(snapshot);
        self.status.send_replace(MonitorStatus {
            health: Health::Healthy,
            snapshot: Some(snapshot),
            consecutive_failures: 0,
            updated_at: Some(Utc::now()),
        });
        outcome
    }

    /// Poll on the configured interval until `shutdown` resolves.
    ///
    /// The first cycle runs immediately. A cycle in flight is abandoned at
    /// its next await point when shutdown fires.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Monitor started (every {}s)", self.interval.as_secs());
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = self.run_cycle() => {}
                    }
                }
            }
        }
        tracing::info!("Monitor stopped");
    }

    /// Fetch once; on failure renew the session and fetch one more time.
    ///
    /// Without a session the renewal comes first, so a cycle never runs more
    /// than one login handshake.
    async fn fetch_with_recovery(&self) -> std::result::Result<EnergyFlowSnapshot, String> {
        if !self.source.is_connected().await {
            tracing::debug!("No portal session, logging in before fetching");
            return self.renew_and_fetch().await;
        }

        let first = match self.source.fetch().await {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) => e,
        };
        if first.is_transport() {
            tracing::warn!("Portal unreachable, renewing session: {first}");
        } else {
            tracing::warn!("Energy flow fetch failed, renewing session: {first}");
        }
        self.renew_and_fetch().await
    }

    async fn renew_and_fetch(&self) -> std::result::Result<EnergyFlowSnapshot, String> {
        if let Err(e) = self.source.renew().await {
            tracing::error!("Session renewal failed: {e}");
            return Err(format!("session renewal failed: {e}"));
        }
        self.source.fetch().await.map_err(|e| {
            tracing::error!("Energy flow fetch failed after renewal: {e}");
            format!("fetch failed after renewal: {e}")
        })
    }

    async fn dispatch(&self, changes: &[Field], snapshot: &EnergyFlowSnapshot) {
        let Some(station_id) = self.source.station_id().await else {
            tracing::warn!("{} change(s) not sent: no station known", changes.len());
            return;
        };

        let notifications =
            build_notifications(&station_id, &self.suffixes, changes, snapshot, Utc::now());
        for n in &notifications {
            tracing::info!("{} {} = {}", n.id, n.property, n.value);
            self.notifier.notify(n).await;
        }
    }

    fn mark_degraded(&self, reason: &str) {
        self.status.send_modify(|status| {
            let since = match &status.health {
                Health::Degraded { since, .. } => *since,
                _ => Utc::now(),
            };
            status.health = Health::Degraded {
                reason: reason.to_string(),
                since,
            };
            status.consecutive_failures += 1;
            status.updated_at = Some(Utc::now());
        });
    }
}
