//! Schedule ticker
//!
//! Every `schedule_interval` the ticker looks at the active schedule
//! triggers and submits a schedule-sourced build for each one whose cron
//! expression fired in `(last_tick, now]`. A busy pipeline skips the tick.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use ferry_core::domain::build::BuildSource;
use ferry_core::domain::trigger::Trigger;

use super::dispatcher::Dispatcher;
use crate::error::{AdmissionError, OrchestratorError};
use crate::repository::Store;

pub struct ScheduleTicker {
    store: Arc<dyn Store>,
    dispatcher: Arc<Dispatcher>,
    interval: std::time::Duration,
}

impl ScheduleTicker {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<Dispatcher>,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            interval,
        }
    }

    /// Ticks forever; spawned once at startup
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        let mut last_tick = Utc::now();
        tracing::info!(
            "Schedule ticker started (every {}s)",
            self.interval.as_secs()
        );

        loop {
            interval.tick().await;
            let now = Utc::now();
            self.tick(last_tick, now).await;
            last_tick = now;
        }
    }

    /// Submits builds for triggers due in `(since, now]`; returns how many
    /// were accepted
    pub async fn tick(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> usize {
        let triggers = match self.store.list_active_schedule_triggers().await {
            Ok(triggers) => triggers,
            Err(e) => {
                tracing::error!("Failed to load schedule triggers: {}", e);
                return 0;
            }
        };

        let mut accepted = 0;
        for trigger in triggers {
            if !is_due(&trigger, since, now) {
                continue;
            }
            if self.fire(&trigger).await {
                accepted += 1;
            }
        }
        accepted
    }

    async fn fire(&self, trigger: &Trigger) -> bool {
        let Some(git_ref) = trigger.scheduled_ref() else {
            tracing::warn!("Schedule trigger {} has no concrete ref, skipped", trigger.id);
            return false;
        };

        match self
            .dispatcher
            .submit(trigger.pipeline_id, git_ref, BuildSource::Schedule, None)
            .await
        {
            Ok(build) => {
                tracing::info!(
                    "Scheduled build {} started by trigger {}",
                    build.id,
                    trigger.id
                );
                true
            }
            Err(OrchestratorError::Admission(AdmissionError::Busy(reason))) => {
                tracing::info!("Schedule trigger {} skipped: {}", trigger.id, reason);
                false
            }
            Err(e) => {
                tracing::warn!("Schedule trigger {} rejected: {}", trigger.id, e);
                false
            }
        }
    }
}

/// Whether the trigger's cron expression has an occurrence in `(since, now]`
pub fn is_due(trigger: &Trigger, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let Some(expression) = trigger.schedule.as_deref() else {
        return false;
    };

    match Schedule::from_str(expression) {
        Ok(schedule) => schedule
            .after(&since)
            .take_while(|t| *t <= now)
            .next()
            .is_some(),
        Err(e) => {
            tracing::warn!(
                "Schedule trigger {} has an invalid cron expression '{}': {}",
                trigger.id,
                expression,
                e
            );
            false
        }
    }
}
