//! One pass of the recurring-plan executor.
//!
//! The recurrence source and the user-facing notifications live outside the
//! crate; a pass only decides which open instances get a transaction and
//! which need a confirmation.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rusqlite::Connection;
use serde::Deserialize;

use crate::error::{LedgerError, Result};
use crate::templates::{apply_template, template_for_open_instance, ApplyOutcome};

/// Delay between two passes, in seconds.
pub const INTERVAL_SECS: i64 = 6 * 60 * 60;
/// How far back the first pass looks.
pub const LOOKBACK_SECS: i64 = 24 * 60 * 60;
/// Overlap with the previous window so plans created during a pass are not missed.
pub const OVERLAP_SECS: i64 = 5 * 60;

/// One occurrence of a recurring plan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlanInstance {
    pub plan_id: i64,
    pub instance_id: i64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub begin: DateTime<Utc>,
}

/// Where plan occurrences come from.
pub trait InstanceSource {
    fn instances(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<PlanInstance>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanEvent {
    Applied {
        template_id: i64,
        instance_id: i64,
        transaction_id: i64,
    },
    SaveFailed {
        template_id: i64,
        instance_id: i64,
        reason: String,
    },
    /// The template wants the user to confirm before anything is written.
    ConfirmationRequested {
        template_id: i64,
        instance_id: i64,
        date: DateTime<Utc>,
    },
}

pub trait Notifier {
    fn notify(&self, event: &PlanEvent);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub events: Vec<PlanEvent>,
    /// Instances whose template was missing or already dealt with.
    pub already_handled: usize,
    /// New value for the persisted last-execution time; `None` if the pass did not run.
    pub last_execution: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

pub struct PlanExecutor<S, N> {
    source: S,
    notifier: N,
}

impl<S: InstanceSource, N: Notifier> PlanExecutor<S, N> {
    pub fn new(source: S, notifier: N) -> Self {
        Self { source, notifier }
    }

    /// Run one pass covering `[last_execution - OVERLAP_SECS, now]`.
    ///
    /// An unreachable source is reported as `ExternalResourceUnavailable`; the
    /// caller keeps its old `last_execution` so the next pass covers the gap.
    pub fn run_pass(
        &self,
        conn: &Connection,
        last_execution: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<PassReport> {
        let window_start =
            last_execution.unwrap_or(now - Duration::seconds(LOOKBACK_SECS)) - Duration::seconds(OVERLAP_SECS);
        let mut report = PassReport {
            window_start,
            window_end: now,
            events: Vec::new(),
            already_handled: 0,
            last_execution: None,
            next_run: None,
        };
        if now < window_start {
            warn!("clock is behind the last plan execution ({window_start}), not executing plans");
            return Ok(report);
        }
        info!("executing plans from {window_start} to {now}");

        let instances = self.source.instances(window_start, now).map_err(|e| match e {
            LedgerError::ExternalResourceUnavailable(_) => e,
            other => LedgerError::ExternalResourceUnavailable(other.to_string()),
        })?;

        for instance in instances {
            debug!("found instance {} of plan {}", instance.instance_id, instance.plan_id);
            let Some(template) = template_for_open_instance(conn, instance.plan_id, instance.instance_id)? else {
                debug!("instance {} has no open template", instance.instance_id);
                report.already_handled += 1;
                continue;
            };
            let event = if template.plan_execution_automatic {
                match apply_template(conn, template.id, instance.instance_id, instance.begin)? {
                    ApplyOutcome::Saved(transaction_id) => PlanEvent::Applied {
                        template_id: template.id,
                        instance_id: instance.instance_id,
                        transaction_id,
                    },
                    ApplyOutcome::SaveFailed(reason) => PlanEvent::SaveFailed {
                        template_id: template.id,
                        instance_id: instance.instance_id,
                        reason,
                    },
                }
            } else {
                PlanEvent::ConfirmationRequested {
                    template_id: template.id,
                    instance_id: instance.instance_id,
                    date: instance.begin,
                }
            };
            self.notifier.notify(&event);
            report.events.push(event);
        }

        report.last_execution = Some(now);
        report.next_run = Some(now + Duration::seconds(INTERVAL_SECS));
        Ok(report)
    }
}
