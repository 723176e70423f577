use std::path::PathBuf;

use chrono::{DateTime, Utc};
use colored::Colorize;

use pocketledger::error::{LedgerError, Result};
use pocketledger::models::instant_from_secs;
use pocketledger::planner::{InstanceSource, Notifier, PlanEvent, PlanExecutor, PlanInstance};
use pocketledger::settings::save_settings;

use super::open_store;

/// Plan instances exported to a JSON file by the calendar side.
struct JsonInstances {
    path: PathBuf,
}

impl InstanceSource for JsonInstances {
    fn instances(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<PlanInstance>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            LedgerError::ExternalResourceUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        let all: Vec<PlanInstance> = serde_json::from_str(&content)?;
        Ok(all
            .into_iter()
            .filter(|instance| instance.begin >= from && instance.begin <= to)
            .collect())
    }
}

struct PrintNotifier;

impl Notifier for PrintNotifier {
    fn notify(&self, event: &PlanEvent) {
        match event {
            PlanEvent::Applied {
                template_id,
                instance_id,
                transaction_id,
            } => println!(
                "{} template {template_id}, instance {instance_id} -> transaction {transaction_id}",
                "applied".green()
            ),
            PlanEvent::SaveFailed {
                template_id,
                instance_id,
                reason,
            } => println!(
                "{} template {template_id}, instance {instance_id}: {reason}",
                "failed".red()
            ),
            PlanEvent::ConfirmationRequested {
                template_id,
                instance_id,
                date,
            } => println!(
                "{} template {template_id}, instance {instance_id} due {}",
                "confirm".yellow(),
                date.format("%Y-%m-%d %H:%M")
            ),
        }
    }
}

pub fn run(instances: &str) -> anyhow::Result<()> {
    let (mut settings, store) = open_store()?;
    let executor = PlanExecutor::new(
        JsonInstances {
            path: PathBuf::from(instances),
        },
        PrintNotifier,
    );
    let last = settings.planner_last_execution.map(instant_from_secs);
    let report = executor.run_pass(store.conn(), last, Utc::now())?;

    let Some(executed) = report.last_execution else {
        println!("System clock is behind the last execution; no plans were executed.");
        return Ok(());
    };
    settings.planner_last_execution = Some(executed.timestamp());
    save_settings(&settings)?;

    println!(
        "Window {} .. {}: {} event(s), {} already handled",
        report.window_start.format("%Y-%m-%d %H:%M"),
        report.window_end.format("%Y-%m-%d %H:%M"),
        report.events.len(),
        report.already_handled
    );
    if let Some(next) = report.next_run {
        println!("Next pass due {}", next.format("%Y-%m-%d %H:%M"));
    }
    Ok(())
}
