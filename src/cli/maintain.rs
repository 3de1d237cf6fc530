//! Maintain command for cortex.
//!
//! Runs deduplication and pruning on demand or by schedule, and reports
//! scheduler status. Each invocation is a fresh process, so last-run times
//! are recovered from the maintenance events in `events.log`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::{render, Workspace};
use crate::error::Result;
use crate::maintenance::{MaintenanceResult, MaintenanceScheduler, MaintenanceStatus, MaintenanceTask};
use crate::stats::{EventKind, EventLog};

/// Actions available in maintain.
#[derive(Debug, Clone, PartialEq)]
pub enum MaintainAction {
    /// Run the named tasks now (full when empty).
    Run { tasks: Vec<String> },
    /// Run whatever the schedules say is due.
    Due,
    /// Show schedules and last runs.
    Status,
}

/// Options for the maintain command.
#[derive(Debug, Clone, Default)]
pub struct MaintainOptions {
    pub json: bool,
    pub quiet: bool,
    /// Run even when maintenance is disabled.
    pub force: bool,
}

/// Output format for the maintain command.
#[derive(Debug, Clone, Serialize)]
pub struct MaintainOutput {
    pub success: bool,
    pub action: String,
    pub results: Vec<MaintenanceResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MaintenanceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MaintainOutput {
    pub fn ran(action: &str, results: Vec<MaintenanceResult>) -> Self {
        Self {
            success: results.iter().all(|r| r.success),
            action: action.to_string(),
            results,
            status: None,
            error: None,
        }
    }

    pub fn status(status: MaintenanceStatus) -> Self {
        Self {
            success: true,
            action: "status".to_string(),
            results: Vec::new(),
            status: Some(status),
            error: None,
        }
    }

    pub fn failure(action: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            action: action.to_string(),
            results: Vec::new(),
            status: None,
            error: Some(error.into()),
        }
    }
}

/// Latest maintenance timestamps per task found in the event log.
fn last_runs(events: &EventLog) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
    let mut last_dedup = None;
    let mut last_prune = None;
    for event in events.read_all()? {
        if let EventKind::Maintenance { task, .. } = &event.data {
            let slot = if task == MaintenanceTask::Prune.as_str() {
                &mut last_prune
            } else {
                &mut last_dedup
            };
            if slot.is_none_or(|t| event.ts > t) {
                *slot = Some(event.ts);
            }
        }
    }
    Ok((last_dedup, last_prune))
}

/// The maintain command implementation.
pub struct MaintainCommand {
    scheduler: Result<MaintenanceScheduler>,
    events: Arc<EventLog>,
}

impl MaintainCommand {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            scheduler: workspace.scheduler(),
            events: Arc::clone(workspace.events()),
        }
    }

    pub async fn run(&self, action: &MaintainAction, options: &MaintainOptions) -> MaintainOutput {
        let name = match action {
            MaintainAction::Run { .. } => "run",
            MaintainAction::Due => "due",
            MaintainAction::Status => "status",
        };
        let scheduler = match &self.scheduler {
            Ok(scheduler) => scheduler,
            Err(e) => return MaintainOutput::failure(name, e.to_string()),
        };
        match self.execute(scheduler, action, options).await {
            Ok(output) => output,
            Err(e) => MaintainOutput::failure(name, e.to_string()),
        }
    }

    async fn execute(
        &self,
        scheduler: &MaintenanceScheduler,
        action: &MaintainAction,
        options: &MaintainOptions,
    ) -> Result<MaintainOutput> {
        let (last_dedup, last_prune) = last_runs(&self.events)?;
        scheduler.set_last_runs(last_dedup, last_prune);

        match action {
            MaintainAction::Run { tasks } => {
                let tasks = tasks
                    .iter()
                    .map(|t| t.parse::<MaintenanceTask>())
                    .collect::<Result<Vec<_>>>()?;
                let results = scheduler.run_maintenance(&tasks, options.force).await?;
                Ok(MaintainOutput::ran("run", results))
            }
            MaintainAction::Due => {
                let results = scheduler.run_due(Utc::now()).await;
                Ok(MaintainOutput::ran("due", results))
            }
            MaintainAction::Status => Ok(MaintainOutput::status(scheduler.status())),
        }
    }

    pub fn format_output(&self, output: &MaintainOutput, options: &MaintainOptions) -> String {
        render(output, options.json, options.quiet, format_human_readable)
    }
}

fn format_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn format_human_readable(output: &MaintainOutput) -> String {
    if let Some(error) = &output.error {
        if output.results.is_empty() {
            return format!("Maintenance failed: {}", error);
        }
    }

    let mut lines = Vec::new();
    if let Some(status) = &output.status {
        lines.push(format!(
            "Maintenance {}",
            if status.enabled { "enabled" } else { "disabled" }
        ));
        lines.push(format!(
            "  deduplicate: {} (last {}, next {})",
            status.dedup_schedule,
            format_time(status.last_dedup),
            status
                .next_dedup
                .map(|t| format_time(Some(t)))
                .unwrap_or_else(|| "on demand".to_string())
        ));
        lines.push(format!(
            "  prune:       {} (last {}, next {})",
            status.prune_schedule,
            format_time(status.last_prune),
            status
                .next_prune
                .map(|t| format_time(Some(t)))
                .unwrap_or_else(|| "on demand".to_string())
        ));
        return lines.join("\n");
    }

    if output.results.is_empty() {
        return "Nothing due.".to_string();
    }
    for result in &output.results {
        let mut line = format!(
            "{}: removed {} duplicate(s), pruned {} bullet(s) in {}ms",
            result.task.as_str(),
            result.duplicates_removed,
            result.bullets_pruned,
            result.duration_ms
        );
        if let Some(error) = &result.error {
            line.push_str(&format!(" (errors: {})", error));
        }
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::workspace::tests::test_workspace;
    use crate::config::Config;
    use crate::core::{BulletKind, Pool};
    use crate::memory::NewBullet;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_full() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        for text in ["Use feature flags", "use feature flags"] {
            ws.store()
                .add(NewBullet::new(text, Pool::Left, BulletKind::Heuristic))
                .await
                .unwrap();
        }

        let cmd = MaintainCommand::new(&ws);
        let action = MaintainAction::Run { tasks: Vec::new() };
        let output = cmd.run(&action, &MaintainOptions::default()).await;

        assert!(output.success);
        assert_eq!(output.results.len(), 2);
        assert_eq!(output.results[0].task, MaintenanceTask::Deduplicate);
        assert_eq!(output.results[0].duplicates_removed, 1);
        assert_eq!(output.results[1].task, MaintenanceTask::Prune);
    }

    #[tokio::test]
    async fn test_run_unknown_task() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);
        let action = MaintainAction::Run {
            tasks: vec!["vacuum".to_string()],
        };
        let output = MaintainCommand::new(&ws)
            .run(&action, &MaintainOptions::default())
            .await;
        assert!(!output.success);
    }

    #[tokio::test]
    async fn test_disabled_needs_force() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.memory.data_dir = Some(temp.path().to_path_buf());
        config.maintenance.enabled = false;
        let ws = Workspace::open(config).unwrap();

        let cmd = MaintainCommand::new(&ws);
        let action = MaintainAction::Run {
            tasks: vec!["prune".to_string()],
        };
        assert!(!cmd.run(&action, &MaintainOptions::default()).await.success);

        let forced = MaintainOptions {
            force: true,
            ..Default::default()
        };
        let output = cmd.run(&action, &forced).await;
        assert!(output.success);
        assert_eq!(output.results.len(), 1);
    }

    #[tokio::test]
    async fn test_due_remembers_last_runs() {
        let temp = TempDir::new().unwrap();
        let ws = test_workspace(&temp);

        let first = MaintainCommand::new(&ws)
            .run(&MaintainAction::Due, &MaintainOptions::default())
            .await;
        assert_eq!(first.results.len(), 2);

        // A new process sees the runs in the event log.
        let cmd = MaintainCommand::new(&ws);
        let second = cmd.run(&MaintainAction::Due, &MaintainOptions::default()).await;
        assert!(second.results.is_empty());
        assert_eq!(
            cmd.format_output(&second, &MaintainOptions::default()),
            "Nothing due."
        );

        let status = cmd
            .run(&MaintainAction::Status, &MaintainOptions::default())
            .await
            .status
            .unwrap();
        assert!(status.last_dedup.is_some());
        assert!(status.next_prune.is_some());
    }
}
