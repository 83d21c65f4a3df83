//! Terminal rendering shared by the command handlers

use colored::*;
use ferry_core::domain::build::{Build, BuildStatus};
use ferry_core::domain::deployment::{Deployment, DeploymentStatus};
use ferry_core::domain::failure::{FailureKind, Stage};
use ferry_core::domain::log::{LogEntry, LogLevel};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Print a build summary line block
pub fn print_build_summary(build: &Build) {
    println!("  {} Build {}", "▸".cyan(), build.id.to_string().dimmed());
    println!("    Ref:     {} ({})", build.source_ref, build.source.as_str());
    println!("    Status:  {}", colorize_build_status(&build.status));
    println!(
        "    Created: {}",
        build.created_at.format(TIME_FORMAT).to_string().dimmed()
    );
    println!();
}

/// Print detailed build information
pub fn print_build_details(build: &Build) {
    println!("{}", "Build Details:".bold());
    println!("  ID:          {}", build.id.to_string().cyan());
    println!("  Pipeline ID: {}", build.pipeline_id.to_string().dimmed());
    println!("  Ref:         {}", build.source_ref);
    println!("  Source:      {}", build.source.as_str());
    println!("  Status:      {}", colorize_build_status(&build.status));

    if let Some(commit) = &build.commit {
        println!("  Commit:      {}", commit);
    }
    if let (Some(name), Some(tag)) = (&build.image_name, &build.image_tag) {
        println!("  Image:       {}:{}", name, tag);
    }

    print_timing(build.created_at, build.started_at, build.completed_at);
    print_failure(build.failed_stage, build.failure_kind, &build.error_message);
}

pub fn print_deployment_summary(deployment: &Deployment) {
    println!(
        "  {} Deployment {}",
        "▸".cyan(),
        deployment.id.to_string().dimmed()
    );
    println!(
        "    Target:  {}/{} in {}",
        deployment.namespace, deployment.service_name, deployment.environment
    );
    println!(
        "    Status:  {}",
        colorize_deployment_status(&deployment.status)
    );
    if deployment.removed_at.is_some() {
        println!("    {}", "removed".dimmed());
    }
    println!();
}

/// Print detailed deployment information
pub fn print_deployment_details(deployment: &Deployment) {
    println!("{}", "Deployment Details:".bold());
    println!("  ID:          {}", deployment.id.to_string().cyan());
    println!("  Build ID:    {}", deployment.build_id.to_string().dimmed());
    println!("  Environment: {}", deployment.environment);
    println!("  Namespace:   {}", deployment.namespace);
    println!("  Service:     {}", deployment.service_name);
    println!("  Replicas:    {}", deployment.replicas);
    println!("  Image:       {}", deployment.image);
    if let Some(host) = &deployment.ingress_host {
        println!("  Host:        {}", host);
    }
    println!(
        "  Status:      {}",
        colorize_deployment_status(&deployment.status)
    );
    if deployment.rollback_count > 0 {
        println!("  Rollbacks:   {}", deployment.rollback_count);
    }
    if let Some(removed) = deployment.removed_at {
        println!("  Removed:     {}", removed.format(TIME_FORMAT));
    }

    print_timing(
        deployment.created_at,
        deployment.started_at,
        deployment.completed_at,
    );
    print_failure(
        deployment.failed_stage,
        deployment.failure_kind,
        &deployment.error_message,
    );
}

fn print_timing(
    created: chrono::DateTime<chrono::Utc>,
    started: Option<chrono::DateTime<chrono::Utc>>,
    completed: Option<chrono::DateTime<chrono::Utc>>,
) {
    println!("  Created:     {}", created.format(TIME_FORMAT));
    if let Some(started) = started {
        println!("  Started:     {}", started.format(TIME_FORMAT));
    }
    if let Some(completed) = completed {
        println!("  Completed:   {}", completed.format(TIME_FORMAT));
        if let Some(started) = started {
            let seconds = completed.signed_duration_since(started).num_seconds();
            println!("  Duration:    {}s", seconds);
        }
    }
}

fn print_failure(stage: Option<Stage>, kind: Option<FailureKind>, message: &Option<String>) {
    if stage.is_none() && message.is_none() {
        return;
    }

    println!("\n{}", "Failure:".bold());
    if let Some(stage) = stage {
        println!("  Stage: {}", stage);
    }
    if let Some(kind) = kind {
        println!("  Kind:  {}", kind);
    }
    if let Some(message) = message {
        println!("  {}", message.red());
    }
}

/// Print a log entry
pub fn print_log_entry(log: &LogEntry) {
    let level_str = log.level.as_str().to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "{} [{}] {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message
    );
}

pub fn print_log_block(title: &str, logs: &[LogEntry]) {
    if logs.is_empty() {
        println!("{}", "No logs found.".yellow());
        return;
    }

    println!("{}", title.bold());
    println!("{}", "─".repeat(80).dimmed());
    for log in logs {
        print_log_entry(log);
    }
    println!("{}", "─".repeat(80).dimmed());
}

/// Entries of `logs` after the last one already printed
///
/// The log keeps only its newest entries, so the cut point is found by value
/// rather than by position. When the last printed entry has been evicted the
/// whole slice is new.
pub fn unseen<'a>(logs: &'a [LogEntry], last_printed: Option<&LogEntry>) -> &'a [LogEntry] {
    match last_printed.and_then(|last| logs.iter().rposition(|entry| entry == last)) {
        Some(position) => &logs[position + 1..],
        None => logs,
    }
}

/// Colorize build status for display
pub fn colorize_build_status(status: &BuildStatus) -> ColoredString {
    let status_str = status.as_str();
    match status {
        BuildStatus::Pending => status_str.yellow(),
        BuildStatus::Cloning | BuildStatus::Building | BuildStatus::Pushing => status_str.cyan(),
        BuildStatus::Success => status_str.green(),
        BuildStatus::Failed => status_str.red(),
        BuildStatus::Cancelled => status_str.dimmed(),
    }
}

pub fn colorize_deployment_status(status: &DeploymentStatus) -> ColoredString {
    let status_str = status.as_str();
    match status {
        DeploymentStatus::Pending => status_str.yellow(),
        DeploymentStatus::Applying
        | DeploymentStatus::RollbackRequested
        | DeploymentStatus::RollingBack => status_str.cyan(),
        DeploymentStatus::Success => status_str.green(),
        DeploymentStatus::Failed => status_str.red(),
        DeploymentStatus::Cancelled => status_str.dimmed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp: chrono::Utc::now(),
            level: LogLevel::Info,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_unseen_continues_after_last_printed() {
        let logs = vec![entry("clone"), entry("build"), entry("push")];

        assert_eq!(unseen(&logs, None).len(), 3);
        assert_eq!(unseen(&logs, Some(&logs[1])), &logs[2..]);
        assert!(unseen(&logs, Some(&logs[2])).is_empty());
    }

    #[test]
    fn test_unseen_after_eviction_prints_everything() {
        let evicted = entry("evicted");
        let logs = vec![entry("build"), entry("push")];
        assert_eq!(unseen(&logs, Some(&evicted)).len(), 2);
    }
}
