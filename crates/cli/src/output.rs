use crate::error::CliError;
use engine_core::{progress::ProgressReport, staging::StagedFile};
use model::execution::checkpoint::Checkpoint;
use serde::Serialize;
use std::path::Path;

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Reads the checkpoint stored at `path`; a missing file means no migration
/// has started yet.
pub async fn read_checkpoint(path: &Path) -> Result<Option<Checkpoint>, CliError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(Checkpoint::from_bytes(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub async fn write_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<(), CliError> {
    tokio::fs::write(path, checkpoint.to_bytes()?).await?;
    Ok(())
}

pub fn print_progress_table(report: &ProgressReport) {
    println!("Migration of '{}' ({})", report.target, report.process_id);
    println!("-----------------------------");
    println!("{:<16} {}", "Stage", report.stage);
    println!(
        "{:<16} {}",
        "Current task",
        report
            .current_task
            .as_ref()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    if let Some(label) = &report.label {
        println!("{:<16} {}", "Label", label);
    }
    println!("{:<16} {}", "Invocations", report.invocations);
    println!("{:<16} {}", "Diff detected", report.diff_detected);
    println!("{:<16} {}", "Failures", report.failures);
    for task in &report.tasks {
        println!(
            "  {:<24} leftoff={} updated={} skipped={}",
            task.task_id.as_str(),
            task.leftoff,
            task.updated_count,
            task.skipped_count
        );
    }
}

pub fn print_staging(files: &[StagedFile]) {
    for file in files {
        println!("{:>12}  {}", file.size, file.path.display());
    }
    let total: u64 = files.iter().map(|f| f.size).sum();
    println!("{:>12}  total ({} files)", total, files.len());
}
