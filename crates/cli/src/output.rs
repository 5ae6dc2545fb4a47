//! Plain-text rendering for the command line.

use cleanflow_client::upload::UploadEvent;
use cleanflow_core::batch::Batch;
use cleanflow_core::diff::DiffStatus;
use cleanflow_core::progress::ProgressSnapshot;
use cleanflow_core::record::{Record, RecordPage, ValidationResult, EDITABLE_FIELDS};
use cleanflow_core::version::RecordVersion;

pub fn print_batch(batch: &Batch) {
    println!(
        "#{:<6} {:<10} {:>7}/{:<7} ok {:<7} failed {:<7} {}  {}",
        batch.id,
        batch.status.as_str(),
        batch.processed_rows,
        batch.total_rows,
        batch.success_count,
        batch.failure_count,
        batch.created_at.format("%Y-%m-%d %H:%M"),
        batch.original_filename,
    );
}

pub fn print_snapshot(snapshot: &ProgressSnapshot) {
    let percent = snapshot
        .percent
        .map_or_else(|| "--".to_string(), |p| format!("{p:>3}%"));
    let phase = if snapshot.indexing { " (indexing)" } else { "" };
    println!(
        "{:<10}{phase} {percent} {}/{} ok {} failed {} {:.1} rows/s eta {}s",
        snapshot.status.as_str(),
        snapshot.processed,
        snapshot.total,
        snapshot.success,
        snapshot.failed,
        snapshot.speed,
        snapshot.eta,
    );
    if let Some(error) = &snapshot.error {
        println!("  error: {error}");
    }
}

pub fn print_upload_event(event: &UploadEvent) {
    match event {
        UploadEvent::Checked { exists: true } => println!("Content already on server, skipping transfer"),
        UploadEvent::Checked { exists: false } => println!("Uploading file"),
        UploadEvent::Progress { percent } => println!("  {percent:>3}%"),
        UploadEvent::Created { batch_id, instant } => {
            let how = if *instant { " (instant)" } else { "" };
            println!("Created batch #{batch_id}{how}");
        }
    }
}

pub fn print_record(record: &Record) {
    let values: Vec<&str> = EDITABLE_FIELDS
        .iter()
        .filter_map(|field| record.fields.get(field))
        .collect();
    println!(
        "#{:<6} row {:<6} {:<8} {}",
        record.id,
        record.row_index,
        record.status.as_str(),
        values.join(" | "),
    );
    if !record.error_message.is_empty() {
        println!("         {}", record.error_message);
    }
}

pub fn print_page(page: &RecordPage) {
    for record in &page.data {
        print_record(record);
    }
    println!("{} of {} matching records", page.data.len(), page.total);
}

pub fn print_validation(result: &ValidationResult) {
    println!("Status: {} -> {}", result.current_status, result.new_status);
    if !result.new_error.is_empty() {
        println!("Errors after edit: {}", result.new_error);
    }
    if let Some(values) = &result.cleaned_values {
        for (field, value) in values {
            println!("  {field} = {value}");
        }
    }
}

pub fn print_history(versions: &[RecordVersion]) {
    if versions.is_empty() {
        println!("No versions");
        return;
    }
    for version in versions {
        println!(
            "v{} {} {}",
            version.id,
            version.changed_at.format("%Y-%m-%d %H:%M:%S"),
            version.reason,
        );
        for diff in version.diff().iter().filter(|d| d.status != DiffStatus::Unchanged) {
            println!(
                "    {:<9} {:<9} {} -> {}",
                diff.field,
                diff.status.as_str(),
                diff.before.as_deref().unwrap_or("-"),
                diff.after.as_deref().unwrap_or("-"),
            );
        }
    }
}
