//! Failures command - list error-sink records.

use anyhow::Context;
use comfy_table::{Table, presets::UTF8_BORDERS_ONLY};

use super::resolve;
use crate::config::Settings;
use crate::output::{ErrorSink, FailureRecord};

pub fn run(settings: &Settings, limit: Option<usize>, json: bool) -> anyhow::Result<()> {
    let paths = resolve(settings)?;
    let sink = ErrorSink::new(
        &paths.error_dir,
        &paths.watch_root,
        settings.worker.copy_failed_inputs,
    );
    let mut records = sink
        .list()
        .with_context(|| format!("Cannot read {}", paths.error_dir.display()))?;
    if let Some(limit) = limit {
        records.truncate(limit);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No failures recorded in {}", paths.error_dir.display());
        return Ok(());
    }
    println!("{}", render_table(&records));
    println!("{} failure(s). Fix the cause and touch the input to retry.", records.len());
    Ok(())
}

fn render_table(records: &[FailureRecord]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Failed at (UTC)", "Input", "Kind", "Page", "Detail"]);
    for record in records {
        let input = record.relative.as_ref().unwrap_or(&record.input);
        table.add_row(vec![
            record.failed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            input.display().to_string(),
            record.kind.to_string(),
            record.page.map(|p| (p + 1).to_string()).unwrap_or_default(),
            record.detail.clone(),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::FailureKind;
    use chrono::Utc;
    use std::path::PathBuf;

    #[test]
    fn test_table_shows_relative_path_and_one_based_page() {
        let record = FailureRecord {
            input: PathBuf::from("/srv/in/dept/a.pdf"),
            relative: Some(PathBuf::from("dept/a.pdf")),
            kind: FailureKind::Timeout,
            detail: "Recognition timed out after 900s".to_string(),
            page: Some(0),
            failed_at: Utc::now(),
            state: None,
            copy: None,
        };
        let rendered = render_table(&[record]).to_string();
        assert!(rendered.contains("dept/a.pdf"));
        assert!(!rendered.contains("/srv/in"));
        assert!(rendered.contains("timeout"));
    }
}
