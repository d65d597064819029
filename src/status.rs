// System status display: cursor position, last poll, cache size, models.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;

use crate::analysis::download::{missing_models, MODEL_FILES};
use crate::analysis::VectorIndex;
use crate::cursor::CursorStore;

/// Display system status to the terminal.
pub async fn show(
    cursor_store: &Arc<dyn CursorStore>,
    cursor_location: &str,
    index: &Arc<dyn VectorIndex>,
    model_dir: &Path,
) -> Result<()> {
    match cursor_store.load().await? {
        Some(cursor) => println!("Cursor: {} ({})", cursor, cursor_location),
        None => {
            println!("Cursor: not set ({})", cursor_location);
            println!("  The first `sentinel run` starts after the newest mention");
        }
    }

    match cursor_store.last_poll().await? {
        Some(at) => println!("Last poll: {at} UTC"),
        None => println!("Last poll: never"),
    }

    // The cache is optional, so an unreachable index is reported, not fatal.
    let cache_line = match index.point_count().await {
        Ok(count) => format!("{} cached verdicts", count),
        Err(e) => format!("unavailable ({e})").yellow().to_string(),
    };
    println!("Verdict cache: {} [{}]", cache_line, index.describe());

    let missing = missing_models(model_dir);
    println!(
        "Models: {}/{} present in {}",
        MODEL_FILES.len() - missing.len(),
        MODEL_FILES.len(),
        model_dir.display()
    );
    for model in &missing {
        println!("  missing: {} ({})", model.file, model.label);
    }
    if !missing.is_empty() {
        println!(
            "  {}",
            "Run `sentinel download-model` to fetch them.".dimmed()
        );
    }

    Ok(())
}
