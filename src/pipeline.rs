//! Batch job: atlas once, then each file loaded, clustered, labelled and reported in turn

use crate::atlas::loader::load_atlas;
use crate::clusters::table::extract_from_volume;
use crate::clusters::threshold::z_threshold;
use crate::regions::annotate_table;
use crate::report::builder::ReportBatch;
use crate::report::render::SliceRenderer;
use crate::structs::{JobConfig, Result, RunSummary};
use crate::volume::load_volume;

/// Run one job.
///
/// Files are processed in order, each one completely before the next. A file
/// that cannot be read or reported on is recorded in the summary and the rest
/// of the batch continues.
///
/// # Errors
/// Returns error if the atlas is unsupported or cannot be loaded, or the
/// settings are invalid; no file is processed in that case
pub fn run(job: &JobConfig, renderer: &dyn SliceRenderer) -> Result<RunSummary> {
    let atlas = load_atlas(&job.atlas, &job.atlas_dir)?;
    z_threshold(&job.report.threshold)?;
    tracing::info!(
        "Loaded atlas {} ({} labels)",
        atlas.name,
        atlas.label_count()
    );

    let mut batch = ReportBatch::new(atlas.name, &job.report, renderer)?;

    for (i, path) in job.files.iter().enumerate() {
        tracing::info!("[{}/{}] {}", i + 1, job.files.len(), path.display());

        batch.write_or_record(path, |batch| {
            let volume = load_volume(path)?;
            let mut table = extract_from_volume(path, &volume, &job.report.threshold)?;
            if table.is_empty() {
                tracing::info!("{}: no clusters survived thresholding", path.display());
            }
            annotate_table(&mut table, &atlas);
            batch.write(&table, path, &volume)
        });
    }

    let outcome = batch.finish();
    let summary = RunSummary {
        atlas: atlas.name.to_string(),
        reports: outcome.written,
        file_failures: outcome.file_failures,
        render_failures: outcome.render_failures,
    };

    if summary.has_file_failures() {
        tracing::warn!(
            "{} of {} file(s) failed",
            summary.file_failures.len(),
            job.files.len()
        );
    }

    Ok(summary)
}
