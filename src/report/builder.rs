//! Report writers: one narrative report and one table per source volume

use super::html::{render_report, render_table, ClusterView, ReportMeta, SliceImage};
use super::render::SliceRenderer;
use crate::clusters::threshold::z_threshold;
use crate::structs::{
    AtlasName, BuildOutcome, ClusterRecord, ClusterTable, FileFailure, InsightError,
    RenderFailure, ReportFiles, ReportSettings, Result, Volume,
};
use crate::volume::load_volume;
use base64::Engine as _;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Write reports for every table, pairing `tables[i]` with `sources[i]`.
///
/// A source that cannot be loaded or written is recorded as a file failure and
/// the remaining sources are still processed.
///
/// # Errors
/// Returns `Config` if the table and source counts differ or the threshold is invalid
#[allow(dead_code)]
pub fn build_reports(
    atlas: AtlasName,
    tables: &[ClusterTable],
    sources: &[PathBuf],
    settings: &ReportSettings,
    renderer: &dyn SliceRenderer,
) -> Result<BuildOutcome> {
    if tables.len() != sources.len() {
        return Err(InsightError::Config(format!(
            "{} cluster tables but {} source files",
            tables.len(),
            sources.len()
        )));
    }

    let mut batch = ReportBatch::new(atlas, settings, renderer)?;
    for (table, source) in tables.iter().zip(sources) {
        batch.write_or_record(source, |batch| {
            let volume = load_volume(source)?;
            batch.write(table, source, &volume)
        });
    }

    Ok(batch.finish())
}

/// Reports for a run of sources sharing one atlas and one set of settings.
///
/// Every written path is remembered: a later source that maps onto the same
/// report fails instead of overwriting it.
pub struct ReportBatch<'a> {
    atlas: AtlasName,
    settings: &'a ReportSettings,
    renderer: &'a dyn SliceRenderer,
    written_by: HashMap<PathBuf, PathBuf>,
    outcome: BuildOutcome,
}

impl<'a> ReportBatch<'a> {
    /// # Errors
    /// Returns `Config` if the threshold is invalid
    pub fn new(
        atlas: AtlasName,
        settings: &'a ReportSettings,
        renderer: &'a dyn SliceRenderer,
    ) -> Result<Self> {
        z_threshold(&settings.threshold)?;
        Ok(Self {
            atlas,
            settings,
            renderer,
            written_by: HashMap::new(),
            outcome: BuildOutcome::default(),
        })
    }

    /// Run `step` for `source` and record what it wrote, or its error as a file failure
    pub fn write_or_record<F>(&mut self, source: &Path, step: F)
    where
        F: FnOnce(&mut Self) -> Result<(ReportFiles, Vec<RenderFailure>)>,
    {
        match step(self) {
            Ok((files, failures)) => {
                self.outcome.written.push(files);
                self.outcome.render_failures.extend(failures);
            }
            Err(e) => {
                tracing::error!("{}: {e}", source.display());
                self.outcome.file_failures.push(FileFailure {
                    path: source.to_path_buf(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Write one source's report after checking no earlier source claimed its paths.
    ///
    /// # Errors
    /// Returns `OutputCollision` for a path written earlier in the batch, or any
    /// error from [`build_report`]
    pub fn write(
        &mut self,
        table: &ClusterTable,
        source: &Path,
        volume: &Volume,
    ) -> Result<(ReportFiles, Vec<RenderFailure>)> {
        let (report, table_path) = report_paths(source, self.atlas, self.settings);
        for path in [&report, &table_path] {
            if let Some(previous) = self.written_by.get(path) {
                return Err(InsightError::OutputCollision {
                    path: path.clone(),
                    previous: previous.clone(),
                });
            }
        }
        self.written_by.insert(report, source.to_path_buf());
        self.written_by.insert(table_path, source.to_path_buf());

        build_report(self.atlas, table, source, volume, self.settings, self.renderer)
    }

    #[must_use]
    pub fn finish(self) -> BuildOutcome {
        self.outcome
    }
}

/// Write the report and table for one source whose volume is already loaded.
///
/// Slice rendering failures are embedded as placeholders and returned, never
/// propagated.
///
/// # Errors
/// Returns error if the threshold is invalid or the files cannot be written
pub fn build_report(
    atlas: AtlasName,
    table: &ClusterTable,
    source: &Path,
    volume: &Volume,
    settings: &ReportSettings,
    renderer: &dyn SliceRenderer,
) -> Result<(ReportFiles, Vec<RenderFailure>)> {
    let z = z_threshold(&settings.threshold)?;
    let rows = sorted_by_size(&table.rows);

    let mut failures = Vec::new();
    let views: Vec<ClusterView<'_>> = rows
        .iter()
        .map(|&record| {
            let image = match renderer.render(volume, record.coordinate(), z) {
                Ok(png) => SliceImage::Png(base64::engine::general_purpose::STANDARD.encode(png)),
                Err(e) => {
                    tracing::warn!(
                        "{} cluster {}: slice image failed: {e}",
                        source.display(),
                        record.id
                    );
                    failures.push(RenderFailure {
                        source: source.to_path_buf(),
                        cluster_id: record.id.clone(),
                        reason: e.to_string(),
                    });
                    SliceImage::Failed(e.to_string())
                }
            };
            ClusterView { record, image }
        })
        .collect();

    let meta = ReportMeta {
        source_name: file_name(source),
        atlas,
        alpha: settings.threshold.alpha,
        z_threshold: z,
        two_sided: settings.threshold.two_sided,
    };

    let (report, table_path) = report_paths(source, atlas, settings);
    if let Some(dir) = report.parent() {
        fs::create_dir_all(dir)?;
    }

    fs::write(&report, render_report(&meta, &views))?;
    let sorted: Vec<ClusterRecord> = rows.into_iter().cloned().collect();
    fs::write(&table_path, render_table(&meta, &sorted))?;

    tracing::info!(
        "{}: wrote {} ({} clusters)",
        source.display(),
        report.display(),
        sorted.len()
    );

    Ok((
        ReportFiles {
            source: source.to_path_buf(),
            report,
            table: table_path,
            clusters: sorted.len(),
        },
        failures,
    ))
}

/// Rows ordered by size descending; equal sizes keep table order, sizeless rows last
fn sorted_by_size(rows: &[ClusterRecord]) -> Vec<&ClusterRecord> {
    let mut sorted: Vec<&ClusterRecord> = rows.iter().collect();
    sorted.sort_by(|a, b| match (a.size_mm3, b.size_mm3) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    sorted
}

/// Report and table paths for `source`
#[must_use]
pub fn report_paths(
    source: &Path,
    atlas: AtlasName,
    settings: &ReportSettings,
) -> (PathBuf, PathBuf) {
    let dir = output_dir(source, atlas, settings.output_root.as_deref());
    let base = basename(source);
    (
        dir.join(format!("cluster_report_{base}.html")),
        dir.join(format!("cluster_table_unc_{base}.html")),
    )
}

/// `<root>/reports_atlas-<name>`, where root defaults to the source's directory
#[must_use]
pub fn output_dir(source: &Path, atlas: AtlasName, output_root: Option<&Path>) -> PathBuf {
    let root = output_root.map_or_else(
        || match source.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        },
        Path::to_path_buf,
    );
    root.join(format!("reports_atlas-{atlas}"))
}

fn file_name(source: &Path) -> String {
    source
        .file_name()
        .map_or_else(|| source.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// File name without `.nii.gz` or `.nii`
#[must_use]
pub fn basename(source: &Path) -> String {
    let name = file_name(source);
    name.strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(&name)
        .to_string()
}
