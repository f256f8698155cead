//! Consolidated public types for anatomy-insight
//!
//! This module contains the structs, enums, and error types shared across the
//! crate. Behaviour lives in the module that owns each concern.

use nalgebra::Matrix4;
use ndarray::{Array3, Array4};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Region name used whenever a cluster cannot be mapped to an atlas label.
pub const UNKNOWN_REGION: &str = "Unknown region";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Atlas \"{name}\" is not supported (choose one of: {})", AtlasName::choices())]
    UnsupportedAtlas { name: String },

    #[error("Atlas format error: {0}")]
    AtlasFormat(String),

    #[error("Cannot read volume {}: {reason}", .path.display())]
    Volume { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error(
        "Report {} was already written for {} in this run",
        .path.display(),
        .previous.display()
    )]
    OutputCollision { path: PathBuf, previous: PathBuf },
}

pub type Result<T> = std::result::Result<T, InsightError>;

// ============================================================================
// Volume Types
// ============================================================================

/// Voxel-to-world transform of a volume, with its inverse cached
#[derive(Debug, Clone, PartialEq)]
pub struct Affine {
    pub(crate) matrix: Matrix4<f64>,
    pub(crate) inverse: Matrix4<f64>,
}

/// A 3D statistical map in voxel order `[x, y, z]`
#[derive(Debug, Clone)]
pub struct Volume {
    pub data: Array3<f32>,
    pub affine: Affine,
}

impl Volume {
    /// Shape as `[nx, ny, nz]`
    #[must_use]
    pub fn dims(&self) -> [usize; 3] {
        let (nx, ny, nz) = self.data.dim();
        [nx, ny, nz]
    }
}

// ============================================================================
// Atlas Types
// ============================================================================

/// The closed set of atlases the tool knows how to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtlasName {
    DiFuMo,
    Juelich,
    Aal3,
    Brainnetome,
}

impl AtlasName {
    pub const ALL: [Self; 4] = [Self::DiFuMo, Self::Juelich, Self::Aal3, Self::Brainnetome];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DiFuMo => "DiFuMo",
            Self::Juelich => "Juelich",
            Self::Aal3 => "AAL3",
            Self::Brainnetome => "Brainnetome",
        }
    }

    /// Comma-separated list of accepted names, for messages
    #[must_use]
    pub fn choices() -> String {
        Self::ALL
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for AtlasName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk format of an atlas label dictionary.
///
/// CSV and XML dictionaries name the maps of a 4D probabilistic atlas,
/// text lookup tables name the codes of a discrete one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelFormat {
    /// `Difumo_names` column, one row per map
    Csv,
    /// `<label index="i">`, indices `0..n`
    Xml,
    /// `<code> <name> [...]` per line
    Text,
}

/// Fixed resource layout for one atlas, relative to the atlas root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasResources {
    pub volume: &'static str,
    pub labels: &'static str,
    pub format: LabelFormat,
}

/// Label data of an atlas
#[derive(Debug, Clone)]
pub enum LabelVolume {
    Discrete(Array3<i32>),
    Probabilistic(Array4<f32>),
}

/// A loaded atlas. Immutable once built.
#[derive(Debug, Clone)]
pub struct Atlas {
    pub name: AtlasName,
    pub volume: LabelVolume,
    pub affine: Affine,
    pub labels: Vec<String>,
}

// ============================================================================
// Cluster Types
// ============================================================================

/// Thresholding parameters for cluster extraction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterSettings {
    /// Uncorrected p-value threshold
    pub alpha: f64,
    /// Clusters with fewer voxels are discarded
    pub min_cluster_voxels: usize,
    /// Test both tails of the statistic
    pub two_sided: bool,
    /// Minimum distance between sub-peaks of one cluster
    pub min_distance_mm: f64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            alpha: 0.001,
            min_cluster_voxels: 10,
            two_sided: true,
            min_distance_mm: 8.0,
        }
    }
}

/// One row of a cluster table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterRecord {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub peak_stat: f64,
    /// Missing for sub-peak rows
    pub size_mm3: Option<f64>,
    pub region: Option<String>,
}

impl ClusterRecord {
    /// Peak position in world millimetres
    #[must_use]
    pub fn coordinate(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Region name, falling back to the sentinel when unresolved
    #[must_use]
    pub fn region_name(&self) -> &str {
        self.region.as_deref().unwrap_or(UNKNOWN_REGION)
    }
}

/// All clusters found in one source volume
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterTable {
    pub source: PathBuf,
    pub rows: Vec<ClusterRecord>,
}

impl ClusterTable {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Outcome of mapping one cluster to an atlas region
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionLookup {
    Resolved(String),
    /// Lookup failed; carries the reason for logging
    Unknown(String),
}

impl RegionLookup {
    /// Name to store in the cluster record
    #[must_use]
    pub fn into_name(self) -> String {
        match self {
            Self::Resolved(name) => name,
            Self::Unknown(_) => UNKNOWN_REGION.to_string(),
        }
    }
}

// ============================================================================
// Report Types
// ============================================================================

/// Where and how reports are written
#[derive(Debug, Clone, Default)]
pub struct ReportSettings {
    pub threshold: ClusterSettings,
    /// Root for `reports_atlas-<name>/`; defaults to each source's directory
    pub output_root: Option<PathBuf>,
}

/// A slice image that could not be rendered
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderFailure {
    pub source: PathBuf,
    pub cluster_id: String,
    pub reason: String,
}

/// Files written for one source volume
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportFiles {
    pub source: PathBuf,
    pub report: PathBuf,
    pub table: PathBuf,
    pub clusters: usize,
}

/// Result of building reports for a set of tables
#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    pub written: Vec<ReportFiles>,
    pub render_failures: Vec<RenderFailure>,
    /// Sources whose volume could not be read or whose files could not be written
    pub file_failures: Vec<FileFailure>,
}

// ============================================================================
// Pipeline Types
// ============================================================================

/// One batch job: which files, which atlas, which threshold
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub files: Vec<PathBuf>,
    /// Atlas name as given by the user, matched case-insensitively
    pub atlas: String,
    pub atlas_dir: PathBuf,
    pub report: ReportSettings,
}

/// A source file that could not be processed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Everything a batch run produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub atlas: String,
    pub reports: Vec<ReportFiles>,
    pub file_failures: Vec<FileFailure>,
    pub render_failures: Vec<RenderFailure>,
}

impl RunSummary {
    #[must_use]
    pub fn has_file_failures(&self) -> bool {
        !self.file_failures.is_empty()
    }

    /// Human readable overview
    #[must_use]
    pub fn summary(&self) -> String {
        use std::fmt::Write as _;

        let mut s = format!(
            "Atlas {}: {} report(s) written, {} file(s) failed, {} slice image(s) failed\n",
            self.atlas,
            self.reports.len(),
            self.file_failures.len(),
            self.render_failures.len()
        );
        for files in &self.reports {
            let _ = writeln!(
                s,
                "  {} ({} clusters)",
                files.report.display(),
                files.clusters
            );
        }
        for failure in &self.file_failures {
            let _ = writeln!(s, "  FAILED {}: {}", failure.path.display(), failure.error);
        }
        s
    }
}
