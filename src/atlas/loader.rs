//! Atlas selection and loading

use super::labels::{parse_csv_labels, parse_text_labels, parse_xml_labels};
use crate::structs::{
    Atlas, AtlasName, AtlasResources, InsightError, LabelFormat, LabelVolume, Result,
    UNKNOWN_REGION,
};
use crate::volume::read_nifti;
use ndarray::{ArrayD, Axis, Ix3, Ix4};
use std::path::Path;
use std::str::FromStr;

/// Name given to label code 0 when the dictionary does not name it
const BACKGROUND_LABEL: &str = "Background";

/// Largest code a discrete label volume may hold
const MAX_LABEL_CODE: usize = 65_535;

impl FromStr for AtlasName {
    type Err = InsightError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| InsightError::UnsupportedAtlas {
                name: s.to_string(),
            })
    }
}

impl AtlasName {
    /// Files backing this atlas, relative to the atlas root
    #[must_use]
    pub fn resources(self) -> AtlasResources {
        match self {
            Self::DiFuMo => AtlasResources {
                volume: "difumo_atlases/512/2mm/maps.nii.gz",
                labels: "difumo_atlases/512/labels_512_dictionary.csv",
                format: LabelFormat::Csv,
            },
            Self::Juelich => AtlasResources {
                volume: "Juelich/Juelich-prob-2mm.nii.gz",
                labels: "Juelich/Juelich.xml",
                format: LabelFormat::Xml,
            },
            Self::Aal3 => AtlasResources {
                volume: "AAL3/AAL3v1.nii.gz",
                labels: "AAL3/AAL3v1.nii.txt",
                format: LabelFormat::Text,
            },
            Self::Brainnetome => AtlasResources {
                volume: "Brainnetome/BN_Atlas_246_1mm.nii.gz",
                labels: "Brainnetome/BN_Atlas_246_LUT.txt",
                format: LabelFormat::Text,
            },
        }
    }
}

impl Atlas {
    /// Number of labels addressable by the volume
    #[must_use]
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Spatial shape `[nx, ny, nz]` of the label volume
    #[must_use]
    pub fn spatial_dims(&self) -> [usize; 3] {
        match &self.volume {
            LabelVolume::Discrete(v) => {
                let (x, y, z) = v.dim();
                [x, y, z]
            }
            LabelVolume::Probabilistic(v) => {
                let (x, y, z, _) = v.dim();
                [x, y, z]
            }
        }
    }
}

/// Load an atlas by user-facing name.
///
/// # Errors
/// Returns `UnsupportedAtlas` for unknown names before touching the disk,
/// otherwise any error from [`load_atlas_from`]
pub fn load_atlas(name: &str, atlas_dir: &Path) -> Result<Atlas> {
    let atlas = name.parse::<AtlasName>()?;
    load_atlas_from(atlas, atlas_dir)
}

/// Load the volume and label dictionary of a known atlas.
///
/// # Errors
/// Returns error if a resource is missing or the label count does not match
/// the volume
pub fn load_atlas_from(name: AtlasName, atlas_dir: &Path) -> Result<Atlas> {
    let resources = name.resources();
    let volume_path = atlas_dir.join(resources.volume);
    let labels_path = atlas_dir.join(resources.labels);

    tracing::debug!(
        "Loading atlas {name} from {} and {}",
        volume_path.display(),
        labels_path.display()
    );

    let raw = read_nifti(&volume_path)?;
    if raw.data.is_empty() {
        return Err(InsightError::AtlasFormat(format!(
            "{name}: label volume {} is empty",
            volume_path.display()
        )));
    }

    let label_context = |e| label_error(name, &labels_path, e);
    let (volume, labels) = match resources.format {
        LabelFormat::Csv => {
            let names = parse_csv_labels(&labels_path).map_err(label_context)?;
            probabilistic_atlas(name, raw.data, names)?
        }
        LabelFormat::Xml => {
            let entries = parse_xml_labels(&labels_path).map_err(label_context)?;
            let names = contiguous_names(entries)
                .map_err(|e| InsightError::AtlasFormat(format!("{name}: {e}")))?;
            probabilistic_atlas(name, raw.data, names)?
        }
        LabelFormat::Text => {
            let entries = parse_text_labels(&labels_path).map_err(label_context)?;
            discrete_atlas(name, raw.data, &entries)?
        }
    };

    let atlas = Atlas {
        name,
        volume,
        affine: raw.affine,
        labels,
    };
    tracing::info!(
        "Loaded atlas {name}: {} labels, {:?} voxels",
        atlas.label_count(),
        atlas.spatial_dims()
    );

    Ok(atlas)
}

/// Attach the atlas and dictionary path to a label parsing error
fn label_error(name: AtlasName, path: &Path, err: InsightError) -> InsightError {
    match err {
        // already names the file
        InsightError::AtlasFormat(msg) => InsightError::AtlasFormat(format!("{name}: {msg}")),
        other => InsightError::AtlasFormat(format!(
            "{name}: cannot read label dictionary {}: {other}",
            path.display()
        )),
    }
}

/// Names indexed `0..n` with no gaps, as probabilistic atlases require
fn contiguous_names(entries: Vec<(i64, String)>) -> std::result::Result<Vec<String>, String> {
    let mut names = Vec::with_capacity(entries.len());
    for (expected, (index, name)) in (0i64..).zip(entries) {
        if index != expected {
            return Err(format!("label indices must run 0..n, found {index} at {expected}"));
        }
        names.push(name);
    }
    Ok(names)
}

fn probabilistic_atlas(
    name: AtlasName,
    data: ArrayD<f32>,
    labels: Vec<String>,
) -> Result<(LabelVolume, Vec<String>)> {
    let maps = data
        .into_dimensionality::<Ix4>()
        .map_err(|e| InsightError::AtlasFormat(format!("{name}: expected 4D maps: {e}")))?;

    let n_maps = maps.len_of(Axis(3));
    if labels.len() != n_maps {
        return Err(InsightError::AtlasFormat(format!(
            "{name}: {} labels for {n_maps} probability maps",
            labels.len()
        )));
    }

    Ok((LabelVolume::Probabilistic(maps), labels))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn discrete_atlas(
    name: AtlasName,
    data: ArrayD<f32>,
    entries: &[(i64, String)],
) -> Result<(LabelVolume, Vec<String>)> {
    let data = match data.ndim() {
        4 if data.len_of(Axis(3)) == 1 => data.index_axis_move(Axis(3), 0),
        _ => data,
    };
    let codes = data
        .mapv(|v| if v.is_finite() { v.round() as i32 } else { 0 })
        .into_dimensionality::<Ix3>()
        .map_err(|e| InsightError::AtlasFormat(format!("{name}: expected 3D labels: {e}")))?;

    let max_code = codes.iter().copied().max().unwrap_or(0).max(0) as usize;
    if max_code > MAX_LABEL_CODE {
        return Err(InsightError::AtlasFormat(format!(
            "{name}: label code {max_code} exceeds {MAX_LABEL_CODE}"
        )));
    }

    let mut labels = vec![UNKNOWN_REGION.to_string(); max_code + 1];
    labels[0] = BACKGROUND_LABEL.to_string();
    for (code, label) in entries {
        let code = usize::try_from(*code).map_err(|_| {
            InsightError::AtlasFormat(format!("{name}: negative label code {code}"))
        })?;
        if let Some(slot) = labels.get_mut(code) {
            slot.clone_from(label);
        }
    }

    Ok((LabelVolume::Discrete(codes), labels))
}
