//! Nearest-voxel atlas lookup for cluster peaks

use crate::structs::{Atlas, ClusterRecord, ClusterTable, LabelVolume, RegionLookup};
use ndarray::{s, Axis};

/// Look up the atlas region at a cluster's peak.
///
/// Never fails: every problem is reported as [`RegionLookup::Unknown`].
#[must_use]
pub fn resolve_region(record: &ClusterRecord, atlas: &Atlas) -> RegionLookup {
    let Some([i, j, k]) = atlas
        .affine
        .nearest_voxel(record.coordinate(), atlas.spatial_dims())
    else {
        return RegionLookup::Unknown(format!(
            "coordinate ({}, {}, {}) cannot be mapped into the atlas",
            record.x, record.y, record.z
        ));
    };

    let index = match &atlas.volume {
        LabelVolume::Discrete(codes) => match usize::try_from(codes[[i, j, k]]) {
            Ok(code) => code,
            Err(_) => {
                return RegionLookup::Unknown(format!(
                    "negative label code {} at voxel {:?}",
                    codes[[i, j, k]],
                    [i, j, k]
                ))
            }
        },
        LabelVolume::Probabilistic(maps) => {
            let probabilities = maps.slice(s![i, j, k, ..]);
            match argmax(probabilities.iter().copied()) {
                Some(index) => index,
                None => {
                    return RegionLookup::Unknown(format!(
                        "no probability maps at voxel {:?} (axis length {})",
                        [i, j, k],
                        maps.len_of(Axis(3))
                    ))
                }
            }
        }
    };

    match atlas.labels.get(index) {
        Some(name) if !name.trim().is_empty() => RegionLookup::Resolved(name.clone()),
        Some(_) => RegionLookup::Unknown(format!("label {index} has no name")),
        None => RegionLookup::Unknown(format!(
            "label {index} outside the {} atlas names",
            atlas.labels.len()
        )),
    }
}

/// Index of the first maximum, ignoring NaN
fn argmax(values: impl Iterator<Item = f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, v) in values.enumerate() {
        if v.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

/// Fill the region of every record in every table
#[must_use]
#[allow(dead_code)]
pub fn resolve_regions(mut tables: Vec<ClusterTable>, atlas: &Atlas) -> Vec<ClusterTable> {
    for table in &mut tables {
        annotate_table(table, atlas);
    }
    tables
}

/// Fill the region of every record in one table, in place
pub fn annotate_table(table: &mut ClusterTable, atlas: &Atlas) {
    for record in &mut table.rows {
        let lookup = resolve_region(record, atlas);
        if let RegionLookup::Unknown(reason) = &lookup {
            tracing::debug!(
                "{} cluster {}: {reason}",
                table.source.display(),
                record.id
            );
        }
        record.region = Some(lookup.into_name());
    }
}
