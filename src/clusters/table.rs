//! Cluster table extraction from a statistical map

use super::components::{label_components, local_maxima};
use super::threshold::z_threshold;
use crate::structs::{ClusterRecord, ClusterSettings, ClusterTable, Result, Volume};
use crate::volume::load_volume;
use ndarray::Array3;
use std::path::Path;

/// A surviving cluster before it is turned into table rows
struct FoundCluster {
    sign: f32,
    voxel_count: usize,
    /// Main peak first, then sub-peaks
    peaks: Vec<([usize; 3], f32)>,
}

/// Load a volume and build its cluster table.
///
/// # Errors
/// Returns error if the volume cannot be loaded or the threshold is invalid
#[allow(dead_code)]
pub fn extract_clusters(path: &Path, settings: &ClusterSettings) -> Result<ClusterTable> {
    let volume = load_volume(path)?;
    extract_from_volume(path, &volume, settings)
}

/// Build the cluster table of an already loaded volume read from `path`.
///
/// # Errors
/// Returns `Config` if the threshold is invalid
pub fn extract_from_volume(
    path: &Path,
    volume: &Volume,
    settings: &ClusterSettings,
) -> Result<ClusterTable> {
    let table = ClusterTable {
        source: path.to_path_buf(),
        rows: drop_sizeless_rows(cluster_rows(volume, settings)?),
    };
    tracing::info!("{}: {} clusters", path.display(), table.len());
    Ok(table)
}

/// All rows for a volume, sub-peak rows included.
///
/// # Errors
/// Returns `Config` if the threshold is invalid
pub fn cluster_rows(volume: &Volume, settings: &ClusterSettings) -> Result<Vec<ClusterRecord>> {
    let z = z_threshold(settings)?;
    tracing::debug!("Height threshold z = {z:.4} (p < {})", settings.alpha);

    let tails: &[f32] = if settings.two_sided {
        &[1.0, -1.0]
    } else {
        &[1.0]
    };

    let mut clusters = Vec::new();
    for &sign in tails {
        clusters.extend(find_tail_clusters(volume, sign, z, settings));
    }

    let voxel_volume = volume.affine.voxel_volume();
    let mut rows = Vec::new();

    for (i, cluster) in clusters.iter().enumerate() {
        let id = i + 1;
        for (j, &(voxel, value)) in cluster.peaks.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let (row_id, size) = if j == 0 {
                (id.to_string(), Some(cluster.voxel_count as f64 * voxel_volume))
            } else {
                (format!("{id}{}", subpeak_suffix(j - 1)), None)
            };

            let [x, y, z] = volume.affine.voxel_to_world(voxel.map(|v| v as f64));
            rows.push(ClusterRecord {
                id: row_id,
                x,
                y,
                z,
                peak_stat: f64::from(cluster.sign * value),
                size_mm3: size,
                region: None,
            });
        }
    }

    Ok(rows)
}

/// Clusters of one tail, ordered by peak value descending
fn find_tail_clusters(
    volume: &Volume,
    sign: f32,
    z: f64,
    settings: &ClusterSettings,
) -> Vec<FoundCluster> {
    #[allow(clippy::cast_possible_truncation)]
    let z = z as f32;
    let signed: Array3<f32> = volume
        .data
        .mapv(|v| if v.is_finite() { v * sign } else { 0.0 });
    let mask = signed.mapv(|v| v >= z);
    let components = label_components(&mask);

    let mut clusters: Vec<FoundCluster> = components
        .members
        .iter()
        .zip(1u32..)
        .filter(|(voxels, _)| voxels.len() >= settings.min_cluster_voxels)
        .map(|(voxels, id)| {
            let maxima = local_maxima(&signed, &components, id);
            FoundCluster {
                sign,
                voxel_count: voxels.len(),
                peaks: separate_peaks(volume, maxima, settings.min_distance_mm),
            }
        })
        .collect();

    // stable: equal peaks keep scan order
    clusters.sort_by(|a, b| b.peaks[0].1.total_cmp(&a.peaks[0].1));
    clusters
}

/// Greedy selection of peaks at least `min_distance` mm apart
fn separate_peaks(
    volume: &Volume,
    maxima: Vec<([usize; 3], f32)>,
    min_distance: f64,
) -> Vec<([usize; 3], f32)> {
    let mut kept: Vec<([usize; 3], f32, [f64; 3])> = Vec::new();

    for (voxel, value) in maxima {
        let world = volume.affine.voxel_to_world(voxel.map(|v| v as f64));
        let far_enough = kept.iter().all(|(_, _, other)| {
            let d2: f64 = world
                .iter()
                .zip(other.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            d2.sqrt() >= min_distance
        });
        if far_enough {
            kept.push((voxel, value, world));
        }
    }

    kept.into_iter().map(|(v, value, _)| (v, value)).collect()
}

/// `a`, `b`, ..., `z`, `aa`, `ab`, ...
#[allow(clippy::cast_possible_truncation)]
fn subpeak_suffix(mut n: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'a' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Keep only rows that carry a finite cluster size
#[must_use]
pub fn drop_sizeless_rows(rows: Vec<ClusterRecord>) -> Vec<ClusterRecord> {
    rows.into_iter()
        .filter(|r| r.size_mm3.is_some_and(f64::is_finite))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::Affine;
    use crate::volume::tests::write_volume;
    use tempfile::TempDir;

    /// Fill a cube `[start, start + edge)` with a constant value
    fn fill_cube(data: &mut Array3<f32>, start: [usize; 3], edge: usize, value: f32) {
        for x in start[0]..start[0] + edge {
            for y in start[1]..start[1] + edge {
                for z in start[2]..start[2] + edge {
                    data[[x, y, z]] = value;
                }
            }
        }
    }

    fn mni_volume(data: Array3<f32>) -> Volume {
        Volume {
            data,
            affine: Affine::scaled([2.0, 2.0, 2.0], [-90.0, -126.0, -72.0]).expect("affine"),
        }
    }

    fn two_blob_data() -> Array3<f32> {
        let mut data = Array3::<f32>::zeros((40, 40, 40));
        // 27 voxels * 8 mm3 = 216 mm3
        fill_cube(&mut data, [5, 5, 5], 3, 5.0);
        // 64 voxels * 8 mm3 = 512 mm3, lower peak
        fill_cube(&mut data, [20, 20, 20], 4, 4.0);
        data
    }

    #[test]
    fn test_clusters_sorted_by_peak() {
        let volume = mni_volume(two_blob_data());
        let rows = drop_sizeless_rows(
            cluster_rows(&volume, &ClusterSettings::default()).expect("rows"),
        );

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "1");
        assert!((rows[0].peak_stat - 5.0).abs() < 1e-6);
        assert_eq!(rows[0].size_mm3, Some(216.0));
        assert_eq!(rows[0].coordinate(), [-80.0, -116.0, -62.0]);
        assert_eq!(rows[1].id, "2");
        assert_eq!(rows[1].size_mm3, Some(512.0));
    }

    #[test]
    fn test_negative_tail() {
        let mut data = Array3::<f32>::zeros((30, 30, 30));
        fill_cube(&mut data, [5, 5, 5], 3, 6.0);
        fill_cube(&mut data, [15, 15, 15], 3, -7.0);
        let volume = mni_volume(data);

        let rows = cluster_rows(&volume, &ClusterSettings::default()).expect("rows");
        assert_eq!(rows.len(), 2);
        // positive tail first even though the negative peak is larger
        assert!(rows[0].peak_stat > 0.0);
        assert!((rows[1].peak_stat + 7.0).abs() < 1e-6);

        let one_sided = ClusterSettings {
            two_sided: false,
            ..ClusterSettings::default()
        };
        let rows = cluster_rows(&volume, &one_sided).expect("rows");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_small_clusters_removed() {
        let mut data = Array3::<f32>::zeros((20, 20, 20));
        fill_cube(&mut data, [2, 2, 2], 2, 9.0); // 8 voxels
        fill_cube(&mut data, [10, 10, 10], 3, 9.0); // 27 voxels
        let volume = mni_volume(data);

        let rows = cluster_rows(&volume, &ClusterSettings::default()).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].size_mm3, Some(216.0));
    }

    #[test]
    fn test_subthreshold_volume_has_no_clusters() {
        let mut data = Array3::<f32>::zeros((10, 10, 10));
        fill_cube(&mut data, [2, 2, 2], 4, 3.0);
        data[[0, 0, 0]] = f32::NAN;
        let volume = mni_volume(data);

        let rows = cluster_rows(&volume, &ClusterSettings::default()).expect("rows");
        assert!(rows.is_empty());
    }

    #[test]
    fn test_subpeaks_listed_then_dropped() {
        let mut data = Array3::<f32>::zeros((20, 5, 5));
        for x in 2..14 {
            fill_cube(&mut data, [x, 1, 1], 3, 4.0);
        }
        data[[3, 2, 2]] = 6.0;
        data[[13, 2, 2]] = 8.0;
        let volume = mni_volume(data);

        let rows = cluster_rows(&volume, &ClusterSettings::default()).expect("rows");
        assert_eq!(rows[0].id, "1");
        assert!((rows[0].peak_stat - 8.0).abs() < 1e-6);
        assert_eq!(rows[1].id, "1a");
        assert!((rows[1].peak_stat - 6.0).abs() < 1e-6);
        assert!(rows[1].size_mm3.is_none());

        let kept = drop_sizeless_rows(rows);
        assert_eq!(kept.len(), 1);
        assert!(kept.iter().all(|r| r.size_mm3.is_some()));
    }

    #[test]
    fn test_drop_sizeless_rows_non_finite() {
        let row = |size| ClusterRecord {
            id: "1".into(),
            x: 0.0,
            y: 0.0,
            z: 0.0,
            peak_stat: 4.0,
            size_mm3: size,
            region: None,
        };
        let kept = drop_sizeless_rows(vec![row(Some(8.0)), row(None), row(Some(f64::NAN))]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_subpeak_suffix() {
        assert_eq!(subpeak_suffix(0), "a");
        assert_eq!(subpeak_suffix(25), "z");
        assert_eq!(subpeak_suffix(26), "aa");
    }

    #[test]
    fn test_extract_clusters_deterministic() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("stat.nii.gz");
        write_volume(&path, &two_blob_data());

        let settings = ClusterSettings::default();
        let first = extract_clusters(&path, &settings).expect("extract");
        let second = extract_clusters(&path, &settings).expect("extract");

        assert_eq!(first, second);
        assert_eq!(first.source, path);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_extract_clusters_bad_alpha() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("stat.nii");
        write_volume(&path, &two_blob_data());

        let settings = ClusterSettings {
            alpha: 2.0,
            ..ClusterSettings::default()
        };
        assert!(extract_clusters(&path, &settings).is_err());
    }
}
