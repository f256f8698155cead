//! Connected components and local maxima on a voxel grid

use ndarray::Array3;
use std::collections::VecDeque;

/// Face neighbours (6-connectivity)
const FACE_OFFSETS: [[isize; 3]; 6] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
];

/// Connected regions of a boolean mask
#[derive(Debug, Clone)]
pub struct Components {
    /// Component id per voxel, 0 outside the mask, ids start at 1
    pub labels: Array3<u32>,
    /// Voxels of each component, component `i` has id `i + 1`
    pub members: Vec<Vec<[usize; 3]>>,
}

fn offset(index: [usize; 3], delta: [isize; 3], dims: [usize; 3]) -> Option<[usize; 3]> {
    let mut out = [0usize; 3];
    for axis in 0..3 {
        let v = index[axis].checked_add_signed(delta[axis])?;
        if v >= dims[axis] {
            return None;
        }
        out[axis] = v;
    }
    Some(out)
}

/// Label 6-connected components in scan order
#[must_use]
pub fn label_components(mask: &Array3<bool>) -> Components {
    let (nx, ny, nz) = mask.dim();
    let dims = [nx, ny, nz];
    let mut labels = Array3::<u32>::zeros(mask.raw_dim());
    let mut members = Vec::new();
    let mut queue = VecDeque::new();

    for ((x, y, z), &inside) in mask.indexed_iter() {
        if !inside || labels[[x, y, z]] != 0 {
            continue;
        }

        let id = u32::try_from(members.len() + 1).unwrap_or(u32::MAX);
        let mut voxels = Vec::new();
        labels[[x, y, z]] = id;
        queue.push_back([x, y, z]);

        while let Some(voxel) = queue.pop_front() {
            voxels.push(voxel);
            for delta in FACE_OFFSETS {
                if let Some(n) = offset(voxel, delta, dims) {
                    if mask[n] && labels[n] == 0 {
                        labels[n] = id;
                        queue.push_back(n);
                    }
                }
            }
        }

        voxels.sort_unstable();
        members.push(voxels);
    }

    Components { labels, members }
}

/// Voxels of component `id` not exceeded by any 26-neighbour in the same
/// component, sorted by value descending then by index
#[must_use]
pub fn local_maxima(
    values: &Array3<f32>,
    components: &Components,
    id: u32,
) -> Vec<([usize; 3], f32)> {
    let (nx, ny, nz) = values.dim();
    let dims = [nx, ny, nz];
    let Some(voxels) = id
        .checked_sub(1)
        .and_then(|i| components.members.get(i as usize))
    else {
        return Vec::new();
    };

    let mut maxima: Vec<([usize; 3], f32)> = voxels
        .iter()
        .filter(|&&voxel| {
            let v = values[voxel];
            neighbourhood(voxel, dims)
                .filter(|&n| components.labels[n] == id)
                .all(|n| values[n] <= v)
        })
        .map(|&voxel| (voxel, values[voxel]))
        .collect();

    maxima.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    maxima
}

/// The 26 neighbours of a voxel that lie inside the grid
fn neighbourhood(voxel: [usize; 3], dims: [usize; 3]) -> impl Iterator<Item = [usize; 3]> {
    (-1isize..=1)
        .flat_map(|dx| (-1isize..=1).flat_map(move |dy| (-1isize..=1).map(move |dz| [dx, dy, dz])))
        .filter(|d| *d != [0, 0, 0])
        .filter_map(move |d| offset(voxel, d, dims))
}
