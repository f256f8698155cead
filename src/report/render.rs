//! Ortho-slice images of a statistical map

use crate::structs::{InsightError, Result, Volume};
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const CROSS: Rgb<u8> = Rgb([90, 200, 255]);
/// Pixels between panels
const GAP: usize = 4;

/// Produces an encoded image of a volume around a cut point
pub trait SliceRenderer {
    /// Render `volume` centred at `cut` (world mm), hiding `|v| < threshold`.
    ///
    /// # Errors
    /// Returns error if the image cannot be produced
    fn render(&self, volume: &Volume, cut: [f64; 3], threshold: f64) -> Result<Vec<u8>>;
}

/// Sagittal, coronal and axial panels side by side, encoded as PNG
#[derive(Debug, Clone, Copy)]
pub struct OrthoSliceRenderer {
    /// Integer upscaling factor
    pub scale: u32,
    pub draw_cross: bool,
}

impl Default for OrthoSliceRenderer {
    fn default() -> Self {
        Self {
            scale: 3,
            draw_cross: true,
        }
    }
}

/// One 2D cut through the volume
struct Panel {
    width: usize,
    height: usize,
    /// Column-major `u * height + v`, `v` grows upward
    values: Vec<f32>,
    cross: (usize, usize),
}

impl SliceRenderer for OrthoSliceRenderer {
    fn render(&self, volume: &Volume, cut: [f64; 3], threshold: f64) -> Result<Vec<u8>> {
        let [nx, ny, nz] = volume.dims();
        let [ci, cj, ck] = volume
            .affine
            .nearest_voxel(cut, [nx, ny, nz])
            .ok_or_else(|| {
                InsightError::Render(format!(
                    "cut point ({}, {}, {}) does not map into a {nx}x{ny}x{nz} volume",
                    cut[0], cut[1], cut[2]
                ))
            })?;

        let data = &volume.data;
        let panels = [
            panel(ny, nz, (cj, ck), |u, v| data[[ci, u, v]]),
            panel(nx, nz, (ci, ck), |u, v| data[[u, cj, v]]),
            panel(nx, ny, (ci, cj), |u, v| data[[u, v, ck]]),
        ];

        let vmax = data
            .iter()
            .filter(|v| v.is_finite())
            .fold(0.0f32, |acc, v| acc.max(v.abs()));
        #[allow(clippy::cast_possible_truncation)]
        let threshold = threshold as f32;

        let width = panels.iter().map(|p| p.width).sum::<usize>() + GAP * (panels.len() - 1);
        let height = panels.iter().map(|p| p.height).max().unwrap_or(0);
        let mut canvas = RgbImage::from_pixel(to_u32(width)?, to_u32(height)?, BLACK);

        let mut left = 0usize;
        for p in &panels {
            for u in 0..p.width {
                for v in 0..p.height {
                    let color = overlay_color(p.values[u * p.height + v], threshold, vmax);
                    canvas.put_pixel(to_u32(left + u)?, to_u32(height - 1 - v)?, color);
                }
            }
            if self.draw_cross {
                let (cu, cv) = p.cross;
                for u in 0..p.width {
                    canvas.put_pixel(to_u32(left + u)?, to_u32(height - 1 - cv)?, CROSS);
                }
                for v in 0..p.height {
                    canvas.put_pixel(to_u32(left + cu)?, to_u32(height - 1 - v)?, CROSS);
                }
            }
            left += p.width + GAP;
        }

        let scale = self.scale.max(1);
        let scaled = imageops::resize(
            &canvas,
            canvas.width() * scale,
            canvas.height() * scale,
            FilterType::Nearest,
        );

        let mut png = Cursor::new(Vec::new());
        scaled.write_to(&mut png, ImageFormat::Png)?;
        Ok(png.into_inner())
    }
}

fn panel(
    width: usize,
    height: usize,
    cross: (usize, usize),
    value: impl Fn(usize, usize) -> f32,
) -> Panel {
    let mut values = Vec::with_capacity(width * height);
    for u in 0..width {
        for v in 0..height {
            values.push(value(u, v));
        }
    }
    Panel {
        width,
        height,
        values,
        cross,
    }
}

fn to_u32(v: usize) -> Result<u32> {
    u32::try_from(v).map_err(|_| InsightError::Render(format!("image dimension {v} too large")))
}

/// Hot colours above threshold, cold below minus threshold, dim grey otherwise
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn overlay_color(v: f32, threshold: f32, vmax: f32) -> Rgb<u8> {
    if !v.is_finite() || v == 0.0 {
        return BLACK;
    }

    let magnitude = v.abs();
    if magnitude < threshold {
        let level = if vmax > 0.0 { magnitude / vmax } else { 0.0 };
        let grey = (40.0 + 80.0 * level.clamp(0.0, 1.0)) as u8;
        return Rgb([grey, grey, grey]);
    }

    let t = if vmax > threshold {
        ((magnitude - threshold) / (vmax - threshold)).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let strong = (180.0 + 75.0 * t) as u8;
    let ramp = (255.0 * t) as u8;
    if v > 0.0 {
        Rgb([strong, ramp, 0])
    } else {
        Rgb([0, ramp, strong])
    }
}
