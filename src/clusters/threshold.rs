//! Height threshold from a p-value (false positive rate control)

use crate::structs::{ClusterSettings, InsightError, Result};
use statrs::distribution::{ContinuousCDF, Normal};

/// Z value above which a voxel is significant at `settings.alpha`.
///
/// # Errors
/// Returns `Config` if alpha is not in `(0, 1)`
pub fn z_threshold(settings: &ClusterSettings) -> Result<f64> {
    let alpha = settings.alpha;
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(InsightError::Config(format!(
            "threshold must be a p-value in (0, 1), got {alpha}"
        )));
    }

    let tail = if settings.two_sided { alpha / 2.0 } else { alpha };
    let normal = Normal::new(0.0, 1.0).map_err(|e| InsightError::Config(e.to_string()))?;
    Ok(normal.inverse_cdf(1.0 - tail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_z_threshold_two_sided() {
        let settings = ClusterSettings::default();
        let z = z_threshold(&settings).expect("threshold");
        assert!((z - 3.290_527).abs() < 1e-4);
    }

    #[test]
    fn test_z_threshold_one_sided() {
        let settings = ClusterSettings {
            two_sided: false,
            ..ClusterSettings::default()
        };
        let z = z_threshold(&settings).expect("threshold");
        assert!((z - 3.090_232).abs() < 1e-4);
    }

    #[test]
    fn test_z_threshold_rejects_bad_alpha() {
        for alpha in [0.0, 1.0, -0.1, f64::NAN] {
            let settings = ClusterSettings {
                alpha,
                ..ClusterSettings::default()
            };
            assert!(z_threshold(&settings).is_err(), "alpha {alpha}");
        }
    }

    #[test]
    fn test_z_threshold_tracks_alpha() {
        let z_at = |alpha| {
            z_threshold(&ClusterSettings {
                alpha,
                two_sided: false,
                ..ClusterSettings::default()
            })
            .expect("threshold")
        };
        assert!((z_at(0.05) - 1.644_854).abs() < 1e-4);
        assert!(z_at(0.5).abs() < 1e-6);
        assert!(z_at(0.0001) > z_at(0.001));
    }
}
