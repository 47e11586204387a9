//! Configuration types for the calibration pipeline.
//!
//! Every stage has its own struct with documented fields and production
//! defaults; [`CalibrationConfig`] composes them. All structs deserialize from
//! partial YAML with missing fields taking their defaults.

use common::Execution;
use serde::{Deserialize, Serialize};

use crate::catalog::{ARCMIN, ARCSEC};
use crate::error::CalibrationError;
use crate::math::LMConfig;
use crate::regional::FitParameters;
use crate::rotation::AngleRange;

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), CalibrationError> {
    if condition {
        Ok(())
    } else {
        Err(CalibrationError::InvalidConfig(message()))
    }
}

// =============================================================================
// Calibration mode
// =============================================================================

/// Last stage the pipeline runs before returning.
///
/// Stages are ordered; each mode runs every stage up to and including itself.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMode {
    /// Global shift only, no rotation search.
    Shift,
    /// Rotation grid search plus nonlinear shift/rotation refinement.
    #[default]
    Rotation,
    /// Adds a per-tile reference point (CRVAL) refit.
    #[serde(rename = "otashift")]
    TileShift,
    /// Adds a per-tile reference point + linear (CD) refit.
    #[serde(rename = "otashear")]
    TileShear,
    /// Adds a per-tile quadratic distortion fit.
    Distortion,
}

impl CalibrationMode {
    /// Whether this mode runs `stage`.
    pub fn includes(self, stage: CalibrationMode) -> bool {
        self >= stage
    }
}

// =============================================================================
// Source and reference preprocessing
// =============================================================================

/// Filters applied to the raw catalogs before matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Sources at or below this FWHM (arcsec) are treated as noise.
    pub min_fwhm_arcsec: f64,
    /// Sources at or above this magnitude error are treated as marginal.
    pub max_mag_err: f64,
    /// A source with another source within this radius (arcsec) is dropped.
    pub isolation_radius_arcsec: f64,
    /// Keep at most this many of the brightest sources.
    pub max_sources: usize,
    /// Reference catalog thinning stops once at most this many stars remain.
    pub reference_max_sources: usize,
    /// First isolation radius applied to the reference catalog (arcsec).
    pub reference_min_isolation_arcsec: f64,
    /// Growth of the reference isolation radius per thinning pass (arcsec).
    pub reference_isolation_step_arcsec: f64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            min_fwhm_arcsec: 0.3,
            max_mag_err: 0.3,
            isolation_radius_arcsec: 10.0,
            max_sources: 1500,
            reference_max_sources: 2000,
            reference_min_isolation_arcsec: 10.0,
            reference_isolation_step_arcsec: 2.0,
        }
    }
}

impl PreprocessConfig {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        ensure(self.min_fwhm_arcsec >= 0.0, || {
            format!("min_fwhm_arcsec must be >= 0, got {}", self.min_fwhm_arcsec)
        })?;
        ensure(self.max_mag_err > 0.0, || {
            format!("max_mag_err must be positive, got {}", self.max_mag_err)
        })?;
        ensure(self.isolation_radius_arcsec > 0.0, || {
            format!(
                "isolation_radius_arcsec must be positive, got {}",
                self.isolation_radius_arcsec
            )
        })?;
        ensure(self.max_sources > 0, || "max_sources must be > 0".into())?;
        ensure(self.reference_max_sources > 0, || {
            "reference_max_sources must be > 0".into()
        })?;
        ensure(
            self.reference_min_isolation_arcsec > 0.0 && self.reference_isolation_step_arcsec > 0.0,
            || {
                format!(
                    "reference isolation radius and step must be positive, got {} / {}",
                    self.reference_min_isolation_arcsec, self.reference_isolation_step_arcsec
                )
            },
        )
    }
}

// =============================================================================
// Rotation search
// =============================================================================

/// Parameters of one rotation grid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSearchConfig {
    /// Maximum offset between a source and its reference counterpart (arcmin).
    pub pointing_error_arcmin: f64,
    /// Offsets closer than this (arcsec) vote for each other.
    pub voting_radius_arcsec: f64,
    /// Rotation angles to try.
    pub angle_range: AngleRange,
    /// Grid spacing (arcmin).
    pub angle_step_arcmin: f64,
    /// Angles within this distance of the best (arcmin) are excluded from the
    /// background estimate.
    pub exclusion_window_arcmin: f64,
}

impl Default for RotationSearchConfig {
    fn default() -> Self {
        Self {
            pointing_error_arcmin: 8.0,
            voting_radius_arcsec: 5.0,
            angle_range: AngleRange::SymmetricRange(5.0),
            angle_step_arcmin: 3.0,
            exclusion_window_arcmin: 20.0,
        }
    }
}

impl RotationSearchConfig {
    pub fn pointing_error(&self) -> f64 {
        self.pointing_error_arcmin * ARCMIN
    }

    pub fn voting_radius(&self) -> f64 {
        self.voting_radius_arcsec * ARCSEC
    }

    pub fn angle_step(&self) -> f64 {
        self.angle_step_arcmin * ARCMIN
    }

    pub fn exclusion_window(&self) -> f64 {
        self.exclusion_window_arcmin * ARCMIN
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        ensure(self.pointing_error_arcmin > 0.0, || {
            format!(
                "pointing_error_arcmin must be positive, got {}",
                self.pointing_error_arcmin
            )
        })?;
        ensure(self.voting_radius_arcsec > 0.0, || {
            format!(
                "voting_radius_arcsec must be positive, got {}",
                self.voting_radius_arcsec
            )
        })?;
        ensure(self.angle_step_arcmin > 0.0, || {
            format!(
                "angle_step_arcmin must be positive, got {}",
                self.angle_step_arcmin
            )
        })?;
        ensure(self.exclusion_window_arcmin >= 0.0, || {
            "exclusion_window_arcmin must be >= 0".into()
        })?;
        self.angle_range.validate()
    }
}

// =============================================================================
// Global refinement
// =============================================================================

/// Nonlinear refinement of the global shift and rotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    /// Cross-match radius after applying the initial guess (arcsec).
    pub match_radius_arcsec: f64,
    /// Fewer unique pairs than this skips the refinement.
    pub min_matches: usize,
    pub lm: LMConfig,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            match_radius_arcsec: 5.0,
            min_matches: 4,
            lm: LMConfig::default(),
        }
    }
}

impl RefineConfig {
    pub fn match_radius(&self) -> f64 {
        self.match_radius_arcsec * ARCSEC
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        ensure(self.match_radius_arcsec > 0.0, || {
            format!(
                "match_radius_arcsec must be positive, got {}",
                self.match_radius_arcsec
            )
        })?;
        ensure(self.min_matches >= 2, || {
            format!(
                "min_matches must be >= 2 for a 3-parameter fit, got {}",
                self.min_matches
            )
        })?;
        self.lm.validate()
    }
}

// =============================================================================
// Per-tile refinement
// =============================================================================

/// One per-tile refinement stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileStageConfig {
    /// Cross-match radius used to build the tile samples (arcsec).
    pub match_radius_arcsec: f64,
    /// A tile is refit only with strictly more matches than this.
    pub min_tile_matches: usize,
}

impl TileStageConfig {
    pub fn match_radius(&self) -> f64 {
        self.match_radius_arcsec * ARCSEC
    }
}

/// Staged per-tile refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionalConfig {
    pub shift: TileStageConfig,
    pub shear: TileStageConfig,
    pub distortion: TileStageConfig,
    /// Radius of the whole-catalog re-match after each stage (arcsec).
    pub rematch_radius_arcsec: f64,
    pub lm: LMConfig,
}

impl Default for RegionalConfig {
    fn default() -> Self {
        Self {
            shift: TileStageConfig {
                match_radius_arcsec: 3.0,
                min_tile_matches: 4,
            },
            shear: TileStageConfig {
                match_radius_arcsec: 3.0,
                min_tile_matches: 9,
            },
            distortion: TileStageConfig {
                match_radius_arcsec: 2.0,
                min_tile_matches: 14,
            },
            rematch_radius_arcsec: 2.0,
            lm: LMConfig::default(),
        }
    }
}

impl RegionalConfig {
    pub fn rematch_radius(&self) -> f64 {
        self.rematch_radius_arcsec * ARCSEC
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        for (name, stage, params) in [
            ("shift", &self.shift, FitParameters::Shift.count()),
            ("shear", &self.shear, FitParameters::ShiftShear.count()),
            ("distortion", &self.distortion, FitParameters::Distortion.count()),
        ] {
            ensure(stage.match_radius_arcsec > 0.0, || {
                format!(
                    "{} stage match radius must be positive, got {}",
                    name, stage.match_radius_arcsec
                )
            })?;
            // Two residuals per match.
            ensure(2 * (stage.min_tile_matches + 1) >= params, || {
                format!(
                    "{} stage needs at least {} residuals, min_tile_matches = {} is too small",
                    name, params, stage.min_tile_matches
                )
            })?;
        }
        ensure(self.rematch_radius_arcsec > 0.0, || {
            "rematch_radius_arcsec must be positive".into()
        })?;
        self.lm.validate()
    }
}

// =============================================================================
// Full pipeline
// =============================================================================

/// Configuration of a complete calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub mode: CalibrationMode,
    /// Search radii (arcmin), tried smallest first until one clears
    /// `min_contrast`.
    pub pointing_errors_arcmin: Vec<f64>,
    /// Rotator uncertainty searched around the nominal orientation.
    pub rotator_range: AngleRange,
    /// Rotation grid spacing (arcmin).
    pub angle_step_arcmin: f64,
    /// Offset-voting radius (arcsec).
    pub voting_radius_arcsec: f64,
    /// Window around the best angle excluded from the background (arcmin).
    pub exclusion_window_arcmin: f64,
    /// Minimum contrast for a valid solution.
    pub min_contrast: f64,
    /// Reference fetch radius around the pivot, before adding the largest
    /// pointing error (degrees).
    pub reference_margin_deg: f64,
    /// Radius of the final cross-match reported in the result (arcsec).
    pub final_match_radius_arcsec: f64,
    pub preprocess: PreprocessConfig,
    pub refine: RefineConfig,
    pub regional: RegionalConfig,
    pub execution: Execution,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            mode: CalibrationMode::default(),
            pointing_errors_arcmin: vec![7.0],
            rotator_range: AngleRange::ExplicitRange(-3.0, 3.5),
            angle_step_arcmin: 20.0,
            voting_radius_arcsec: 5.0,
            exclusion_window_arcmin: 20.0,
            min_contrast: 3.0,
            reference_margin_deg: 0.8,
            final_match_radius_arcsec: 2.0,
            preprocess: PreprocessConfig::default(),
            refine: RefineConfig::default(),
            regional: RegionalConfig::default(),
            execution: Execution::default(),
        }
    }
}

impl CalibrationConfig {
    /// Pointing-error radii in degrees, ascending.
    pub fn pointing_errors(&self) -> Vec<f64> {
        let mut radii: Vec<f64> = self
            .pointing_errors_arcmin
            .iter()
            .map(|r| r * ARCMIN)
            .collect();
        radii.sort_by(f64::total_cmp);
        radii
    }

    /// Largest pointing-error radius in degrees.
    pub fn max_pointing_error(&self) -> f64 {
        self.pointing_errors().last().copied().unwrap_or(0.0)
    }

    /// Rotation search settings for one pointing-error radius (arcmin).
    pub fn rotation_search(&self, pointing_error_arcmin: f64) -> RotationSearchConfig {
        RotationSearchConfig {
            pointing_error_arcmin,
            voting_radius_arcsec: self.voting_radius_arcsec,
            angle_range: self.rotator_range,
            angle_step_arcmin: self.angle_step_arcmin,
            exclusion_window_arcmin: self.exclusion_window_arcmin,
        }
    }

    pub fn final_match_radius(&self) -> f64 {
        self.final_match_radius_arcsec * ARCSEC
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        ensure(!self.pointing_errors_arcmin.is_empty(), || {
            "pointing_errors_arcmin must not be empty".into()
        })?;
        for &radius in &self.pointing_errors_arcmin {
            self.rotation_search(radius).validate()?;
        }
        ensure(self.min_contrast.is_finite(), || {
            format!("min_contrast must be finite, got {}", self.min_contrast)
        })?;
        ensure(self.reference_margin_deg >= 0.0, || {
            "reference_margin_deg must be >= 0".into()
        })?;
        ensure(self.final_match_radius_arcsec > 0.0, || {
            "final_match_radius_arcsec must be positive".into()
        })?;
        if let Execution::Parallel {
            workers: Some(workers),
        } = self.execution
        {
            ensure(workers > 0, || "parallel worker count must be > 0".into())?;
        }
        self.preprocess.validate()?;
        self.refine.validate()?;
        self.regional.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        CalibrationConfig::default().validate().unwrap();
        RotationSearchConfig::default().validate().unwrap();
    }

    #[test]
    fn test_mode_ordering() {
        assert!(CalibrationMode::Distortion.includes(CalibrationMode::TileShear));
        assert!(CalibrationMode::TileShift.includes(CalibrationMode::Rotation));
        assert!(!CalibrationMode::Rotation.includes(CalibrationMode::TileShift));
        assert!(!CalibrationMode::Shift.includes(CalibrationMode::Rotation));
    }

    #[test]
    fn test_pointing_errors_sorted_in_degrees() {
        let config = CalibrationConfig {
            pointing_errors_arcmin: vec![12.0, 3.0, 6.0],
            ..Default::default()
        };
        let radii = config.pointing_errors();
        assert_eq!(radii.len(), 3);
        assert!((radii[0] - 3.0 / 60.0).abs() < 1e-12);
        assert!((radii[2] - 12.0 / 60.0).abs() < 1e-12);
        assert!((config.max_pointing_error() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_empty_pointing_errors_rejected() {
        let config = CalibrationConfig {
            pointing_errors_arcmin: vec![],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pointing_errors_arcmin"), "{}", err);
    }

    #[test]
    fn test_negative_step_rejected() {
        let config = CalibrationConfig {
            angle_step_arcmin: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CalibrationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_inverted_angle_range_rejected() {
        let config = CalibrationConfig {
            rotator_range: AngleRange::ExplicitRange(2.0, -2.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "mode: otashear\nmin_contrast: 5.0\npointing_errors_arcmin: [2.0, 7.0]\n";
        let config: CalibrationConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.mode, CalibrationMode::TileShear);
        assert_eq!(config.min_contrast, 5.0);
        assert_eq!(config.pointing_errors_arcmin, vec![2.0, 7.0]);
        assert_eq!(config.preprocess, PreprocessConfig::default());
        assert_eq!(config.rotator_range, AngleRange::ExplicitRange(-3.0, 3.5));
    }

    #[test]
    fn test_yaml_rotator_range_mapping() {
        let yaml = "rotator_range:\n  ExplicitRange: [-5.0, 5.0]\n";
        let config: CalibrationConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.rotator_range, AngleRange::ExplicitRange(-5.0, 5.0));

        let text = serde_yml::to_string(&config).unwrap();
        assert!(text.contains("ExplicitRange:"), "{}", text);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = CalibrationConfig {
            mode: CalibrationMode::Distortion,
            execution: Execution::Serial,
            ..Default::default()
        };
        let yaml = serde_yml::to_string(&config).unwrap();
        let back: CalibrationConfig = serde_yml::from_str(&yaml).unwrap();
        assert_eq!(back, config);
    }
}
