use std::fmt;

use serde::Serialize;

use crate::catalog::{Catalog, MatchTable};
use crate::quality::QualityReport;
use crate::regional::{FitParameters, TileFitReport};
use crate::rotation::{RotationGuess, ShiftRotation};
use crate::transform::Tile;

/// Why a run produced no usable calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// The reference provider returned no stars around the pivot.
    NoReferenceStars,
    /// Reference stars exist, but none near the source footprint.
    NoOverlap,
    /// No search radius produced a single candidate offset.
    NoCandidates,
    /// Candidates were found but the contrast never reached the minimum.
    BelowSignificance,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::NoReferenceStars => "no reference stars around the pointing",
            FailureReason::NoOverlap => "reference catalog does not overlap the source catalog",
            FailureReason::NoCandidates => "no candidate offsets at any search radius",
            FailureReason::BelowSignificance => "best solution is below the contrast threshold",
        };
        f.write_str(text)
    }
}

/// One entry of the calibration log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub step: usize,
    pub description: &'static str,
    /// Global correction in effect after this stage.
    pub params: ShiftRotation,
    pub matches: usize,
    /// Random-match level of the rotation search, for search stages.
    pub background: Option<f64>,
    pub contrast: Option<f64>,
}

impl fmt::Display for StageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shift = self.params.shift_arcsec();
        write!(
            f,
            "step {} ({}): angle={:.5} deg, dRA={:.2}\", dDec={:.2}\", n={}",
            self.step, self.description, self.params.angle, shift.x, shift.y, self.matches
        )?;
        if let (Some(background), Some(contrast)) = (self.background, self.contrast) {
            write!(f, ", background={:.1}, contrast={:.2}", background, contrast)?;
        }
        Ok(())
    }
}

/// Tile fit outcomes of one per-tile stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionalStage {
    pub parameters: FitParameters,
    pub reports: Vec<TileFitReport>,
}

/// Everything a calibration run produces.
///
/// On failure `tiles` are the input tiles and `catalog`/`matches`/`quality`
/// describe the uncorrected sources.
#[derive(Debug, Clone)]
pub struct CalibrationResult<T> {
    pub valid: bool,
    pub failure: Option<FailureReason>,
    /// Global shift/rotation applied to every science tile.
    pub params: ShiftRotation,
    pub tiles: Vec<Tile<T>>,
    /// Contrast of the accepted search, or of the best rejected one.
    pub contrast: Option<f64>,
    /// Search radius that produced `best_guess` (arcmin).
    pub pointing_error_arcmin: Option<f64>,
    /// Winning grid point of the search; kept on failure for diagnostics.
    pub best_guess: Option<RotationGuess>,
    /// Science-tile sources reprojected with `tiles`.
    pub catalog: Catalog,
    /// One row per `catalog` row; unmatched rows carry NaN reference columns.
    pub matches: MatchTable,
    pub quality: QualityReport,
    pub stages: Vec<StageRecord>,
    pub regional: Vec<RegionalStage>,
}
