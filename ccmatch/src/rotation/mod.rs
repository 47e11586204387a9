//! Rotation grid search around a pivot.
//!
//! The source catalog is rotated rigidly about the pivot for every angle on a
//! 1-D grid and offset voting is run at each angle. The best angle wins on
//! vote count; a contrast statistic compares it with the votes found at
//! angles far from it.

use common::float_ext::FloatExt;
use common::{EPSILON, Execution};
use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::catalog::{ARCSEC, Catalog, ra_offset};
use crate::config::RotationSearchConfig;
use crate::error::CalibrationError;
use crate::math::statistics::median_mut;
use crate::voting::{MatchResult, count_matches};


/// Rotation angles to search, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AngleRange {
    /// Only angle 0.
    NoRotation,
    /// `[-max, max]`.
    SymmetricRange(f64),
    /// `[min, max]`.
    ExplicitRange(f64, f64),
}

impl AngleRange {
    /// `(min, max)` in degrees, `None` for [`AngleRange::NoRotation`].
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match *self {
            AngleRange::NoRotation => None,
            AngleRange::SymmetricRange(max) => Some((-max.abs(), max.abs())),
            AngleRange::ExplicitRange(min, max) => Some((min, max)),
        }
    }

    /// Evenly spaced angles covering the range, both ends included.
    ///
    /// The count is `ceil((max - min) / step) + 1`, so the actual spacing is
    /// at most `step`.
    pub fn grid(&self, step: f64) -> Vec<f64> {
        let Some((min, max)) = self.bounds() else {
            return vec![0.0];
        };
        let span = max - min;
        if span.approximately_eq(0.0) {
            return vec![min];
        }
        // Absorb rounding in span / step so exact multiples do not gain a point.
        let n = (span / step - EPSILON).ceil().max(1.0) as usize + 1;
        (0..n)
            .map(|i| min + span * i as f64 / (n - 1) as f64)
            .collect()
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        match *self {
            AngleRange::NoRotation => Ok(()),
            AngleRange::SymmetricRange(max) if max.is_finite() => Ok(()),
            AngleRange::ExplicitRange(min, max) if min.is_finite() && max.is_finite() && min <= max => {
                Ok(())
            }
            other => Err(CalibrationError::InvalidConfig(format!(
                "invalid rotation range {:?}",
                other
            ))),
        }
    }
}

/// Global transform parameters: rotation about a pivot, then a shift.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ShiftRotation {
    /// Degrees, counter-clockwise in the (RA cos Dec, Dec) plane.
    pub angle: f64,
    /// (ΔRA, ΔDec) in degrees; ΔRA is not scaled by cos(Dec).
    pub shift: DVec2,
}

impl ShiftRotation {
    pub fn new(angle: f64, shift: DVec2) -> Self {
        Self { angle, shift }
    }

    pub fn rotation(angle: f64) -> Self {
        Self {
            angle,
            shift: DVec2::ZERO,
        }
    }

    pub fn shift_arcsec(&self) -> DVec2 {
        self.shift / ARCSEC
    }

    /// Applies the transform to one position.
    #[inline]
    pub fn apply(&self, point: DVec2, pivot: DVec2) -> DVec2 {
        let cos_pivot = pivot.y.to_radians().cos();
        let (sin_a, cos_a) = self.angle.to_radians().sin_cos();
        let x = ra_offset(point.x, pivot.x) * cos_pivot;
        let y = point.y - pivot.y;
        let rotated = DVec2::new(cos_a * x - sin_a * y, sin_a * x + cos_a * y);
        let ra = pivot.x + rotated.x / cos_pivot + self.shift.x;
        DVec2::new(ra.rem_euclid(360.0), pivot.y + rotated.y + self.shift.y)
    }
}

/// Rotates `catalog` about `pivot` and shifts it, keeping auxiliary columns.
///
/// RA offsets are scaled by cos(pivot Dec) before rotating and unscaled
/// afterwards, so angles mean the same on the sky at every declination.
pub fn rotate_shift_catalog(catalog: &Catalog, pivot: DVec2, params: ShiftRotation) -> Catalog {
    let moved: Vec<DVec2> = catalog
        .positions()
        .into_iter()
        .map(|p| params.apply(p, pivot))
        .collect();
    catalog.with_positions(&moved)
}

/// Voting result at one grid angle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleTrial {
    pub angle: f64,
    pub result: MatchResult,
}

/// Best grid point of a rotation search.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationGuess {
    pub params: ShiftRotation,
    pub votes: usize,
    /// Median votes at angles outside the exclusion window (1 if none).
    pub background: f64,
    pub contrast: f64,
    /// Every grid point, in grid order.
    pub trials: Vec<AngleTrial>,
}

/// Outcome of [`find_best_guess`].
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// No angle produced a single candidate pair.
    NoCandidates { angles: usize },
    Found(RotationGuess),
}

/// Searches the rotation grid for the angle whose offset vote is strongest.
///
/// Grid points are independent tasks; `execution` decides whether they run
/// on the calling thread or across a worker pool. Both give the same answer.
pub fn find_best_guess(
    src: &Catalog,
    reference: &Catalog,
    pivot: DVec2,
    config: &RotationSearchConfig,
    execution: Execution,
) -> SearchOutcome {
    let angles = config.angle_range.grid(config.angle_step());
    let pointing_error = config.pointing_error();
    let voting_radius = config.voting_radius();

    tracing::debug!(
        angles = angles.len(),
        pointing_error_arcmin = config.pointing_error_arcmin,
        parallel = execution.is_parallel(),
        "rotation search"
    );

    let tasks: Vec<(usize, f64)> = angles.iter().copied().enumerate().collect();
    let results = common::worker_pool::execute(execution, tasks, |angle| {
        let rotated = rotate_shift_catalog(src, pivot, ShiftRotation::rotation(angle));
        count_matches(&rotated, reference, pointing_error, voting_radius)
    });

    let trials: Vec<AngleTrial> = results
        .into_iter()
        .map(|(id, result)| AngleTrial {
            angle: angles[id],
            result,
        })
        .collect();

    select_best(trials, config.exclusion_window())
}

/// Picks the highest-voted trial (first on ties) and computes its contrast.
fn select_best(trials: Vec<AngleTrial>, exclusion_window: f64) -> SearchOutcome {
    let mut best: Option<(usize, usize)> = None;
    for (i, trial) in trials.iter().enumerate() {
        if let MatchResult::Found(vote) = trial.result {
            match best {
                Some((_, votes)) if vote.votes <= votes => {}
                _ => best = Some((i, vote.votes)),
            }
        }
    }

    let Some((best_idx, votes)) = best else {
        return SearchOutcome::NoCandidates {
            angles: trials.len(),
        };
    };

    let best_trial = trials[best_idx];
    let offset = best_trial.result.vote().map(|v| v.offset).unwrap_or_default();
    let (background, contrast) = contrast(&trials, best_trial.angle, votes, exclusion_window);

    tracing::debug!(
        angle = best_trial.angle,
        votes,
        background,
        contrast,
        "best rotation"
    );

    SearchOutcome::Found(RotationGuess {
        params: ShiftRotation::new(best_trial.angle, offset),
        votes,
        background,
        contrast,
        trials,
    })
}

/// Background vote level and contrast of the best angle.
///
/// The background is the median vote count of trials more than
/// `exclusion_window` away from `best_angle` (trials without candidates count
/// as zero votes), or 1 when no such trial exists.
pub fn contrast(
    trials: &[AngleTrial],
    best_angle: f64,
    best_votes: usize,
    exclusion_window: f64,
) -> (f64, f64) {
    let mut off_peak: Vec<f64> = trials
        .iter()
        .filter(|t| (t.angle - best_angle).abs() > exclusion_window)
        .map(|t| t.result.votes() as f64)
        .collect();
    let background = median_mut(&mut off_peak).unwrap_or(1.0);

    let best = best_votes as f64;
    let contrast = if background >= 1.0 {
        (best - background) / background.sqrt()
    } else {
        best
    };
    (background, contrast)
}
