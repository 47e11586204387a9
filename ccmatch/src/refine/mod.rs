//! Nonlinear refinement of the global rotation and shift.
//!
//! The rotation search lands on a grid point; this stage polishes it by
//! least squares over the unique pairs found after applying the guess.
//! Residuals are in arcseconds with RA scaled by cos(reference Dec), and the
//! fit parameters are `[angle (deg), ΔRA ("), ΔDec (")]` so all three share a
//! comparable scale.

use glam::DVec2;

use crate::catalog::{ARCSEC, Catalog, ra_offset};
use crate::config::RefineConfig;
use crate::math::{LeastSquaresModel, optimize};
use crate::matching::candidates;
use crate::rotation::{ShiftRotation, rotate_shift_catalog};


/// A completed least-squares fit of the global transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalFit {
    pub params: ShiftRotation,
    /// Unique pairs the fit used.
    pub matches: usize,
    /// RMS of the final residuals (arcsec, both axes pooled).
    pub rms_arcsec: f64,
    pub iterations: usize,
}

/// Outcome of [`fit_shift_rotation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitOutcome {
    Converged(GlobalFit),
    /// The solver stopped without converging; the fit is reported for
    /// diagnostics but callers keep their previous parameters.
    NotConverged(GlobalFit),
    /// Fewer unique pairs than required.
    InsufficientData { matches: usize },
}

impl FitOutcome {
    /// Parameters to continue with: the fit when it converged, else `fallback`.
    pub fn params_or(&self, fallback: ShiftRotation) -> ShiftRotation {
        match self {
            FitOutcome::Converged(fit) => fit.params,
            _ => fallback,
        }
    }
}

/// Source and reference positions of one unique pair.
#[derive(Debug, Clone, Copy)]
struct Pair {
    src: DVec2,
    reference: DVec2,
}

struct ShiftRotationModel<'a> {
    pairs: &'a [Pair],
    pivot: DVec2,
}

fn params_from(p: &[f64; 3]) -> ShiftRotation {
    ShiftRotation::new(p[0], DVec2::new(p[1], p[2]) * ARCSEC)
}

impl LeastSquaresModel<3> for ShiftRotationModel<'_> {
    fn residuals(&self, params: &[f64; 3], out: &mut Vec<f64>) {
        let transform = params_from(params);
        out.clear();
        for pair in self.pairs {
            let moved = transform.apply(pair.src, self.pivot);
            let cos_dec = pair.reference.y.to_radians().cos();
            out.push(ra_offset(moved.x, pair.reference.x) * cos_dec / ARCSEC);
            out.push((moved.y - pair.reference.y) / ARCSEC);
        }
    }
}

/// Refines `guess` by least squares over the pairs that are unique within
/// `config.match_radius_arcsec` after applying it.
pub fn fit_shift_rotation(
    src: &Catalog,
    reference: &Catalog,
    guess: ShiftRotation,
    pivot: DVec2,
    config: &RefineConfig,
) -> FitOutcome {
    let aligned = rotate_shift_catalog(src, pivot, guess);
    let pairs: Vec<Pair> = candidates(&aligned, reference, config.match_radius())
        .iter()
        .enumerate()
        .filter(|(_, refs)| refs.len() == 1)
        .map(|(i, refs)| Pair {
            src: src.position(i),
            reference: reference.position(refs[0]),
        })
        .collect();

    if pairs.len() < config.min_matches {
        tracing::warn!(
            matches = pairs.len(),
            required = config.min_matches,
            "too few unique pairs, skipping shift/rotation refinement"
        );
        return FitOutcome::InsufficientData {
            matches: pairs.len(),
        };
    }

    let model = ShiftRotationModel {
        pairs: &pairs,
        pivot,
    };
    let initial = [
        guess.angle,
        guess.shift.x / ARCSEC,
        guess.shift.y / ARCSEC,
    ];
    let result = optimize(&model, initial, &config.lm);

    let fit = GlobalFit {
        params: params_from(&result.params),
        matches: pairs.len(),
        rms_arcsec: (result.chi2 / pairs.len() as f64 / 2.0).sqrt(),
        iterations: result.iterations,
    };

    tracing::debug!(
        angle = fit.params.angle,
        dra_arcsec = result.params[1],
        ddec_arcsec = result.params[2],
        matches = fit.matches,
        rms_arcsec = fit.rms_arcsec,
        converged = result.converged,
        "shift/rotation refinement"
    );

    if result.converged {
        FitOutcome::Converged(fit)
    } else {
        tracing::warn!(
            iterations = result.iterations,
            "shift/rotation refinement did not converge, keeping the search result"
        );
        FitOutcome::NotConverged(fit)
    }
}
