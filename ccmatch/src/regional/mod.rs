//! Per-tile refinement of the pixel to sky transforms.
//!
//! The source catalog is matched against the reference catalog, the unique
//! pairs are split by tile, and each tile with enough pairs gets its own
//! least-squares fit of a subset of its transform parameters. Tile fits are
//! independent and run through the worker pool. Afterwards every source is
//! reprojected from its pixel position with its tile's current transform and
//! the whole catalog is matched again.

use std::collections::HashMap;

use common::Execution;
use glam::DVec2;

use crate::catalog::{ARCSEC, Catalog, MatchTable, SourceLayout, ra_offset};
use crate::config::{RegionalConfig, TileStageConfig};
use crate::error::CalibrationError;
use crate::math::{LMConfig, LeastSquaresModel, optimize};
use crate::matching::match_catalogs;
use crate::transform::{Tile, TileTransform};


/// Transform parameters refit per tile.
///
/// Internally the fit runs in arcsec-based units: reference point shifts in
/// arcsec, linear corrections in arcsec per degree, and distortion
/// coefficients in arcsec per square degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitParameters {
    /// Reference point only (2 parameters).
    Shift,
    /// Reference point and a linear correction `CD' = (I + D) CD` (6).
    ShiftShear,
    /// Reference point, linear correction and quadratic distortion (12).
    Distortion,
}

impl FitParameters {
    pub fn count(self) -> usize {
        match self {
            FitParameters::Shift => 2,
            FitParameters::ShiftShear => 6,
            FitParameters::Distortion => 12,
        }
    }
}

/// What happened to one tile during a refinement stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TileOutcome {
    Fitted {
        rms_before_arcsec: f64,
        rms_after_arcsec: f64,
        iterations: usize,
    },
    /// Not enough unique pairs; the transform is unchanged.
    TooFewMatches,
    /// The solver did not converge; the transform is unchanged.
    NotConverged { iterations: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileFitReport {
    pub tile: i64,
    pub samples: usize,
    pub outcome: TileOutcome,
}

/// Output of [`improve_solution`].
#[derive(Debug, Clone)]
pub struct RegionalResult<T> {
    /// Science-tile sources with RA/Dec recomputed from pixel positions.
    pub catalog: Catalog,
    pub tiles: Vec<Tile<T>>,
    /// Unique matches of `catalog` at the re-match radius.
    pub matches: MatchTable,
    /// One report per science tile, in tile order.
    pub reports: Vec<TileFitReport>,
}

/// One matched sample: a pixel position and the sky position it should map to.
#[derive(Debug, Clone, Copy)]
struct Sample {
    pixel: DVec2,
    sky: DVec2,
}

struct TileModel<'a, T> {
    transform: &'a T,
    samples: &'a [Sample],
}

impl<T: TileTransform, const N: usize> LeastSquaresModel<N> for TileModel<'_, T> {
    fn residuals(&self, params: &[f64; N], out: &mut Vec<f64>) {
        let candidate = apply_params(self.transform, params);
        out.clear();
        for s in self.samples {
            let sky = candidate.project_to_sky(s.pixel);
            let cos_dec = s.sky.y.to_radians().cos();
            out.push(ra_offset(sky.x, s.sky.x) * cos_dec / ARCSEC);
            out.push((sky.y - s.sky.y) / ARCSEC);
        }
    }

    // Distortion terms move residuals by only ~0.02" per unit near the tile
    // edge, so the default step would sink into rounding noise.
    fn step_size(&self, _index: usize) -> f64 {
        1e-4
    }
}

/// Applies a parameter vector of length 2, 6 or 12 (see [`FitParameters`]).
fn apply_params<T: TileTransform>(transform: &T, p: &[f64]) -> T {
    let mut updated = transform.apply_shift(DVec2::new(p[0], p[1]) * ARCSEC);
    if p.len() >= 6 {
        updated = updated.apply_linear([
            [1.0 + p[2] * ARCSEC, p[3] * ARCSEC],
            [p[4] * ARCSEC, 1.0 + p[5] * ARCSEC],
        ]);
    }
    if p.len() >= 12 {
        updated = updated.update_distortion(
            [p[6] * ARCSEC, p[7] * ARCSEC, p[8] * ARCSEC],
            [p[9] * ARCSEC, p[10] * ARCSEC, p[11] * ARCSEC],
        );
    }
    updated
}

fn rms_of(residuals: &[f64]) -> f64 {
    if residuals.is_empty() {
        return 0.0;
    }
    (residuals.iter().map(|r| r * r).sum::<f64>() / (residuals.len() / 2) as f64).sqrt()
}

/// Result of fitting one tile: the new transform when the fit converged.
struct TileFit<T> {
    transform: Option<T>,
    outcome: TileOutcome,
}

fn fit_with<T: TileTransform, const N: usize>(
    transform: &T,
    samples: &[Sample],
    lm: &LMConfig,
) -> TileFit<T> {
    let model = TileModel { transform, samples };
    let mut before = Vec::new();
    LeastSquaresModel::<N>::residuals(&model, &[0.0; N], &mut before);

    let result = optimize(&model, [0.0; N], lm);
    if !result.converged {
        return TileFit {
            transform: None,
            outcome: TileOutcome::NotConverged {
                iterations: result.iterations,
            },
        };
    }

    let mut after = Vec::new();
    LeastSquaresModel::<N>::residuals(&model, &result.params, &mut after);
    TileFit {
        transform: Some(apply_params(transform, &result.params)),
        outcome: TileOutcome::Fitted {
            rms_before_arcsec: rms_of(&before),
            rms_after_arcsec: rms_of(&after),
            iterations: result.iterations,
        },
    }
}

fn fit_tile<T: TileTransform>(
    transform: &T,
    samples: &[Sample],
    parameters: FitParameters,
    lm: &LMConfig,
) -> TileFit<T> {
    match parameters {
        FitParameters::Shift => fit_with::<T, 2>(transform, samples, lm),
        FitParameters::ShiftShear => fit_with::<T, 6>(transform, samples, lm),
        FitParameters::Distortion => fit_with::<T, 12>(transform, samples, lm),
    }
}

/// Position of every tile id in `tiles`.
fn tile_index<T>(tiles: &[Tile<T>]) -> HashMap<i64, usize> {
    tiles.iter().enumerate().map(|(i, t)| (t.id, i)).collect()
}

/// Recomputes RA/Dec of every science-tile source from its pixel position.
///
/// Rows on auxiliary tiles are dropped; a row whose tile id is not in
/// `tiles` is a contract error.
pub fn reproject<T: TileTransform>(
    sources: &Catalog,
    layout: &SourceLayout,
    tiles: &[Tile<T>],
) -> Result<Catalog, CalibrationError> {
    let index = tile_index(tiles);
    let mut out = Catalog::new(sources.width());
    let mut row_buf = Vec::with_capacity(sources.width());
    for (row_idx, row) in sources.rows().enumerate() {
        let tile_id = layout.tile_id(row);
        let Some(&tile_idx) = index.get(&tile_id) else {
            return Err(CalibrationError::UnknownTile {
                row: row_idx,
                tile: tile_id,
            });
        };
        let tile = &tiles[tile_idx];
        if !tile.is_science {
            continue;
        }
        let sky = tile.transform.project_to_sky(layout.pixel(row));
        row_buf.clear();
        row_buf.extend_from_slice(row);
        row_buf[0] = sky.x;
        row_buf[1] = sky.y;
        out.push_row(&row_buf);
    }
    Ok(out)
}

/// Runs one per-tile refinement stage.
///
/// `sources` are raw-layout rows whose RA/Dec reflect the current `tiles`.
/// Tiles with more than `stage.min_tile_matches` unique pairs within
/// `stage.match_radius_arcsec` are refit; the rest keep their transform but
/// their sources are still reprojected.
#[allow(clippy::too_many_arguments)]
pub fn improve_solution<T: TileTransform>(
    sources: &Catalog,
    reference: &Catalog,
    tiles: &[Tile<T>],
    layout: &SourceLayout,
    parameters: FitParameters,
    stage: &TileStageConfig,
    config: &RegionalConfig,
    execution: Execution,
) -> Result<RegionalResult<T>, CalibrationError> {
    let index = tile_index(tiles);
    let matched = match_catalogs(sources, reference, stage.match_radius(), 1);

    let mut samples: Vec<Vec<Sample>> = vec![Vec::new(); tiles.len()];
    for (src, reference_row) in matched.pairs() {
        let tile_id = layout.tile_id(src);
        if let Some(&tile_idx) = index.get(&tile_id) {
            samples[tile_idx].push(Sample {
                pixel: layout.pixel(src),
                sky: DVec2::new(reference_row[0], reference_row[1]),
            });
        }
    }

    let mut reports: Vec<TileFitReport> = Vec::new();
    let mut tasks = Vec::new();
    for (tile_idx, (tile, tile_samples)) in tiles.iter().zip(samples).enumerate() {
        if !tile.is_science {
            continue;
        }
        let n = tile_samples.len();
        tracing::debug!(
            tile = tile.id,
            samples = n,
            required = stage.min_tile_matches + 1,
            fit = n > stage.min_tile_matches,
            "tile sample"
        );
        if n > stage.min_tile_matches {
            tasks.push((tile_idx, (tile.transform.clone(), tile_samples)));
        } else {
            reports.push(TileFitReport {
                tile: tile.id,
                samples: n,
                outcome: TileOutcome::TooFewMatches,
            });
        }
    }

    let lm = &config.lm;
    let fits = common::worker_pool::execute(execution, tasks, |(transform, tile_samples)| {
        let n = tile_samples.len();
        (n, fit_tile(&transform, &tile_samples, parameters, lm))
    });

    let mut updated: Vec<Tile<T>> = tiles.to_vec();
    for (tile_idx, (n, fit)) in fits {
        let tile = &mut updated[tile_idx];
        match fit.outcome {
            TileOutcome::Fitted {
                rms_before_arcsec,
                rms_after_arcsec,
                ..
            } => tracing::debug!(
                tile = tile.id,
                rms_before_arcsec,
                rms_after_arcsec,
                "tile refit"
            ),
            TileOutcome::NotConverged { iterations } => tracing::warn!(
                tile = tile.id,
                iterations,
                "tile fit did not converge, keeping its transform"
            ),
            TileOutcome::TooFewMatches => {}
        }
        if let Some(transform) = fit.transform {
            tile.transform = transform;
        }
        reports.push(TileFitReport {
            tile: tile.id,
            samples: n,
            outcome: fit.outcome,
        });
    }
    reports.sort_by_key(|r| index.get(&r.tile).copied());

    let catalog = reproject(sources, layout, &updated)?;
    let matches = match_catalogs(&catalog, reference, config.rematch_radius(), 1);

    tracing::info!(
        ?parameters,
        tiles_fit = reports
            .iter()
            .filter(|r| matches!(r.outcome, TileOutcome::Fitted { .. }))
            .count(),
        matched = matches.len(),
        "per-tile refinement stage complete"
    );

    Ok(RegionalResult {
        catalog,
        tiles: updated,
        matches,
        reports,
    })
}
