//! The calibration pipeline.
//!
//! Stages run in a fixed order and the configured [`CalibrationMode`] cuts the
//! list short:
//!
//! 1. fetch the reference catalog and restrict it to the source footprint,
//! 2. prepare both catalogs (quality cuts, isolation, brightness cap),
//! 3. offset voting over a rotation grid, trying pointing-error radii from
//!    the smallest up until one clears the contrast threshold,
//! 4. least-squares polish of the global shift and rotation,
//! 5. per-tile shift, shear and distortion refits.
//!
//! Data problems end the run with `valid == false` and a [`FailureReason`];
//! only contract violations come back as `Err`.

mod result;

use glam::DVec2;

pub use result::{CalibrationResult, FailureReason, RegionalStage, StageRecord};

use crate::catalog::{Catalog, SourceLayout};
use crate::config::{CalibrationConfig, CalibrationMode};
use crate::error::CalibrationError;
use crate::matching::{match_catalogs, match_catalogs_keep_unmatched};
use crate::preprocess::{prepare_sources, thin_reference};
use crate::quality::quality_report;
use crate::reference::{ReferenceCatalog, restrict_to_overlap};
use crate::refine::fit_shift_rotation;
use crate::regional::{FitParameters, improve_solution, reproject};
use crate::rotation::{AngleRange, RotationGuess, SearchOutcome, ShiftRotation, find_best_guess};
use crate::transform::{Tile, TileTransform};


/// What the radius loop settled on.
enum Search {
    Accepted { radius_arcmin: f64, guess: RotationGuess },
    Rejected { radius_arcmin: f64, guess: RotationGuess },
    NoCandidates,
}

/// Calibrates the tiles of one exposure.
///
/// `sources` is the raw detector catalog in `layout` order with RA/Dec
/// computed from the nominal `tiles`; `pivot` is the nominal pointing center.
pub fn calibrate<T, R>(
    sources: &Catalog,
    layout: &SourceLayout,
    tiles: &[Tile<T>],
    reference: &R,
    pivot: DVec2,
    config: &CalibrationConfig,
) -> Result<CalibrationResult<T>, CalibrationError>
where
    T: TileTransform,
    R: ReferenceCatalog + ?Sized,
{
    config.validate()?;
    layout.validate(sources.width())?;
    check_tiles(sources, layout, tiles)?;

    let max_pointing_error = config.max_pointing_error();
    let fetched = reference.fetch(pivot, config.reference_margin_deg + max_pointing_error)?;
    tracing::info!(
        sources = sources.len(),
        reference = fetched.len(),
        mode = ?config.mode,
        "starting calibration"
    );
    if fetched.is_empty() {
        tracing::warn!("reference catalog is empty around the pointing");
        return failure(
            sources,
            layout,
            tiles,
            &fetched,
            config,
            FailureReason::NoReferenceStars,
            None,
        );
    }

    let ref_close = restrict_to_overlap(sources, &fetched, max_pointing_error);
    if ref_close.is_empty() {
        tracing::warn!("no reference stars overlap the source footprint");
        return failure(
            sources,
            layout,
            tiles,
            &fetched,
            config,
            FailureReason::NoOverlap,
            None,
        );
    }

    let prepared = prepare_sources(sources, layout, &config.preprocess)?;
    let src_cat = prepared.matching_catalog();
    let ref_cat = thin_reference(&ref_close, &config.preprocess);

    let (radius_arcmin, guess) = match search_radii(&src_cat, &ref_cat, pivot, config) {
        Search::Accepted {
            radius_arcmin,
            guess,
        } => (radius_arcmin, guess),
        Search::Rejected {
            radius_arcmin,
            guess,
        } => {
            tracing::warn!(
                contrast = guess.contrast,
                min_contrast = config.min_contrast,
                "no search radius produced a significant solution"
            );
            let mut result = failure(
                sources,
                layout,
                tiles,
                &ref_close,
                config,
                FailureReason::BelowSignificance,
                Some(stage_one(&guess)),
            )?;
            result.contrast = Some(guess.contrast);
            result.pointing_error_arcmin = Some(radius_arcmin);
            result.best_guess = Some(guess);
            return Ok(result);
        }
        Search::NoCandidates => {
            tracing::warn!("no candidate offsets at any search radius");
            return failure(
                sources,
                layout,
                tiles,
                &ref_close,
                config,
                FailureReason::NoCandidates,
                None,
            );
        }
    };

    tracing::info!(
        pointing_error_arcmin = radius_arcmin,
        contrast = guess.contrast,
        votes = guess.votes,
        angle = guess.params.angle,
        "accepted initial guess"
    );
    let mut stages = vec![stage_one(&guess)];

    let mut params = guess.params;
    if config.mode.includes(CalibrationMode::Rotation) {
        let fit = fit_shift_rotation(&src_cat, &ref_cat, guess.params, pivot, &config.refine);
        params = fit.params_or(guess.params);
    }

    let mut current: Vec<Tile<T>> = tiles
        .iter()
        .map(|tile| {
            if !tile.is_science {
                return tile.clone();
            }
            Tile {
                transform: tile
                    .transform
                    .apply_rotation(params.angle, pivot)
                    .apply_shift(params.shift),
                ..tile.clone()
            }
        })
        .collect();

    let mut working = reproject(&prepared.full, layout, &current)?;
    if config.mode.includes(CalibrationMode::Rotation) {
        let matched = match_catalogs(&working, &ref_close, config.final_match_radius(), 1);
        stages.push(StageRecord {
            step: 2,
            description: "rotation refinement",
            params,
            matches: matched.len(),
            background: None,
            contrast: None,
        });
    }

    let regional_stages = [
        (
            CalibrationMode::TileShift,
            FitParameters::Shift,
            &config.regional.shift,
            "per-tile shift",
        ),
        (
            CalibrationMode::TileShear,
            FitParameters::ShiftShear,
            &config.regional.shear,
            "per-tile shear",
        ),
        (
            CalibrationMode::Distortion,
            FitParameters::Distortion,
            &config.regional.distortion,
            "per-tile distortion",
        ),
    ];
    let mut regional = Vec::new();
    for (stage_mode, parameters, stage, description) in regional_stages {
        if !config.mode.includes(stage_mode) {
            break;
        }
        let result = improve_solution(
            &working,
            &ref_close,
            &current,
            layout,
            parameters,
            stage,
            &config.regional,
            config.execution,
        )?;
        stages.push(StageRecord {
            step: stages.len() + 1,
            description,
            params,
            matches: result.matches.len(),
            background: None,
            contrast: None,
        });
        working = result.catalog;
        current = result.tiles;
        regional.push(RegionalStage {
            parameters,
            reports: result.reports,
        });
    }

    let catalog = reproject(sources, layout, &current)?;
    let matches =
        match_catalogs_keep_unmatched(&catalog, &ref_close, config.final_match_radius(), 1);
    let quality = quality_report(&matches, layout, &current);
    tracing::info!(
        matched = quality.global.star_count,
        rms_arcsec = quality.global.rms,
        "calibration complete"
    );

    Ok(CalibrationResult {
        valid: true,
        failure: None,
        params,
        tiles: current,
        contrast: Some(guess.contrast),
        pointing_error_arcmin: Some(radius_arcmin),
        best_guess: Some(guess),
        catalog,
        matches,
        quality,
        stages,
        regional,
    })
}

/// Every source row must name a tile in `tiles`.
fn check_tiles<T>(
    sources: &Catalog,
    layout: &SourceLayout,
    tiles: &[Tile<T>],
) -> Result<(), CalibrationError> {
    for (row, values) in sources.rows().enumerate() {
        let tile = layout.tile_id(values);
        if !tiles.iter().any(|t| t.id == tile) {
            return Err(CalibrationError::UnknownTile { row, tile });
        }
    }
    Ok(())
}

/// Runs the search over increasing pointing-error radii until one clears the
/// contrast threshold. Shift mode searches only the largest radius, without
/// rotation.
fn search_radii(
    src: &Catalog,
    reference: &Catalog,
    pivot: DVec2,
    config: &CalibrationConfig,
) -> Search {
    let mut radii = config.pointing_errors_arcmin.clone();
    radii.sort_by(f64::total_cmp);
    if config.mode == CalibrationMode::Shift {
        radii = radii.last().copied().into_iter().collect();
    }

    let mut best_rejected: Option<(f64, RotationGuess)> = None;
    for radius_arcmin in radii {
        let mut search = config.rotation_search(radius_arcmin);
        if config.mode == CalibrationMode::Shift {
            search.angle_range = AngleRange::NoRotation;
        }
        match find_best_guess(src, reference, pivot, &search, config.execution) {
            SearchOutcome::NoCandidates { angles } => {
                tracing::debug!(pointing_error_arcmin = radius_arcmin, angles, "no candidates");
            }
            SearchOutcome::Found(guess) => {
                tracing::debug!(
                    pointing_error_arcmin = radius_arcmin,
                    contrast = guess.contrast,
                    min_contrast = config.min_contrast,
                    "search radius tried"
                );
                if guess.contrast >= config.min_contrast {
                    return Search::Accepted {
                        radius_arcmin,
                        guess,
                    };
                }
                let better = match &best_rejected {
                    Some((_, best)) => guess.contrast > best.contrast,
                    None => true,
                };
                if better {
                    best_rejected = Some((radius_arcmin, guess));
                }
            }
        }
    }

    match best_rejected {
        Some((radius_arcmin, guess)) => Search::Rejected {
            radius_arcmin,
            guess,
        },
        None => Search::NoCandidates,
    }
}

fn stage_one(guess: &RotationGuess) -> StageRecord {
    StageRecord {
        step: 1,
        description: "initial guess",
        params: guess.params,
        matches: guess.votes,
        background: Some(guess.background),
        contrast: Some(guess.contrast),
    }
}

/// Invalid result: input tiles, uncorrected sources matched against
/// whatever reference stars are available.
fn failure<T: TileTransform>(
    sources: &Catalog,
    layout: &SourceLayout,
    tiles: &[Tile<T>],
    reference: &Catalog,
    config: &CalibrationConfig,
    reason: FailureReason,
    stage: Option<StageRecord>,
) -> Result<CalibrationResult<T>, CalibrationError> {
    let catalog = reproject(sources, layout, tiles)?;
    let matches =
        match_catalogs_keep_unmatched(&catalog, reference, config.final_match_radius(), 1);
    let quality = quality_report(&matches, layout, tiles);
    Ok(CalibrationResult {
        valid: false,
        failure: Some(reason),
        params: ShiftRotation::default(),
        tiles: tiles.to_vec(),
        contrast: None,
        pointing_error_arcmin: None,
        best_guess: None,
        catalog,
        matches,
        quality,
        stages: stage.into_iter().collect(),
        regional: Vec::new(),
    })
}
