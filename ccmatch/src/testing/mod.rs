//! Synthetic star fields for tests.

use glam::DVec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::catalog::{ARCSEC, Catalog, SourceLayout};
use crate::rotation::ShiftRotation;
use crate::transform::{TanTransform, Tile, TileTransform};

pub fn rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Uniform points in a `size`-degree square on the sky centered at `center`.
///
/// The square is square in (RA cos Dec, Dec), so RA spans `size / cos(dec)`.
/// RA is wrapped into [0, 360).
pub fn random_field(rng: &mut ChaCha8Rng, center: DVec2, size: f64, count: usize) -> Vec<DVec2> {
    let cos_dec = center.y.to_radians().cos();
    let half = size / 2.0;
    (0..count)
        .map(|_| {
            let xi = rng.random_range(-half..half);
            let eta = rng.random_range(-half..half);
            DVec2::new((center.x + xi / cos_dec).rem_euclid(360.0), center.y + eta)
        })
        .collect()
}

/// `[ra, dec, mag]` catalog with random magnitudes.
pub fn star_catalog(rng: &mut ChaCha8Rng, positions: &[DVec2]) -> Catalog {
    let rows: Vec<[f64; 3]> = positions
        .iter()
        .map(|p| [p.x, p.y, rng.random_range(12.0..20.0)])
        .collect();
    Catalog::from_rows(3, rows).unwrap()
}

/// Positions that `params` maps back onto `points`.
pub fn invert(points: &[DVec2], pivot: DVec2, params: ShiftRotation) -> Vec<DVec2> {
    let inverse = ShiftRotation::rotation(-params.angle);
    points
        .iter()
        .map(|&p| inverse.apply(p - params.shift, pivot))
        .collect()
}

/// Moves every point by up to `amplitude` degrees on the sky per axis.
pub fn jitter(rng: &mut ChaCha8Rng, points: &mut [DVec2], amplitude: f64) {
    for p in points {
        let cos_dec = p.y.to_radians().cos();
        p.x = (p.x + rng.random_range(-amplitude..amplitude) / cos_dec).rem_euclid(360.0);
        p.y += rng.random_range(-amplitude..amplitude);
    }
}

/// Source and reference catalogs related by a known transform.
pub struct Scenario {
    pub src: Catalog,
    pub reference: Catalog,
    pub pivot: DVec2,
    pub truth: ShiftRotation,
}

/// `common` shared stars in a 1°×1° field at `center`, related by `truth`,
/// plus `noise` unrelated stars in each catalog and optional positional
/// jitter on the sources (degrees).
pub fn scenario(
    seed: u64,
    center: DVec2,
    common: usize,
    noise: usize,
    truth: ShiftRotation,
    jitter_amplitude: f64,
) -> Scenario {
    let mut rng = rng(seed);
    let shared = random_field(&mut rng, center, 1.0, common);

    let mut ref_points = shared.clone();
    ref_points.extend(random_field(&mut rng, center, 1.0, noise));

    let mut src_points = invert(&shared, center, truth);
    if jitter_amplitude > 0.0 {
        jitter(&mut rng, &mut src_points, jitter_amplitude);
    }
    src_points.extend(random_field(&mut rng, center, 1.0, noise));

    Scenario {
        src: star_catalog(&mut rng, &src_points),
        reference: star_catalog(&mut rng, &ref_points),
        pivot: center,
        truth,
    }
}

/// 500 shared stars at (150, `dec`), rotated by 1.5° and shifted by
/// (+3", -2"), with 50 noise stars per catalog.
pub fn concrete_scenario(dec: f64) -> Scenario {
    scenario(
        42,
        DVec2::new(150.0, dec),
        500,
        50,
        ShiftRotation::new(1.5, DVec2::new(3.0 * ARCSEC, -2.0 * ARCSEC)),
        0.0,
    )
}

/// A mosaic camera looking at a synthetic star field.
pub struct Mosaic {
    /// Raw detections in [`SourceLayout::default`] order, with sky positions
    /// from `nominal_tiles`.
    pub sources: Catalog,
    pub reference: Catalog,
    /// Tile transforms before calibration.
    pub nominal_tiles: Vec<Tile<TanTransform>>,
    /// Tile transforms that produced the detections.
    pub true_tiles: Vec<Tile<TanTransform>>,
    pub pivot: DVec2,
}

pub const MOSAIC_PIXEL_SCALE: f64 = 0.25 * ARCSEC;
pub const MOSAIC_TILE_SIZE: f64 = 4000.0;

/// 2×2 mosaic at `center`, 0.25"/px, 4000 px tiles with a 100 px gap.
///
/// The nominal tiles are the true tiles shifted by `-error.shift` and rotated
/// by `-error.angle` about the center, so calibration must recover `error`.
/// Tile 99 is a guide sensor without detections.
pub fn mosaic(seed: u64, center: DVec2, stars: usize, error: ShiftRotation) -> Mosaic {
    let mut rng = rng(seed);
    let gap = 100.0 * MOSAIC_PIXEL_SCALE;
    let tile_size = MOSAIC_TILE_SIZE * MOSAIC_PIXEL_SCALE;
    let field = 2.0 * tile_size + gap;

    let mut true_tiles = Vec::new();
    for (id, (col, row)) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
        .into_iter()
        .enumerate()
    {
        let xi = (col - 0.5) * (tile_size + gap);
        let eta = (row - 0.5) * (tile_size + gap);
        let crval = DVec2::new(
            center.x + xi / center.y.to_radians().cos(),
            center.y + eta,
        );
        true_tiles.push(Tile::science(
            id as i64,
            TanTransform::new(
                DVec2::splat(MOSAIC_TILE_SIZE / 2.0),
                crval,
                [[MOSAIC_PIXEL_SCALE, 0.0], [0.0, MOSAIC_PIXEL_SCALE]],
            ),
        ));
    }
    true_tiles.push(Tile::auxiliary(
        99,
        TanTransform::new(
            DVec2::splat(500.0),
            center,
            [[MOSAIC_PIXEL_SCALE, 0.0], [0.0, MOSAIC_PIXEL_SCALE]],
        ),
    ));

    let sky = random_field(&mut rng, center, field * 1.2, stars);
    let reference = star_catalog(&mut rng, &sky);

    let mut nominal_tiles = true_tiles.clone();
    for tile in &mut nominal_tiles {
        tile.transform = tile
            .transform
            .apply_shift(-error.shift)
            .apply_rotation(-error.angle, center);
    }

    let layout = SourceLayout::default();
    let mut sources = Catalog::new(9);
    for ref_row in reference.rows() {
        let sky_pos = DVec2::new(ref_row[0], ref_row[1]);
        for (tile, nominal) in true_tiles.iter().zip(&nominal_tiles) {
            if !tile.is_science {
                continue;
            }
            let pixel = tile.transform.sky_to_pixel(sky_pos);
            let inside = pixel.x >= 0.0
                && pixel.y >= 0.0
                && pixel.x < MOSAIC_TILE_SIZE
                && pixel.y < MOSAIC_TILE_SIZE;
            if !inside {
                continue;
            }
            let observed = nominal.transform.project_to_sky(pixel);
            let mut row = [0.0; 9];
            row[0] = observed.x;
            row[1] = observed.y;
            row[layout.x] = pixel.x;
            row[layout.y] = pixel.y;
            row[layout.fwhm] = 1.0 * ARCSEC;
            row[layout.mag] = ref_row[2];
            row[layout.mag_err] = 0.02;
            row[layout.flags] = 0.0;
            row[layout.tile] = tile.id as f64;
            sources.push_row(&row);
        }
    }

    Mosaic {
        sources,
        reference,
        nominal_tiles,
        true_tiles,
        pivot: center,
    }
}
