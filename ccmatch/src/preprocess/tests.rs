use glam::DVec2;

use super::*;
use crate::testing;

/// Raw source row in the default layout.
fn source(ra: f64, dec: f64, mag: f64, mag_err: f64, fwhm_arcsec: f64, flags: f64) -> [f64; 9] {
    [ra, dec, 100.0, 200.0, fwhm_arcsec * ARCSEC, mag, mag_err, flags, 1.0]
}

fn raw(rows: &[[f64; 9]]) -> Catalog {
    Catalog::from_rows(9, rows).unwrap()
}

#[test]
fn test_drop_flagged() {
    let layout = SourceLayout::default();
    let cat = raw(&[
        source(10.0, 0.0, 15.0, 0.01, 1.0, 0.0),
        source(10.1, 0.0, 15.0, 0.01, 1.0, 4.0),
    ]);
    let kept = drop_flagged(&cat, layout.flags);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept.row(0)[0], 10.0);
}

#[test]
fn test_drop_marginal_needs_size_and_precision() {
    let layout = SourceLayout::default();
    let cat = raw(&[
        source(10.0, 0.0, 15.0, 0.01, 1.0, 0.0),
        source(10.1, 0.0, 15.0, 0.01, 0.2, 0.0),
        source(10.2, 0.0, 15.0, 0.5, 1.0, 0.0),
        source(10.3, 0.0, 15.0, 0.3, 1.0, 0.0),
    ]);
    let kept = drop_marginal(&cat, &layout, 0.3 * ARCSEC, 0.3);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept.row(0)[0], 10.0);
}

#[test]
fn test_pick_isolated_removes_close_pairs() {
    let cat = Catalog::from_positions(&[
        DVec2::new(10.0, 0.0),
        DVec2::new(10.0 + 5.0 * ARCSEC, 0.0),
        DVec2::new(10.1, 0.0),
    ]);
    let isolated = pick_isolated(&cat, 10.0 * ARCSEC);
    assert_eq!(isolated.len(), 1);
    assert_eq!(isolated.row(0)[0], 10.1);
}

#[test]
fn test_pick_isolated_is_idempotent() {
    let mut rng = testing::rng(3);
    let points = testing::random_field(&mut rng, DVec2::new(80.0, 65.0), 0.2, 2000);
    let cat = testing::star_catalog(&mut rng, &points);

    let once = pick_isolated(&cat, 10.0 * ARCSEC);
    assert!(once.len() < cat.len(), "expected crowding to remove stars");
    assert!(!once.is_empty());
    let twice = pick_isolated(&once, 10.0 * ARCSEC);
    assert_eq!(once, twice);
}

#[test]
fn test_select_brightest_sorts_and_truncates() {
    let cat = Catalog::from_rows(3, [[1.0, 0.0, 18.0], [2.0, 0.0, 12.0], [3.0, 0.0, 15.0]]).unwrap();
    let bright = select_brightest(&cat, 2, 2);
    assert_eq!(bright.len(), 2);
    assert_eq!(bright.row(0)[2], 12.0);
    assert_eq!(bright.row(1)[2], 15.0);

    // At or below the cap nothing changes, not even the order.
    assert_eq!(select_brightest(&cat, 2, 3), cat);
}

#[test]
fn test_prepare_sources_pipeline() {
    let rows = [
        source(10.0, 0.0, 17.0, 0.01, 1.0, 0.0),
        source(10.01, 0.0, 14.0, 0.01, 1.0, 0.0),
        source(10.02, 0.0, 16.0, 0.01, 1.0, 0.0),
        // Flagged.
        source(10.03, 0.0, 11.0, 0.01, 1.0, 1.0),
        // Too small.
        source(10.04, 0.0, 11.0, 0.01, 0.1, 0.0),
        // Crowded pair.
        source(10.05, 0.0, 11.0, 0.01, 1.0, 0.0),
        source(10.05, 2.0 * ARCSEC, 11.5, 0.01, 1.0, 0.0),
    ];
    let config = PreprocessConfig {
        max_sources: 2,
        ..Default::default()
    };
    let prepared = prepare_sources(&raw(&rows), &SourceLayout::default(), &config).unwrap();

    assert_eq!(prepared.full.len(), 5);
    assert!(!prepared.isolation_fallback);
    assert_eq!(prepared.selected.len(), 2);
    assert_eq!(prepared.selected.width(), 9);
    assert_eq!(prepared.selected.row(0)[5], 14.0);
    assert_eq!(prepared.selected.row(1)[5], 16.0);

    let matching = prepared.matching_catalog();
    assert_eq!(matching.width(), 2);
    assert_eq!(matching.row(0), &[10.01, 0.0]);
}

#[test]
fn test_prepare_sources_falls_back_when_nothing_is_isolated() {
    let rows = [
        source(10.0, 0.0, 15.0, 0.01, 1.0, 0.0),
        source(10.0, ARCSEC, 16.0, 0.01, 1.0, 0.0),
    ];
    let prepared =
        prepare_sources(&raw(&rows), &SourceLayout::default(), &PreprocessConfig::default())
            .unwrap();
    assert!(prepared.isolation_fallback);
    assert_eq!(prepared.selected.len(), 2);
}

#[test]
fn test_prepare_sources_rejects_narrow_catalog() {
    let cat = Catalog::from_rows(4, [[10.0, 0.0, 1.0, 2.0]]).unwrap();
    let err = prepare_sources(&cat, &SourceLayout::default(), &PreprocessConfig::default())
        .unwrap_err();
    assert!(matches!(err, CatalogError::ColumnOutOfRange { .. }), "{:?}", err);
}

#[test]
fn test_thin_reference_grows_radius() {
    let mut rng = testing::rng(4);
    let points = testing::random_field(&mut rng, DVec2::new(200.0, 10.0), 0.3, 3000);
    let reference = testing::star_catalog(&mut rng, &points);
    let config = PreprocessConfig {
        reference_max_sources: 1000,
        ..Default::default()
    };

    let thinned = thin_reference(&reference, &config);
    assert!(thinned.len() <= 1000, "{} stars left", thinned.len());
    assert!(!thinned.is_empty());
    // Everything left is isolated at the starting radius.
    assert_eq!(pick_isolated(&thinned, 10.0 * ARCSEC), thinned);
}

#[test]
fn test_thin_reference_small_catalog_single_pass() {
    let reference = Catalog::from_positions(&[DVec2::new(1.0, 1.0), DVec2::new(2.0, 1.0)]);
    let thinned = thin_reference(&reference, &PreprocessConfig::default());
    assert_eq!(thinned, reference);
}
