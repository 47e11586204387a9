use super::*;
use crate::transform::TanTransform;
use glam::DVec2;

fn table(offsets_arcsec: &[(f64, f64, f64)]) -> MatchTable {
    // (tile, dRA on sky, dDec) at Dec 60.
    let mut table = MatchTable::new(9, 3);
    for (i, &(tile, dra, ddec)) in offsets_arcsec.iter().enumerate() {
        let ra = 100.0 + i as f64 * 0.01;
        let dec = 60.0;
        let src_dec = dec + ddec * ARCSEC;
        let src_ra = ra + dra * ARCSEC / src_dec.to_radians().cos();
        let src = [src_ra, src_dec, 0.0, 0.0, ARCSEC, 15.0, 0.01, 0.0, tile];
        table.push(&src, Some(&[ra, dec, 15.0]));
    }
    table
}

#[test]
fn test_constant_offset() {
    let q = compute_quality(&table(&[(1.0, 0.3, -0.4); 5]));
    assert_eq!(q.star_count, 5);
    assert!((q.median_ra - 0.3).abs() < 1e-6, "median_ra = {}", q.median_ra);
    assert!((q.median_dec + 0.4).abs() < 1e-6, "median_dec = {}", q.median_dec);
    assert!((q.median - 0.5).abs() < 1e-6, "median = {}", q.median);
    assert!((q.rms - 0.5).abs() < 1e-6, "rms = {}", q.rms);
    assert!((q.rms_ra - 0.3).abs() < 1e-6);
    assert!(q.sigma_ra.abs() < 1e-6 && q.sigma_dec.abs() < 1e-6);
}

#[test]
fn test_combined_rms_pools_axes() {
    let q = compute_quality(&table(&[(1.0, 1.0, 0.0), (1.0, 0.0, -1.0)]));
    assert!((q.rms_ra - 0.5f64.sqrt()).abs() < 1e-6, "rms_ra = {}", q.rms_ra);
    assert!((q.rms - 1.0).abs() < 1e-6, "rms = {}", q.rms);
    assert!((q.median_ra - 0.5).abs() < 1e-6);
}

#[test]
fn test_unmatched_rows_are_ignored() {
    let mut t = table(&[(1.0, 0.2, 0.2), (1.0, 0.2, 0.2)]);
    t.push(&[1.0, 1.0, 0.0, 0.0, ARCSEC, 15.0, 0.01, 0.0, 1.0], None);
    let q = compute_quality(&t);
    assert_eq!(q.star_count, 2);
    assert!(q.rms.is_finite() && q.rms > 0.0);
}

#[test]
fn test_empty_table_gives_sentinels() {
    let q = compute_quality(&MatchTable::new(9, 3));
    assert_eq!(q, QualityRecord::empty());
    assert_eq!(q.rms, -9999.0);
    assert_eq!(q.median, -9999.0);
    assert_eq!(q.sigma, -99.0);
    assert_eq!(q.star_count, 0);
}

#[test]
fn test_non_finite_residual_is_invalid() {
    let mut t = MatchTable::new(2, 2);
    t.push(&[f64::INFINITY, 10.0], Some(&[10.0, 10.0]));
    let q = compute_quality(&t);
    assert_eq!(q.star_count, 1);
    assert_eq!(q.rms_ra, INVALID);
    assert_eq!(q.median_ra, INVALID);
    assert!(q.rms_dec.is_finite());
}

#[test]
fn test_report_per_science_tile() {
    let tan = TanTransform::new(DVec2::ZERO, DVec2::ZERO, [[1.0, 0.0], [0.0, 1.0]]);
    let tiles = vec![
        Tile::science(1, tan),
        Tile::science(2, tan),
        Tile::science(3, tan),
        Tile::auxiliary(9, tan),
    ];
    let t = table(&[(1.0, 0.1, 0.0), (1.0, 0.1, 0.0), (2.0, 0.0, 0.5)]);
    let report = quality_report(&t, &SourceLayout::default(), &tiles);

    assert_eq!(report.global.star_count, 3);
    assert_eq!(report.per_tile.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(report.per_tile[&1].star_count, 2);
    assert!((report.per_tile[&2].median_dec - 0.5).abs() < 1e-6);
    assert_eq!(report.per_tile[&3], QualityRecord::empty());
}

#[test]
fn test_yaml_uses_header_names() {
    let yaml = serde_yml::to_string(&QualityRecord::empty()).unwrap();
    assert!(yaml.contains("RMS-RA: -9999"), "{}", yaml);
    assert!(yaml.contains("SIGMA: -99"), "{}", yaml);
    assert!(yaml.contains("STARCOUNT: 0"), "{}", yaml);
    let keys: Vec<_> = QualityRecord::empty().entries().iter().map(|e| e.0).collect();
    assert_eq!(keys[9], "STARCOUNT");
}

#[test]
fn test_residuals_wrap_across_ra_zero() {
    let mut t = MatchTable::new(2, 2);
    // 0.72" apart in RA at the equator, on either side of 0/360.
    t.push(&[360.0 - 0.36 * ARCSEC, 0.0], Some(&[0.36 * ARCSEC, 0.0]));
    let q = compute_quality(&t);
    assert_eq!(q.star_count, 1);
    assert!((q.median_ra + 0.72).abs() < 1e-6, "median_ra = {}", q.median_ra);
    assert!((q.rms - 0.72).abs() < 1e-6, "rms = {}", q.rms);
}
