//! Residual statistics of a matched catalog.
//!
//! Residuals are source minus reference in arcseconds, RA scaled by
//! cos(source Dec). Rows without a reference counterpart are ignored.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::catalog::{ARCSEC, MatchTable, SourceLayout, ra_offset};
use crate::math::statistics::{median_mut, percentile_sigma_mut, rms};
use crate::transform::Tile;

#[cfg(test)]
mod tests;

/// Written for values that are not finite.
pub const INVALID: f64 = -9999.0;
/// Written when a percentile cannot be computed.
pub const NO_PERCENTILE: f64 = -99.0;

/// Alignment quality in arcseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityRecord {
    #[serde(rename = "RMS-RA")]
    pub rms_ra: f64,
    #[serde(rename = "RMS-DEC")]
    pub rms_dec: f64,
    #[serde(rename = "RMS")]
    pub rms: f64,
    #[serde(rename = "SIGMA-RA")]
    pub sigma_ra: f64,
    #[serde(rename = "SIGMA-DEC")]
    pub sigma_dec: f64,
    #[serde(rename = "SIGMA")]
    pub sigma: f64,
    #[serde(rename = "MEDIAN-RA")]
    pub median_ra: f64,
    #[serde(rename = "MEDIAN-DEC")]
    pub median_dec: f64,
    /// Median of the total offset.
    #[serde(rename = "MEDIAN")]
    pub median: f64,
    #[serde(rename = "STARCOUNT")]
    pub star_count: usize,
}

impl QualityRecord {
    /// Record of a table without usable rows.
    pub fn empty() -> Self {
        Self {
            rms_ra: INVALID,
            rms_dec: INVALID,
            rms: INVALID,
            sigma_ra: NO_PERCENTILE,
            sigma_dec: NO_PERCENTILE,
            sigma: NO_PERCENTILE,
            median_ra: INVALID,
            median_dec: INVALID,
            median: INVALID,
            star_count: 0,
        }
    }

    /// `(key, value)` pairs under their catalog header names.
    pub fn entries(&self) -> [(&'static str, f64); 10] {
        [
            ("RMS-RA", self.rms_ra),
            ("RMS-DEC", self.rms_dec),
            ("RMS", self.rms),
            ("SIGMA-RA", self.sigma_ra),
            ("SIGMA-DEC", self.sigma_dec),
            ("SIGMA", self.sigma),
            ("MEDIAN-RA", self.median_ra),
            ("MEDIAN-DEC", self.median_dec),
            ("MEDIAN", self.median),
            ("STARCOUNT", self.star_count as f64),
        ]
    }
}

impl fmt::Display for QualityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} median=({:.3}, {:.3}) rms=({:.3}, {:.3}, {:.3}) sigma=({:.3}, {:.3}, {:.3})",
            self.star_count,
            self.median_ra,
            self.median_dec,
            self.rms_ra,
            self.rms_dec,
            self.rms,
            self.sigma_ra,
            self.sigma_dec,
            self.sigma
        )
    }
}

fn finite_or(value: Option<f64>, fallback: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        Some(_) => INVALID,
        None => fallback,
    }
}

/// Quality of the matched rows of `matches`.
pub fn compute_quality(matches: &MatchTable) -> QualityRecord {
    quality_of(matches.pairs())
}

fn quality_of<'a>(pairs: impl Iterator<Item = (&'a [f64], &'a [f64])>) -> QualityRecord {
    let mut d_ra = Vec::new();
    let mut d_dec = Vec::new();
    for (src, reference) in pairs {
        let cos_dec = src[1].to_radians().cos();
        d_ra.push(ra_offset(src[0], reference[0]) * cos_dec / ARCSEC);
        d_dec.push((src[1] - reference[1]) / ARCSEC);
    }
    if d_ra.is_empty() {
        return QualityRecord::empty();
    }
    let mut d_total: Vec<f64> = d_ra.iter().zip(&d_dec).map(|(a, d)| a.hypot(*d)).collect();

    let record = QualityRecord {
        rms_ra: finite_or(rms(d_ra.iter().copied()), INVALID),
        rms_dec: finite_or(rms(d_dec.iter().copied()), INVALID),
        rms: finite_or(rms(d_total.iter().copied()), INVALID),
        sigma_ra: finite_or(percentile_sigma_mut(&mut d_ra.clone()), NO_PERCENTILE),
        sigma_dec: finite_or(percentile_sigma_mut(&mut d_dec.clone()), NO_PERCENTILE),
        sigma: finite_or(percentile_sigma_mut(&mut d_total.clone()), NO_PERCENTILE),
        median_ra: finite_or(median_mut(&mut d_ra), INVALID),
        median_dec: finite_or(median_mut(&mut d_dec), INVALID),
        median: finite_or(median_mut(&mut d_total), INVALID),
        star_count: d_total.len(),
    };
    tracing::debug!(
        star_count = record.star_count,
        median_ra = record.median_ra,
        median_dec = record.median_dec,
        rms = record.rms,
        sigma = record.sigma,
        "alignment quality"
    );
    record
}

/// Global quality plus one record per science tile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub global: QualityRecord,
    pub per_tile: BTreeMap<i64, QualityRecord>,
}

/// Quality of `matches` overall and split by the tile column of the source
/// part. Every science tile gets a record, empty ones included.
pub fn quality_report<T>(
    matches: &MatchTable,
    layout: &SourceLayout,
    tiles: &[Tile<T>],
) -> QualityReport {
    let per_tile = tiles
        .iter()
        .filter(|t| t.is_science)
        .map(|t| {
            let record = quality_of(
                matches
                    .pairs()
                    .filter(|(src, _)| layout.tile_id(src) == t.id),
            );
            (t.id, record)
        })
        .collect();
    QualityReport {
        global: compute_quality(matches),
        per_tile,
    }
}
