//! Fixed-width point catalogs and cross-match tables.
//!
//! Every catalog handed between stages carries its coordinates in the first
//! two columns (RA, Dec in degrees, or pixel X, Y). Auxiliary columns ride
//! along by position and are never reinterpreted by the matchers.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;


/// One arcsecond in degrees.
pub const ARCSEC: f64 = 1.0 / 3600.0;
/// One arcminute in degrees.
pub const ARCMIN: f64 = 1.0 / 60.0;

/// Declinations beyond this are clamped when computing the RA scale factor.
pub const MAX_SCALING_DECLINATION: f64 = 85.0;

/// Row-major table of `f64` values with a fixed column count.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    width: usize,
    values: Vec<f64>,
}

impl Catalog {
    /// Creates an empty catalog with `width` columns.
    ///
    /// # Panics
    ///
    /// Panics if `width < 2`.
    pub fn new(width: usize) -> Self {
        assert!(width >= 2, "catalog must have at least 2 columns, got {}", width);
        Self {
            width,
            values: Vec::new(),
        }
    }

    /// Builds a catalog from rows, rejecting ragged input.
    pub fn from_rows<R: AsRef<[f64]>>(
        width: usize,
        rows: impl IntoIterator<Item = R>,
    ) -> Result<Self, CatalogError> {
        if width < 2 {
            return Err(CatalogError::TooNarrow { width });
        }
        let mut values = Vec::new();
        for (row, values_in_row) in rows.into_iter().enumerate() {
            let values_in_row = values_in_row.as_ref();
            if values_in_row.len() != width {
                return Err(CatalogError::RaggedRow {
                    row,
                    found: values_in_row.len(),
                    expected: width,
                });
            }
            values.extend_from_slice(values_in_row);
        }
        Ok(Self { width, values })
    }

    /// Coordinate-only catalog from positions.
    pub fn from_positions(positions: &[DVec2]) -> Self {
        let mut values = Vec::with_capacity(positions.len() * 2);
        for p in positions {
            values.push(p.x);
            values.push(p.y);
        }
        Self { width: 2, values }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.values.len() / self.width
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn row(&self, index: usize) -> &[f64] {
        &self.values[index * self.width..(index + 1) * self.width]
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[f64]> {
        self.values.chunks_exact(self.width)
    }

    #[inline]
    pub fn position(&self, index: usize) -> DVec2 {
        let row = self.row(index);
        DVec2::new(row[0], row[1])
    }

    pub fn positions(&self) -> Vec<DVec2> {
        self.rows().map(|r| DVec2::new(r[0], r[1])).collect()
    }

    pub fn column(&self, column: usize) -> impl Iterator<Item = f64> + '_ {
        assert!(
            column < self.width,
            "column {} out of range for width {}",
            column,
            self.width
        );
        self.rows().map(move |r| r[column])
    }

    /// Appends a row.
    ///
    /// # Panics
    ///
    /// Panics if the row width differs from the catalog width.
    pub fn push_row(&mut self, row: &[f64]) {
        assert_eq!(
            row.len(),
            self.width,
            "row has {} columns, catalog has {}",
            row.len(),
            self.width
        );
        self.values.extend_from_slice(row);
    }

    /// New catalog with the rows for which `keep` is true.
    pub fn filter(&self, mut keep: impl FnMut(&[f64]) -> bool) -> Catalog {
        let mut out = Catalog::new(self.width);
        for row in self.rows().filter(|r| keep(r)) {
            out.values.extend_from_slice(row);
        }
        out
    }

    /// New catalog with the given rows, in the given order.
    pub fn select(&self, indices: &[usize]) -> Catalog {
        let mut out = Catalog::new(self.width);
        out.values.reserve(indices.len() * self.width);
        for &i in indices {
            out.values.extend_from_slice(self.row(i));
        }
        out
    }

    /// Appends all rows of `other`.
    pub fn extend(&mut self, other: &Catalog) {
        assert_eq!(
            other.width, self.width,
            "cannot append width {} rows to width {} catalog",
            other.width, self.width
        );
        self.values.extend_from_slice(&other.values);
    }

    /// Projection onto the two coordinate columns.
    pub fn coordinates(&self) -> Catalog {
        if self.width == 2 {
            return self.clone();
        }
        Catalog::from_positions(&self.positions())
    }

    /// Copy of this catalog with its coordinate columns replaced.
    ///
    /// # Panics
    ///
    /// Panics if `positions.len() != self.len()`.
    pub fn with_positions(&self, positions: &[DVec2]) -> Catalog {
        assert_eq!(
            positions.len(),
            self.len(),
            "position count does not match catalog length"
        );
        let mut out = self.clone();
        for (row, p) in out.values.chunks_exact_mut(self.width).zip(positions) {
            row[0] = p.x;
            row[1] = p.y;
        }
        out
    }

    /// Largest |Dec| over the catalog, 0 when empty.
    pub fn max_abs_declination(&self) -> f64 {
        self.rows().map(|r| r[1].abs()).fold(0.0, f64::max)
    }
}

/// RA scale factor `cos(max |Dec|)` over the given catalogs, with the
/// declination clamped at [`MAX_SCALING_DECLINATION`].
///
/// Multiplying RA by this factor makes Euclidean distances approximate
/// angular distances across the field.
pub fn declination_scale(catalogs: &[&Catalog]) -> f64 {
    let max_dec = catalogs
        .iter()
        .map(|c| c.max_abs_declination())
        .fold(0.0, f64::max)
        .min(MAX_SCALING_DECLINATION);
    max_dec.to_radians().cos()
}

/// RA difference `ra - center_ra` wrapped into [-180, 180).
pub fn ra_offset(ra: f64, center_ra: f64) -> f64 {
    (ra - center_ra + 180.0).rem_euclid(360.0) - 180.0
}

/// RA of the first row of the first non-empty catalog, 0 when all are empty.
pub fn ra_anchor(catalogs: &[&Catalog]) -> f64 {
    catalogs
        .iter()
        .find(|c| !c.is_empty())
        .map_or(0.0, |c| c.row(0)[0])
}

/// Coordinates of `catalog` with RA measured from `anchor` across the 0/360
/// wrap and multiplied by `ra_scale`.
pub fn scaled_positions(catalog: &Catalog, ra_scale: f64, anchor: f64) -> Vec<DVec2> {
    catalog
        .rows()
        .map(|r| DVec2::new(ra_offset(r[0], anchor) * ra_scale, r[1]))
        .collect()
}

/// Column roles of a raw detector source catalog.
///
/// RA and Dec are always columns 0 and 1; the rest are configurable. The
/// FWHM column is in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLayout {
    pub x: usize,
    pub y: usize,
    pub fwhm: usize,
    pub mag: usize,
    pub mag_err: usize,
    pub flags: usize,
    pub tile: usize,
}

impl Default for SourceLayout {
    fn default() -> Self {
        Self {
            x: 2,
            y: 3,
            fwhm: 4,
            mag: 5,
            mag_err: 6,
            flags: 7,
            tile: 8,
        }
    }
}

impl SourceLayout {
    /// Checks every role against the catalog width.
    pub fn validate(&self, width: usize) -> Result<(), CatalogError> {
        let roles = [
            ("x", self.x),
            ("y", self.y),
            ("fwhm", self.fwhm),
            ("mag", self.mag),
            ("mag_err", self.mag_err),
            ("flags", self.flags),
            ("tile", self.tile),
        ];
        for (role, index) in roles {
            if index >= width {
                return Err(CatalogError::ColumnOutOfRange { role, index, width });
            }
        }
        Ok(())
    }

    #[inline]
    pub fn pixel(&self, row: &[f64]) -> DVec2 {
        DVec2::new(row[self.x], row[self.y])
    }

    #[inline]
    pub fn tile_id(&self, row: &[f64]) -> i64 {
        row[self.tile].round() as i64
    }
}

/// Source rows joined with reference rows.
///
/// Each row is the source columns followed by the reference columns. Depending
/// on the matcher that produced it, unmatched sources are either absent or
/// present with every reference column set to NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchTable {
    source_width: usize,
    reference_width: usize,
    rows: Catalog,
}

impl MatchTable {
    pub fn new(source_width: usize, reference_width: usize) -> Self {
        Self {
            source_width,
            reference_width,
            rows: Catalog::new(source_width + reference_width),
        }
    }

    pub(crate) fn push(&mut self, source: &[f64], reference: Option<&[f64]>) {
        debug_assert_eq!(source.len(), self.source_width);
        self.rows.values.extend_from_slice(source);
        match reference {
            Some(reference) => {
                debug_assert_eq!(reference.len(), self.reference_width);
                self.rows.values.extend_from_slice(reference);
            }
            None => self
                .rows
                .values
                .extend(std::iter::repeat_n(f64::NAN, self.reference_width)),
        }
    }

    pub fn source_width(&self) -> usize {
        self.source_width
    }

    pub fn reference_width(&self) -> usize {
        self.reference_width
    }

    /// Total rows, matched or not.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn source_row(&self, index: usize) -> &[f64] {
        &self.rows.row(index)[..self.source_width]
    }

    pub fn reference_row(&self, index: usize) -> &[f64] {
        &self.rows.row(index)[self.source_width..]
    }

    pub fn is_matched(&self, index: usize) -> bool {
        self.reference_row(index)[0].is_finite()
    }

    pub fn matched_count(&self) -> usize {
        (0..self.len()).filter(|&i| self.is_matched(i)).count()
    }

    /// `(source row, reference row)` for every matched row.
    pub fn pairs(&self) -> impl Iterator<Item = (&[f64], &[f64])> {
        self.rows
            .rows()
            .map(|r| r.split_at(self.source_width))
            .filter(|(_, reference)| reference[0].is_finite())
    }

    /// Rows whose source part satisfies `keep`.
    pub fn filter_sources(&self, mut keep: impl FnMut(&[f64]) -> bool) -> MatchTable {
        MatchTable {
            source_width: self.source_width,
            reference_width: self.reference_width,
            rows: self.rows.filter(|r| keep(&r[..self.source_width])),
        }
    }

    /// The joined rows as a plain catalog.
    pub fn as_catalog(&self) -> &Catalog {
        &self.rows
    }
}
