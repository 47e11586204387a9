//! Reference catalog access.
//!
//! The calibration core only sees [`ReferenceCatalog`]. [`PreloadedCatalog`]
//! serves an in-memory table with the RA-wrapping box search used for the
//! on-disk reference catalogs, and [`parse_text_catalog`] reads the
//! whitespace-separated text format the binary accepts for both inputs.

use std::io::BufRead;

use glam::DVec2;

pub use crate::catalog::ra_offset;
use crate::catalog::{Catalog, declination_scale};
use crate::error::ReferenceError;


/// Source of reference stars around a sky position.
pub trait ReferenceCatalog {
    /// Stars within `radius` degrees of `center` (a box, not a circle). An
    /// empty catalog is a valid answer.
    fn fetch(&self, center: DVec2, radius: f64) -> Result<Catalog, ReferenceError>;
}

/// A reference catalog already held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct PreloadedCatalog {
    catalog: Catalog,
}

impl PreloadedCatalog {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

impl ReferenceCatalog for PreloadedCatalog {
    /// Box of half-width `radius` in Dec and `radius / cos(dec)` in RA,
    /// wrapping across RA 0/360.
    fn fetch(&self, center: DVec2, radius: f64) -> Result<Catalog, ReferenceError> {
        let cos_dec = center.y.to_radians().cos();
        let ra_half_width = if cos_dec > 1e-9 {
            radius / cos_dec
        } else {
            f64::INFINITY
        };
        let found = self.catalog.filter(|row| {
            (row[1] - center.y).abs() < radius
                && ra_offset(row[0], center.x).abs() < ra_half_width
        });
        tracing::debug!(
            ra = center.x,
            dec = center.y,
            radius,
            found = found.len(),
            "reference catalog search"
        );
        Ok(found)
    }
}

/// Reference rows inside the bounding box of `sources`, grown by `margin`
/// degrees on the sky.
///
/// RA extents are measured relative to the first source, so fields that
/// straddle RA 0/360 work.
pub fn restrict_to_overlap(sources: &Catalog, reference: &Catalog, margin: f64) -> Catalog {
    if sources.is_empty() {
        return Catalog::new(reference.width());
    }
    let anchor = sources.row(0)[0];
    let mut ra_min = f64::INFINITY;
    let mut ra_max = f64::NEG_INFINITY;
    let mut dec_min = f64::INFINITY;
    let mut dec_max = f64::NEG_INFINITY;
    for row in sources.rows() {
        let offset = ra_offset(row[0], anchor);
        ra_min = ra_min.min(offset);
        ra_max = ra_max.max(offset);
        dec_min = dec_min.min(row[1]);
        dec_max = dec_max.max(row[1]);
    }

    let ra_margin = margin / declination_scale(&[sources]);
    let restricted = reference.filter(|row| {
        let offset = ra_offset(row[0], anchor);
        row[1] >= dec_min - margin
            && row[1] <= dec_max + margin
            && offset >= ra_min - ra_margin
            && offset <= ra_max + ra_margin
    });
    tracing::debug!(
        reference = reference.len(),
        restricted = restricted.len(),
        margin,
        "restricted reference catalog to source footprint"
    );
    restricted
}

/// Parses whitespace-separated numeric rows.
///
/// Blank lines and `#` comments are skipped. The first data row fixes the
/// width; an input without data rows gives an empty two-column catalog.
pub fn parse_text_catalog(reader: impl BufRead) -> Result<Catalog, ReferenceError> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut width = None;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = index + 1;
        let data = line.split('#').next().unwrap_or("").trim();
        if data.is_empty() {
            continue;
        }
        let row = data
            .split_whitespace()
            .map(|token| {
                token.parse::<f64>().map_err(|e| ReferenceError::Parse {
                    line: line_no,
                    message: format!("'{}': {}", token, e),
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let expected = *width.get_or_insert(row.len());
        if row.len() != expected {
            return Err(ReferenceError::Parse {
                line: line_no,
                message: format!("expected {} columns, found {}", expected, row.len()),
            });
        }
        rows.push(row);
    }

    match width {
        Some(width) => Ok(Catalog::from_rows(width, rows)?),
        None => Ok(Catalog::new(2)),
    }
}
