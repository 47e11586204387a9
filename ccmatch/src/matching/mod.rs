//! Nearest-neighbor cross-matching with a multiplicity bound.
//!
//! Two conventions are offered. [`match_catalogs`] drops sources without an
//! acceptable counterpart and feeds the fitters. [`match_catalogs_keep_unmatched`]
//! keeps one row per source and fills the reference columns with NaN, for
//! results where row correspondence with the input catalog matters.

use crate::catalog::{Catalog, MatchTable, declination_scale, ra_anchor, scaled_positions};
use crate::spatial::KdTree;


/// Matches each source to the nearest reference star within `radius` degrees.
///
/// A source is accepted when it has between 1 and `max_multiplicity`
/// candidates; with `max_multiplicity == 1` only unambiguous matches survive.
/// Rejected sources are dropped.
pub fn match_catalogs(
    src: &Catalog,
    reference: &Catalog,
    radius: f64,
    max_multiplicity: usize,
) -> MatchTable {
    build_table(src, reference, radius, max_multiplicity, false)
}

/// Like [`match_catalogs`], but rejected sources are kept with NaN reference
/// columns, so the output has exactly one row per source, in source order.
pub fn match_catalogs_keep_unmatched(
    src: &Catalog,
    reference: &Catalog,
    radius: f64,
    max_multiplicity: usize,
) -> MatchTable {
    build_table(src, reference, radius, max_multiplicity, true)
}

fn build_table(
    src: &Catalog,
    reference: &Catalog,
    radius: f64,
    max_multiplicity: usize,
    keep_unmatched: bool,
) -> MatchTable {
    let mut table = MatchTable::new(src.width(), reference.width());
    let candidates = candidates(src, reference, radius);

    let mut ambiguous = 0usize;
    for (src_idx, refs) in candidates.iter().enumerate() {
        let accepted = !refs.is_empty() && refs.len() <= max_multiplicity;
        if refs.len() > max_multiplicity {
            ambiguous += 1;
        }
        if accepted {
            table.push(src.row(src_idx), Some(reference.row(refs[0])));
        } else if keep_unmatched {
            table.push(src.row(src_idx), None);
        }
    }

    tracing::debug!(
        sources = src.len(),
        references = reference.len(),
        radius_arcsec = radius * 3600.0,
        matched = table.matched_count(),
        ambiguous,
        "cross-match"
    );

    table
}

/// Reference candidates of every source within `radius`, nearest first.
///
/// Positions are compared with RA scaled by the declination factor of both
/// catalogs.
pub fn candidates(src: &Catalog, reference: &Catalog, radius: f64) -> Vec<Vec<usize>> {
    if reference.is_empty() {
        return vec![Vec::new(); src.len()];
    }
    let ra_scale = declination_scale(&[src, reference]);
    let anchor = ra_anchor(&[src, reference]);
    let src_tree = KdTree::build(&scaled_positions(src, ra_scale, anchor));
    let ref_tree = KdTree::build(&scaled_positions(reference, ra_scale, anchor));
    src_tree.points_within_radius(&ref_tree, radius)
}
