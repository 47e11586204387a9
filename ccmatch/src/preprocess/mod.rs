//! Source and reference catalog filtering ahead of matching.

use crate::catalog::{
    ARCSEC, Catalog, SourceLayout, declination_scale, ra_anchor, scaled_positions,
};
use crate::config::PreprocessConfig;
use crate::error::CatalogError;
use crate::spatial::KdTree;

#[cfg(test)]
mod tests;

/// Rows whose flag column is zero.
pub fn drop_flagged(catalog: &Catalog, flags_column: usize) -> Catalog {
    catalog.filter(|row| row[flags_column] == 0.0)
}

/// Rows with FWHM above `min_fwhm` (degrees) and magnitude error below
/// `max_mag_err`.
pub fn drop_marginal(
    catalog: &Catalog,
    layout: &SourceLayout,
    min_fwhm: f64,
    max_mag_err: f64,
) -> Catalog {
    catalog.filter(|row| row[layout.fwhm] > min_fwhm && row[layout.mag_err] < max_mag_err)
}

/// Rows without another row within `radius` degrees.
///
/// Distances use declination-scaled RA. Applying the filter to its own output
/// with the same radius returns it unchanged.
pub fn pick_isolated(catalog: &Catalog, radius: f64) -> Catalog {
    if catalog.is_empty() {
        return catalog.clone();
    }
    let ra_scale = declination_scale(&[catalog]);
    let anchor = ra_anchor(&[catalog]);
    let tree = KdTree::build(&scaled_positions(catalog, ra_scale, anchor));
    let counts = tree.neighbor_counts(&tree, radius);

    // Every point finds itself.
    let isolated: Vec<usize> = counts
        .iter()
        .enumerate()
        .filter(|&(_, &count)| count <= 1)
        .map(|(i, _)| i)
        .collect();
    catalog.select(&isolated)
}

/// The `n` brightest rows, brightest first, when there are more than `n`;
/// otherwise the catalog unchanged.
pub fn select_brightest(catalog: &Catalog, mag_column: usize, n: usize) -> Catalog {
    if catalog.len() <= n {
        return catalog.clone();
    }
    let mut order: Vec<usize> = (0..catalog.len()).collect();
    order.sort_by(|&a, &b| catalog.row(a)[mag_column].total_cmp(&catalog.row(b)[mag_column]));
    order.truncate(n);
    catalog.select(&order)
}

/// Output of [`prepare_sources`].
#[derive(Debug, Clone)]
pub struct PreparedSources {
    /// Flag- and quality-filtered rows with every raw column, for the
    /// refinement stages.
    pub full: Catalog,
    /// Isolated, brightness-capped rows with every raw column.
    pub selected: Catalog,
    /// True when no source survived isolation and `selected` was taken from
    /// the unisolated rows.
    pub isolation_fallback: bool,
}

impl PreparedSources {
    /// Coordinate-only projection of the selected rows, as used by the
    /// voting search.
    pub fn matching_catalog(&self) -> Catalog {
        self.selected.coordinates()
    }
}

/// Runs the source filter chain: flags, quality, isolation, brightness.
///
/// An empty isolation result falls back to the quality-filtered catalog with
/// a warning. Only a layout that does not fit the catalog is an error.
pub fn prepare_sources(
    raw: &Catalog,
    layout: &SourceLayout,
    config: &PreprocessConfig,
) -> Result<PreparedSources, CatalogError> {
    layout.validate(raw.width())?;

    let unflagged = drop_flagged(raw, layout.flags);
    let full = drop_marginal(
        &unflagged,
        layout,
        config.min_fwhm_arcsec * ARCSEC,
        config.max_mag_err,
    );

    let mut isolated = pick_isolated(&full, config.isolation_radius_arcsec * ARCSEC);
    let isolation_fallback = isolated.is_empty() && !full.is_empty();
    if isolation_fallback {
        tracing::warn!(
            candidates = full.len(),
            radius_arcsec = config.isolation_radius_arcsec,
            "no isolated sources, using the full filtered catalog"
        );
        isolated = full.clone();
    }

    let selected = select_brightest(&isolated, layout.mag, config.max_sources);

    tracing::debug!(
        raw = raw.len(),
        unflagged = unflagged.len(),
        good = full.len(),
        isolated = isolated.len(),
        selected = selected.len(),
        "source catalog prepared"
    );

    Ok(PreparedSources {
        full,
        selected,
        isolation_fallback,
    })
}

/// Isolates reference stars, growing the isolation radius until at most
/// `reference_max_sources` remain.
pub fn thin_reference(reference: &Catalog, config: &PreprocessConfig) -> Catalog {
    let mut radius = config.reference_min_isolation_arcsec;
    let mut thinned = pick_isolated(reference, radius * ARCSEC);
    while thinned.len() > config.reference_max_sources {
        radius += config.reference_isolation_step_arcsec;
        thinned = pick_isolated(&thinned, radius * ARCSEC);
    }

    tracing::debug!(
        input = reference.len(),
        output = thinned.len(),
        radius_arcsec = radius,
        "reference catalog thinned"
    );
    thinned
}
