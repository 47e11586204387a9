//! Offset voting: the translation confirmed by the most star pairs.
//!
//! Every (source, reference) pair closer than the pointing error contributes
//! its offset vector as a vote. Votes are clustered with a self-join on a k-d
//! tree over the offsets. The offset with the most neighbors within the
//! voting radius wins; on a tie the first one does.

use glam::DVec2;

use crate::catalog::{Catalog, declination_scale, ra_anchor, scaled_positions};
use crate::spatial::KdTree;


/// The winning offset and its support.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetVote {
    /// Offsets within the voting radius of the winner, itself included.
    pub votes: usize,
    /// `reference - source` in degrees (RA, Dec), RA unscaled.
    pub offset: DVec2,
}

/// Outcome of [`count_matches`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchResult {
    /// No source had a reference star within the pointing error.
    NoCandidates,
    Found(OffsetVote),
}

impl MatchResult {
    /// Vote total, 0 without candidates.
    pub fn votes(&self) -> usize {
        match self {
            MatchResult::NoCandidates => 0,
            MatchResult::Found(vote) => vote.votes,
        }
    }

    pub fn vote(&self) -> Option<OffsetVote> {
        match self {
            MatchResult::NoCandidates => None,
            MatchResult::Found(vote) => Some(*vote),
        }
    }
}

/// Finds the dominant `reference - source` offset.
///
/// `pointing_error` and `voting_radius` are in degrees. RA is scaled by the
/// cosine of the larger max |Dec| of the two catalogs for the duration of the
/// call; the returned offset is in unscaled RA/Dec.
pub fn count_matches(
    src: &Catalog,
    reference: &Catalog,
    pointing_error: f64,
    voting_radius: f64,
) -> MatchResult {
    if src.is_empty() || reference.is_empty() {
        return MatchResult::NoCandidates;
    }

    let ra_scale = declination_scale(&[src, reference]);
    let anchor = ra_anchor(&[src, reference]);
    let src_points = scaled_positions(src, ra_scale, anchor);
    let ref_points = scaled_positions(reference, ra_scale, anchor);

    let src_tree = KdTree::build(&src_points);
    let ref_tree = KdTree::build(&ref_points);

    let candidates = src_tree.points_within_radius(&ref_tree, pointing_error);
    let ref_points = &ref_points;
    let offsets: Vec<DVec2> = candidates
        .iter()
        .enumerate()
        .flat_map(|(src_idx, refs)| {
            let src_point = src_points[src_idx];
            refs.iter().map(move |&ref_idx| ref_points[ref_idx] - src_point)
        })
        .collect();

    if offsets.is_empty() {
        return MatchResult::NoCandidates;
    }

    let offset_tree = KdTree::build(&offsets);
    let counts = offset_tree.neighbor_counts(&offset_tree, voting_radius);

    // First maximum wins ties.
    let mut best_idx = 0;
    for (i, &count) in counts.iter().enumerate() {
        if count > counts[best_idx] {
            best_idx = i;
        }
    }

    let best = offsets[best_idx];
    let vote = OffsetVote {
        votes: counts[best_idx],
        offset: DVec2::new(best.x / ra_scale, best.y),
    };

    tracing::trace!(
        candidates = offsets.len(),
        votes = vote.votes,
        dra_arcsec = vote.offset.x * 3600.0,
        ddec_arcsec = vote.offset.y * 3600.0,
        "offset vote"
    );

    MatchResult::Found(vote)
}
