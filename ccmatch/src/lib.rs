//! ccmatch - Astrometric calibration by catalog cross-matching.
//!
//! Given detections on a mosaic camera (pixel positions plus RA/Dec from the
//! nominal per-tile transforms) and a reference star catalog, the library
//! finds the global rotation and shift that align the two, then refines each
//! tile's transform and reports residual statistics.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use ccmatch::{CalibrationConfig, PreloadedCatalog, SourceLayout, calibrate};
//!
//! let reference = PreloadedCatalog::new(reference_catalog);
//! let result = calibrate(&sources, &SourceLayout::default(), &tiles, &reference, pivot,
//!     &CalibrationConfig::default())?;
//!
//! if result.valid {
//!     println!("rms {:.3}\"", result.quality.global.rms);
//! }
//! ```

pub mod calibrate;
pub mod catalog;
pub mod config;
pub mod error;
pub mod matching;
pub(crate) mod math;
pub mod preprocess;
pub mod quality;
pub mod reference;
pub mod refine;
pub mod regional;
pub mod rotation;
pub(crate) mod spatial;
pub mod transform;
pub mod voting;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Catalogs and errors
// ============================================================================

pub use catalog::{ARCMIN, ARCSEC, Catalog, MatchTable, SourceLayout};
pub use error::{CalibrationError, CatalogError, ReferenceError};

// ============================================================================
// Configuration
// ============================================================================

pub use common::Execution;
pub use config::{
    CalibrationConfig, CalibrationMode, PreprocessConfig, RefineConfig, RegionalConfig,
    RotationSearchConfig, TileStageConfig,
};
pub use math::LMConfig;

// ============================================================================
// Pipeline stages
// ============================================================================

pub use matching::{match_catalogs, match_catalogs_keep_unmatched};
pub use refine::{FitOutcome, GlobalFit, fit_shift_rotation};
pub use regional::{FitParameters, RegionalResult, TileFitReport, TileOutcome, improve_solution};
pub use rotation::{AngleRange, RotationGuess, SearchOutcome, ShiftRotation, find_best_guess};
pub use voting::{MatchResult, OffsetVote, count_matches};

// ============================================================================
// Transforms, reference access, results
// ============================================================================

pub use calibrate::{CalibrationResult, FailureReason, RegionalStage, StageRecord, calibrate};
pub use quality::{QualityRecord, QualityReport, compute_quality, quality_report};
pub use reference::{PreloadedCatalog, ReferenceCatalog, parse_text_catalog, restrict_to_overlap};
pub use transform::{TanTransform, Tile, TileTransform};
