//! Calibrates one exposure from text catalogs.
//!
//! # Usage
//!
//! ```bash
//! ccmatch sources.txt reference.txt tiles.yml [config.yml]
//! ```
//!
//! Arguments:
//! - sources.txt: detections, one per line, columns in `layout` order
//!   (default `ra dec x y fwhm mag mag_err flags tile`)
//! - reference.txt: reference stars, `ra dec ...`
//! - tiles.yml: `pivot: [ra, dec]`, optional `layout`, and the `tiles` list
//! - config.yml: optional `CalibrationConfig`; missing fields take defaults
//!
//! A config that widens the rotator search and stops after the shear stage:
//!
//! ```yaml
//! mode: otashear
//! rotator_range:
//!   ExplicitRange: [-5.0, 5.0]
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result, bail};
use glam::DVec2;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use ccmatch::{
    CalibrationConfig, Catalog, PreloadedCatalog, SourceLayout, TanTransform, Tile, calibrate,
    parse_text_catalog,
};

#[derive(Debug, Deserialize)]
struct TileSet {
    /// Nominal pointing center, the rotation pivot.
    pivot: DVec2,
    #[serde(default)]
    layout: SourceLayout,
    tiles: Vec<Tile<TanTransform>>,
}

fn read_catalog(path: &Path) -> Result<Catalog> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_text_catalog(BufReader::new(file)).with_context(|| format!("reading {}", path.display()))
}

fn read_yaml<T: DeserializeOwned + 'static>(path: &Path) -> Result<T> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("opening {}", path.display()))?;
    serde_yml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 || args.len() > 5 {
        eprintln!(
            "Usage: {} <sources.txt> <reference.txt> <tiles.yml> [config.yml]",
            args[0]
        );
        std::process::exit(2);
    }

    common::log_setup::setup_logging("info", "logs", "ccmatch")?;

    let sources = read_catalog(Path::new(&args[1]))?;
    let reference = read_catalog(Path::new(&args[2]))?;
    let tile_set: TileSet = read_yaml(Path::new(&args[3]))?;
    let config: CalibrationConfig = match args.get(4) {
        Some(path) => read_yaml(Path::new(path))?,
        None => CalibrationConfig::default(),
    };
    if tile_set.tiles.is_empty() {
        bail!("{} lists no tiles", args[3]);
    }

    tracing::info!(
        sources = sources.len(),
        reference = reference.len(),
        tiles = tile_set.tiles.len(),
        "inputs loaded"
    );

    let result = calibrate(
        &sources,
        &tile_set.layout,
        &tile_set.tiles,
        &PreloadedCatalog::new(reference),
        tile_set.pivot,
        &config,
    )
    .context("calibration aborted")?;

    for stage in &result.stages {
        println!("{}", stage);
    }
    match result.failure {
        None => println!("valid solution"),
        Some(reason) => println!("no valid solution: {}", reason),
    }
    println!("global: {}", result.quality.global);
    for (tile, record) in &result.quality.per_tile {
        println!("tile {}: {}", tile, record);
    }
    if result.valid {
        println!("{}", serde_yml::to_string(&result.tiles).context("serializing tiles")?);
    }
    Ok(())
}
