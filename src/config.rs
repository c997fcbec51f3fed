//! Command-line configuration.
//!
//! The binary exposes the two batch commands:
//!
//! - `mcd-mosaic convert <input> [output]`: raw containers to the
//!   intermediate representation
//! - `mcd-mosaic stitch <input> [output]`: converted containers to
//!   composited mosaic images
//!
//! Worker-pool sizes can also be set via the `MCD_MOSAIC_WORKERS`
//! environment variable.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::output::PixelType;

// =============================================================================
// Default Values
// =============================================================================

/// Default tile edge length passed through to the output descriptor.
pub const DEFAULT_TILE_EDGE: u32 = 256;

/// Smallest accepted tile edge.
const MIN_TILE_EDGE: u32 = 16;

/// Largest accepted tile edge.
const MAX_TILE_EDGE: u32 = 4096;

// =============================================================================
// CLI
// =============================================================================

/// MCD Mosaic - convert raw imaging containers and stitch them into mosaics.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcd-mosaic")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Convert one container or a directory of containers to the
    /// intermediate representation
    Convert(ConvertConfig),

    /// Stitch converted containers into one composited image each
    Stitch(StitchConfig),
}

// =============================================================================
// Convert Configuration
// =============================================================================

/// Arguments for the `convert` command.
#[derive(Args, Debug, Clone)]
pub struct ConvertConfig {
    /// Container file (.mcd) or directory of containers.
    pub input: PathBuf,

    /// Output directory.
    ///
    /// Defaults to a `converted` directory next to the input.
    pub output: Option<PathBuf>,

    /// Worker-pool size for batch runs.
    ///
    /// Defaults to the available parallelism minus one.
    #[arg(short, long, env = "MCD_MOSAIC_WORKERS")]
    pub workers: Option<usize>,

    /// Skip extraction of embedded snapshot images.
    #[arg(long, default_value_t = false)]
    pub no_snapshots: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ConvertConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.input.exists() {
            return Err(format!("input {} does not exist", self.input.display()));
        }
        if self.workers == Some(0) {
            return Err("workers must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Stitch Configuration
// =============================================================================

/// Output pixel representation.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    /// Unsigned 16-bit with saturating clamp-and-round
    Uint16,
    /// 32-bit float, values cast directly
    Float32,
}

impl From<OutputType> for PixelType {
    fn from(value: OutputType) -> Self {
        match value {
            OutputType::Uint16 => PixelType::Uint16,
            OutputType::Float32 => PixelType::Float32,
        }
    }
}

impl std::fmt::Display for OutputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputType::Uint16 => write!(f, "uint16"),
            OutputType::Float32 => write!(f, "float32"),
        }
    }
}

/// Compression tag passed through to the output descriptor.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzw,
    Zstd,
}

impl Compression {
    /// The descriptor tag for this compression, if any.
    pub fn tag(self) -> Option<String> {
        match self {
            Compression::None => None,
            Compression::Lzw => Some("lzw".to_string()),
            Compression::Zstd => Some("zstd".to_string()),
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Lzw => write!(f, "lzw"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

/// Arguments for the `stitch` command.
#[derive(Args, Debug, Clone)]
pub struct StitchConfig {
    /// Converted store directory, or a directory of converted stores.
    pub input: PathBuf,

    /// Output directory.
    ///
    /// Defaults to a `stitched` directory next to the input.
    pub output: Option<PathBuf>,

    /// Output pixel representation.
    #[arg(short = 'd', long, value_enum, default_value_t = OutputType::Uint16)]
    pub output_type: OutputType,

    /// Compression for the output image.
    #[arg(short, long, value_enum, default_value_t = Compression::Zstd)]
    pub compression: Compression,

    /// Tile edge length for the output image.
    #[arg(long, default_value_t = DEFAULT_TILE_EDGE)]
    pub tile_edge: u32,

    /// Worker-pool size for batch runs.
    #[arg(short, long, env = "MCD_MOSAIC_WORKERS")]
    pub workers: Option<usize>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl StitchConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.input.exists() {
            return Err(format!("input {} does not exist", self.input.display()));
        }
        if self.workers == Some(0) {
            return Err("workers must be greater than 0".to_string());
        }
        if !(MIN_TILE_EDGE..=MAX_TILE_EDGE).contains(&self.tile_edge) {
            return Err(format!(
                "tile_edge must be between {MIN_TILE_EDGE} and {MAX_TILE_EDGE}"
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
