//! Memory-mapped JSON readers for event workspaces and conversion settings.
//!

use crate::{Error, Result};
use log::debug;
use memmap2::Mmap;
use rustmd_core::{BoxControllerConfig, ConversionConfig, EventWorkspace, TargetDescription};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

/// A memory-mapped file reader.
///
/// Uses memmap2 to efficiently access file contents without
/// loading the entire file into memory.
pub struct MappedFileReader {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path the reader was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deserialises the whole file as JSON.
    ///
    /// # Errors
    /// Returns an error if the file is empty or not valid JSON for `T`.
    pub fn read_json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.is_empty() {
            return Err(Error::InvalidFormat(format!(
                "{} is empty",
                self.path.display()
            )));
        }
        Ok(serde_json::from_slice(self.as_bytes())?)
    }
}

/// Conversion settings stored next to the inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Box tree growth settings.
    pub box_controller: BoxControllerConfig,
    /// Driver settings.
    pub conversion: ConversionConfig,
    /// Depth to pre-split the output to before converting.
    pub min_recursion_depth: Option<usize>,
}

/// Reads an event workspace from a JSON file.
///
/// # Errors
/// Returns an error if the file cannot be read or does not hold an event
/// workspace.
pub fn read_event_workspace<P: AsRef<Path>>(path: P) -> Result<EventWorkspace> {
    let reader = MappedFileReader::open(path)?;
    let ws: EventWorkspace = reader.read_json()?;
    debug!(
        "read {} spectra with {} events from {}",
        ws.number_histograms(),
        ws.number_events(),
        reader.path().display()
    );
    Ok(ws)
}

/// Reads and validates a target description from a JSON file.
///
/// # Errors
/// Returns an error if the file cannot be read or the description has
/// invalid dimensions.
pub fn read_target_description<P: AsRef<Path>>(path: P) -> Result<TargetDescription> {
    let description: TargetDescription = MappedFileReader::open(path)?.read_json()?;
    description.validate()?;
    if description.additional_coordinates.len() > description.dimensions.len() {
        return Err(Error::InvalidFormat(format!(
            "{} additional coordinates for {} dimensions",
            description.additional_coordinates.len(),
            description.dimensions.len()
        )));
    }
    Ok(description)
}

/// Reads conversion settings from a JSON file. Missing fields keep their
/// defaults.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, or the settings
/// are out of range.
pub fn read_run_config<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
    let config: RunConfig = MappedFileReader::open(path)?.read_json()?;
    if config.conversion.spectra_per_block == 0 {
        return Err(Error::InvalidFormat(
            "conversion.spectra_per_block must be positive".to_string(),
        ));
    }
    Ok(config)
}
