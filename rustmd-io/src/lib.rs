//! rustmd-io: File I/O for rustmd.
//!
//! This crate reads synthetic event workspaces, target descriptions and
//! run settings from memory-mapped JSON files, and writes box tables as CSV
//! and conversion reports as JSON.
//!

mod error;
mod reader;
mod writer;

pub use error::{Error, Result};
pub use reader::{
    read_event_workspace, read_run_config, read_target_description, MappedFileReader, RunConfig,
};
pub use writer::DataFileWriter;
