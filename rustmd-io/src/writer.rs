//! File writers for box tables, reports and synthetic inputs.

use crate::Result;
use rustmd_algorithms::{BoxSummary, MDEventWorkspace};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writer for conversion outputs.
pub struct DataFileWriter {
    writer: BufWriter<File>,
}

impl DataFileWriter {
    /// Creates a new file writer.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(Self { writer })
    }

    /// Writes one CSV row per box.
    ///
    /// Columns: `id,parent,depth,is_leaf,n_points,signal,error_squared`,
    /// then `<dim>_min,<dim>_max` for every dimension. The root has an
    /// empty parent.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_box_table_csv(&mut self, dim_names: &[&str], boxes: &[BoxSummary]) -> Result<()> {
        write!(self.writer, "id,parent,depth,is_leaf,n_points,signal,error_squared")?;
        for name in dim_names {
            write!(self.writer, ",{name}_min,{name}_max")?;
        }
        writeln!(self.writer)?;

        for b in boxes {
            let parent = b.parent.map(|p| p.to_string()).unwrap_or_default();
            write!(
                self.writer,
                "{},{},{},{},{},{},{}",
                b.id,
                parent,
                b.depth,
                u8::from(b.is_leaf),
                b.cache.n_points,
                b.cache.signal,
                b.cache.error_squared
            )?;
            for e in &b.extents {
                write!(self.writer, ",{},{}", e.min, e.max)?;
            }
            writeln!(self.writer)?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Writes the leaves (or every box) of a workspace as CSV.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_workspace_boxes_csv(&mut self, ws: &MDEventWorkspace, leaves_only: bool) -> Result<()> {
        let names: Vec<&str> = ws.dimensions().iter().map(|d| d.name.as_str()).collect();
        let boxes = if leaves_only {
            ws.leaf_summaries()
        } else {
            ws.box_summaries()
        };
        self.write_box_table_csv(&names, &boxes)
    }

    /// Writes any serialisable value as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if serialisation or writing fails.
    pub fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, value)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_event_workspace;
    use rustmd_algorithms::ConversionReport;
    use rustmd_core::{
        BoxControllerConfig, DetectorInfo, Dimension, EventList, EventWorkspace, Instrument,
        MDEventBatch, TofEvent, Unit,
    };
    use tempfile::NamedTempFile;

    fn workspace() -> MDEventWorkspace {
        let dims = vec![
            Dimension::new("x", "m", 0.0, 4.0).unwrap(),
            Dimension::new("y", "m", 0.0, 4.0).unwrap(),
        ];
        let config = BoxControllerConfig::default()
            .with_split_into(2)
            .with_split_threshold(1);
        let mut ws = MDEventWorkspace::new(dims, &config).unwrap();
        let mut batch = MDEventBatch::new(2);
        batch.push(&[1.0, 1.0], 1.0, 1.0, 0, 1);
        batch.push(&[3.0, 3.0], 2.0, 4.0, 0, 1);
        ws.add_events(&batch).unwrap();
        ws.split_all_if_needed();
        ws.refresh_cache();
        ws
    }

    #[test]
    fn test_write_box_table_csv() {
        let file = NamedTempFile::new().unwrap();
        let ws = workspace();
        let mut writer = DataFileWriter::create(file.path()).unwrap();
        writer.write_workspace_boxes_csv(&ws, false).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("id,parent,depth,is_leaf,n_points,signal,error_squared,x_min,x_max,y_min,y_max")
        );
        assert_eq!(lines.next(), Some("0,,0,0,2,3,5,0,4,0,4"));
        // Root plus four children.
        assert_eq!(content.lines().count(), 6);
        assert!(content.contains(",1,1,1,1,1,0,2,0,2"));
    }

    #[test]
    fn test_write_report_json() {
        let file = NamedTempFile::new().unwrap();
        let report = ConversionReport {
            events_added: 12,
            spectra_total: 3,
            spectra_converted: 2,
            spectra_skipped: 1,
            ..ConversionReport::default()
        };
        let mut writer = DataFileWriter::create(file.path()).unwrap();
        writer.write_json(&report).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let back: ConversionReport = serde_json::from_str(&content).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_event_workspace_through_file() {
        let mut inst = Instrument::new("TEST", 10.0);
        inst.push_detector(Some(DetectorInfo::new(1, [0.0, 0.0, 2.0])));
        let mut ws = EventWorkspace::new(inst).with_x_unit(Unit::Wavelength);
        ws.push_spectrum(EventList::Tof(vec![TofEvent::new(1.5, 7)]));

        let file = NamedTempFile::new().unwrap();
        let mut writer = DataFileWriter::create(file.path()).unwrap();
        writer.write_json(&ws).unwrap();
        drop(writer);

        assert_eq!(read_event_workspace(file.path()).unwrap(), ws);
    }
}
