//! File output for detections and run reports.

use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use csv::Writer;
use serde::Serialize;

use crate::error::Result;
use crate::models::Detection;

/// Column order of the detection export
pub const DETECTION_CSV_HEADER: [&str; 11] = [
    "image_path",
    "channel_name",
    "message_id",
    "detected_objects",
    "object_count",
    "primary_object",
    "primary_confidence",
    "image_category",
    "has_person",
    "has_container",
    "has_medical",
];

fn ensure_parent(file_path: &Path) -> Result<()> {
    if let Some(parent) = file_path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Write the detection store to a CSV file.
///
/// Returns the number of data rows written.
pub fn export_detections_csv(detections: &[Detection], file_path: &Path) -> Result<usize> {
    ensure_parent(file_path)?;
    let mut writer = Writer::from_writer(File::create(file_path)?);

    writer.write_record(DETECTION_CSV_HEADER)?;
    for d in detections {
        writer.write_record([
            d.image_path.as_str(),
            d.channel_name.as_str(),
            &d.message_id.to_string(),
            d.detected_objects.as_str(),
            &d.object_count.to_string(),
            d.primary_object.as_str(),
            &format!("{:.3}", d.primary_confidence),
            d.category.as_str(),
            &d.has_person.to_string(),
            &d.has_container.to_string(),
            &d.has_medical.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(detections.len())
}

/// Write any serializable report as pretty JSON
pub fn write_json_report<T: Serialize>(report: &T, file_path: &Path) -> Result<()> {
    ensure_parent(file_path)?;
    let mut writer = BufWriter::new(File::create(file_path)?);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}
