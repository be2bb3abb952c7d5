//! CSV output of sweep results.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::Result;
use crate::sweep::SweepPoint;

pub const DUTY_COLUMN: &str = "DutyCycle_Input(%)";

/// Write `points` to `path` under a header of the duty column plus `columns`.
pub fn write_csv<P: AsRef<Path>>(path: P, columns: &[String], points: &[SweepPoint]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = fs::File::create(path)?;
    write_records(file, columns, points)
}

pub fn write_records<W: io::Write>(out: W, columns: &[String], points: &[SweepPoint]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);

    let mut header = Vec::with_capacity(columns.len() + 1);
    header.push(DUTY_COLUMN.to_string());
    header.extend(columns.iter().cloned());
    writer.write_record(&header)?;

    for point in points {
        let mut row = Vec::with_capacity(point.values.len() + 1);
        row.push(point.duty.to_string());
        row.extend(point.values.iter().map(|value| value.to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}
