// src/source/csv_frame.rs
//
// Tabular detection frames. First line is a header; every following row is
//   x, y, z, rotation, sx, sy, sz [, ...]

use crate::error::ParseError;
use crate::types::{Detection, Vec3};

pub const CSV_COLUMNS: usize = 7;

/// Parses one frame. Bad rows are returned as errors next to the good
/// detections instead of failing the frame.
pub fn parse_csv_frame(text: &str, frame_index: u64) -> (Vec<Detection>, Vec<ParseError>) {
    let mut detections = Vec::new();
    let mut errors = Vec::new();

    for (i, line) in text.lines().enumerate().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_row(line, i + 1, frame_index) {
            Ok(d) => detections.push(d),
            Err(e) => errors.push(e),
        }
    }

    (detections, errors)
}

fn parse_row(line: &str, line_no: usize, frame_index: u64) -> Result<Detection, ParseError> {
    let cols: Vec<&str> = line.split(',').map(str::trim).collect();
    if cols.len() < CSV_COLUMNS {
        return Err(ParseError::MissingColumns {
            line: line_no,
            expected: CSV_COLUMNS,
            found: cols.len(),
        });
    }

    let mut v = [0.0f64; CSV_COLUMNS];
    for (column, (slot, raw)) in v.iter_mut().zip(&cols).enumerate() {
        *slot = raw
            .parse::<f64>()
            .ok()
            .filter(|x| x.is_finite())
            .ok_or_else(|| ParseError::NotANumber {
                line: line_no,
                column: column + 1,
                value: raw.to_string(),
            })?;
    }

    Ok(Detection::new(
        Vec3::new(v[0], v[1], v[2]),
        v[3],
        Vec3::new(v[4], v[5], v[6]),
        frame_index,
    ))
}
