// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! CSV export of result matrices.
//!
//! The layout has a header row with the column indices behind an empty
//! corner cell, and each row starts with its row index.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use nalgebra::DMatrix;

use crate::Result;

pub fn write_matrix_csv_to<W: Write>(writer: W, matrix: &DMatrix<f64>) -> Result<()> {
    let mut csv = csv::WriterBuilder::new().from_writer(writer);
    let header = std::iter::once(String::new()).chain((0..matrix.ncols()).map(|c| c.to_string()));
    csv.write_record(header)?;
    for (r, row) in matrix.row_iter().enumerate() {
        let record = std::iter::once(r.to_string()).chain(row.iter().map(|v| v.to_string()));
        csv.write_record(record)?;
    }
    csv.flush()?;
    Ok(())
}

/// Write `matrix` to the file at `path`, replacing it if it exists.
pub fn write_matrix_csv<P: AsRef<Path>>(path: P, matrix: &DMatrix<f64>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_matrix_csv_to(file, matrix)
}
