//! Per-iteration dense Jacobian dump, a debugging artifact.
//!
//! One text file per Newton iteration, one matrix row per line, entries
//! whitespace separated in full precision.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use faer::Mat;

use crate::error::PsiError;

/// Write `a` as text to `path`, overwriting any existing file.
pub fn write_dense(path: &Path, a: &Mat<f64>) -> Result<(), PsiError> {
    let mut w = BufWriter::new(File::create(path)?);
    for i in 0..a.nrows() {
        for j in 0..a.ncols() {
            if j > 0 {
                write!(w, " ")?;
            }
            write!(w, "{:.17e}", a[(i, j)])?;
        }
        writeln!(w)?;
    }
    w.flush()?;
    Ok(())
}
