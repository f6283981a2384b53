use std::io;
use std::path::Path;

use ndarray::ArrayView2;

use crate::layout::Layout;
use crate::{Error, Result};

/// Write a result table: a row of genes, a row of categories, then one row of `values` per time
/// point
///
/// Values are written with six decimals, undefined values as `nan`.
///
/// # Errors
/// Returns an error if the labels do not match the number of columns in `values`, or if writing
/// fails.
pub fn write_table<W: io::Write>(
    writer: W,
    genes: &[&str],
    categories: &[&str],
    values: ArrayView2<f64>,
) -> Result<()> {
    if genes.len() != values.ncols() || categories.len() != values.ncols() {
        return Err(Error::Config(format!(
            "{} genes and {} categories cannot label {} columns",
            genes.len(),
            categories.len(),
            values.ncols()
        )));
    }

    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(writer);

    wtr.write_record(genes)?;
    wtr.write_record(categories)?;
    for row in values.rows() {
        wtr.write_record(row.iter().map(|&value| format_value(value)))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write `values`, labelled with the entries of `layout`, to `path`
///
/// # Errors
/// Returns an error if the file cannot be created, or for the reasons given in [`write_table`].
pub fn save_table(path: &Path, layout: &Layout, values: ArrayView2<f64>) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = io::BufWriter::new(file);
    write_table(writer, &layout.genes(), &layout.categories(), values)
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "nan".into()
    } else {
        format!("{value:.6}")
    }
}
