use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A single defined well of a layout, in layout-local coordinates
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LayoutEntry {
    pub row: usize,
    pub col: usize,
    pub gene: String,
    pub category: String,
}

/// Logical template mapping well positions to gene and category
///
/// Coordinates are relative to the layout itself. A sample places the layout on the plate by
/// adding its own offset. The order of entries is the column order of every per-sample array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    entries: Vec<LayoutEntry>,
    extension: (usize, usize),
}

impl Layout {
    /// Build a layout from `entries`
    ///
    /// # Errors
    /// Returns an error if `entries` is empty or two entries share a coordinate.
    pub fn new(entries: Vec<LayoutEntry>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert((entry.row, entry.col)) {
                return Err(Error::Config(format!(
                    "well (row {}, col {}) is defined more than once in layout",
                    entry.row, entry.col
                )));
            }
        }

        let extension = entries
            .iter()
            .fold(None, |extension, entry| {
                let (rows, cols) = extension.unwrap_or((0, 0));
                Some((rows.max(entry.row + 1), cols.max(entry.col + 1)))
            })
            .ok_or_else(|| Error::Config("layout defines no wells".into()))?;

        Ok(Self { entries, extension })
    }

    /// Load a tab-delimited layout table: row, col, gene, category, with no header line
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, a line is malformed, or the entries do not
    /// form a valid layout.
    pub fn load(path: &Path) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .quoting(false)
            .from_path(path)?;

        let entries = rdr
            .deserialize()
            .collect::<::std::result::Result<Vec<LayoutEntry>, _>>()?;
        log::debug!("loaded {} layout entries from {path:?}", entries.len());

        Self::new(entries)
    }

    /// Write the layout as a table readable by [`Layout::load`]
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Never)
            .from_path(path)?;
        for entry in &self.entries {
            wtr.serialize(entry)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Build a layout from paired gene and category grid files
    ///
    /// # Errors
    /// Returns an error if either file cannot be read, or for the reasons given in
    /// [`Layout::from_grids`].
    pub fn from_grid_files(gene_grid: &Path, category_grid: &Path) -> Result<Self> {
        let genes = fs::read_to_string(gene_grid)?;
        let categories = fs::read_to_string(category_grid)?;
        Self::from_grids(&genes, &categories)
    }

    /// Build a layout by zipping a gene grid and a category grid cell by cell
    ///
    /// Both grids are tab-delimited text. A cell defines a well when both its gene and its
    /// category are non-empty and no well when both are empty.
    ///
    /// # Errors
    /// Returns an error if the grids differ in shape, if only one of gene and category is given
    /// for a cell, or if no well is defined at all.
    pub fn from_grids(gene_grid: &str, category_grid: &str) -> Result<Self> {
        // Every line is a row, blank ones included, so row numbers follow the file
        let genes = gene_grid
            .lines()
            .map(|line| line.split('\t').collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let categories = category_grid
            .lines()
            .map(|line| line.split('\t').collect::<Vec<_>>())
            .collect::<Vec<_>>();

        if genes.len() != categories.len()
            || genes
                .iter()
                .zip(&categories)
                .any(|(gene_row, category_row)| gene_row.len() != category_row.len())
        {
            return Err(Error::Config("map files must be in exact same shape".into()));
        }

        let mut entries = vec![];
        for (row, (gene_row, category_row)) in genes.iter().zip(&categories).enumerate() {
            for (col, (gene, category)) in gene_row.iter().zip(category_row).enumerate() {
                match (gene.is_empty(), category.is_empty()) {
                    (false, false) => entries.push(LayoutEntry {
                        row,
                        col,
                        gene: (*gene).to_owned(),
                        category: (*category).to_owned(),
                    }),
                    (true, true) => continue,
                    _ => {
                        return Err(Error::Config(format!(
                            "'gene' or 'category' missing at (row {row}, col {col})"
                        )))
                    }
                }
            }
        }

        Self::new(entries)
    }

    /// The smallest (rows, columns) rectangle holding every defined well
    #[must_use]
    pub const fn extension_size(&self) -> (usize, usize) {
        self.extension
    }

    #[must_use]
    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn coords(&self) -> Vec<(usize, usize)> {
        self.entries.iter().map(|entry| (entry.row, entry.col)).collect()
    }

    #[must_use]
    pub fn genes(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.gene.as_str()).collect()
    }

    #[must_use]
    pub fn categories(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|entry| entry.category.as_str())
            .collect()
    }

    /// Flag every entry whose gene contains `key` as a substring
    #[must_use]
    pub fn mask_by_gene(&self, key: &str) -> Vec<bool> {
        self.entries
            .iter()
            .map(|entry| entry.gene.contains(key))
            .collect()
    }

    /// Flag every entry whose category contains `key` as a substring
    ///
    /// Matching is by substring so related categories group together: `BLANK` also selects
    /// `BLANK2`.
    #[must_use]
    pub fn mask_by_category(&self, key: &str) -> Vec<bool> {
        self.entries
            .iter()
            .map(|entry| entry.category.contains(key))
            .collect()
    }

    #[must_use]
    pub fn coords_of_gene(&self, key: &str) -> Vec<(usize, usize)> {
        self.filter_coords(&self.mask_by_gene(key))
    }

    #[must_use]
    pub fn coords_of_category(&self, key: &str) -> Vec<(usize, usize)> {
        self.filter_coords(&self.mask_by_category(key))
    }

    fn filter_coords(&self, mask: &[bool]) -> Vec<(usize, usize)> {
        self.coords()
            .into_iter()
            .zip(mask)
            .filter_map(|(coords, &selected)| selected.then_some(coords))
            .collect()
    }
}
