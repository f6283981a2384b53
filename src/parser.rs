use std::fs;
use std::path::Path;
use std::str::FromStr;

use encoding_rs::Encoding;
use ndarray::{s, Array3, ArrayView1};

use crate::{Error, Result};

/// Token the instrument writes when a fluorescence reading saturates
pub const OVERFLOW_TOKEN: &str = "OVRFLW";
/// Numeric placeholder substituted for [`OVERFLOW_TOKEN`]
pub const OVERFLOW_VALUE: i64 = 100_000;

/// Supported plate formats
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlateSize {
    Wells96,
    Wells384,
}

impl PlateSize {
    /// Number of (rows, columns) on the plate
    #[must_use]
    pub const fn shape(self) -> (usize, usize) {
        match self {
            Self::Wells96 => (8, 12),
            Self::Wells384 => (16, 24),
        }
    }

    #[must_use]
    pub const fn wells(self) -> usize {
        let (rows, cols) = self.shape();
        rows * cols
    }
}

impl TryFrom<u32> for PlateSize {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            96 => Ok(Self::Wells96),
            384 => Ok(Self::Wells384),
            other => Err(Error::Config(format!("bad plate size '{other}'"))),
        }
    }
}

impl FromStr for PlateSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u32>()
            .map_err(|_| Error::Config(format!("bad plate size '{s}'")))
            .and_then(Self::try_from)
    }
}

/// Raw plate measurements, indexed as (time, row, column)
///
/// The three arrays always share a shape. The store is never mutated after construction, so it
/// can be shared between every sample on a plate.
#[derive(Clone, Debug)]
pub struct RawData {
    od: Array3<f64>,
    gfp: Array3<i64>,
    mask: Array3<bool>,
}

impl RawData {
    /// Build a store from OD and GFP arrays, deriving the validity mask from overflowed GFP
    /// readings
    ///
    /// # Errors
    /// Returns an error if `od` and `gfp` differ in shape.
    pub fn new(od: Array3<f64>, gfp: Array3<i64>) -> Result<Self> {
        if od.shape() != gfp.shape() {
            return Err(Error::Config(format!(
                "OD shape {:?} does not match GFP shape {:?}",
                od.shape(),
                gfp.shape()
            )));
        }
        let mask = gfp.mapv(|value| value != OVERFLOW_VALUE);
        Ok(Self { od, gfp, mask })
    }

    /// (time points, rows, columns)
    #[must_use]
    pub fn shape(&self) -> (usize, usize, usize) {
        self.od.dim()
    }

    #[must_use]
    pub fn timepoints(&self) -> usize {
        self.od.dim().0
    }

    /// Whether plate coordinate (`row`, `col`) exists in this store
    #[must_use]
    pub fn contains(&self, row: usize, col: usize) -> bool {
        let (_, rows, cols) = self.shape();
        row < rows && col < cols
    }

    #[must_use]
    pub fn od(&self, row: usize, col: usize) -> ArrayView1<'_, f64> {
        self.od.slice(s![.., row, col])
    }

    #[must_use]
    pub fn gfp(&self, row: usize, col: usize) -> ArrayView1<'_, i64> {
        self.gfp.slice(s![.., row, col])
    }

    #[must_use]
    pub fn mask(&self, row: usize, col: usize) -> ArrayView1<'_, bool> {
        self.mask.slice(s![.., row, col])
    }
}

/// Reader for plate reader exports
///
/// The export carries no reliable structure beyond its row counts. Each line is split on the
/// separator and its first two fields dropped; only lines left with exactly one field per well
/// are kept. The kept lines form two equal halves, OD then GFP, and the first line of each half
/// is discarded.
#[derive(Clone, Debug)]
pub struct Parser {
    size: PlateSize,
    separator: char,
    encoding: &'static Encoding,
}

impl Parser {
    #[must_use]
    pub fn new(size: PlateSize) -> Self {
        Self {
            size,
            separator: '\t',
            encoding: encoding_rs::WINDOWS_1252,
        }
    }

    #[must_use]
    pub const fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    /// Use the text encoding named by `label` (a WHATWG label such as `windows-1252` or `utf-8`)
    ///
    /// # Errors
    /// Returns an error if the label names no known encoding.
    pub fn with_encoding(mut self, label: &str) -> Result<Self> {
        self.encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| Error::Config(format!("unknown text encoding '{label}'")))?;
        Ok(self)
    }

    /// Parse the export at `path`
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, or on any of the failures of
    /// [`Parser::parse_str`].
    pub fn parse(&self, path: &Path) -> Result<RawData> {
        let bytes = fs::read(path)?;
        let (text, _, had_errors) = self.encoding.decode(&bytes);
        if had_errors {
            log::warn!(
                "{path:?} contains bytes invalid in {}, they were replaced",
                self.encoding.name()
            );
        }
        log::info!("parsing raw data from {path:?}");
        self.parse_str(&text)
    }

    /// Parse an export already decoded to text
    ///
    /// # Errors
    /// Returns an error if no line holds a full plate of readings, if the number of such lines is
    /// odd, or if a reading is not numeric.
    pub fn parse_str(&self, text: &str) -> Result<RawData> {
        let (rows, cols) = self.size.shape();
        let wells = self.size.wells();

        let data = text
            .lines()
            .enumerate()
            .filter_map(|(number, line)| {
                let fields = line.split(self.separator).skip(2).collect::<Vec<_>>();
                if fields.len() == wells {
                    Some((number + 1, fields))
                } else {
                    log::trace!("skipping line {}: {} fields", number + 1, fields.len());
                    None
                }
            })
            .collect::<Vec<_>>();

        if data.is_empty() {
            return Err(Error::Parse(
                "no valid line found, make sure data file is in correct format".into(),
            ));
        }
        if data.len() % 2 != 0 {
            return Err(Error::Parse(
                "uneven GFP and OD sections, make sure data file is in correct format".into(),
            ));
        }

        let half = data.len() / 2;
        let (od_section, gfp_section) = data.split_at(half);
        let timepoints = half - 1;

        let od = od_section
            .iter()
            .skip(1)
            .flat_map(|(number, fields)| fields.iter().map(move |field| (*number, *field)))
            .map(|(number, field)| parse_reading::<f64>(number, field))
            .collect::<Result<Vec<_>>>()?;
        let gfp = gfp_section
            .iter()
            .skip(1)
            .flat_map(|(number, fields)| fields.iter().map(move |field| (*number, *field)))
            .map(|(number, field)| parse_reading::<i64>(number, field))
            .collect::<Result<Vec<_>>>()?;

        log::debug!("found {timepoints} time points on a {rows}x{cols} plate");

        RawData::new(
            Array3::from_shape_vec((timepoints, rows, cols), od)?,
            Array3::from_shape_vec((timepoints, rows, cols), gfp)?,
        )
    }
}

trait Reading: FromStr {
    fn overflow() -> Self;
}

impl Reading for f64 {
    #[allow(clippy::cast_precision_loss)]
    fn overflow() -> Self {
        OVERFLOW_VALUE as Self
    }
}

impl Reading for i64 {
    fn overflow() -> Self {
        OVERFLOW_VALUE
    }
}

fn parse_reading<T: Reading>(line: usize, field: &str) -> Result<T> {
    let field = field.trim();
    if field == OVERFLOW_TOKEN {
        return Ok(T::overflow());
    }
    field
        .parse()
        .map_err(|_| Error::Parse(format!("line {line}: '{field}' is not a valid reading")))
}
