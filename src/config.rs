use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::parser::{Parser, PlateSize};
use crate::{Error, Result};

/// Analysis settings shared by every sample on a plate
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Field separator of the raw data file
    pub separator: char,
    /// Text encoding of the raw data file, as a WHATWG label
    pub encoding: String,
    /// Category token of blank wells
    pub blank: String,
    /// Category token of e-line calibration wells
    pub eline: String,
    /// Multiple of the e-line intercept spread below which GFP is not significant
    pub sd_factor: f64,
    /// Analyse samples on the rayon thread pool
    ///
    /// Interactive fit selectors should run with this off, so that only one selection is open at
    /// a time.
    pub parallel: bool,
    /// Directory receiving the P, I and XELI tables, which must already exist
    pub output_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            separator: '\t',
            encoding: "windows-1252".into(),
            blank: "BLANK".into(),
            eline: "ELINE".into(),
            sd_factor: 2.,
            parallel: false,
            output_dir: None,
        }
    }
}

impl Config {
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid configuration.
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns an error if a category token is empty or `sd_factor` is not positive.
    pub fn validate(&self) -> Result<()> {
        if self.blank.is_empty() || self.eline.is_empty() {
            return Err(Error::Config("category tokens cannot be empty".into()));
        }
        if self.sd_factor.is_nan() || self.sd_factor <= 0. {
            return Err(Error::Config(format!(
                "sd_factor must be positive, got {}",
                self.sd_factor
            )));
        }
        Ok(())
    }

    /// A raw data parser for `size` plates using these settings
    ///
    /// # Errors
    /// Returns an error if the encoding label is unknown.
    pub fn parser(&self, size: PlateSize) -> Result<Parser> {
        Parser::new(size)
            .with_separator(self.separator)
            .with_encoding(&self.encoding)
    }
}

/// Placement of one sample on the plate
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SampleDefinition {
    pub name: String,
    /// Plate (row, column) of the layout's first well
    pub offset: (usize, usize),
    /// Whether this is the untreated control
    #[serde(default)]
    pub control: bool,
}

/// Everything needed to analyse one plate
///
/// ```toml
/// name = "oxidative"
/// plate_type = 96
/// data_file = "raw.txt"
/// layout_file = "EColi.96.P2.layout"
///
/// [settings]
/// sd_factor = 2.5
///
/// [[samples]]
/// name = "C1"
/// offset = [0, 0]
/// control = true
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AssayDefinition {
    pub name: String,
    pub plate_type: u32,
    pub data_file: PathBuf,
    pub layout_file: PathBuf,
    #[serde(default)]
    pub settings: Config,
    pub samples: Vec<SampleDefinition>,
}

impl AssayDefinition {
    /// Read a definition, resolving relative paths against the directory holding it
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid definition.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut definition: Self = toml::from_str(&fs::read_to_string(path)?)?;
        definition.settings.validate()?;

        if let Some(base) = path.parent() {
            definition.data_file = base.join(&definition.data_file);
            definition.layout_file = base.join(&definition.layout_file);
            if let Some(output_dir) = &definition.settings.output_dir {
                definition.settings.output_dir = Some(base.join(output_dir));
            }
        }
        log::debug!(
            "assay '{}': {} samples on a {}-well plate",
            definition.name,
            definition.samples.len(),
            definition.plate_type
        );
        Ok(definition)
    }

    /// # Errors
    /// Returns an error if the plate type is neither 96 nor 384.
    pub fn plate_size(&self) -> Result<PlateSize> {
        PlateSize::try_from(self.plate_type)
    }
}
