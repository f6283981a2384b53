#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
// #![warn(clippy::cargo)]

use std::path::Path;

pub mod assay;
pub mod config;
pub mod error;
pub mod layout;
pub mod math;
pub mod parser;
pub mod plate;
pub mod regression;
pub mod report;
pub mod sample;

pub use error::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

/// Run a full plate analysis from an assay definition file
///
/// The definition names the raw data file, the layout file and the samples placed on the plate.
/// Relative paths inside it are resolved against the directory holding the definition.
///
/// # Errors
/// Returns an error if any input file is missing or malformed, if the layout does not fit the
/// plate, or if any stage of the correction chain fails.
pub fn analyze_file(
    definition: &Path,
    selector: &dyn regression::FitSelector,
) -> Result<plate::Plate> {
    let definition = config::AssayDefinition::from_file(definition)?;
    let mut plate = plate::Plate::from_definition(&definition)?;
    plate.analyze(selector)?;
    Ok(plate)
}
