use std::fmt;

use ndarray::{Array2, Axis, Zip};

use crate::config::Config;
use crate::regression::{self, FitSelector};
use crate::sample::Sample;
use crate::{Error, Result};

/// Correction bodies of one assay family
///
/// A [`Sample`] drives the chain and checks the ordering of stages; the assay supplies what each
/// stage does. Capabilities an assay does not support fail with [`Error::NotImplemented`].
pub trait Assay: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Subtract the background of wells holding no cells
    ///
    /// # Errors
    /// Fails unless the assay implements it.
    fn blank_correction(&self, _sample: &mut Sample) -> Result<()> {
        Err(not_implemented(self.name(), "blank correction"))
    }

    /// Fit the background fluorescence model and store it on the sample
    ///
    /// # Errors
    /// Fails unless the assay implements it.
    fn eline_correction(&self, _sample: &mut Sample, _selector: &dyn FitSelector) -> Result<()> {
        Err(not_implemented(self.name(), "e-line correction"))
    }

    /// Remove density-dependent background fluorescence from GFP
    ///
    /// # Errors
    /// Fails unless the assay implements it.
    fn od_correction(&self, _sample: &mut Sample) -> Result<()> {
        Err(not_implemented(self.name(), "OD correction"))
    }

    /// Run every stage of the sample, from extraction to P
    ///
    /// # Errors
    /// Fails unless the assay implements it.
    fn run_p_analysis(&self, _sample: &mut Sample, _selector: &dyn FitSelector) -> Result<()> {
        Err(not_implemented(self.name(), "P analysis"))
    }
}

const fn not_implemented(assay: &'static str, stage: &'static str) -> Error {
    Error::NotImplemented { assay, stage }
}

/// E. coli reporter assays, corrected with blank wells and e-line calibration wells
#[derive(Clone, Debug, PartialEq)]
pub struct EColi {
    /// Category token of blank wells
    pub blank: String,
    /// Category token of e-line calibration wells
    pub eline: String,
    /// GFP below `sd_factor` intercept standard deviations is not significant
    pub sd_factor: f64,
}

impl Default for EColi {
    fn default() -> Self {
        Self {
            blank: "BLANK".into(),
            eline: "ELINE".into(),
            sd_factor: 2.,
        }
    }
}

impl From<&Config> for EColi {
    fn from(config: &Config) -> Self {
        Self {
            blank: config.blank.clone(),
            eline: config.eline.clone(),
            sd_factor: config.sd_factor,
        }
    }
}

impl Assay for EColi {
    fn name(&self) -> &'static str {
        "E. coli"
    }

    fn blank_correction(&self, sample: &mut Sample) -> Result<()> {
        let blanks = matching_columns(&sample.layout().mask_by_category(&self.blank));
        if blanks.is_empty() {
            return Err(Error::MissingCategory {
                stage: "background correction",
                token: self.blank.clone(),
            });
        }

        subtract_baseline(sample.od_mut()?, &blanks);
        subtract_baseline(sample.gfp_mut()?, &blanks);

        log::debug!(
            ">{}:BLANK_CORRECTION\nOD:\n{}\nGFP:\n{}",
            sample.name(),
            sample.od()?,
            sample.gfp()?
        );
        Ok(())
    }

    fn eline_correction(&self, sample: &mut Sample, selector: &dyn FitSelector) -> Result<()> {
        let elines = matching_columns(&sample.layout().mask_by_category(&self.eline));
        if elines.is_empty() {
            return Err(Error::MissingCategory {
                stage: "e-line correction",
                token: self.eline.clone(),
            });
        }

        let od = sample.od()?.select(Axis(1), &elines);
        let gfp = sample.gfp()?.select(Axis(1), &elines);
        let mask = sample.mask()?.select(Axis(1), &elines);

        let calibration =
            regression::calibrate(sample.name(), od.view(), gfp.view(), mask.view(), selector)?;
        log::info!(">{}:ELINE_CORRECTION\n{}", sample.name(), calibration.report);

        sample.set_model(calibration.model);
        Ok(())
    }

    fn od_correction(&self, sample: &mut Sample) -> Result<()> {
        let model = *sample.model()?;
        let threshold = self.sd_factor * model.intercept_std;
        if threshold.is_nan() || threshold <= 0. {
            return Err(Error::Config(format!(
                "significance threshold {threshold} must be positive (sd_factor {}, intercept sd {})",
                self.sd_factor, model.intercept_std
            )));
        }

        let (od, gfp) = sample.od_and_gfp_mut()?;
        Zip::from(gfp).and(od).for_each(|gfp, &od| {
            *gfp -= model.background(od);
            if *gfp < threshold {
                *gfp = threshold;
            }
        });

        log::debug!(">{}:OD_CORRECTION\nGFP:\n{:.2}", sample.name(), sample.gfp()?);
        Ok(())
    }

    fn run_p_analysis(&self, sample: &mut Sample, selector: &dyn FitSelector) -> Result<()> {
        sample.extract()?;
        sample.blank_correction()?;
        sample.eline_correction(selector)?;
        sample.od_correction()?;
        sample.compute_p()
    }
}

fn matching_columns(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(index, &selected)| selected.then_some(index))
        .collect()
}

/// Subtract, at every time point, the mean over `columns` from every column
fn subtract_baseline(values: &mut Array2<f64>, columns: &[usize]) {
    if let Some(baseline) = values.select(Axis(1), columns).mean_axis(Axis(1)) {
        *values -= &baseline.insert_axis(Axis(1));
    }
}
