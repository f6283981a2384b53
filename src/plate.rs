use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;

use crate::assay::{Assay, EColi};
use crate::config::{AssayDefinition, Config};
use crate::layout::Layout;
use crate::parser::{PlateSize, RawData};
use crate::regression::FitSelector;
use crate::sample::Sample;
use crate::{Error, Result};

/// A measured plate: the raw data, the layout repeated across it, and the samples placed on it
///
/// Exactly one sample must be the untreated control before the plate can be analysed.
#[derive(Debug)]
pub struct Plate {
    name: String,
    size: PlateSize,
    raw: Arc<RawData>,
    layout: Arc<Layout>,
    config: Config,
    samples: Vec<Sample>,
    control: Option<usize>,
}

impl Plate {
    /// # Errors
    /// Returns an error if the settings are invalid, or if the raw data do not have the shape of
    /// a `size` plate.
    pub fn new(
        name: impl Into<String>,
        size: PlateSize,
        raw: RawData,
        layout: Layout,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        let (_, rows, cols) = raw.shape();
        if (rows, cols) != size.shape() {
            return Err(Error::Config(format!(
                "raw data of {rows}x{cols} wells do not fit a {}-well plate",
                size.wells()
            )));
        }
        let name = name.into();
        log::debug!(
            "{name}: {} time points on a {}-well plate",
            raw.timepoints(),
            size.wells()
        );
        Ok(Self {
            name,
            size,
            raw: Arc::new(raw),
            layout: Arc::new(layout),
            config,
            samples: vec![],
            control: None,
        })
    }

    /// Parse the raw data file and load the layout file of a plate
    ///
    /// # Errors
    /// Returns an error if either file cannot be read or parsed.
    pub fn from_files(
        name: impl Into<String>,
        size: PlateSize,
        data_file: &Path,
        layout_file: &Path,
        config: Config,
    ) -> Result<Self> {
        let raw = config.parser(size)?.parse(data_file)?;
        let layout = Layout::load(layout_file)?;
        Self::new(name, size, raw, layout, config)
    }

    /// Build a plate and its E. coli samples from an assay definition
    ///
    /// # Errors
    /// Returns an error if the plate cannot be loaded, or if the definition marks more than one
    /// sample as the control.
    pub fn from_definition(definition: &AssayDefinition) -> Result<Self> {
        let mut plate = Self::from_files(
            definition.name.clone(),
            definition.plate_size()?,
            &definition.data_file,
            &definition.layout_file,
            definition.settings.clone(),
        )?;
        for sample in &definition.samples {
            plate.add_ecoli_sample(sample.name.clone(), sample.offset, sample.control)?;
        }
        Ok(plate)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn size(&self) -> PlateSize {
        self.size
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn raw_data(&self) -> &RawData {
        &self.raw
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Place a new sample of `assay` at `offset` and return its id
    ///
    /// # Errors
    /// Returns an error if `control` is set while the plate already has a control. The plate is
    /// left unchanged in that case.
    pub fn add_sample(
        &mut self,
        assay: Arc<dyn Assay>,
        name: impl Into<String>,
        offset: (usize, usize),
        control: bool,
    ) -> Result<usize> {
        let name = name.into();
        if control {
            self.check_no_control()?;
        }

        let id = self.samples.len();
        self.samples.push(Sample::new(
            id,
            name,
            offset,
            Arc::clone(&self.layout),
            Arc::clone(&self.raw),
            assay,
            self.config.output_dir.clone(),
        ));
        if control {
            self.control = Some(id);
        }
        log::debug!("{}: added sample {id} at {offset:?}", self.name);
        Ok(id)
    }

    /// Place a sample analysed with the E. coli assay configured for this plate
    ///
    /// # Errors
    /// See [`Plate::add_sample`].
    pub fn add_ecoli_sample(
        &mut self,
        name: impl Into<String>,
        offset: (usize, usize),
        control: bool,
    ) -> Result<usize> {
        let assay = Arc::new(EColi::from(&self.config));
        self.add_sample(assay, name, offset, control)
    }

    /// Designate sample `id` as the untreated control
    ///
    /// # Errors
    /// Returns an error if no sample has this id, or if the plate already has a control.
    pub fn set_control(&mut self, id: usize) -> Result<()> {
        if id >= self.samples.len() {
            return Err(Error::Config(format!(
                "no sample {id} on plate '{}'",
                self.name
            )));
        }
        self.check_no_control()?;
        self.control = Some(id);
        Ok(())
    }

    /// The untreated control, if one has been designated
    #[must_use]
    pub fn control(&self) -> Option<&Sample> {
        self.control.map(|id| &self.samples[id])
    }

    #[must_use]
    pub fn sample(&self, id: usize) -> Option<&Sample> {
        self.samples.get(id)
    }

    #[must_use]
    pub fn sample_by_name(&self, name: &str) -> Option<&Sample> {
        self.samples.iter().find(|sample| sample.name() == name)
    }

    /// All samples, in the order they were added
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn samples_except_control(&self) -> impl Iterator<Item = &Sample> {
        let control = self.control;
        self.samples
            .iter()
            .filter(move |sample| Some(sample.id()) != control)
    }

    /// Analyse every sample on the plate
    ///
    /// All samples, the control included, are first taken to P. Once every P is known, I and
    /// XELI are computed for each sample except the control, against the control's P.
    ///
    /// # Errors
    /// Returns an error if the analysis of any sample fails, or if the plate has no control. The
    /// control is only required once every sample reached P, so P tables are written either way.
    /// The second phase does not start unless every sample reached P.
    pub fn analyze(&mut self, selector: &dyn FitSelector) -> Result<()> {
        log::info!(
            "{}: analysing {} samples ({})",
            self.name,
            self.samples.len(),
            if self.config.parallel {
                "parallel"
            } else {
                "sequential"
            }
        );

        self.for_each_sample(|sample| sample.run_p_analysis(selector))?;

        let control = self.control.ok_or(Error::MissingControl)?;
        let control_p = self.samples[control].p()?.clone();
        self.for_each_sample(|sample| {
            if sample.id() == control {
                Ok(())
            } else {
                sample.run_xeli_analysis(&control_p)
            }
        })?;

        log::info!("{}: analysis complete", self.name);
        Ok(())
    }

    fn for_each_sample<F>(&mut self, step: F) -> Result<()>
    where
        F: Fn(&mut Sample) -> Result<()> + Sync + Send,
    {
        if self.config.parallel {
            self.samples.par_iter_mut().try_for_each(step)
        } else {
            self.samples.iter_mut().try_for_each(step)
        }
    }

    fn check_no_control(&self) -> Result<()> {
        match self.control() {
            Some(existing) => Err(Error::DuplicateControl {
                existing: existing.name().to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use ndarray::Array3;

    use crate::config::Config;
    use crate::layout::{Layout, LayoutEntry};
    use crate::parser::{PlateSize, RawData};
    use crate::regression::SelectAll;
    use crate::{Error, Result};

    use super::Plate;

    fn layout() -> Layout {
        Layout::new(vec![LayoutEntry {
            row: 0,
            col: 0,
            gene: "katG".into(),
            category: "OXIDATIVE".into(),
        }])
        .unwrap()
    }

    fn plate(size: PlateSize) -> Result<Plate> {
        let (rows, cols) = size.shape();
        let raw = RawData::new(
            Array3::from_elem((3, rows, cols), 0.5),
            Array3::from_elem((3, rows, cols), 100),
        )?;
        Plate::new("test", size, raw, layout(), Config::default())
    }

    #[test]
    fn raw_data_must_fit_the_plate() {
        let raw = RawData::new(
            Array3::from_elem((3, 8, 12), 0.5),
            Array3::from_elem((3, 8, 12), 100),
        )
        .unwrap();
        let result = Plate::new("test", PlateSize::Wells384, raw, layout(), Config::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn samples_get_sequential_ids() -> Result<()> {
        let mut plate = plate(PlateSize::Wells96)?;
        assert_eq!(plate.add_ecoli_sample("C1", (0, 0), true)?, 0);
        assert_eq!(plate.add_ecoli_sample("C2", (0, 1), false)?, 1);
        assert_eq!(plate.add_ecoli_sample("C3", (1, 0), false)?, 2);

        assert_eq!(plate.control().map(|sample| sample.name()), Some("C1"));
        assert_eq!(plate.sample_by_name("C3").map(|sample| sample.id()), Some(2));
        assert!(plate.sample(3).is_none());
        let others = plate
            .samples_except_control()
            .map(|sample| sample.name())
            .collect::<Vec<_>>();
        assert_eq!(others, vec!["C2", "C3"]);
        Ok(())
    }

    #[test]
    fn second_control_leaves_the_plate_unchanged() -> Result<()> {
        let mut plate = plate(PlateSize::Wells96)?;
        plate.add_ecoli_sample("C1", (0, 0), true)?;

        let result = plate.add_ecoli_sample("C2", (0, 1), true);
        assert!(matches!(
            result,
            Err(Error::DuplicateControl { ref existing }) if existing == "C1"
        ));
        assert_eq!(plate.samples().len(), 1);
        assert_eq!(plate.control().map(|sample| sample.id()), Some(0));
        Ok(())
    }

    #[test]
    fn control_can_be_set_once() -> Result<()> {
        let mut plate = plate(PlateSize::Wells96)?;
        plate.add_ecoli_sample("C1", (0, 0), false)?;
        plate.add_ecoli_sample("C2", (0, 1), false)?;

        assert!(matches!(plate.set_control(5), Err(Error::Config(_))));
        plate.set_control(1)?;
        assert!(matches!(
            plate.set_control(0),
            Err(Error::DuplicateControl { .. })
        ));
        assert_eq!(plate.control().map(|sample| sample.name()), Some("C2"));
        Ok(())
    }

    #[test]
    fn analysis_requires_a_control() -> Result<()> {
        let mut plate = plate(PlateSize::Wells96)?;
        assert!(matches!(
            plate.analyze(&SelectAll),
            Err(Error::MissingControl)
        ));
        Ok(())
    }
}
