use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::assay::Assay;
use crate::layout::Layout;
use crate::math::{fold_ratio, positive_infinity_to_nan};
use crate::parser::RawData;
use crate::regression::{ElineModel, FitSelector};
use crate::report;
use crate::{Error, Result};

/// Progress of a sample through the correction chain
///
/// Stages run strictly in declaration order. The untreated control stops at
/// [`Stage::PComputed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Raw,
    Extracted,
    BlankCorrected,
    ElineCorrected,
    OdCorrected,
    PComputed,
    IComputed,
    XeliComputed,
}

/// One placement of the plate layout, and everything derived from its wells
///
/// Derived arrays are indexed (time, layout entry) and stay unset until the stage producing them
/// has run. Reading an unset array is an error rather than a trigger to compute it.
pub struct Sample {
    id: usize,
    name: String,
    offset: (usize, usize),
    layout: Arc<Layout>,
    raw: Arc<RawData>,
    assay: Arc<dyn Assay>,
    output_dir: Option<PathBuf>,
    stage: Stage,
    od: Option<Array2<f64>>,
    gfp: Option<Array2<f64>>,
    mask: Option<Array2<bool>>,
    model: Option<ElineModel>,
    p: Option<Array2<f64>>,
    i: Option<Array2<f64>>,
    xeli: Option<Array1<f64>>,
}

impl fmt::Debug for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sample")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("assay", &self.assay.name())
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl Sample {
    pub(crate) fn new(
        id: usize,
        name: String,
        offset: (usize, usize),
        layout: Arc<Layout>,
        raw: Arc<RawData>,
        assay: Arc<dyn Assay>,
        output_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            id,
            name,
            offset,
            layout,
            raw,
            assay,
            output_dir,
            stage: Stage::Raw,
            od: None,
            gfp: None,
            mask: None,
            model: None,
            p: None,
            i: None,
            xeli: None,
        }
    }

    /// Position of the sample on its plate, in the order samples were added
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plate coordinate of the layout's (0, 0) well
    #[must_use]
    pub const fn offset(&self) -> (usize, usize) {
        self.offset
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// # Errors
    /// Returns an error if the data have not been extracted yet.
    pub fn od(&self) -> Result<&Array2<f64>> {
        self.od.as_ref().ok_or_else(|| unset("OD"))
    }

    /// # Errors
    /// Returns an error if the data have not been extracted yet.
    pub fn gfp(&self) -> Result<&Array2<f64>> {
        self.gfp.as_ref().ok_or_else(|| unset("GFP"))
    }

    /// # Errors
    /// Returns an error if the data have not been extracted yet.
    pub fn mask(&self) -> Result<&Array2<bool>> {
        self.mask.as_ref().ok_or_else(|| unset("MASK"))
    }

    /// # Errors
    /// Returns an error if the e-line correction has not run yet.
    pub fn model(&self) -> Result<&ElineModel> {
        self.model.as_ref().ok_or_else(|| unset("ELINE model"))
    }

    /// # Errors
    /// Returns an error if P has not been computed yet.
    pub fn p(&self) -> Result<&Array2<f64>> {
        self.p.as_ref().ok_or_else(|| unset("P"))
    }

    /// # Errors
    /// Returns an error if I has not been computed yet, which is always the case for the control.
    pub fn i(&self) -> Result<&Array2<f64>> {
        self.i.as_ref().ok_or_else(|| unset("I"))
    }

    /// # Errors
    /// Returns an error if XELI has not been computed yet, which is always the case for the
    /// control.
    pub fn xeli(&self) -> Result<&Array1<f64>> {
        self.xeli.as_ref().ok_or_else(|| unset("XELI"))
    }

    /// # Errors
    /// Returns an error if the data have not been extracted yet.
    pub fn od_mut(&mut self) -> Result<&mut Array2<f64>> {
        self.od.as_mut().ok_or_else(|| unset("OD"))
    }

    /// # Errors
    /// Returns an error if the data have not been extracted yet.
    pub fn gfp_mut(&mut self) -> Result<&mut Array2<f64>> {
        self.gfp.as_mut().ok_or_else(|| unset("GFP"))
    }

    /// Borrow OD for reading and GFP for writing at the same time
    ///
    /// # Errors
    /// Returns an error if the data have not been extracted yet.
    pub fn od_and_gfp_mut(&mut self) -> Result<(&Array2<f64>, &mut Array2<f64>)> {
        match (self.od.as_ref(), self.gfp.as_mut()) {
            (Some(od), Some(gfp)) => Ok((od, gfp)),
            (None, _) => Err(unset("OD")),
            (_, None) => Err(unset("GFP")),
        }
    }

    /// Store the background model produced by the e-line correction
    pub fn set_model(&mut self, model: ElineModel) {
        self.model = Some(model);
    }

    /// Copy this sample's wells out of the raw plate data
    ///
    /// # Errors
    /// Returns an error if the sample is not in the [`Stage::Raw`] stage, or if a well of the
    /// layout falls outside the plate once offset.
    pub fn extract(&mut self) -> Result<()> {
        self.advance(Stage::Raw, Stage::Extracted, Self::extract_data)
    }

    /// # Errors
    /// Returns an error if the sample has not just been extracted, or if the assay's blank
    /// correction fails.
    pub fn blank_correction(&mut self) -> Result<()> {
        let assay = Arc::clone(&self.assay);
        self.advance(Stage::Extracted, Stage::BlankCorrected, |sample| {
            assay.blank_correction(sample)
        })
    }

    /// # Errors
    /// Returns an error if the sample has not just been blank corrected, or if the assay's
    /// e-line correction fails. The sample is left blank corrected on failure.
    pub fn eline_correction(&mut self, selector: &dyn FitSelector) -> Result<()> {
        let assay = Arc::clone(&self.assay);
        self.advance(Stage::BlankCorrected, Stage::ElineCorrected, |sample| {
            assay.eline_correction(sample, selector)
        })
    }

    /// # Errors
    /// Returns an error if the sample has not just been e-line corrected, or if the assay's OD
    /// correction fails.
    pub fn od_correction(&mut self) -> Result<()> {
        let assay = Arc::clone(&self.assay);
        self.advance(Stage::ElineCorrected, Stage::OdCorrected, |sample| {
            assay.od_correction(sample)
        })
    }

    /// Compute P, the corrected GFP per unit OD
    ///
    /// Divisions by a zero OD give `NaN` rather than infinity.
    ///
    /// # Errors
    /// Returns an error if the sample has not just been OD corrected, or if P cannot be written
    /// to the output directory.
    pub fn compute_p(&mut self) -> Result<()> {
        self.advance(Stage::OdCorrected, Stage::PComputed, |sample| {
            let mut p = sample.gfp()? / sample.od()?;
            positive_infinity_to_nan(&mut p);
            sample.save("P", p.view())?;
            sample.p = Some(p);
            Ok(())
        })
    }

    /// Run the full correction chain of this sample's assay, up to and including P
    ///
    /// # Errors
    /// Returns an error if any stage of the chain fails.
    pub fn run_p_analysis(&mut self, selector: &dyn FitSelector) -> Result<()> {
        let assay = Arc::clone(&self.assay);
        log::info!("{}: running P analysis ({} assay)", self.name, assay.name());
        assay.run_p_analysis(self, selector)
    }

    /// Compute I, the ratio of this sample's P to the untreated control's P
    ///
    /// # Errors
    /// Returns an error if P has not just been computed, or if `control_p` differs in shape.
    pub fn compute_i(&mut self, control_p: &Array2<f64>) -> Result<()> {
        self.advance(Stage::PComputed, Stage::IComputed, |sample| {
            let p = sample.p()?;
            if p.dim() != control_p.dim() {
                return Err(Error::Config(format!(
                    "P of '{}' has shape {:?} but the control's has shape {:?}",
                    sample.name,
                    p.dim(),
                    control_p.dim()
                )));
            }
            let i = p / control_p;
            sample.save("I", i.view())?;
            sample.i = Some(i);
            Ok(())
        })
    }

    /// Compute XELI, the time average of I with ratios below one reflected onto their
    /// reciprocals
    ///
    /// # Errors
    /// Returns an error if I has not just been computed, or if XELI cannot be written to the
    /// output directory.
    #[allow(clippy::cast_precision_loss)]
    pub fn compute_xeli(&mut self) -> Result<()> {
        self.advance(Stage::IComputed, Stage::XeliComputed, |sample| {
            let i = sample.i()?;
            let timepoints = i.nrows() as f64;
            let xeli = i.mapv(fold_ratio).sum_axis(Axis(0)) / timepoints;
            sample.save("XELI", xeli.view().insert_axis(Axis(0)))?;
            sample.xeli = Some(xeli);
            Ok(())
        })
    }

    /// # Errors
    /// Returns an error if either I or XELI cannot be computed.
    pub fn run_xeli_analysis(&mut self, control_p: &Array2<f64>) -> Result<()> {
        self.compute_i(control_p)?;
        self.compute_xeli()
    }

    fn advance(
        &mut self,
        from: Stage,
        to: Stage,
        step: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        if self.stage != from {
            return Err(Error::Precondition(format!(
                "{to:?} of '{}' requires {from:?}, sample is {:?}",
                self.name, self.stage
            )));
        }
        step(self)?;
        self.stage = to;
        log::debug!("{}: {to:?}", self.name);
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn extract_data(&mut self) -> Result<()> {
        let (timepoints, rows, cols) = self.raw.shape();
        let wells = self.layout.len();
        let mut od = Array2::<f64>::zeros((timepoints, wells));
        let mut gfp = Array2::<f64>::zeros((timepoints, wells));
        let mut mask = Array2::from_elem((timepoints, wells), false);

        for (index, (row, col)) in self.layout.coords().into_iter().enumerate() {
            let (row, col) = (row + self.offset.0, col + self.offset.1);
            if !self.raw.contains(row, col) {
                return Err(Error::OutOfBounds {
                    sample: self.name.clone(),
                    row,
                    col,
                    rows,
                    cols,
                });
            }
            od.column_mut(index).assign(&self.raw.od(row, col));
            gfp.column_mut(index)
                .assign(&self.raw.gfp(row, col).mapv(|value| value as f64));
            mask.column_mut(index).assign(&self.raw.mask(row, col));
        }

        log::debug!(">{}:DATA_EXTRACT\nOD:\n{od}\nGFP:\n{gfp}", self.name);
        self.od = Some(od);
        self.gfp = Some(gfp);
        self.mask = Some(mask);
        Ok(())
    }

    fn save(&self, kind: &str, values: ArrayView2<f64>) -> Result<()> {
        if let Some(dir) = &self.output_dir {
            let path = dir.join(format!("{}.{kind}.tsv", self.name));
            log::debug!("{}: writing {kind} to {path:?}", self.name);
            report::save_table(&path, &self.layout, values)?;
        }
        Ok(())
    }
}

fn unset(field: &str) -> Error {
    Error::Precondition(format!("{field} has not been computed"))
}
