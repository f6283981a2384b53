use std::fmt::Write;

use itertools::{izip, Itertools};
use ndarray::ArrayView2;
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::math::{mean, population_std};
use crate::{Error, Result};

/// Ordinary least-squares fit of GFP against OD for a single calibration well
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Pearson correlation coefficient
    pub r: f64,
    /// Two-sided p-value for a null hypothesis of zero slope
    pub p_value: f64,
    /// Standard error of the slope
    pub std_err: f64,
}

impl LinearFit {
    /// Fit `y = slope * x + intercept`
    ///
    /// # Errors
    /// Returns an error if fewer than two points are given, or if every `x` is identical.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(x: &[f64], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() {
            return Err(Error::Regression(format!(
                "{} x values but {} y values",
                x.len(),
                y.len()
            )));
        }
        let n = x.len();
        if n < 2 {
            return Err(Error::Regression(format!(
                "at least two valid points are needed, got {n}"
            )));
        }

        let x_mean = mean(x).unwrap_or_default();
        let y_mean = mean(y).unwrap_or_default();
        let (ss_xx, ss_xy, ss_yy) = x.iter().zip(y).fold((0., 0., 0.), |acc, (xi, yi)| {
            let dx = xi - x_mean;
            let dy = yi - y_mean;
            (acc.0 + dx * dx, acc.1 + dx * dy, acc.2 + dy * dy)
        });

        if ss_xx == 0. {
            return Err(Error::Regression(
                "cannot fit a line when all OD values are identical".into(),
            ));
        }

        let slope = ss_xy / ss_xx;
        let intercept = slope.mul_add(-x_mean, y_mean);
        let r = if ss_yy == 0. {
            0.
        } else {
            (ss_xy / (ss_xx * ss_yy).sqrt()).clamp(-1., 1.)
        };

        let degrees_of_freedom = (n - 2) as f64;
        let (p_value, std_err) = if ss_yy == 0. {
            // A flat response carries no evidence of a slope
            (1., 0.)
        } else if n == 2 {
            // Two points always lie on the line
            (0., 0.)
        } else if r.abs() == 1. {
            (0., 0.)
        } else {
            let t = r * (degrees_of_freedom / ((1. - r) * (1. + r))).sqrt();
            let distribution = StudentsT::new(0., 1., degrees_of_freedom)
                .map_err(|e| Error::Regression(e.to_string()))?;
            let p_value = 2. * distribution.cdf(-t.abs());
            let std_err = ((1. - r * r) * ss_yy / ss_xx / degrees_of_freedom).sqrt();
            (p_value, std_err)
        };

        Ok(Self {
            slope,
            intercept,
            r,
            p_value,
            std_err,
        })
    }
}

/// Which fits contribute to the aggregate slope and which to the aggregate intercept
///
/// Each mask holds one flag per fit, in the order the fits were offered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub slopes: Vec<bool>,
    pub intercepts: Vec<bool>,
}

impl Selection {
    #[must_use]
    pub fn all(n: usize) -> Self {
        Self {
            slopes: vec![true; n],
            intercepts: vec![true; n],
        }
    }
}

/// Chooses which per-well fits feed the final background model
///
/// Implementations may block, for example while a person inspects the fits; the correction of
/// the calling sample waits on the returned selection. Slopes and intercepts are selected
/// independently.
pub trait FitSelector: Sync {
    /// # Errors
    /// Implementations return an error when no selection can be produced.
    fn select(&self, sample: &str, fits: &[LinearFit]) -> Result<Selection>;
}

/// Keeps every fit
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectAll;

impl FitSelector for SelectAll {
    fn select(&self, _sample: &str, fits: &[LinearFit]) -> Result<Selection> {
        Ok(Selection::all(fits.len()))
    }
}

/// Keeps fits whose coefficient of determination reaches a threshold
#[derive(Clone, Copy, Debug)]
pub struct MinimumCorrelation(pub f64);

impl FitSelector for MinimumCorrelation {
    fn select(&self, sample: &str, fits: &[LinearFit]) -> Result<Selection> {
        let keep = fits
            .iter()
            .map(|fit| fit.r.powi(2) >= self.0)
            .collect::<Vec<_>>();
        log::debug!(
            "{sample}: {} of {} fits reach r^2 >= {}",
            keep.iter().filter(|&&kept| kept).count(),
            fits.len(),
            self.0
        );
        Ok(Selection {
            slopes: keep.clone(),
            intercepts: keep,
        })
    }
}

/// Background fluorescence model, `GFP = slope * OD + intercept`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElineModel {
    pub slope: f64,
    pub intercept: f64,
    /// Population standard deviation of the selected intercepts
    pub intercept_std: f64,
}

impl ElineModel {
    #[must_use]
    pub fn background(&self, od: f64) -> f64 {
        self.slope.mul_add(od, self.intercept)
    }
}

/// Result of a calibration run, with the textual report of every fit
#[derive(Clone, Debug)]
pub struct Calibration {
    pub fits: Vec<LinearFit>,
    pub selection: Selection,
    pub model: ElineModel,
    pub report: String,
}

/// Fit every calibration well and aggregate the selected fits into one model
///
/// `od`, `gfp` and `mask` are (time x well) arrays restricted to the calibration wells. Masked
/// time points are left out of each well's fit. With a single calibration well the selection is
/// trivial and `selector` is not consulted.
///
/// # Errors
/// Returns an error if the arrays differ in shape, if any well cannot be fitted, if the selection
/// is empty or of the wrong length, if fewer than two intercepts are selected, or if the selected
/// intercepts have no spread.
pub fn calibrate(
    sample: &str,
    od: ArrayView2<f64>,
    gfp: ArrayView2<f64>,
    mask: ArrayView2<bool>,
    selector: &dyn FitSelector,
) -> Result<Calibration> {
    if od.shape() != gfp.shape() || od.shape() != mask.shape() {
        return Err(Error::Regression(format!(
            "OD {:?}, GFP {:?} and mask {:?} must share a shape",
            od.shape(),
            gfp.shape(),
            mask.shape()
        )));
    }

    let fits = izip!(od.columns(), gfp.columns(), mask.columns())
        .map(|(od, gfp, mask)| {
            let (x, y): (Vec<f64>, Vec<f64>) = izip!(od, gfp, mask)
                .filter(|(_, _, &valid)| valid)
                .map(|(&x, &y, _)| (x, y))
                .unzip();
            LinearFit::fit(&x, &y)
        })
        .collect::<Result<Vec<_>>>()?;

    let selection = if fits.len() == 1 {
        Selection::all(1)
    } else {
        selector.select(sample, &fits)?
    };

    let slopes = selected("slopes", &selection.slopes, &fits, |fit| fit.slope)?;
    let intercepts = selected("intercepts", &selection.intercepts, &fits, |fit| fit.intercept)?;
    if intercepts.len() < 2 {
        return Err(Error::InsufficientIntercepts(intercepts.len()));
    }

    // Both selections are non-empty here
    let model = ElineModel {
        slope: mean(&slopes).unwrap_or_default(),
        intercept: mean(&intercepts).unwrap_or_default(),
        intercept_std: population_std(&intercepts).unwrap_or_default(),
    };
    if model.intercept_std <= 0. {
        return Err(Error::DegenerateModel);
    }

    let report = render_report(&fits, &slopes, &intercepts, &model);

    Ok(Calibration {
        fits,
        selection,
        model,
        report,
    })
}

fn selected(
    parameter: &'static str,
    mask: &[bool],
    fits: &[LinearFit],
    value: impl Fn(&LinearFit) -> f64,
) -> Result<Vec<f64>> {
    if mask.len() != fits.len() {
        return Err(Error::SelectionLength {
            parameter,
            expected: fits.len(),
            got: mask.len(),
        });
    }
    let values = fits
        .iter()
        .zip(mask)
        .filter_map(|(fit, &keep)| keep.then(|| value(fit)))
        .collect::<Vec<_>>();
    if values.is_empty() {
        return Err(Error::EmptySelection(parameter));
    }
    Ok(values)
}

fn render_report(
    fits: &[LinearFit],
    slopes: &[f64],
    intercepts: &[f64],
    model: &ElineModel,
) -> String {
    let mut report = String::from("Raw regressions:\nSlope\tIntercept\tr^2\tp\tStd.err\n");
    for fit in fits {
        // Writing to a `String` cannot fail
        let _ = writeln!(
            report,
            "{:.6}\t{:.6}\t{:.6}\t{:.8e}\t{:.6}",
            fit.slope,
            fit.intercept,
            fit.r.powi(2),
            fit.p_value,
            fit.std_err
        );
    }
    // Same as above
    let _ = write!(
        report,
        "Selected:\nSlopes: {}\nIntercepts: {}\nFinal:\nSlope: {:.6}\nIntercept: {:.6}\nInter.SD: {:.6}",
        slopes.iter().map(|v| format!("{v:.6}")).join("\t"),
        intercepts.iter().map(|v| format!("{v:.6}")).join("\t"),
        model.slope,
        model.intercept,
        model.intercept_std
    );
    report
}
