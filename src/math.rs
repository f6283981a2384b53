use ndarray::{ArrayBase, DataMut, Dimension};

/// Compute the arithmetic mean of `values`
///
/// Returns `None` for an empty slice, where the mean is undefined.
///
/// # Examples
///
/// ```
/// use xeli::math::mean;
///
/// assert_eq!(mean(&[1., 2., 6.]), Some(3.));
/// assert_eq!(mean(&[]), None);
/// ```
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Compute the population standard deviation of `values`
///
/// The population form divides the summed squared deviations by `n`, not `n - 1`, so a single
/// value has a spread of zero.
///
/// # Examples
///
/// ```
/// use xeli::math::population_std;
///
/// let std = population_std(&[2., 4., 4., 4., 5., 5., 7., 9.]).unwrap();
/// assert!((std - 2.).abs() < 1e-12);
/// ```
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn population_std(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Reflect a ratio below unity onto its reciprocal
///
/// A two-fold repression (`0.5`) and a two-fold induction (`2.0`) both fold to `2.0`. Undefined
/// values stay undefined.
///
/// # Examples
///
/// ```
/// use xeli::math::fold_ratio;
///
/// assert_eq!(fold_ratio(0.5), 2.);
/// assert_eq!(fold_ratio(3.), 3.);
/// assert!(fold_ratio(f64::NAN).is_nan());
/// ```
#[must_use]
pub fn fold_ratio(value: f64) -> f64 {
    if value < 1. {
        1. / value
    } else {
        value
    }
}

/// Replace every `+inf` in `array` with `NaN`
///
/// Negative infinities are left in place.
pub fn positive_infinity_to_nan<S, D>(array: &mut ArrayBase<S, D>)
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    array.mapv_inplace(|value| {
        if value == f64::INFINITY {
            f64::NAN
        } else {
            value
        }
    });
}
