//! Confidence intervals and sample-to-population extrapolation.
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
    pub margin: f64,
    pub confidence_level: f64,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Failure rate measured on a sample, projected to the whole stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationEstimate {
    pub sample_size: u64,
    pub sample_failures: u64,
    pub population_size: u64,
    pub proportion: f64,
    pub interval: ConfidenceInterval,
    pub estimated_total: f64,
    pub estimated_total_lower: f64,
    pub estimated_total_upper: f64,
}

fn check_level(confidence_level: f64) -> Result<(), CoreError> {
    if confidence_level > 0.0 && confidence_level < 1.0 {
        Ok(())
    } else {
        Err(CoreError::config(format!(
            "confidence level must be in (0, 1), got {confidence_level}"
        )))
    }
}

/// Two-sided critical value: 1.96 for 0.95, 2.576 for 0.99.
pub fn z_for_confidence(confidence_level: f64) -> Result<f64, CoreError> {
    check_level(confidence_level)?;
    Ok(inverse_normal_cdf(1.0 - (1.0 - confidence_level) / 2.0))
}

/// Wald interval `p ± z * sqrt(p (1 - p) / n)`, clamped to `[0, 1]`.
///
/// With no observations the interval is the whole unit range.
pub fn wald_interval(
    successes: u64,
    n: u64,
    confidence_level: f64,
) -> Result<ConfidenceInterval, CoreError> {
    let z = z_for_confidence(confidence_level)?;
    if n == 0 {
        return Ok(ConfidenceInterval {
            estimate: 0.0,
            lower: 0.0,
            upper: 1.0,
            margin: 1.0,
            confidence_level,
        });
    }
    let p = successes.min(n) as f64 / n as f64;
    let margin = z * (p * (1.0 - p) / n as f64).sqrt();
    Ok(ConfidenceInterval {
        estimate: p,
        lower: (p - margin).max(0.0),
        upper: (p + margin).min(1.0),
        margin,
        confidence_level,
    })
}

/// `estimated_total = p × population` with the interval scaled the same way.
pub fn estimate_population(
    sample_failures: u64,
    sample_size: u64,
    population_size: u64,
    confidence_level: f64,
) -> Result<PopulationEstimate, CoreError> {
    let interval = wald_interval(sample_failures, sample_size, confidence_level)?;
    let population = population_size as f64;
    Ok(PopulationEstimate {
        sample_size,
        sample_failures,
        population_size,
        proportion: interval.estimate,
        interval,
        estimated_total: interval.estimate * population,
        estimated_total_lower: interval.lower * population,
        estimated_total_upper: interval.upper * population,
    })
}

/// Sample size needed to estimate a proportion within `margin` at
/// `confidence_level`, assuming the worst case p = 0.5 (Cochran).
/// A known population size applies the finite population correction.
pub fn required_sample_size(
    confidence_level: f64,
    margin: f64,
    population: Option<u64>,
) -> Result<u64, CoreError> {
    if !(margin > 0.0 && margin < 1.0) {
        return Err(CoreError::config(format!(
            "margin of error must be in (0, 1), got {margin}"
        )));
    }
    let z = z_for_confidence(confidence_level)?;
    let n0 = z * z * 0.25 / (margin * margin);
    let n = match population {
        Some(0) => return Ok(0),
        Some(size) => {
            let size = size as f64;
            n0 / (1.0 + (n0 - 1.0) / size)
        }
        None => n0,
    };
    Ok(n.ceil() as u64)
}

/// Acklam's rational approximation of the standard normal quantile.
/// Relative error below 1.2e-9 over (0, 1).
fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_z_values() {
        assert!((z_for_confidence(0.95).unwrap() - 1.96).abs() < 1e-3);
        assert!((z_for_confidence(0.99).unwrap() - 2.5758).abs() < 1e-3);
        assert!((z_for_confidence(0.90).unwrap() - 1.6449).abs() < 1e-3);
        assert!(z_for_confidence(1.0).is_err());
        assert!(z_for_confidence(0.0).is_err());
    }

    #[test]
    fn test_wald_interval_values() {
        let ci = wald_interval(50, 1_000, 0.95).unwrap();
        assert!((ci.estimate - 0.05).abs() < 1e-12);
        // 1.96 * sqrt(0.05 * 0.95 / 1000) = 0.013508
        assert!((ci.margin - 0.013508).abs() < 1e-4);
        assert!(ci.contains(0.05));
    }

    #[test]
    fn test_wald_interval_edges() {
        let empty = wald_interval(0, 0, 0.95).unwrap();
        assert_eq!((empty.lower, empty.upper), (0.0, 1.0));

        let none = wald_interval(0, 100, 0.95).unwrap();
        assert_eq!((none.lower, none.upper), (0.0, 0.0));

        let all = wald_interval(100, 100, 0.95).unwrap();
        assert_eq!(all.upper, 1.0);
    }

    #[test]
    fn test_population_extrapolation() {
        let estimate = estimate_population(20, 1_000, 1_000_000, 0.95).unwrap();
        assert!((estimate.estimated_total - 20_000.0).abs() < 1e-6);
        assert!(estimate.estimated_total_lower < 20_000.0);
        assert!(estimate.estimated_total_upper > 20_000.0);
    }

    #[test]
    fn test_required_sample_size() {
        // z^2 * 0.25 / e^2 = 3.8415 * 0.25 / 0.000025
        assert_eq!(required_sample_size(0.95, 0.005, None).unwrap(), 38_415);
        let finite = required_sample_size(0.95, 0.05, Some(1_000)).unwrap();
        assert!(finite < 385 && finite > 250);
        assert!(required_sample_size(0.95, 0.0, None).is_err());
    }

    #[test]
    fn test_interval_coverage_near_nominal() {
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        let true_p = 0.3;
        let n = 500u64;
        let trials = 2_000;
        let mut covered = 0;
        for _ in 0..trials {
            let successes = (0..n).filter(|_| rng.gen_bool(true_p)).count() as u64;
            if wald_interval(successes, n, 0.95).unwrap().contains(true_p) {
                covered += 1;
            }
        }
        let coverage = covered as f64 / trials as f64;
        assert!(
            (0.93..=0.97).contains(&coverage),
            "coverage {coverage} outside [0.93, 0.97]"
        );
    }
}
