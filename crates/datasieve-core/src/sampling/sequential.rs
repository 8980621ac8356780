//! Wald's Sequential Probability Ratio Test for early stopping.
//!
//! H0: failure rate is `p0` (acceptable). H1: failure rate is `p1`
//! (unacceptable). The log-likelihood ratio grows by `ln(p1/p0)` per failing
//! row and by `ln((1-p1)/(1-p0))` per passing row. The test accepts H0 once
//! it falls to `ln(β/(1-α))` and rejects it once it reaches `ln((1-β)/α)`.
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Continue,
    /// Failure rate is acceptable
    Accept,
    /// Failure rate is unacceptable
    Reject,
}

#[derive(Debug, Clone)]
pub struct SequentialTest {
    p0: f64,
    p1: f64,
    alpha: f64,
    beta: f64,
    lower: f64,
    upper: f64,
    fail_step: f64,
    pass_step: f64,
    min_rows: u64,
    llr: f64,
    rows: u64,
    failures: u64,
    decision: Decision,
}

impl SequentialTest {
    pub fn new(p0: f64, p1: f64, alpha: f64, beta: f64) -> Result<Self, CoreError> {
        if !(p0 > 0.0 && p0 < p1 && p1 < 1.0) {
            return Err(CoreError::config(format!(
                "early stop rates must satisfy 0 < p0 < p1 < 1, got p0={p0}, p1={p1}"
            )));
        }
        for (name, value) in [("alpha", alpha), ("beta", beta)] {
            if !(value > 0.0 && value < 0.5) {
                return Err(CoreError::config(format!(
                    "early stop {name} must be in (0, 0.5), got {value}"
                )));
            }
        }
        Ok(Self {
            p0,
            p1,
            alpha,
            beta,
            lower: (beta / (1.0 - alpha)).ln(),
            upper: ((1.0 - beta) / alpha).ln(),
            fail_step: (p1 / p0).ln(),
            pass_step: ((1.0 - p1) / (1.0 - p0)).ln(),
            min_rows: 0,
            llr: 0.0,
            rows: 0,
            failures: 0,
            decision: Decision::Continue,
        })
    }

    /// No decision is taken before `min_rows` rows were observed.
    pub fn with_min_rows(self, min_rows: u64) -> Self {
        Self { min_rows, ..self }
    }

    /// Feed one chunk worth of observations.
    ///
    /// After a decision is reached further updates are ignored.
    pub fn update(&mut self, failures: u64, rows: u64) -> Decision {
        if self.decision != Decision::Continue {
            return self.decision;
        }
        let failures = failures.min(rows);
        self.rows += rows;
        self.failures += failures;
        self.llr += failures as f64 * self.fail_step + (rows - failures) as f64 * self.pass_step;

        if self.rows >= self.min_rows {
            if self.llr >= self.upper {
                self.decision = Decision::Reject;
            } else if self.llr <= self.lower {
                self.decision = Decision::Accept;
            }
        }
        self.decision
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn log_likelihood_ratio(&self) -> f64 {
        self.llr
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn acceptable_rate(&self) -> f64 {
        self.p0
    }

    pub fn unacceptable_rate(&self) -> f64 {
        self.p1
    }

    pub fn error_rates(&self) -> (f64, f64) {
        (self.alpha, self.beta)
    }
}
