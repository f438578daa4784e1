use std::time::Duration;

use super::Aggregation;

/// Samples of a numeric measure taken while monitoring runs.
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    samples: Vec<(Duration, f64)>,
    max: Option<f64>,
    min: Option<f64>,
    sum: f64,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value observed `at` after monitoring started.
    pub fn add(&mut self, at: Duration, value: f64) {
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.sum += value;
        self.samples.push((at, value));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<f64> {
        self.samples.last().map(|(_, v)| *v)
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.sum / self.samples.len() as f64)
        }
    }

    pub fn aggregate(&self, aggregation: Aggregation) -> Option<f64> {
        match aggregation {
            Aggregation::No => self.last(),
            Aggregation::Max => self.max(),
            Aggregation::Min => self.min(),
            Aggregation::Mean => self.mean(),
        }
    }

    pub fn samples(&self) -> &[(Duration, f64)] {
        &self.samples
    }
}
