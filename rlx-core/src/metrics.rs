use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics(BTreeMap<String, f64>);

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<f64>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<f64>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                write!(f, " | ")?;
            }
            first = false;
            if value.fract() == 0.0 && value.abs() < 1e15 {
                write!(f, "{name}: {value:.0}")?;
            } else {
                write!(f, "{name}: {value:.4}")?;
            }
        }
        Ok(())
    }
}

/// Running sums of metrics, averaged over the number of recorded updates.
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    sums: BTreeMap<String, f64>,
    count: usize,
}

impl MetricsAccumulator {
    pub fn new(names: &[&str]) -> Self {
        Self {
            sums: names.iter().map(|n| (n.to_string(), 0.0)).collect(),
            count: 0,
        }
    }

    pub fn record(&mut self, values: &[(&str, f64)]) {
        for (name, value) in values {
            *self.sums.entry(name.to_string()).or_insert(0.0) += value;
        }
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    // zero updates leave every metric at 0.0
    pub fn mean(self) -> Metrics {
        let count = self.count;
        Metrics(
            self.sums
                .into_iter()
                .map(|(name, sum)| {
                    let mean = if count == 0 { 0.0 } else { sum / count as f64 };
                    (name, mean)
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_empty_accumulator_is_zero() {
        let acc = MetricsAccumulator::new(&["actor_loss", "critic_loss"]);
        let metrics = acc.mean();
        assert_eq!(metrics.get("actor_loss"), Some(0.0));
        assert_eq!(metrics.get("critic_loss"), Some(0.0));
    }

    #[test]
    fn test_accumulator_mean() {
        let mut acc = MetricsAccumulator::new(&["loss"]);
        acc.record(&[("loss", 1.0)]);
        acc.record(&[("loss", 3.0)]);
        assert_eq!(acc.count(), 2);
        assert_eq!(acc.mean().get("loss"), Some(2.0));
    }

    #[test]
    fn test_display() {
        let metrics = Metrics::new().with("step", 10u32).with("loss", 0.5);
        assert_eq!(metrics.to_string(), "loss: 0.5000 | step: 10");
    }
}
