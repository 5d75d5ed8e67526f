//! Replicate aggregation and replicate-agreement checks.
//!
//! Same-plate and across-plate policies differ only in which readings the
//! caller pools before aggregation; the grouping itself is identical.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::plate::Well;
use crate::process::stats::{mean, pearson, sem};

/// One well's contribution to a dose series, prior to aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseReading {
    pub sample_id: String,
    pub well: Well,
    pub concentration: f64,
    pub value: f64,
}

/// Replicate wells collapsed at a single concentration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedPoint {
    pub concentration: f64,
    pub mean: f64,
    pub sem: f64,
    pub n: usize,
    pub wells: Vec<Well>,
}

/// All aggregated points of one sample, concentrations strictly decreasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleSeries {
    pub sample_id: String,
    pub points: Vec<AggregatedPoint>,
}

/// Groups readings by sample and concentration. Samples keep their order of
/// first appearance; within a sample, equal concentrations are replicates and
/// points are sorted by concentration descending.
pub fn aggregate_doses(readings: &[DoseReading]) -> Vec<SampleSeries> {
    let mut order: Vec<String> = Vec::new();
    let mut by_sample: HashMap<String, Vec<&DoseReading>> = HashMap::new();
    for reading in readings {
        by_sample
            .entry(reading.sample_id.clone())
            .or_insert_with(|| {
                order.push(reading.sample_id.clone());
                Vec::new()
            })
            .push(reading);
    }

    order
        .into_iter()
        .map(|sample_id| {
            let mut group = by_sample.remove(&sample_id).unwrap_or_default();
            group.sort_by(|a, b| {
                b.concentration
                    .partial_cmp(&a.concentration)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let mut points: Vec<AggregatedPoint> = Vec::new();
            let mut i = 0;
            while i < group.len() {
                let conc = group[i].concentration;
                let mut values = Vec::new();
                let mut wells = Vec::new();
                while i < group.len() && group[i].concentration == conc {
                    values.push(group[i].value);
                    wells.push(group[i].well);
                    i += 1;
                }
                points.push(AggregatedPoint {
                    concentration: conc,
                    mean: mean(&values),
                    sem: sem(&values),
                    n: values.len(),
                    wells,
                });
            }
            SampleSeries { sample_id, points }
        })
        .collect()
}

/// Pointwise mean and SEM across replicate traces, truncated to the shortest.
pub fn aggregate_pointwise(traces: &[&[f64]]) -> (Vec<f64>, Vec<f64>) {
    let len = traces.iter().map(|t| t.len()).min().unwrap_or(0);
    let mut means = Vec::with_capacity(len);
    let mut sems = Vec::with_capacity(len);
    for i in 0..len {
        let column: Vec<f64> = traces.iter().map(|t| t[i]).collect();
        means.push(mean(&column));
        sems.push(if traces.len() > 1 {
            sem(&column)
        } else {
            f64::NAN
        });
    }
    (means, sems)
}

/// Least-squares agreement between two replicate measurements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub pearson: f64,
    pub n: usize,
    /// Finite pairs sorted by the first replicate, ascending.
    pub pairs: Vec<(f64, f64)>,
}

/// Regresses replicate two onto replicate one. Pairs with a non-finite
/// member are dropped before fitting.
pub fn replicate_correlation(first: &[f64], second: &[f64]) -> CorrelationFit {
    let mut pairs: Vec<(f64, f64)> = first
        .iter()
        .zip(second.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let n = pairs.len();
    if n < 2 {
        return CorrelationFit {
            slope: f64::NAN,
            intercept: f64::NAN,
            r_squared: f64::NAN,
            pearson: f64::NAN,
            n,
            pairs,
        };
    }

    let xs: Vec<f64> = pairs.iter().map(|(a, _)| *a).collect();
    let ys: Vec<f64> = pairs.iter().map(|(_, b)| *b).collect();
    let mx = mean(&xs);
    let my = mean(&ys);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (x, y) in &pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx) * (x - mx);
    }
    let (slope, intercept) = if sxx == 0.0 {
        (f64::NAN, f64::NAN)
    } else {
        let slope = sxy / sxx;
        (slope, my - slope * mx)
    };

    let fitted: Vec<f64> = xs.iter().map(|&x| slope * x + intercept).collect();
    CorrelationFit {
        slope,
        intercept,
        r_squared: crate::fit::r_squared(&ys, &fitted),
        pearson: pearson(&xs, &ys),
        n,
        pairs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn reading(sample: &str, well: &str, conc: f64, value: f64) -> DoseReading {
        DoseReading {
            sample_id: sample.to_string(),
            well: well.parse().unwrap(),
            concentration: conc,
            value,
        }
    }

    #[test]
    fn test_aggregate_groups_replicates() {
        let readings = vec![
            reading("S1", "A1", 1e-5, 90.0),
            reading("S1", "B1", 1e-5, 110.0),
            reading("S1", "A2", 1e-6, 40.0),
            reading("S2", "C1", 1e-5, 55.0),
        ];
        let series = aggregate_doses(&readings);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].sample_id, "S1");
        assert_eq!(series[0].points.len(), 2);
        let top = &series[0].points[0];
        assert_relative_eq!(top.concentration, 1e-5);
        assert_relative_eq!(top.mean, 100.0);
        assert_eq!(top.n, 2);
        assert_eq!(top.wells.len(), 2);
        assert_eq!(series[1].points[0].n, 1);
        assert!(series[1].points[0].sem.is_nan());
    }

    #[test]
    fn test_aggregate_sorts_concentrations_descending() {
        let readings = vec![
            reading("S1", "A3", 1e-7, 5.0),
            reading("S1", "A1", 1e-5, 95.0),
            reading("S1", "A2", 1e-6, 50.0),
        ];
        let series = aggregate_doses(&readings);
        let concs: Vec<f64> = series[0].points.iter().map(|p| p.concentration).collect();
        assert_relative_eq!(concs[0], 1e-5);
        assert_relative_eq!(concs[1], 1e-6);
        assert_relative_eq!(concs[2], 1e-7);
    }

    #[test]
    fn test_pointwise_aggregation() {
        let a = [1.0, 2.0, 3.0];
        let b = [3.0, 4.0, 5.0];
        let (means, sems) = aggregate_pointwise(&[&a, &b]);
        assert_relative_eq!(means[1], 3.0);
        assert!(sems[1] > 0.0);
        let (single, single_sems) = aggregate_pointwise(&[&a]);
        assert_relative_eq!(single[2], 3.0);
        assert!(single_sems[2].is_nan());
    }

    #[test]
    fn test_replicate_correlation_perfect_agreement() {
        let r1 = [10.0, 50.0, 90.0, 30.0];
        let r2 = [10.0, 50.0, 90.0, 30.0];
        let fit = replicate_correlation(&r1, &r2);
        assert_relative_eq!(fit.slope, 1.0, epsilon = 1e-12);
        assert_relative_eq!(fit.intercept, 0.0, epsilon = 1e-9);
        assert_relative_eq!(fit.r_squared, 1.0, epsilon = 1e-12);
        assert_relative_eq!(fit.pearson, 1.0, epsilon = 1e-12);
        // Pairs come back sorted by the first replicate.
        assert_relative_eq!(fit.pairs[0].0, 10.0);
        assert_relative_eq!(fit.pairs[3].0, 90.0);
    }

    #[test]
    fn test_replicate_correlation_drops_nan_pairs() {
        let r1 = [10.0, f64::NAN, 90.0, 30.0];
        let r2 = [12.0, 50.0, 88.0, f64::NAN];
        let fit = replicate_correlation(&r1, &r2);
        assert_eq!(fit.n, 2);
        assert!(fit.slope.is_finite());
    }
}
