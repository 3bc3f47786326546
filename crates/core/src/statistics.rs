//! Descriptive statistics over one column's values.

use std::collections::HashMap;

use serde::Serialize;

use crate::types::TimeZone;
use crate::value::{Cell, Value};

/// Upper bound on histogram bins.
pub const MAX_HISTOGRAM_BINS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStatistics {
    /// Non-null values.
    pub count: usize,
    pub nulls: usize,
    pub numeric: Option<NumericSummary>,
    pub histogram: Vec<HistogramBin>,
    /// Value counts for non-numeric columns, most frequent first.
    pub categories: Vec<CategoryCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sample standard deviation; absent with fewer than two values.
    pub std: Option<f64>,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCount {
    pub value: String,
    pub count: usize,
}

impl ColumnStatistics {
    /// Histogram bin holding `value`.
    pub fn bin_of(&self, value: f64) -> Option<usize> {
        let last = self.histogram.len().checked_sub(1)?;
        self.histogram
            .iter()
            .position(|b| value >= b.lower && value < b.upper)
            .or_else(|| (value == self.histogram[last].upper).then_some(last))
    }
}

pub fn get_column_statistics(values: &[Cell], tz: &TimeZone) -> ColumnStatistics {
    let nulls = values.iter().filter(|v| v.is_none()).count();
    let present: Vec<&Value> = values.iter().flatten().collect();
    let count = present.len();

    let numbers: Option<Vec<f64>> = present.iter().map(|v| v.as_f64()).collect();
    match numbers {
        Some(mut numbers) if !numbers.is_empty() => {
            numbers.sort_by(f64::total_cmp);
            let summary = summarize(&numbers);
            let histogram = histogram(&numbers, summary.min, summary.max);
            ColumnStatistics {
                count,
                nulls,
                numeric: Some(summary),
                histogram,
                categories: Vec::new(),
            }
        }
        _ => ColumnStatistics {
            count,
            nulls,
            numeric: None,
            histogram: Vec::new(),
            categories: category_counts(&present, tz),
        },
    }
}

fn summarize(sorted: &[f64]) -> NumericSummary {
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let std = (sorted.len() > 1).then(|| {
        let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        variance.sqrt()
    });
    NumericSummary {
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean,
        std,
        q1: quantile(sorted, 0.25),
        median: quantile(sorted, 0.5),
        q3: quantile(sorted, 0.75),
    }
}

/// Linear interpolation between closest ranks.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + fraction * (sorted[upper] - sorted[lower])
}

/// Sturges' rule, capped at [`MAX_HISTOGRAM_BINS`].
fn histogram(sorted: &[f64], min: f64, max: f64) -> Vec<HistogramBin> {
    if min == max {
        return vec![HistogramBin {
            lower: min,
            upper: max,
            count: sorted.len(),
        }];
    }
    let bins = ((sorted.len() as f64).log2().ceil() as usize + 1).clamp(1, MAX_HISTOGRAM_BINS);
    let width = (max - min) / bins as f64;
    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: min + width * i as f64,
            upper: if i + 1 == bins { max } else { min + width * (i + 1) as f64 },
            count: 0,
        })
        .collect();
    for x in sorted {
        let index = (((x - min) / width).floor() as usize).min(bins - 1);
        out[index].count += 1;
    }
    out
}

fn category_counts(values: &[&Value], tz: &TimeZone) -> Vec<CategoryCount> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for value in values {
        *counts.entry(value.render(tz)).or_default() += 1;
    }
    let mut out: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(value, count)| CategoryCount { value, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    out
}
