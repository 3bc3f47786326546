//! Inline SVG histograms for `{% visualization %}`.

use std::fmt::Write as _;

use crate::statistics::ColumnStatistics;
use crate::types::TimeZone;
use crate::value::Value;

use super::escape_html;

const CHART_WIDTH: f64 = 320.0;
const CHART_HEIGHT: f64 = 120.0;
const BAR_GAP: f64 = 2.0;
const BAR_FILL: &str = "#9bb7d4";
const HIGHLIGHT_FILL: &str = "#d9534f";

/// Render a histogram for `column`, highlighting the bar holding `current`.
pub fn histogram_html(column: &str, stats: &ColumnStatistics, current: Option<&Value>, tz: &TimeZone) -> String {
    let bars: Vec<(String, usize, bool)> = if stats.numeric.is_some() {
        let highlighted = current.and_then(Value::as_f64).and_then(|x| stats.bin_of(x));
        stats
            .histogram
            .iter()
            .enumerate()
            .map(|(i, bin)| {
                (
                    format!("{} - {}", trim_number(bin.lower), trim_number(bin.upper)),
                    bin.count,
                    highlighted == Some(i),
                )
            })
            .collect()
    } else {
        let current = current.map(|v| v.render(tz));
        stats
            .categories
            .iter()
            .map(|c| (c.value.clone(), c.count, current.as_deref() == Some(c.value.as_str())))
            .collect()
    };

    let mut html = String::new();
    let _ = write!(
        html,
        "<div class=\"ontask-visualization\"><svg xmlns=\"http://www.w3.org/2000/svg\" \
         width=\"{CHART_WIDTH}\" height=\"{CHART_HEIGHT}\" role=\"img\" aria-label=\"{}\">",
        escape_html(column)
    );
    let tallest = bars.iter().map(|b| b.1).max().unwrap_or(0).max(1) as f64;
    let width = CHART_WIDTH / bars.len().max(1) as f64;
    for (i, (label, count, highlight)) in bars.iter().enumerate() {
        let height = CHART_HEIGHT * (*count as f64) / tallest;
        let _ = write!(
            html,
            "<rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" fill=\"{}\"><title>{}: {count}</title></rect>",
            i as f64 * width,
            CHART_HEIGHT - height,
            (width - BAR_GAP).max(1.0),
            height,
            if *highlight { HIGHLIGHT_FILL } else { BAR_FILL },
            escape_html(label),
        );
    }
    html.push_str("</svg></div>");
    html
}

fn trim_number(x: f64) -> String {
    if x.fract() == 0.0 {
        format!("{x:.0}")
    } else {
        format!("{x:.2}")
    }
}
