//! Chart rendering for persisted batches.

use super::Batch;

use serde::Serialize;
use thiserror::Error;

const CHART_TEMPLATE: &str = include_str!("templates/chart.html");

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("chart: batch has no aligned samples")]
    Empty,
    #[error("chart: {0}")]
    Json(#[from] serde_json::Error),
}

/// Turns a batch into a standalone document.
pub trait ChartRenderer: Send + Sync {
    /// File extension of rendered documents.
    fn extension(&self) -> &'static str;

    fn render(&self, batch: &Batch) -> Result<String, ChartError>;
}

/// Line chart of every metric in milliseconds, as a self-contained HTML page.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlChart;

#[derive(Serialize)]
struct ChartData<'a> {
    title: String,
    subtitle: &'a str,
    x: Vec<usize>,
    series: Vec<Series>,
}

#[derive(Serialize)]
struct Series {
    name: String,
    data: Vec<f64>,
}

impl ChartRenderer for HtmlChart {
    fn extension(&self) -> &'static str {
        "html"
    }

    fn render(&self, batch: &Batch) -> Result<String, ChartError> {
        let n = batch.aligned_len();
        if n == 0 {
            return Err(ChartError::Empty);
        }

        let data = ChartData {
            title: format!("RTT for {}", batch.target),
            subtitle: "Various protocol latencies",
            x: (0..n).collect(),
            series: batch
                .metrics
                .iter()
                .enumerate()
                .map(|(i, m)| Series {
                    name: m.to_uppercase(),
                    data: batch
                        .column(i)
                        .iter()
                        .map(|d| d.as_micros() as f64 / 1000.0)
                        .collect(),
                })
                .collect(),
        };

        // Keep "</script>" in a target name from closing the script block.
        let json = serde_json::to_string(&data)?.replace("</", "<\\/");
        Ok(CHART_TEMPLATE.replace("{{chart_json}}", &json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::tests::{batch, ms};

    #[test]
    fn test_render_embeds_series() {
        let b = batch(
            &["tcp", "e2e"],
            vec![vec![ms(1), ms(2), ms(3)], vec![ms(10), ms(20)]],
        );
        let html = HtmlChart.render(&b).unwrap();

        assert!(!html.contains("{{chart_json}}"));
        assert!(html.contains(r#""title":"RTT for https:example.com:443""#));
        assert!(html.contains(r#"{"name":"TCP","data":[1.0,2.0]}"#));
        assert!(html.contains(r#"{"name":"E2E","data":[10.0,20.0]}"#));
        assert!(html.contains(r#""x":[0,1]"#));
    }

    #[test]
    fn test_render_escapes_script_close() {
        let mut b = batch(&["rtt"], vec![vec![ms(1)]]);
        b.target = "icmp:</script>".to_string();
        let html = HtmlChart.render(&b).unwrap();
        assert_eq!(html.matches("</script>").count(), CHART_TEMPLATE.matches("</script>").count());
    }

    #[test]
    fn test_render_empty_batch() {
        let b = batch(&["rtt"], vec![vec![]]);
        assert!(matches!(HtmlChart.render(&b), Err(ChartError::Empty)));
    }
}
