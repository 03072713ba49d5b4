//! Markdown transcript of one submission: the echoed code, its output in a
//! single text block, then tables and plots in emission order.

use super::markdown::{MarkdownStreamer, Newlines};
use crate::{
    execution::{ArtifactPayload, ExecutionResult, PlotPayload, TablePayload},
    utils::unicode::{display_width, pad_to_width, truncate_to_width},
};

const MAX_CELL_WIDTH: usize = 40;

/// `plot_target` maps the 1-based plot number to the image link target
/// (a file path or [`PlotPayload::data_uri`]).
pub fn render_transcript(
    echo: Option<&str>,
    result: &ExecutionResult,
    plot_target: impl Fn(usize, &PlotPayload) -> String,
) -> String {
    let mut out = String::new();
    {
        let mut ms = MarkdownStreamer::new(|s: &str| out.push_str(s));
        if let Some(code) = echo {
            ms.md(&format!("```python\n{}\n```", code.trim_end()), Newlines::BOTH);
        }

        let mut plots = 0;
        for artifact in result.artifacts() {
            match artifact.payload() {
                ArtifactPayload::Text(text) => {
                    ms.code(&text.text, Newlines::NONE);
                }
                ArtifactPayload::Value(repr) => {
                    ms.code(repr, Newlines::BOTH);
                }
                ArtifactPayload::Error(error) => {
                    let text = match &error.trace {
                        Some(trace) => trace.clone(),
                        None => format!("Error: {}", error.headline()),
                    };
                    ms.code(&text, Newlines::BOTH);
                }
                ArtifactPayload::Table(table) => {
                    ms.md(&format!("\n{}\n", markdown_table(table)), Newlines::BOTH);
                }
                ArtifactPayload::Plot(plot) => {
                    plots += 1;
                    let image = format!(
                        "\n![plot {plots} ({}x{} px)]({})\n",
                        plot.width_px,
                        plot.height_px,
                        plot_target(plots, plot)
                    );
                    ms.md(&image, Newlines::BOTH);
                }
            }
        }
        ms.close();
    }
    out
}

pub fn markdown_table(table: &TablePayload) -> String {
    let clean = |cell: &str| {
        let flat = cell.replace('\n', " ").replace('|', "\\|");
        truncate_to_width(&flat, MAX_CELL_WIDTH).into_owned()
    };
    let header: Vec<String> = table.columns.iter().map(|c| clean(c)).collect();
    let rows: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| {
            (0..header.len())
                .map(|i| row.get(i).map(|c| clean(c)).unwrap_or_default())
                .collect()
        })
        .collect();

    let widths: Vec<usize> = (0..header.len())
        .map(|i| {
            rows.iter()
                .map(|r| display_width(&r[i]))
                .chain(std::iter::once(display_width(&header[i])))
                .max()
                .unwrap_or(0)
                .max(3)
        })
        .collect();

    let line = |cells: &[String]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| pad_to_width(c, *w))
            .collect();
        format!("| {} |", padded.join(" | "))
    };

    let mut out = vec![line(&header)];
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push(line(&rule));
    out.extend(rows.iter().map(|r| line(r)));
    if table.truncated {
        out.push(String::new());
        out.push(format!("_{} of {} rows shown_", table.rows.len(), table.total_rows));
    }
    out.join("\n")
}
