//! Output formatting for scorecard results.

use anyhow::{Context, Result};
use clap::ValueEnum;
use osdk_scorecard::{render_text, TestList};
use tabled::{Table, Tabled};

use crate::xunit;

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// JSON `TestList` document.
    Json,
    /// xUnit XML report.
    Xunit,
}

/// One row of the `--list` table.
#[derive(Debug, Tabled)]
struct ListRow {
    #[tabled(rename = "SUITE")]
    suite: String,
    #[tabled(rename = "TEST")]
    test: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "ENTRYPOINT")]
    entrypoint: String,
}

/// Render results in the requested format.
pub fn render(list: &TestList, format: OutputFormat) -> Result<String> {
    let rendered = match format {
        OutputFormat::Text => render_text(list),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(list).context("marshal json error")?;
            format!("{json}\n")
        }
        OutputFormat::Xunit => xunit::to_xml(list).context("marshal xunit error")?,
    };
    Ok(rendered)
}

/// Render a listing of the selected tests.
///
/// Text listings are a table; other formats match [`render`].
pub fn render_listing(list: &TestList, format: OutputFormat) -> Result<String> {
    if format != OutputFormat::Text || list.is_empty() {
        return render(list, format);
    }

    let rows = list.items.iter().map(|test| ListRow {
        suite: test.spec.suite().unwrap_or("").to_string(),
        test: test.spec.test_name().unwrap_or("").to_string(),
        image: test.spec.image.clone(),
        entrypoint: test.spec.entrypoint.join(" "),
    });
    Ok(format!("{}\n", Table::new(rows)))
}

/// Print results in the requested format.
pub fn print_output(list: &TestList, format: OutputFormat) -> Result<()> {
    print!("{}", render(list, format)?);
    Ok(())
}

/// Print a listing of the selected tests.
pub fn print_listing(list: &TestList, format: OutputFormat) -> Result<()> {
    print!("{}", render_listing(list, format)?);
    Ok(())
}
