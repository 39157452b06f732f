//! Utility functions
//!
use std::{
    fs::File,
    io::Cursor,
    path::Path,
};

use anyhow::{bail, Context, Result};
use reqwest::Client;

/// Download a file from a URL to a given filepath.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<Path>,
) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(&filepath)
        .with_context(|| format!("failed to create {}", filepath.as_ref().display()))?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

/// Reduce a client-provided filename to a safe basename.
///
/// Path components are stripped and anything outside `[A-Za-z0-9._-]` is
/// replaced with an underscore. Names that reduce to nothing (empty input,
/// `.`, `..`) come out as the empty string, which callers treat as a
/// missing filename.
pub fn sanitize_filename(raw: &str) -> String {
    let base = Path::new(raw)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    cleaned.trim_matches('.').to_string()
}

/// Derive the stored name of the annotated image from the upload name.
pub fn output_filename(input_filename: &str) -> String {
    format!("output_{input_filename}")
}

/// Render a confidence score as a percentage with two decimals, e.g. `97.31%`.
pub fn format_confidence(confidence: f32) -> String {
    format!("{:.2}%", confidence * 100.0)
}

/// Read class names from a file with one label per line. Blank lines are
/// skipped.
pub fn read_labels(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels file {}", path.display()))?;

    let labels: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToOwned::to_owned)
        .collect();

    if labels.is_empty() {
        bail!("labels file {} contains no labels", path.display());
    }

    Ok(labels)
}
