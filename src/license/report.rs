use std::io::{self, BufRead, BufReader, Write};

use tracing::{debug, info};

use super::index::CommonLicenseIndex;
use super::shadow::{LayerVisibility, is_whiteout};
use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::inspector::ImageLayers;

const SEPARATOR: &str = "===========================================================";

/// Counts of what a report pass printed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReportSummary {
    /// License files rendered.
    pub files: usize,
    /// Common license references detected, duplicates included.
    pub references: usize,
}

/// Second pass: print every license file, followed by the common license
/// texts its lines mention.
///
/// Detection is plain substring matching of index keys against each line.
pub struct Reporter<'a> {
    config: &'a ScanConfig,
    index: &'a CommonLicenseIndex,
    visibility: Option<&'a LayerVisibility>,
}

impl<'a> Reporter<'a> {
    pub fn new(config: &'a ScanConfig, index: &'a CommonLicenseIndex) -> Self {
        Self {
            config,
            index,
            visibility: None,
        }
    }

    /// Ignore entries shadowed by later layers.
    pub fn with_visibility(mut self, visibility: &'a LayerVisibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Whether `path` ends with one of the configured license filenames.
    pub fn is_license_file(&self, path: &str) -> bool {
        !is_whiteout(path)
            && self
                .config
                .license_filenames
                .iter()
                .any(|name| path.ends_with(name.as_str()))
    }

    pub fn report<W: Write>(&self, image: &str, layers: &ImageLayers, out: &mut W) -> Result<ReportSummary> {
        let mut summary = ReportSummary::default();

        layers.walk(|entry| {
            if !self.is_license_file(&entry.path) {
                return Ok(());
            }
            if let Some(visibility) = self.visibility {
                if !visibility.is_visible(entry) {
                    debug!(path = %entry.path, layer = entry.layer, "skipping shadowed license file");
                    return Ok(());
                }
            }

            let path = entry.path.clone();
            let references = self.render(image, &path, BufReader::new(entry), &mut *out)?;
            summary.files += 1;
            summary.references += references;
            Ok(())
        })?;

        info!(files = summary.files, references = summary.references, "license report written");
        Ok(summary)
    }

    /// Print one license file block; returns the number of references found.
    fn render<R: BufRead, W: Write>(&self, image: &str, path: &str, mut content: R, out: &mut W) -> Result<usize> {
        writeln!(out, "{SEPARATOR}").map_err(ScanError::Output)?;
        writeln!(out, "image: {image}").map_err(ScanError::Output)?;
        writeln!(out, "file:  {path}").map_err(ScanError::Output)?;
        writeln!(out, "contents:").map_err(ScanError::Output)?;
        writeln!(out).map_err(ScanError::Output)?;

        let mut detected: Vec<&str> = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = content
                .read_until(b'\n', &mut buf)
                .map_err(|source| ScanError::ContentRead {
                    path: path.to_string(),
                    source,
                })?;
            if n == 0 {
                break;
            }

            let line = String::from_utf8_lossy(trim_line_ending(&buf));
            detected.extend(self.index.keys().filter(|key| line.contains(key)));
            indented(out, &line).map_err(ScanError::Output)?;
        }

        for reference in &detected {
            let text = self.index.get(reference).unwrap_or_default();
            debug!(%path, %reference, "common license reference");

            indented(out, "").map_err(ScanError::Output)?;
            indented(out, &format!("contents of common-license file {reference}")).map_err(ScanError::Output)?;
            indented(out, "").map_err(ScanError::Output)?;
            for line in text.lines() {
                indented(out, line).map_err(ScanError::Output)?;
            }
            indented(out, "").map_err(ScanError::Output)?;
        }

        writeln!(out).map_err(ScanError::Output)?;
        Ok(detected.len())
    }
}

/// Print the index keys with the size of their text, one per line.
pub fn list_common_licenses<W: Write>(index: &CommonLicenseIndex, out: &mut W) -> Result<()> {
    for (path, text) in index.iter() {
        writeln!(out, "{path}\t{} bytes", text.len()).map_err(ScanError::Output)?;
    }
    Ok(())
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn indented<W: Write>(out: &mut W, text: &str) -> io::Result<()> {
    writeln!(out, "\t{text}")
}
