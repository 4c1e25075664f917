use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::inspector::docker_archive::DockerArchiveInspector;
use crate::inspector::runtime::{RuntimeInspector, RuntimeKind};
use crate::inspector::{ImageInfo, Inspector};
use crate::license::{self, CommonLicenseIndex, IndexBuilder, LayerVisibility, Reporter};
use crate::progress::Spinner;

/// Print every license file in `image`, with the common licenses they reference.
pub fn run(image: &str, runtime: RuntimeKind, config: &ScanConfig) -> Result<()> {
    let spinner = Spinner::new(format!("Resolving {image} ..."));
    // Keeps a runtime export alive until the report is written.
    let (_inspector, info) = load_image(image, runtime, &spinner)?;

    let visibility = resolve_visibility(&info, config, &spinner)?;
    let index = collect(&info, config, visibility.as_ref())?;
    spinner.finish(format!("Collected {} common licenses", index.len()));

    let mut reporter = Reporter::new(config, &index);
    if let Some(visibility) = &visibility {
        reporter = reporter.with_visibility(visibility);
    }

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let summary = reporter
        .report(&info.identifier(), &info.layers, &mut out)
        .context("Unable to print licenses")?;
    out.flush().context("Unable to print licenses")?;

    eprintln!(
        "{} {} license files, {} common license references",
        "✔".green(),
        summary.files,
        summary.references
    );
    Ok(())
}

/// Print the common license index of `image`.
pub fn commons(image: &str, runtime: RuntimeKind, config: &ScanConfig) -> Result<()> {
    let spinner = Spinner::new(format!("Resolving {image} ..."));
    let (_inspector, info) = load_image(image, runtime, &spinner)?;

    let visibility = resolve_visibility(&info, config, &spinner)?;
    let index = collect(&info, config, visibility.as_ref())?;
    spinner.finish(format!("Collected {} common licenses", index.len()));

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    license::list_common_licenses(&index, &mut out).context("Unable to print common licenses")?;
    out.flush().context("Unable to print common licenses")?;
    Ok(())
}

fn load_image(image: &str, runtime: RuntimeKind, spinner: &Spinner) -> Result<(Box<dyn Inspector>, ImageInfo)> {
    let mut inspector: Box<dyn Inspector> = if looks_like_archive(image) {
        Box::new(DockerArchiveInspector::new(image.into()))
    } else {
        let mut saver = RuntimeInspector::new(runtime);
        saver.set_progress_bar(spinner.clone_bar());
        Box::new(saver)
    };

    let info = inspector.inspect(image)?;
    if info.layers.is_empty() {
        warn!(image, "image has no layers");
    }
    debug!(layers = ?info.layers.digests().collect::<Vec<_>>(), "image layers");
    spinner.step(
        format!("Resolved {} ({} layers)", info.identifier(), info.layers.len()),
        "Collecting common licenses ...",
    );
    Ok((inspector, info))
}

fn resolve_visibility(info: &ImageInfo, config: &ScanConfig, spinner: &Spinner) -> Result<Option<LayerVisibility>> {
    if !config.resolve_shadowing {
        return Ok(None);
    }
    spinner.set_message("Resolving shadowed paths ...");
    let visibility = LayerVisibility::build(&info.layers).context("Unable to resolve shadowed paths")?;
    spinner.set_message("Collecting common licenses ...");
    Ok(Some(visibility))
}

fn collect(info: &ImageInfo, config: &ScanConfig, visibility: Option<&LayerVisibility>) -> Result<CommonLicenseIndex> {
    let mut builder = IndexBuilder::new(config);
    if let Some(visibility) = visibility {
        builder = builder.with_visibility(visibility);
    }
    let index = builder
        .build(&info.layers)
        .context("Unable to collect common licenses")?;
    if index.is_empty() {
        debug!(dirs = ?config.common_license_dirs, "no common licenses found");
    }
    Ok(index)
}

fn looks_like_archive(image: &str) -> bool {
    let p = Path::new(image);
    p.is_file()
        || matches!(
            p.extension().and_then(|e| e.to_str()),
            Some("tar" | "gz" | "tgz")
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_detection() {
        assert!(looks_like_archive("image.tar"));
        assert!(looks_like_archive("/tmp/image.tar.gz"));
        assert!(looks_like_archive("image.tgz"));
        assert!(!looks_like_archive("debian:bookworm"));
        assert!(!looks_like_archive("ghcr.io/org/app:1.2"));
    }

    #[test]
    fn existing_file_is_an_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved-image");
        std::fs::write(&path, b"").unwrap();
        assert!(looks_like_archive(&path.display().to_string()));
    }
}
