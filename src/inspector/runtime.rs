use std::fmt::{self, Write as _};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use serde::Deserialize;
use tracing::{debug, warn};

use super::archive;
use super::{ImageInfo, Inspector};

/// Container runtimes whose CLI can export an image as a tar archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeKind::Docker => f.write_str("docker"),
            RuntimeKind::Podman => f.write_str("podman"),
        }
    }
}

// --- Docker CLI JSON output ---

#[derive(Deserialize)]
struct DockerInspect {
    #[serde(rename = "Size", default)]
    size: u64,
}

/// Exports an image through the runtime CLI (`docker save` / `podman save`)
/// and reads its layers from the exported archive.
///
/// The exported archive backs the returned layers, so it is only removed when
/// the inspector is dropped.
pub struct RuntimeInspector {
    cmd: String,
    kind: RuntimeKind,
    temp_dir: PathBuf,
    saved: Option<PathBuf>,
    progress: Option<ProgressBar>,
}

impl RuntimeInspector {
    pub fn new(kind: RuntimeKind) -> Self {
        Self {
            cmd: kind.to_string(),
            kind,
            temp_dir: std::env::temp_dir(),
            saved: None,
            progress: None,
        }
    }

    /// Attach a progress bar (clone of a Spinner's inner bar) for status updates.
    pub fn set_progress_bar(&mut self, bar: ProgressBar) {
        self.progress = Some(bar);
    }

    fn temp_path(&self) -> PathBuf {
        self.temp_dir
            .join(format!("image-licenses-save-{}.tar", std::process::id()))
    }

    /// Best-effort image size, used to scale the byte progress bar.
    fn image_size(&self, image: &str) -> Option<u64> {
        let output = Command::new(&self.cmd)
            .args(["image", "inspect", image, "--format", "{{json .}}"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let json = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str::<DockerInspect>(json.trim())
            .ok()
            .map(|di| di.size)
    }

    fn save_command(&self, image: &str) -> Command {
        let mut cmd = Command::new(&self.cmd);
        cmd.args(["save", image]);
        if self.kind == RuntimeKind::Podman {
            cmd.arg("--format=docker-archive");
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    /// Run `<runtime> save` into a temp file.
    ///
    /// On failure the exporter is reaped and the partial file is removed.
    fn save_via_pipe(&self, image: &str, total_size: Option<u64>) -> Result<PathBuf> {
        let tmp = self.temp_path();
        let mut child = self
            .save_command(image)
            .spawn()
            .with_context(|| format!("Failed to run '{} save'", self.cmd))?;

        let exited = match self.drain_stdout(&mut child, &tmp, total_size) {
            Ok(()) => child
                .wait()
                .with_context(|| format!("Failed to wait for '{} save'", self.cmd)),
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(err)
            }
        };
        let status = match exited {
            Ok(status) => status,
            Err(err) => {
                discard(&tmp);
                return Err(err);
            }
        };

        if !status.success() {
            discard(&tmp);
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            bail!("Failed to save '{}': {}", image, stderr.trim());
        }
        Ok(tmp)
    }

    /// Copy the child's stdout into `tmp`, advancing the byte bar when the size is known.
    fn drain_stdout(&self, child: &mut Child, tmp: &Path, total_size: Option<u64>) -> Result<()> {
        let stdout = child.stdout.take().context("Failed to capture stdout")?;
        let mut file = File::create(tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;

        let mut source: Box<dyn Read> = match (&self.progress, total_size.filter(|&s| s > 0)) {
            (Some(bar), Some(total)) => {
                bar.set_length(total);
                bar.set_position(0);
                bar.set_style(byte_style()?);
                Box::new(bar.wrap_read(stdout))
            }
            _ => Box::new(stdout),
        };

        io::copy(&mut source, &mut file).with_context(|| format!("Failed to write {}", tmp.display()))?;
        file.flush()?;
        Ok(())
    }

    fn save_to_file(&mut self, image: &str, total_size: Option<u64>) -> Result<PathBuf> {
        let tmp = self.save_via_pipe(image, total_size)?;
        self.saved = Some(tmp.clone());
        Ok(tmp)
    }
}

fn byte_style() -> Result<ProgressStyle> {
    Ok(
        ProgressStyle::with_template("{spinner:.dim} {msg} [{bar:20}] {bytes}/{total_bytes} ({secs}s)")
            .context("Invalid progress template")?
            .with_key("secs", |state: &ProgressState, w: &mut dyn fmt::Write| {
                let _ = write!(w, "{}", state.elapsed().as_secs());
            })
            .progress_chars("━╸░"),
    )
}

fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), %err, "failed to remove partial export"),
    }
}

impl Inspector for RuntimeInspector {
    fn inspect(&mut self, image: &str) -> Result<ImageInfo> {
        let (name, tag) = archive::parse_image_ref(image);

        if let Some(bar) = &self.progress {
            bar.set_message(format!("Saving {image} ..."));
        }
        let size = self.image_size(image);
        let tmp = self.save_to_file(image, size)?;
        debug!(image, archive = %tmp.display(), "image exported");

        archive::open_archive(&tmp, &name, &tag, &name)
            .with_context(|| format!("Failed to parse '{} save' output", self.cmd))
    }
}

impl Drop for RuntimeInspector {
    fn drop(&mut self) {
        if let Some(path) = self.saved.take() {
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), %err, "failed to remove exported image");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_names_match_their_binaries() {
        assert_eq!(RuntimeKind::Docker.to_string(), "docker");
        assert_eq!(RuntimeKind::Podman.to_string(), "podman");
        assert_eq!(RuntimeInspector::new(RuntimeKind::Podman).cmd, "podman");
    }

    #[test]
    fn missing_runtime_binary_is_an_error() {
        let mut inspector = RuntimeInspector::new(RuntimeKind::Docker);
        inspector.cmd = "image-licenses-no-such-runtime".to_string();

        let err = inspector.inspect("debian:bookworm").err().unwrap();
        assert!(err.to_string().contains("Failed to run"), "{err}");
        assert!(inspector.saved.is_none());
    }

    fn inspector_in(cmd: &str, temp_dir: &Path) -> RuntimeInspector {
        let mut inspector = RuntimeInspector::new(RuntimeKind::Docker);
        inspector.cmd = cmd.to_string();
        inspector.temp_dir = temp_dir.to_path_buf();
        inspector
    }

    fn leftovers(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect()
    }

    #[cfg(unix)]
    #[test]
    fn failed_export_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut inspector = inspector_in("false", dir.path());

        let err = inspector.inspect("debian:bookworm").err().unwrap();
        assert!(err.to_string().contains("Failed to save"), "{err}");
        assert!(inspector.saved.is_none());
        assert!(leftovers(dir.path()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_temp_dir_reaps_the_exporter() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let mut inspector = inspector_in("true", &missing);

        let err = inspector.inspect("debian:bookworm").err().unwrap();
        assert!(format!("{err:#}").contains("Failed to create"), "{err:#}");
        assert!(!missing.exists());
        assert!(inspector.saved.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn exported_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let mut inspector = inspector_in("echo", dir.path());

        // `echo save <image>` succeeds but is not an image archive.
        let err = inspector.inspect("debian:bookworm").err().unwrap();
        assert!(err.to_string().contains("Failed to parse"), "{err}");
        assert_eq!(leftovers(dir.path()).len(), 1);

        drop(inspector);
        assert!(leftovers(dir.path()).is_empty());
    }
}
