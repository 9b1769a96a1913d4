use super::traits::{Camera, CapturedImage};
use crate::config::CameraConfig;
use crate::error::CaptureError;
use async_trait::async_trait;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Takes stills by running an external capture program that writes a JPEG
/// to stdout, e.g. `libcamera-still -n -t 1 -e jpg -o -`.
pub struct CommandCamera {
    program: PathBuf,
    args: Vec<String>,
    ready: bool,
}

impl CommandCamera {
    pub fn new(config: &CameraConfig) -> Self {
        let resolved = resolve_program(&config.command);
        match &resolved {
            Some(path) => info!("Camera capture via {}", path.display()),
            None => warn!("Camera capture program '{}' not found", config.command),
        }

        Self {
            ready: resolved.is_some(),
            program: resolved.unwrap_or_else(|| PathBuf::from(&config.command)),
            args: config.args.clone(),
        }
    }
}

#[async_trait]
impl Camera for CommandCamera {
    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn capture_image(&self) -> Result<CapturedImage, CaptureError> {
        if !self.ready {
            return Err(CaptureError::Unavailable);
        }

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CaptureError::Failed(format!("{}: {}", self.program.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Failed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        if output.stdout.is_empty() {
            return Err(CaptureError::Failed("capture produced no image data".to_string()));
        }

        debug!("Captured {} bytes", output.stdout.len());
        Ok(CapturedImage::jpeg(output.stdout))
    }
}

/// Locate `command` the way a shell would
fn resolve_program(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(command))
            .find(|path| path.is_file())
    })
}
