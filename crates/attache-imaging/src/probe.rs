//! Image metadata via `identify`.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use attache_core::{CommandRunner, Error, Geometry, Result};

/// Format reported by `identify`: `%[magick]` and `%[type]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFormat {
    /// Coder name, e.g. `PNG`, `JPEG`, `GIF`.
    pub magick: String,
    /// Image type, e.g. `TrueColorAlpha`, `Grayscale`.
    pub kind: String,
}

impl ImageFormat {
    pub fn is_png(&self) -> bool {
        self.magick == "PNG"
    }
}

/// Reads geometry and format of local image files.
#[derive(Clone)]
pub struct ImageProber {
    runner: Arc<dyn CommandRunner>,
}

impl ImageProber {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// First-frame dimensions plus EXIF orientation.
    ///
    /// Fails with `NotIdentified` when `identify` errors or prints something
    /// that is not a geometry.
    pub async fn geometry(&self, path: &Path) -> Result<Geometry> {
        let args = vec![
            "-format".to_string(),
            "%wx%h,%[exif:orientation]".to_string(),
            first_frame(path),
        ];
        let output = match self.runner.run("identify", &args).await {
            Ok(out) => out,
            Err(Error::CommandLine(msg)) => {
                debug!(
                    subsystem = "imaging",
                    component = "probe",
                    op = "geometry",
                    path = %path.display(),
                    error = %msg,
                    "identify failed"
                );
                String::new()
            }
            Err(e) => return Err(e),
        };

        Geometry::from_probe(&output).map_err(|_| {
            Error::NotIdentified(format!(
                "{} is not recognized by the 'identify' command",
                path.display()
            ))
        })
    }

    /// Coder and image type of the first frame.
    pub async fn format(&self, path: &Path) -> Result<ImageFormat> {
        let args = vec![
            "-format".to_string(),
            "%[magick]\\n%[type]".to_string(),
            first_frame(path),
        ];
        let output = self.runner.run("identify", &args).await?;
        let mut lines = output.lines();
        Ok(ImageFormat {
            magick: lines.next().unwrap_or("").trim().to_string(),
            kind: lines.next().unwrap_or("").trim().to_string(),
        })
    }
}

/// Absolute path with the first-frame selector appended.
pub(crate) fn first_frame(path: &Path) -> String {
    format!("{}[0]", absolute(path))
}

pub(crate) fn absolute(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use attache_core::mock::MockCommandRunner;

    #[tokio::test]
    async fn test_geometry_parses_probe_output() {
        let runner = MockCommandRunner::new().with_output("identify", "400x300,6");
        let prober = ImageProber::new(Arc::new(runner.clone()));

        let geometry = prober.geometry(Path::new("/tmp/photo.jpg")).await.unwrap();
        assert_eq!(geometry.width(), 400.0);
        assert_eq!(geometry.height(), 300.0);
        assert_eq!(geometry.orientation(), Some(6));

        let call = runner.last_call().unwrap();
        assert_eq!(call.program, "identify");
        assert_eq!(
            call.args,
            vec!["-format", "%wx%h,%[exif:orientation]", "/tmp/photo.jpg[0]"]
        );
    }

    #[tokio::test]
    async fn test_geometry_without_orientation() {
        let runner = MockCommandRunner::new().with_output("identify", "640x480,\n");
        let prober = ImageProber::new(Arc::new(runner));
        let geometry = prober.geometry(Path::new("/tmp/a.png")).await.unwrap();
        assert_eq!(geometry.orientation(), None);
        assert_eq!(geometry.to_string(), "640x480");
    }

    #[tokio::test]
    async fn test_geometry_command_failure_is_not_identified() {
        let runner = MockCommandRunner::new().with_failure("identify", "no decode delegate");
        let prober = ImageProber::new(Arc::new(runner));
        let err = prober.geometry(Path::new("/tmp/notes.txt")).await.unwrap_err();
        match err {
            Error::NotIdentified(msg) => assert!(msg.contains("/tmp/notes.txt")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_format() {
        let runner = MockCommandRunner::new().with_output("identify", "PNG\nTrueColorAlpha");
        let prober = ImageProber::new(Arc::new(runner));
        let format = prober.format(Path::new("/tmp/a.png")).await.unwrap();
        assert!(format.is_png());
        assert_eq!(format.kind, "TrueColorAlpha");
    }
}
