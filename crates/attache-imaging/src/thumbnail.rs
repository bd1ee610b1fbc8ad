//! Thumbnail generation via `convert`.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use attache_core::{CommandRunner, Error, Geometry, Result, StyleDefinition};

use crate::probe::{absolute, ImageProber};

/// Output options for one style.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailOptions {
    /// Output extension; the temp file keeps no extension when unset.
    pub format: Option<String>,
    /// Raw options appended after the transformation.
    pub convert_options: Option<String>,
    /// Raw options placed before the source file.
    pub source_file_options: Option<String>,
    /// Raise `Error::Processing` on conversion failure instead of skipping.
    pub whiny: bool,
    pub auto_orient: bool,
    /// Keep every frame instead of selecting the first.
    pub save_animation: bool,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            format: None,
            convert_options: None,
            source_file_options: None,
            whiny: true,
            auto_orient: true,
            save_animation: false,
        }
    }
}

impl ThumbnailOptions {
    pub fn from_style(style: &StyleDefinition, whiny: bool) -> Self {
        Self {
            format: style.format.clone(),
            convert_options: style.convert_options.clone(),
            source_file_options: style.source_file_options.clone(),
            whiny,
            auto_orient: style.auto_orient,
            save_animation: style.save_animation,
        }
    }
}

/// Produces resized (and optionally cropped) copies of an image.
#[derive(Clone)]
pub struct ThumbnailGenerator {
    runner: Arc<dyn CommandRunner>,
    prober: ImageProber,
}

impl ThumbnailGenerator {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            prober: ImageProber::new(runner.clone()),
            runner,
        }
    }

    pub fn prober(&self) -> &ImageProber {
        &self.prober
    }

    /// Convert `source` to `target_spec` (e.g. `100x100#`, `640x480>`).
    ///
    /// The source is never modified; the caller owns the returned temp file.
    /// Returns `Ok(None)` when conversion fails and `options.whiny` is off.
    pub async fn generate(
        &self,
        source: &Path,
        target_spec: &str,
        options: &ThumbnailOptions,
    ) -> Result<Option<NamedTempFile>> {
        let start = Instant::now();
        let basename = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let crop = target_spec.trim_end().ends_with('#');
        let target = Geometry::parse(target_spec).ok_or_else(|| {
            Error::NotIdentified(format!("invalid target geometry {:?}", target_spec))
        })?;

        let mut current = self.prober.geometry(source).await?;
        if options.auto_orient {
            current.auto_orient();
        }
        let plan = current.transform_to(&target, crop)?;

        let mut builder = tempfile::Builder::new();
        let prefix = format!("{}-thumb-", basename);
        let suffix = options
            .format
            .as_deref()
            .filter(|f| !f.is_empty())
            .map(|f| format!(".{}", f))
            .unwrap_or_default();
        builder.prefix(&prefix).suffix(&suffix);
        let dst = builder.tempfile()?;

        let mut args = Vec::new();
        push_raw(&mut args, options.source_file_options.as_deref());
        if options.save_animation {
            args.push(absolute(source));
        } else {
            args.push(format!("{}[0]", absolute(source)));
        }
        if options.auto_orient {
            args.push("-auto-orient".to_string());
        }
        if !plan.scale.is_empty() {
            args.push("-resize".to_string());
            args.push(plan.scale.clone());
        }
        if let Some(region) = plan.crop {
            args.push("-crop".to_string());
            args.push(region.to_string());
            args.push("+repage".to_string());
        }
        push_raw(&mut args, options.convert_options.as_deref());

        let processing_error =
            || Error::Processing(format!("There was an error processing the thumbnail for {}", basename));

        match self.prober.format(source).await {
            Ok(format) if format.is_png() => {
                args.extend(
                    ["-define", "png:big-depth=16", "-define", "png:color-type=6"]
                        .map(String::from),
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    subsystem = "imaging",
                    component = "thumbnail",
                    op = "format",
                    path = %source.display(),
                    error = %e,
                    "Format probe failed"
                );
                if options.whiny {
                    return Err(processing_error());
                }
            }
        }

        args.push(absolute(dst.path()));

        if let Err(e) = self.runner.run("convert", &args).await {
            warn!(
                subsystem = "imaging",
                component = "thumbnail",
                op = "generate",
                path = %source.display(),
                target = target_spec,
                error = %e,
                "Thumbnail conversion failed"
            );
            if options.whiny {
                return Err(processing_error());
            }
            return Ok(None);
        }

        debug!(
            subsystem = "imaging",
            component = "thumbnail",
            op = "generate",
            path = %source.display(),
            target = target_spec,
            scale = %plan.scale,
            duration_ms = start.elapsed().as_millis() as u64,
            "Thumbnail generated"
        );

        Ok(Some(dst))
    }
}

/// Split a raw option string on whitespace; quoted values are not supported.
fn push_raw(args: &mut Vec<String>, raw: Option<&str>) {
    if let Some(raw) = raw {
        args.extend(raw.split_whitespace().map(String::from));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attache_core::mock::MockCommandRunner;

    fn generator(runner: &MockCommandRunner) -> ThumbnailGenerator {
        ThumbnailGenerator::new(Arc::new(runner.clone()))
    }

    fn convert_args(runner: &MockCommandRunner) -> Vec<String> {
        runner
            .calls()
            .into_iter()
            .find(|c| c.program == "convert")
            .expect("convert was run")
            .args
    }

    #[tokio::test]
    async fn test_crop_command() {
        let runner = MockCommandRunner::new().with_output("identify", "400x300,");
        let options = ThumbnailOptions {
            format: Some("jpg".into()),
            ..Default::default()
        };

        let out = generator(&runner)
            .generate(Path::new("/data/photo.jpg"), "100x100#", &options)
            .await
            .unwrap()
            .expect("thumbnail produced");

        let name = out.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("photo-thumb-"));
        assert!(name.ends_with(".jpg"));

        let expected: Vec<String> = [
            "/data/photo.jpg[0]",
            "-auto-orient",
            "-resize",
            "x100",
            "-crop",
            "100x100+16+0",
            "+repage",
        ]
        .into_iter()
        .map(String::from)
        .chain([out.path().display().to_string()])
        .collect();
        assert_eq!(convert_args(&runner), expected);
    }

    #[tokio::test]
    async fn test_fit_command_with_options() {
        let runner = MockCommandRunner::new().with_output("identify", "1024x768,");
        let options = ThumbnailOptions {
            convert_options: Some("-strip  -quality 80".into()),
            source_file_options: Some("-density 72".into()),
            auto_orient: false,
            ..Default::default()
        };

        let out = generator(&runner)
            .generate(Path::new("/data/scan.tiff"), "640x480>", &options)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            convert_args(&runner),
            vec![
                "-density".to_string(),
                "72".into(),
                "/data/scan.tiff[0]".into(),
                "-resize".into(),
                "640x480>".into(),
                "-strip".into(),
                "-quality".into(),
                "80".into(),
                out.path().display().to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_auto_orient_swaps_before_planning() {
        // Stored 300x400 rotated 90 degrees: displayed as 400x300.
        let runner = MockCommandRunner::new().with_output("identify", "300x400,6");
        generator(&runner)
            .generate(Path::new("/data/p.jpg"), "100x100#", &ThumbnailOptions::default())
            .await
            .unwrap();

        let args = convert_args(&runner);
        assert!(args.contains(&"100x100+16+0".to_string()));
    }

    #[tokio::test]
    async fn test_save_animation_keeps_all_frames() {
        let runner = MockCommandRunner::new().with_output("identify", "50x50,");
        let options = ThumbnailOptions {
            save_animation: true,
            ..Default::default()
        };
        generator(&runner)
            .generate(Path::new("/data/spin.gif"), "25x25", &options)
            .await
            .unwrap();

        let args = convert_args(&runner);
        assert_eq!(args[0], "/data/spin.gif");
    }

    #[tokio::test]
    async fn test_png_directive() {
        let runner = MockCommandRunner::new()
            .with_output("identify", "10x10,")
            .with_output("identify", "PNG\nTrueColorAlpha");
        let out = generator(&runner)
            .generate(Path::new("/data/a.png"), "5x5", &ThumbnailOptions::default())
            .await
            .unwrap()
            .unwrap();

        let args = convert_args(&runner);
        let tail: Vec<&str> = args[args.len() - 5..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "-define",
                "png:big-depth=16",
                "-define",
                "png:color-type=6",
                out.path().to_str().unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn test_unreadable_source_is_not_identified() {
        let runner = MockCommandRunner::new().with_failure("identify", "no decode delegate");
        let err = generator(&runner)
            .generate(Path::new("/data/a.bin"), "10x10", &ThumbnailOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotIdentified(_)));
    }

    #[tokio::test]
    async fn test_whiny_failure() {
        let runner = MockCommandRunner::new()
            .with_output("identify", "40x40,")
            .with_failure("convert", "delegate failed");
        let err = generator(&runner)
            .generate(Path::new("/data/photo.jpg"), "10x10", &ThumbnailOptions::default())
            .await
            .unwrap_err();
        match err {
            Error::Processing(msg) => assert!(msg.ends_with("for photo")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_quiet_failure_skips_style() {
        let runner = MockCommandRunner::new()
            .with_output("identify", "40x40,")
            .with_failure("convert", "delegate failed");
        let options = ThumbnailOptions {
            whiny: false,
            ..Default::default()
        };
        let out = generator(&runner)
            .generate(Path::new("/data/photo.jpg"), "10x10", &options)
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_invalid_target_spec() {
        let runner = MockCommandRunner::new().with_output("identify", "40x40,");
        let err = generator(&runner)
            .generate(Path::new("/data/photo.jpg"), "big", &ThumbnailOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotIdentified(_)));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_options_from_style() {
        let style = StyleDefinition::new("50x50").with_format("png");
        let options = ThumbnailOptions::from_style(&style, false);
        assert_eq!(options.format.as_deref(), Some("png"));
        assert!(!options.whiny);
        assert!(options.auto_orient);
    }
}
