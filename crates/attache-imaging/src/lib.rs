//! # attache-imaging
//!
//! Image probing and thumbnail generation for attache, driven by the
//! ImageMagick command-line tools.
//!
//! - [`ImageMagick`]: [`CommandRunner`](attache_core::CommandRunner) that
//!   spawns `identify` / `convert` with a timeout
//! - [`ImageProber`]: geometry, EXIF orientation and format of a file
//! - [`ThumbnailGenerator`]: resize / crop a source into a style

pub mod command;
pub mod probe;
pub mod thumbnail;

pub use command::ImageMagick;
pub use probe::{ImageFormat, ImageProber};
pub use thumbnail::{ThumbnailGenerator, ThumbnailOptions};
