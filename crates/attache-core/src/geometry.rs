//! Image geometry: dimension strings, shape predicates, and the scale/crop
//! calculator used to derive styles from an original.
//!
//! Geometry strings follow the ImageMagick convention:
//!
//! | Spec        | Meaning                                        |
//! |-------------|------------------------------------------------|
//! | `100x100#`  | fill 100x100 exactly, cropping the overflow     |
//! | `50x50>`    | shrink to fit inside 50x50, never enlarge       |
//! | `x200`      | scale to 200 pixels high                        |
//! | `150x`      | scale to 150 pixels wide                        |
//!
//! Prober output adds an EXIF orientation digit after a comma, e.g.
//! `800x600,6`.
//!
//! ## Example
//!
//! ```
//! use attache_core::geometry::Geometry;
//!
//! let source = Geometry::new(400.0, 300.0);
//! let target = Geometry::parse("100x100#").unwrap();
//! let plan = source.transform_to(&target, true).unwrap();
//!
//! assert_eq!(plan.scale, "x100");
//! assert_eq!(plan.crop.unwrap().to_string(), "100x100+16+0");
//! ```

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

static GEOMETRY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d*)x?(\d*)(?:,(\d?))?([><#@%^!])?$").expect("valid geometry pattern")
});

/// EXIF orientations that describe an image stored rotated by 90 or 270 degrees.
const ROTATED_ORIENTATIONS: [u8; 4] = [5, 6, 7, 8];

/// Trailing geometry flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modifier {
    /// `>`: only shrink images larger than the target
    OnlyShrinkLarger,
    /// `<`: only enlarge images smaller than the target
    OnlyEnlargeSmaller,
    /// `#`: fill the target and crop the overflow
    Crop,
    /// `@`: treat the dimensions as a pixel area
    Area,
    /// `%`: treat the dimensions as percentages
    Percent,
    /// `^`: fill the target as a minimum
    Fill,
    /// `!`: ignore the aspect ratio
    Exact,
}

impl Modifier {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '>' => Some(Self::OnlyShrinkLarger),
            '<' => Some(Self::OnlyEnlargeSmaller),
            '#' => Some(Self::Crop),
            '@' => Some(Self::Area),
            '%' => Some(Self::Percent),
            '^' => Some(Self::Fill),
            '!' => Some(Self::Exact),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::OnlyShrinkLarger => '>',
            Self::OnlyEnlargeSmaller => '<',
            Self::Crop => '#',
            Self::Area => '@',
            Self::Percent => '%',
            Self::Fill => '^',
            Self::Exact => '!',
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Width/height pair with an optional modifier and EXIF orientation.
///
/// Dimensions are never negative. The value is read-only after construction
/// except for a single [`Geometry::auto_orient`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    width: f64,
    height: f64,
    modifier: Option<Modifier>,
    orientation: Option<u8>,
    oriented: bool,
}

impl Geometry {
    /// Create a geometry from dimensions. Negative values are clamped to 0.
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width: width.max(0.0),
            height: height.max(0.0),
            modifier: None,
            orientation: None,
            oriented: false,
        }
    }

    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifier = Some(modifier);
        self
    }

    pub fn with_orientation(mut self, orientation: u8) -> Self {
        self.orientation = Some(orientation);
        self
    }

    /// Parse a `WxH` style string.
    ///
    /// Returns `None` when the string does not have the geometry shape or
    /// names neither a width nor a height.
    pub fn parse(spec: &str) -> Option<Self> {
        let caps = GEOMETRY_PATTERN.captures(spec.trim())?;

        let width = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let height = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if width.is_empty() && height.is_empty() {
            return None;
        }

        let mut geometry = Self::new(parse_dimension(width), parse_dimension(height));
        geometry.orientation = caps
            .get(3)
            .and_then(|m| m.as_str().parse::<u8>().ok());
        geometry.modifier = caps
            .get(4)
            .and_then(|m| m.as_str().chars().next())
            .and_then(Modifier::from_char);

        Some(geometry)
    }

    /// Build a geometry from image prober output (`"{w}x{h},{orientation}"`).
    pub fn from_probe(output: &str) -> Result<Self> {
        Self::parse(output).ok_or_else(|| {
            Error::NotIdentified(format!("unrecognized geometry {:?}", output.trim()))
        })
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn modifier(&self) -> Option<Modifier> {
        self.modifier
    }

    pub fn orientation(&self) -> Option<u8> {
        self.orientation
    }

    /// Whether [`Geometry::auto_orient`] has already been applied.
    pub fn is_oriented(&self) -> bool {
        self.oriented
    }

    /// Swap width and height for images stored rotated (EXIF 5–8) and map the
    /// orientation onto 1–4.
    ///
    /// Single-shot: the first call consumes the orientation, later calls are
    /// no-ops. Returns whether the dimensions were swapped.
    pub fn auto_orient(&mut self) -> bool {
        if self.oriented {
            return false;
        }
        self.oriented = true;

        match self.orientation {
            Some(o) if ROTATED_ORIENTATIONS.contains(&o) => {
                std::mem::swap(&mut self.width, &mut self.height);
                self.orientation = Some(o - 4);
                true
            }
            _ => false,
        }
    }

    pub fn is_square(&self) -> bool {
        self.height == self.width
    }

    pub fn is_horizontal(&self) -> bool {
        self.height < self.width
    }

    pub fn is_vertical(&self) -> bool {
        self.height > self.width
    }

    /// Width divided by height.
    pub fn aspect(&self) -> Result<f64> {
        if self.height <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "aspect ratio undefined for zero height geometry {}",
                self
            )));
        }
        Ok(self.width / self.height)
    }

    pub fn larger(&self) -> f64 {
        self.width.max(self.height)
    }

    pub fn smaller(&self) -> f64 {
        self.width.min(self.height)
    }

    /// Scale and crop operations that turn an image of this geometry into
    /// `target`.
    ///
    /// Without `crop` the image is fit inside the target (contain). With
    /// `crop` it is scaled until it covers the target on both axes and the
    /// overflow is cut away evenly on both sides (cover).
    pub fn transform_to(&self, target: &Geometry, crop: bool) -> Result<TransformPlan> {
        if !crop {
            return Ok(TransformPlan {
                scale: target.to_string(),
                crop: None,
            });
        }

        if target.width <= 0.0 || target.height <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "crop target needs both dimensions, got {:?}",
                target.to_string()
            )));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "cannot crop from empty source geometry {:?}",
                self.to_string()
            )));
        }

        let ratio = Geometry::new(target.width / self.width, target.height / self.height);

        let (scale, region) = if ratio.is_horizontal() || ratio.is_square() {
            let factor = ratio.width;
            (
                format!("{}x", target.width as u64),
                CropRegion::centered(target, 0.0, (self.height * factor - target.height) / 2.0),
            )
        } else {
            let factor = ratio.height;
            (
                format!("x{}", target.height as u64),
                CropRegion::centered(target, (self.width * factor - target.width) / 2.0, 0.0),
            )
        };

        Ok(TransformPlan {
            scale,
            crop: Some(region),
        })
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.width > 0.0 {
            write!(f, "{}", self.width as u64)?;
        }
        if self.height > 0.0 {
            write!(f, "x{}", self.height as u64)?;
        }
        if let Some(modifier) = self.modifier {
            write!(f, "{}", modifier)?;
        }
        Ok(())
    }
}

fn parse_dimension(digits: &str) -> f64 {
    digits.parse::<f64>().unwrap_or(0.0)
}

/// Region cut out of the scaled image, rendered as `WxH+X+Y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub width: u64,
    pub height: u64,
    pub x: u64,
    pub y: u64,
}

impl CropRegion {
    /// Offsets are truncated toward zero; float error below zero clamps to 0.
    fn centered(target: &Geometry, x: f64, y: f64) -> Self {
        Self {
            width: target.width as u64,
            height: target.height as u64,
            x: x.max(0.0) as u64,
            y: y.max(0.0) as u64,
        }
    }
}

impl fmt::Display for CropRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Scale geometry plus optional crop region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformPlan {
    pub scale: String,
    pub crop: Option<CropRegion>,
}
