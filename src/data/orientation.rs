use std::fmt;

pub const DEFAULT_TOLERANCE: f64 = 0.01;

const LANDSCAPE_RATIO: f64 = 16.0 / 9.0;
const PORTRAIT_RATIO: f64 = 9.0 / 16.0;

/// Aspect ratio bucket a video is stored under. Only used as the first segment of the object key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Landscape,
    Portrait,
    Other,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Landscape => "landscape",
            Orientation::Portrait => "portrait",
            Orientation::Other => "other",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify by comparing `width / height` against 16:9 and 9:16, inclusive of the tolerance.
pub fn classify(width: u32, height: u32, tolerance: f64) -> Orientation {
    let ratio = f64::from(width) / f64::from(height);

    if (ratio - LANDSCAPE_RATIO).abs() <= tolerance {
        Orientation::Landscape
    } else if (ratio - PORTRAIT_RATIO).abs() <= tolerance {
        Orientation::Portrait
    } else {
        Orientation::Other
    }
}
