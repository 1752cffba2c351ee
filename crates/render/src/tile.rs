use std::fmt;
use std::str::FromStr;

use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Ghost margin used when none is configured, in pixels.
pub const DEFAULT_GHOST_MARGIN: u32 = 16;

/// Errors from tile addressing and cropping.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TileError {
    #[error("malformed tile axis {0:?}, expected \"<index>of<count>\"")]
    Malformed(String),
    #[error("tile index {index} out of range for {count} tiles")]
    OutOfRange { index: u32, count: u32 },
    #[error("empty tile {width}x{height}")]
    EmptyTile { width: u32, height: u32 },
    #[error("tile {width}x{height} with ghost margin {ghost} exceeds the frame size limit")]
    TooLarge { width: u32, height: u32, ghost: u32 },
    #[error("frame of {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
}

/// Position of a tile along one axis, written `"<index>of<count>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileAxis {
    pub index: u32,
    pub count: u32,
}

impl TileAxis {
    pub const WHOLE: TileAxis = TileAxis { index: 0, count: 1 };

    pub fn new(index: u32, count: u32) -> Result<Self, TileError> {
        if index >= count {
            return Err(TileError::OutOfRange { index, count });
        }
        Ok(Self { index, count })
    }

    /// `[index / count, (index + 1) / count)`.
    pub fn span(&self) -> (f64, f64) {
        let count = f64::from(self.count);
        (
            f64::from(self.index) / count,
            f64::from(self.index + 1) / count,
        )
    }
}

impl FromStr for TileAxis {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TileError::Malformed(s.to_owned());
        let (index, count) = s.trim().split_once("of").ok_or_else(malformed)?;
        let index = index.trim().parse().map_err(|_| malformed())?;
        let count = count.trim().parse().map_err(|_| malformed())?;
        Self::new(index, count)
    }
}

impl TryFrom<String> for TileAxis {
    type Error = TileError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TileAxis> for String {
    fn from(axis: TileAxis) -> String {
        axis.to_string()
    }
}

impl fmt::Display for TileAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}of{}", self.index, self.count)
    }
}

/// Which tile of a `rows x cols` grid to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileAddress {
    pub row: TileAxis,
    pub col: TileAxis,
}

impl TileAddress {
    /// The whole image as a single tile.
    pub const FULL: TileAddress = TileAddress {
        row: TileAxis::WHOLE,
        col: TileAxis::WHOLE,
    };

    pub fn new(row: u32, row_count: u32, col: u32, col_count: u32) -> Result<Self, TileError> {
        Ok(Self {
            row: TileAxis::new(row, row_count)?,
            col: TileAxis::new(col, col_count)?,
        })
    }

    /// Parse the `(row, col)` wire pair, e.g. `("0of2", "1of2")`.
    pub fn parse(row: &str, col: &str) -> Result<Self, TileError> {
        Ok(Self {
            row: row.parse()?,
            col: col.parse()?,
        })
    }

    /// Both axes re-checked; deserialization already enforces this.
    pub fn validate(&self) -> Result<(), TileError> {
        TileAxis::new(self.row.index, self.row.count)?;
        TileAxis::new(self.col.index, self.col.count)?;
        Ok(())
    }

    /// Normalized image window covered by this tile.
    pub fn window(&self) -> ImageWindow {
        let (x0, x1) = self.col.span();
        let (y0, y1) = self.row.span();
        ImageWindow {
            start: DVec2::new(x0, y0),
            end: DVec2::new(x1, y1),
        }
    }

    /// Every tile of a grid, row-major.
    pub fn grid(rows: u32, cols: u32) -> impl Iterator<Item = TileAddress> {
        (0..rows).flat_map(move |row| {
            (0..cols).map(move |col| TileAddress {
                row: TileAxis { index: row, count: rows },
                col: TileAxis { index: col, count: cols },
            })
        })
    }
}

/// Region of the normalized image plane, `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageWindow {
    pub start: DVec2,
    pub end: DVec2,
}

impl ImageWindow {
    pub const FULL: ImageWindow = ImageWindow {
        start: DVec2::ZERO,
        end: DVec2::ONE,
    };

    pub fn size(&self) -> DVec2 {
        self.end - self.start
    }

    /// Grow by `ghost` pixels on every side, for a tile of `width x height` pixels.
    pub fn padded(&self, width: u32, height: u32, ghost: u32) -> ImageWindow {
        let delta = self.size() / DVec2::new(f64::from(width), f64::from(height));
        let margin = delta * f64::from(ghost);
        ImageWindow {
            start: self.start - margin,
            end: self.end + margin,
        }
    }
}

/// Everything needed to render one tile and cut it back to size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePlan {
    pub tile: TileAddress,
    pub width: u32,
    pub height: u32,
    pub ghost: u32,
    /// Window of the requested pixels.
    pub window: ImageWindow,
    /// Window the camera renders, including the ghost margin.
    pub padded: ImageWindow,
    frame_width: u32,
    frame_height: u32,
}

impl TilePlan {
    pub fn frame_width(&self) -> u32 {
        self.frame_width
    }

    pub fn frame_height(&self) -> u32 {
        self.frame_height
    }

    /// Top-left of the kept region inside the padded frame.
    pub fn crop_offset(&self) -> (u32, u32) {
        (self.ghost, self.ghost)
    }

    /// Cut the ghost margin off a padded RGBA frame.
    pub fn crop(&self, frame: &[u8]) -> Result<Vec<u8>, TileError> {
        let frame_width = self.frame_width() as usize;
        let expected = frame_width * self.frame_height() as usize * 4;
        if frame.len() != expected {
            return Err(TileError::FrameSize {
                expected,
                actual: frame.len(),
            });
        }
        let (width, height, ghost) = (self.width as usize, self.height as usize, self.ghost as usize);
        let row_bytes = width * 4;
        let mut out = Vec::with_capacity(row_bytes * height);
        for row in ghost..ghost + height {
            let begin = (row * frame_width + ghost) * 4;
            out.extend_from_slice(&frame[begin..begin + row_bytes]);
        }
        Ok(out)
    }
}

/// Computes padded tile windows with one system-wide ghost margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRenderer {
    ghost: u32,
}

impl Default for TileRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_GHOST_MARGIN)
    }
}

impl TileRenderer {
    pub fn new(ghost: u32) -> Self {
        Self { ghost }
    }

    pub fn ghost(&self) -> u32 {
        self.ghost
    }

    /// Plan a `width x height` render of `tile`. Fails before any engine work
    /// on an empty size or an invalid address.
    pub fn plan(&self, tile: TileAddress, width: u32, height: u32) -> Result<TilePlan, TileError> {
        if width == 0 || height == 0 {
            return Err(TileError::EmptyTile { width, height });
        }
        tile.validate()?;
        let too_large = TileError::TooLarge {
            width,
            height,
            ghost: self.ghost,
        };
        let margin = self.ghost.checked_mul(2).ok_or(too_large.clone())?;
        let frame_width = width.checked_add(margin).ok_or(too_large.clone())?;
        let frame_height = height.checked_add(margin).ok_or(too_large)?;
        let window = tile.window();
        Ok(TilePlan {
            tile,
            width,
            height,
            ghost: self.ghost,
            window,
            padded: window.padded(width, height, self.ghost),
            frame_width,
            frame_height,
        })
    }
}
