use crate::foundation::error::{PixflowError, PixflowResult};

/// Integer pixel rectangle, `x`/`y` top-left corner, half-open extent.
///
/// A zero-area rectangle means "nothing to display" on the blit path and
/// "never rendered" on the invalidation path; it is not an error by itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The canonical "nothing here" rectangle.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero_area(self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    fn right(self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    fn bottom(self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }

    /// Smallest rectangle covering both inputs. Zero-area inputs are treated
    /// as empty and do not grow the result.
    pub fn union(self, other: Self) -> Self {
        if self.is_zero_area() {
            return other;
        }
        if other.is_zero_area() {
            return self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Self {
            x,
            y,
            width: (right - i64::from(x)) as u32,
            height: (bottom - i64::from(y)) as u32,
        }
    }

    /// Overlap of both inputs, [`Rect::zero`] when they are disjoint.
    pub fn intersect(self, other: Self) -> Self {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= i64::from(x) || bottom <= i64::from(y) {
            return Self::zero();
        }
        Self {
            x,
            y,
            width: (right - i64::from(x)) as u32,
            height: (bottom - i64::from(y)) as u32,
        }
    }
}

/// Pixel formats a blit can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    /// Straight (non-premultiplied) RGBA, 8 bits per channel.
    Rgba8,
    /// RGB composited over black, 8 bits per channel.
    Rgb8,
    /// Single luma channel from RGB composited over black.
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgb8 => 3,
            Self::Gray8 => 1,
        }
    }
}

/// Straight (non-premultiplied) RGBA8 color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const WHITE: Self = Self {
        r: 255,
        g: 255,
        b: 255,
        a: 255,
    };

    pub const TRANSPARENT: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    /// Parse `#rrggbb` or `#rrggbbaa` (leading `#` optional).
    pub fn from_hex(s: &str) -> PixflowResult<Self> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if !hex.is_ascii() {
            return Err(PixflowError::serde(format!("invalid color literal '{s}'")));
        }
        let parse = |i: usize| -> PixflowResult<u8> {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| PixflowError::serde(format!("invalid color literal '{s}'")))
        };
        match hex.len() {
            6 => Ok(Self {
                r: parse(0)?,
                g: parse(2)?,
                b: parse(4)?,
                a: 255,
            }),
            8 => Ok(Self {
                r: parse(0)?,
                g: parse(2)?,
                b: parse(4)?,
                a: parse(6)?,
            }),
            _ => Err(PixflowError::serde(format!("invalid color literal '{s}'"))),
        }
    }
}
