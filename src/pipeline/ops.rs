//! Builtin CPU image operations.
//!
//! Operations exchange straight (non-premultiplied) RGBA8 buffers, row-major,
//! `rect.width * rect.height * 4` bytes. Pixel loops are plain std code.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::foundation::core::{PixelFormat, Rect, Rgba8};
use crate::foundation::error::{PixflowError, PixflowResult};

/// The builtin operation behind a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    Solid,
    Passthrough,
    Invert,
    Opacity,
    Crop,
    Over,
}

impl OpKind {
    /// Every builtin, in registration order.
    pub const ALL: [OpKind; 6] = [
        OpKind::Solid,
        OpKind::Passthrough,
        OpKind::Invert,
        OpKind::Opacity,
        OpKind::Crop,
        OpKind::Over,
    ];

    /// Map a builtin component name to its operation.
    pub fn from_component(name: &str) -> Option<Self> {
        match name {
            "canvas/solid" => Some(Self::Solid),
            "filter/passthrough" => Some(Self::Passthrough),
            "filter/invert" => Some(Self::Invert),
            "filter/opacity" => Some(Self::Opacity),
            "filter/crop" => Some(Self::Crop),
            "comp/over" => Some(Self::Over),
            _ => None,
        }
    }
}

/// One computed output: the tight bounding rectangle of valid pixel data and
/// its straight-RGBA8 buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpOutput {
    pub rect: Rect,
    pub pixels: Vec<u8>,
}

impl OpOutput {
    fn solid(rect: Rect, color: Rgba8) -> Self {
        let mut pixels = Vec::with_capacity(rect.area() as usize * 4);
        for _ in 0..rect.area() {
            pixels.extend_from_slice(&[color.r, color.g, color.b, color.a]);
        }
        Self { rect, pixels }
    }

    /// Straight RGBA of the pixel at absolute coordinates, transparent
    /// outside the rectangle.
    fn pixel_at(&self, x: i64, y: i64) -> Rgba8 {
        let lx = x - i64::from(self.rect.x);
        let ly = y - i64::from(self.rect.y);
        if lx < 0 || ly < 0 || lx >= i64::from(self.rect.width) || ly >= i64::from(self.rect.height)
        {
            return Rgba8::TRANSPARENT;
        }
        let idx = (ly as usize * self.rect.width as usize + lx as usize) * 4;
        Rgba8 {
            r: self.pixels[idx],
            g: self.pixels[idx + 1],
            b: self.pixels[idx + 2],
            a: self.pixels[idx + 3],
        }
    }
}

fn literal_u32(literals: &BTreeMap<String, Value>, port: &str) -> Option<u32> {
    literals.get(port).and_then(|v| v.as_u64()).map(|v| v as u32)
}

fn literal_i32(literals: &BTreeMap<String, Value>, port: &str) -> Option<i32> {
    literals.get(port).and_then(|v| v.as_i64()).map(|v| v as i32)
}

fn literal_f64(literals: &BTreeMap<String, Value>, port: &str) -> Option<f64> {
    literals.get(port).and_then(|v| v.as_f64())
}

fn required_input<'a>(
    inputs: &'a BTreeMap<String, OpOutput>,
    port: &str,
) -> PixflowResult<&'a OpOutput> {
    inputs
        .get(port)
        .ok_or_else(|| PixflowError::render_failed(format!("required input '{port}' not connected")))
}

/// Execute one operation over already-computed upstream outputs.
pub fn execute(
    kind: OpKind,
    literals: &BTreeMap<String, Value>,
    inputs: &BTreeMap<String, OpOutput>,
) -> PixflowResult<OpOutput> {
    match kind {
        OpKind::Solid => {
            let width = literal_u32(literals, "width")
                .ok_or_else(|| PixflowError::render_failed("canvas/solid requires 'width'"))?;
            let height = literal_u32(literals, "height")
                .ok_or_else(|| PixflowError::render_failed("canvas/solid requires 'height'"))?;
            if width == 0 || height == 0 {
                return Err(PixflowError::render_failed(
                    "canvas/solid dimensions must be non-zero",
                ));
            }
            let color = match literals.get("color").and_then(|v| v.as_str()) {
                Some(s) => Rgba8::from_hex(s)
                    .map_err(|e| PixflowError::render_failed(e.to_string()))?,
                None => Rgba8::WHITE,
            };
            Ok(OpOutput::solid(Rect::new(0, 0, width, height), color))
        }

        OpKind::Passthrough => {
            let input = required_input(inputs, "input")?;
            Ok(input.clone())
        }

        OpKind::Invert => {
            let input = required_input(inputs, "input")?;
            let mut out = input.clone();
            for px in out.pixels.chunks_exact_mut(4) {
                px[0] = 255 - px[0];
                px[1] = 255 - px[1];
                px[2] = 255 - px[2];
            }
            Ok(out)
        }

        OpKind::Opacity => {
            let input = required_input(inputs, "input")?;
            let amount = literal_f64(literals, "amount").unwrap_or(1.0).clamp(0.0, 1.0);
            let mut out = input.clone();
            for px in out.pixels.chunks_exact_mut(4) {
                px[3] = (f64::from(px[3]) * amount).round() as u8;
            }
            Ok(out)
        }

        OpKind::Crop => {
            let input = required_input(inputs, "input")?;
            let window = Rect::new(
                literal_i32(literals, "x").unwrap_or(input.rect.x),
                literal_i32(literals, "y").unwrap_or(input.rect.y),
                literal_u32(literals, "width").unwrap_or(input.rect.width),
                literal_u32(literals, "height").unwrap_or(input.rect.height),
            );
            Ok(copy_region(input, input.rect.intersect(window)))
        }

        OpKind::Over => {
            let backdrop = required_input(inputs, "input")?;
            let fg = required_input(inputs, "aux")?;
            let rect = backdrop.rect.union(fg.rect);
            let mut pixels = Vec::with_capacity(rect.area() as usize * 4);
            for row in 0..rect.height {
                let y = i64::from(rect.y) + i64::from(row);
                for col in 0..rect.width {
                    let x = i64::from(rect.x) + i64::from(col);
                    let c = source_over(fg.pixel_at(x, y), backdrop.pixel_at(x, y));
                    pixels.extend_from_slice(&[c.r, c.g, c.b, c.a]);
                }
            }
            Ok(OpOutput { rect, pixels })
        }
    }
}

/// Straight-alpha source-over blend.
fn source_over(fg: Rgba8, bg: Rgba8) -> Rgba8 {
    let fa = f64::from(fg.a) / 255.0;
    let ba = f64::from(bg.a) / 255.0;
    let oa = fa + ba * (1.0 - fa);
    if oa <= 0.0 {
        return Rgba8::TRANSPARENT;
    }
    let blend = |f: u8, b: u8| -> u8 {
        let c = (f64::from(f) * fa + f64::from(b) * ba * (1.0 - fa)) / oa;
        c.round().clamp(0.0, 255.0) as u8
    };
    Rgba8 {
        r: blend(fg.r, bg.r),
        g: blend(fg.g, bg.g),
        b: blend(fg.b, bg.b),
        a: (oa * 255.0).round() as u8,
    }
}

/// Copy the `region` window (absolute coordinates, assumed inside or
/// clipped against `src.rect`) into a fresh output.
fn copy_region(src: &OpOutput, region: Rect) -> OpOutput {
    if region.is_zero_area() {
        return OpOutput {
            rect: Rect::zero(),
            pixels: Vec::new(),
        };
    }
    let mut pixels = Vec::with_capacity(region.area() as usize * 4);
    for row in 0..region.height {
        let y = i64::from(region.y) + i64::from(row);
        let lx = (region.x - src.rect.x) as usize;
        let ly = (y - i64::from(src.rect.y)) as usize;
        let start = (ly * src.rect.width as usize + lx) * 4;
        let end = start + region.width as usize * 4;
        pixels.extend_from_slice(&src.pixels[start..end]);
    }
    OpOutput {
        rect: region,
        pixels,
    }
}

/// Convert a computed output to the requested pixel format, restricted to
/// `roi` when given. Returns the effective rectangle and the buffer.
pub fn convert(
    out: &OpOutput,
    format: PixelFormat,
    roi: Option<Rect>,
) -> (Rect, Vec<u8>) {
    let window = match roi {
        Some(r) => out.rect.intersect(r),
        None => out.rect,
    };
    if window.is_zero_area() {
        return (Rect::zero(), Vec::new());
    }
    let clipped = copy_region(out, window);
    let buffer = match format {
        PixelFormat::Rgba8 => clipped.pixels,
        PixelFormat::Rgb8 => clipped
            .pixels
            .chunks_exact(4)
            .flat_map(|px| {
                let a = u16::from(px[3]);
                [
                    ((u16::from(px[0]) * a) / 255) as u8,
                    ((u16::from(px[1]) * a) / 255) as u8,
                    ((u16::from(px[2]) * a) / 255) as u8,
                ]
            })
            .collect(),
        PixelFormat::Gray8 => clipped
            .pixels
            .chunks_exact(4)
            .map(|px| {
                let a = u32::from(px[3]);
                let r = u32::from(px[0]) * a / 255;
                let g = u32::from(px[1]) * a / 255;
                let b = u32::from(px[2]) * a / 255;
                ((r * 299 + g * 587 + b * 114) / 1000) as u8
            })
            .collect(),
    };
    (window, buffer)
}
