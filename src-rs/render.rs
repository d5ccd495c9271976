use std::io::Cursor;

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba, RgbaImage};

use crate::scene::{ExportFormat, NodeKind, Paint};

/// One node of a subtree being painted, positions relative to its parent.
#[derive(Debug, Clone)]
pub struct PaintNode {
    pub kind: NodeKind,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub fills: Vec<Paint>,
    pub characters: Option<String>,
    pub children: Vec<PaintNode>,
}

const IMAGE_FILL_LIGHT: Rgba<u8> = Rgba([205, 205, 205, 255]);
const IMAGE_FILL_DARK: Rgba<u8> = Rgba([150, 150, 150, 255]);
const OTHER_FILL: Rgba<u8> = Rgba([128, 128, 128, 255]);
const TEXT_DEFAULT: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Paints `root` into a raster the size of the root, or `None` when it has no area.
pub fn paint_subtree(root: &PaintNode) -> Option<RgbaImage> {
    let w = root.width.round();
    let h = root.height.round();
    if !(w >= 1.0 && h >= 1.0) {
        return None;
    }
    let mut img: RgbaImage = ImageBuffer::from_pixel(w as u32, h as u32, Rgba([0, 0, 0, 0]));
    paint_node(&mut img, root, 0.0, 0.0);
    Some(img)
}

fn paint_node(img: &mut RgbaImage, node: &PaintNode, origin_x: f64, origin_y: f64) {
    let x0 = origin_x.round() as i32;
    let y0 = origin_y.round() as i32;
    let x1 = (origin_x + node.width).round() as i32;
    let y1 = (origin_y + node.height).round() as i32;

    if node.kind == NodeKind::Text {
        let color = node
            .fills
            .iter()
            .find_map(|paint| match paint {
                Paint::Solid { color } => parse_hex_color(color),
                _ => None,
            })
            .unwrap_or(TEXT_DEFAULT);
        if let Some(text) = node.characters.as_deref() {
            let scale = ((node.height / 8.0).floor() as u32).clamp(1, 4);
            draw_bitmap_text(img, x0, y0, text, color, scale);
        }
    } else {
        for paint in &node.fills {
            match paint {
                Paint::Solid { color } => {
                    let color = parse_hex_color(color).unwrap_or(OTHER_FILL);
                    fill_rect(img, x0, y0, x1, y1, color);
                }
                Paint::Image { .. } => fill_checker(img, x0, y0, x1, y1),
                Paint::Other => fill_rect(img, x0, y0, x1, y1, OTHER_FILL),
            }
        }
    }

    for child in &node.children {
        paint_node(img, child, origin_x + child.x, origin_y + child.y);
    }
}

/// Encodes the raster. JPEG has no alpha, so it is flattened onto white first.
pub fn encode(img: &RgbaImage, format: ExportFormat) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Cursor::new(Vec::new());
    match format {
        ExportFormat::Jpg => {
            let mut flat: RgbaImage =
                ImageBuffer::from_pixel(img.width(), img.height(), Rgba([255, 255, 255, 255]));
            for (x, y, px) in img.enumerate_pixels() {
                let dst = *flat.get_pixel(x, y);
                flat.put_pixel(x, y, blend_pixel(dst, *px));
            }
            DynamicImage::ImageRgba8(flat)
                .to_rgb8()
                .write_to(&mut out, ImageFormat::Jpeg)?;
        }
        ExportFormat::Png => {
            img.write_to(&mut out, ImageFormat::Png)?;
        }
    }
    Ok(out.into_inner())
}

pub fn parse_hex_color(raw: &str) -> Option<Rgba<u8>> {
    let hex = raw.trim().strip_prefix('#')?;
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, 255])),
        8 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, channel(6)?])),
        _ => None,
    }
}

fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return dst;
    }
    let inv = 1.0 - a;
    let mix = |d: u8, s: u8| {
        (f64::from(d) * inv + f64::from(s) * a)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    let out_a = (f64::from(dst[3]) * inv + f64::from(src[3]))
        .round()
        .clamp(0.0, 255.0) as u8;
    Rgba([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2]), out_a])
}

/// Half-open pixel range clipped to the raster.
fn clip(img: &RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32) -> Option<(u32, u32, u32, u32)> {
    let max_x = img.width() as i32;
    let max_y = img.height() as i32;
    let (lx, hx) = (x0.min(x1).clamp(0, max_x), x0.max(x1).clamp(0, max_x));
    let (ly, hy) = (y0.min(y1).clamp(0, max_y), y0.max(y1).clamp(0, max_y));
    if lx == hx || ly == hy {
        return None;
    }
    Some((lx as u32, ly as u32, hx as u32, hy as u32))
}

fn fill_rect(img: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgba<u8>) {
    let Some((lx, ly, hx, hy)) = clip(img, x0, y0, x1, y1) else {
        return;
    };
    for y in ly..hy {
        for x in lx..hx {
            let dst = *img.get_pixel(x, y);
            img.put_pixel(x, y, blend_pixel(dst, color));
        }
    }
}

fn fill_checker(img: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32) {
    let Some((lx, ly, hx, hy)) = clip(img, x0, y0, x1, y1) else {
        return;
    };
    for y in ly..hy {
        for x in lx..hx {
            let light = ((x as i32 - x0) / 8 + (y as i32 - y0) / 8) % 2 == 0;
            img.put_pixel(x, y, if light { IMAGE_FILL_LIGHT } else { IMAGE_FILL_DARK });
        }
    }
}

fn draw_bitmap_text(img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>, scale: u32) {
    let scale_i = scale.max(1) as i32;
    let mut cursor_x = x;
    let mut cursor_y = y;
    for ch in text.chars() {
        if ch == '\n' {
            cursor_x = x;
            cursor_y += 8 * scale_i;
            continue;
        }
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            cursor_x += 8 * scale_i;
            continue;
        };
        for (row_idx, row) in glyph.iter().enumerate() {
            for col_idx in 0..8 {
                if (*row >> col_idx) & 1 == 0 {
                    continue;
                }
                let px = cursor_x + col_idx * scale_i;
                let py = cursor_y + row_idx as i32 * scale_i;
                fill_rect(img, px, py, px + scale_i, py + scale_i, color);
            }
        }
        cursor_x += 8 * scale_i;
    }
}
