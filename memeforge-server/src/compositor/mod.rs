//! Raster compositing for memes
//!
//! Thin layer over `image` and `imageproc`:
//! - scene composition (blurred, toned-down background + keyed character)
//! - caption burn-in (classic white text with black outline)
//!
//! Everything here is CPU-bound and synchronous; async callers go through
//! `tokio::task::spawn_blocking`.

pub mod text;

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::Caption;
use text::{fit_text, FittedText};

/// Fonts tried when no caption font is configured, Impact first
pub const SYSTEM_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/msttcorefonts/Impact.ttf",
    "/usr/share/fonts/truetype/msttcorefonts/impact.ttf",
    "/Library/Fonts/Impact.ttf",
    "/System/Library/Fonts/Supplemental/Impact.ttf",
    "C:\\Windows\\Fonts\\impact.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Bold.ttf",
];

const MIN_FONT_SIZE: f32 = 16.0;
const TEXT_WIDTH_RATIO: f32 = 0.92;
const TEXT_MARGIN_RATIO: f32 = 0.03;
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("Image encode failed: {0}")]
    Encode(String),

    #[error("Compositing task failed: {0}")]
    Task(String),
}

pub type CompositorResult<T> = Result<T, CompositorError>;

/// Scene composition parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SceneOptions {
    /// Output is a square of this size
    pub canvas_size: u32,
    /// Gaussian sigma applied to the background
    pub background_blur: f32,
    pub background_brightness: f32,
    pub background_saturation: f32,
    /// Character height as a fraction of canvas height
    pub character_height_ratio: f32,
    /// Pixels between the character's feet and the bottom edge
    pub bottom_margin: u32,
    /// RGB distance under which character pixels count as background
    pub key_tolerance: f32,
}

impl Default for SceneOptions {
    fn default() -> Self {
        Self {
            canvas_size: 1024,
            background_blur: 2.5,
            background_brightness: 0.85,
            background_saturation: 0.8,
            character_height_ratio: 0.72,
            bottom_margin: 0,
            key_tolerance: 40.0,
        }
    }
}

pub fn decode(bytes: &[u8]) -> CompositorResult<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| CompositorError::Decode(e.to_string()))
}

pub fn encode_png(img: &DynamicImage) -> CompositorResult<Vec<u8>> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| CompositorError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Resize to cover `width`×`height`, then center-crop
pub fn fit_canvas(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    img.resize_to_fill(width, height, FilterType::Lanczos3)
}

/// Scale brightness and saturation (1.0 leaves the channel unchanged)
pub fn modulate(img: &DynamicImage, brightness: f32, saturation: f32) -> DynamicImage {
    let mut rgba = img.to_rgba8();
    for pixel in rgba.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let (r, g, b) = (r as f32, g as f32, b as f32);
        let luma = 0.299 * r + 0.587 * g + 0.114 * b;
        let adjust = |c: f32| ((luma + (c - luma) * saturation) * brightness).clamp(0.0, 255.0) as u8;
        *pixel = Rgba([adjust(r), adjust(g), adjust(b), a]);
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Make the character's backdrop transparent
///
/// The backdrop colour is the average of the four corner pixels. Pixels
/// within `tolerance` of it become transparent; pixels up to twice the
/// tolerance fade in linearly to soften the edge.
pub fn key_out_background(img: &DynamicImage, tolerance: f32) -> RgbaImage {
    let mut rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    if w == 0 || h == 0 {
        return rgba;
    }

    let corners = [(0, 0), (w - 1, 0), (0, h - 1), (w - 1, h - 1)];
    let mut sum = [0f32; 3];
    for (x, y) in corners {
        let p = rgba.get_pixel(x, y).0;
        for i in 0..3 {
            sum[i] += p[i] as f32;
        }
    }
    let key = sum.map(|s| s / corners.len() as f32);
    let tolerance = tolerance.max(1.0);

    for pixel in rgba.pixels_mut() {
        let d = (0..3)
            .map(|i| (pixel.0[i] as f32 - key[i]).powi(2))
            .sum::<f32>()
            .sqrt();
        let alpha = if d <= tolerance {
            0.0
        } else if d < tolerance * 2.0 {
            (d - tolerance) / tolerance
        } else {
            1.0
        };
        pixel.0[3] = (pixel.0[3] as f32 * alpha) as u8;
    }
    rgba
}

/// Crop to the bounding box of pixels with visible alpha
fn trim_transparent(img: &RgbaImage) -> Option<RgbaImage> {
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0, 0);
    for (x, y, p) in img.enumerate_pixels() {
        if p.0[3] > 16 {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }
    if min_x > max_x || min_y > max_y {
        return None;
    }
    Some(imageops::crop_imm(img, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1).to_image())
}

/// Load a caption font from `path`, falling back to common system fonts
pub fn load_font(path: Option<&Path>) -> Option<FontArc> {
    let candidates: Vec<PathBuf> = path
        .map(|p| vec![p.to_path_buf()])
        .unwrap_or_default()
        .into_iter()
        .chain(SYSTEM_FONT_PATHS.iter().map(PathBuf::from))
        .collect();

    for candidate in candidates {
        let Ok(bytes) = std::fs::read(&candidate) else {
            continue;
        };
        match FontArc::try_from_vec(bytes) {
            Ok(font) => {
                tracing::info!(path = %candidate.display(), "Caption font loaded");
                return Some(font);
            }
            Err(e) => {
                tracing::warn!(path = %candidate.display(), error = %e, "Unusable font file");
            }
        }
    }

    tracing::warn!("No caption font found; captions will not be rendered onto images");
    None
}

/// Rendered width of `text` at `size` px
fn text_width(font: &FontArc, text: &str, size: f32) -> f32 {
    let scaled = font.as_scaled(PxScale::from(size));
    let mut width = 0.0;
    let mut previous = None;
    for c in text.chars() {
        let id = scaled.glyph_id(c);
        if let Some(prev) = previous {
            width += scaled.kern(prev, id);
        }
        width += scaled.h_advance(id);
        previous = Some(id);
    }
    width
}

fn line_height(font: &FontArc, size: f32) -> f32 {
    let scaled = font.as_scaled(PxScale::from(size));
    scaled.height() + scaled.line_gap()
}

/// Scene compositor and caption renderer
#[derive(Clone)]
pub struct Compositor {
    font: Option<FontArc>,
    options: SceneOptions,
}

impl Compositor {
    pub fn new(font: Option<FontArc>) -> Self {
        Self {
            font,
            options: SceneOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SceneOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SceneOptions {
        &self.options
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Background + character on a square canvas
    pub fn compose_scene(&self, background: &DynamicImage, character: &DynamicImage) -> RgbaImage {
        let opts = &self.options;
        let size = opts.canvas_size;

        let fitted = fit_canvas(background, size, size);
        let blurred = if opts.background_blur > 0.0 {
            fitted.blur(opts.background_blur)
        } else {
            fitted
        };
        let mut canvas = modulate(
            &blurred,
            opts.background_brightness,
            opts.background_saturation,
        )
        .to_rgba8();

        let keyed = key_out_background(character, opts.key_tolerance);
        let subject = match trim_transparent(&keyed) {
            Some(subject) => subject,
            None => {
                tracing::warn!("Character keyed out completely; using background only");
                return canvas;
            }
        };

        let target_h = ((size as f32 * opts.character_height_ratio) as u32).max(1);
        let scale = target_h as f32 / subject.height() as f32;
        let mut target_w = ((subject.width() as f32 * scale) as u32).max(1);
        let mut target_h = target_h;
        if target_w > size {
            // wide subjects are bounded by the canvas width instead
            target_h = ((target_h as f32 * size as f32 / target_w as f32) as u32).max(1);
            target_w = size;
        }

        let resized = imageops::resize(&subject, target_w, target_h, FilterType::Lanczos3);
        let x = (size - target_w) / 2;
        let y = size.saturating_sub(target_h + opts.bottom_margin);
        imageops::overlay(&mut canvas, &resized, x as i64, y as i64);

        canvas
    }

    /// Draw top and bottom caption text
    ///
    /// Without a font the image is returned unchanged.
    pub fn burn_caption(&self, img: &DynamicImage, caption: &Caption) -> RgbaImage {
        let mut canvas = img.to_rgba8();
        let Some(font) = &self.font else {
            tracing::warn!("Caption font unavailable, skipping caption burn-in");
            return canvas;
        };

        let (w, h) = canvas.dimensions();
        let margin = (h as f32 * TEXT_MARGIN_RATIO).round();

        if let Some(top) = self.fit_caption(font, &caption.top_text, w, h) {
            self.draw_block(&mut canvas, font, &top, margin);
        }
        if let Some(bottom) = self.fit_caption(font, &caption.bottom_text, w, h) {
            let y = h as f32 - margin - bottom.block_height();
            self.draw_block(&mut canvas, font, &bottom, y.max(0.0));
        }

        canvas
    }

    fn fit_caption(&self, font: &FontArc, text: &str, w: u32, h: u32) -> Option<FittedText> {
        let upper = text.to_uppercase();
        let max_size = (h as f32 / 8.0).max(MIN_FONT_SIZE);
        fit_text(
            &upper,
            w as f32 * TEXT_WIDTH_RATIO,
            h as f32 / 4.0,
            max_size,
            MIN_FONT_SIZE,
            |s, size| text_width(font, s, size),
            |size| line_height(font, size),
        )
    }

    fn draw_block(&self, canvas: &mut RgbaImage, font: &FontArc, block: &FittedText, top: f32) {
        let scale = PxScale::from(block.size);
        let outline = (block.size / 18.0).round().max(1.0) as i32;
        let mut offsets = Vec::new();
        for r in [outline, outline / 2] {
            if r == 0 {
                continue;
            }
            for (dx, dy) in [(-1, -1), (0, -1), (1, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1)] {
                offsets.push((dx * r, dy * r));
            }
        }

        let width = canvas.width() as f32;
        for (i, line) in block.lines.iter().enumerate() {
            let line_w = text_width(font, line, block.size);
            let x = ((width - line_w) / 2.0).max(0.0).round() as i32;
            let y = (top + i as f32 * block.line_height).round() as i32;

            for (dx, dy) in &offsets {
                imageproc::drawing::draw_text_mut(&mut *canvas, BLACK, x + dx, y + dy, scale, font, line);
            }
            imageproc::drawing::draw_text_mut(&mut *canvas, WHITE, x, y, scale, font, line);
        }
    }

    /// Decode, compose and encode; used from `spawn_blocking`
    pub fn compose_scene_png(&self, background: &[u8], character: &[u8]) -> CompositorResult<Vec<u8>> {
        let background = decode(background)?;
        let character = decode(character)?;
        let scene = self.compose_scene(&background, &character);
        encode_png(&DynamicImage::ImageRgba8(scene))
    }

    /// Decode, caption and encode; returns the PNG and its dimensions
    pub fn burn_caption_png(
        &self,
        image: &[u8],
        caption: &Caption,
    ) -> CompositorResult<(Vec<u8>, u32, u32)> {
        let img = decode(image)?;
        let captioned = self.burn_caption(&img, caption);
        let (w, h) = captioned.dimensions();
        Ok((encode_png(&DynamicImage::ImageRgba8(captioned))?, w, h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([rgb[0], rgb[1], rgb[2], 255])))
    }

    /// White backdrop with a red block in the middle
    fn character() -> DynamicImage {
        let mut img = RgbaImage::from_pixel(200, 300, WHITE);
        for y in 50..250 {
            for x in 60..140 {
                img.put_pixel(x, y, Rgba([200, 20, 20, 255]));
            }
        }
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn test_png_roundtrip_keeps_dimensions() {
        let bytes = encode_png(&solid(30, 20, [1, 2, 3])).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (30, 20));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(decode(b"not an image"), Err(CompositorError::Decode(_))));
    }

    #[test]
    fn test_fit_canvas_fills_target() {
        let out = fit_canvas(&solid(300, 100, [0, 0, 0]), 64, 64);
        assert_eq!((out.width(), out.height()), (64, 64));
    }

    #[test]
    fn test_modulate_desaturates_and_darkens() {
        let out = modulate(&solid(2, 2, [200, 50, 50]), 0.5, 0.0).to_rgba8();
        let p = out.get_pixel(0, 0).0;
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
        assert!(p[0] < 100);
        assert_eq!(p[3], 255);
    }

    #[test]
    fn test_key_out_background() {
        let keyed = key_out_background(&character(), 40.0);
        assert_eq!(keyed.get_pixel(0, 0).0[3], 0);
        assert_eq!(keyed.get_pixel(199, 299).0[3], 0);
        assert_eq!(keyed.get_pixel(100, 150).0[3], 255);
    }

    #[test]
    fn test_trim_transparent() {
        let keyed = key_out_background(&character(), 40.0);
        let trimmed = trim_transparent(&keyed).unwrap();
        assert_eq!(trimmed.dimensions(), (80, 200));

        let empty = key_out_background(&solid(10, 10, [255, 255, 255]), 40.0);
        assert!(trim_transparent(&empty).is_none());
    }

    #[test]
    fn test_compose_scene_places_character_bottom_center() {
        let compositor = Compositor::new(None).with_options(SceneOptions {
            canvas_size: 256,
            background_blur: 0.0,
            ..SceneOptions::default()
        });
        let scene = compositor.compose_scene(&solid(512, 300, [20, 120, 220]), &character());

        assert_eq!(scene.dimensions(), (256, 256));
        // character covers the bottom centre
        let center_bottom = scene.get_pixel(128, 250).0;
        assert!(center_bottom[0] > 150 && center_bottom[2] < 80, "{:?}", center_bottom);
        // top corner stays background (blue-ish)
        let corner = scene.get_pixel(2, 2).0;
        assert!(corner[2] > corner[0]);
    }

    #[test]
    fn test_burn_caption_without_font_is_noop() {
        let compositor = Compositor::new(None);
        let img = solid(100, 100, [10, 10, 10]);
        let out = compositor.burn_caption(&img, &Caption::new("TOP", "BOTTOM"));
        assert_eq!(out, img.to_rgba8());
    }

    const FIXTURE_FONT: &str = concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/DejaVuSans-Bold.ttf"
    );

    #[test]
    fn test_burn_caption_draws_with_font() {
        let font = load_font(Some(Path::new(FIXTURE_FONT))).expect("fixture font loads");
        let compositor = Compositor::new(Some(font));
        let img = solid(400, 400, [40, 40, 40]);
        let out = compositor.burn_caption(&img, &Caption::new("HELLO", "WORLD"));

        let top_band_changed = (0..400)
            .flat_map(|x| (0..100).map(move |y| (x, y)))
            .any(|(x, y)| out.get_pixel(x, y).0[0] > 200);
        assert!(top_band_changed);
        // middle of the image is untouched
        assert_eq!(out.get_pixel(200, 200), img.to_rgba8().get_pixel(200, 200));
    }
}
