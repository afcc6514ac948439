//! Scaling rendered pages and uploaded images onto a fixed-size slide.

use std::path::Path;

use anyhow::{Context, anyhow};
use fast_image_resize as fir;
use image::{ImageFormat, ImageReader, Rgba, RgbaImage, imageops};
use tracing::debug;

use crate::config::{ImageFit, Resolution, Settings};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroomSpec {
    pub resolution: Resolution,
    pub fit: ImageFit,
    pub background: Rgba<u8>,
}

impl GroomSpec {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            resolution: settings.resolution,
            fit: settings.image_fit,
            background: settings.background,
        }
    }
}

/// Decodes `source`, fits it onto the slide canvas and writes a PNG to `dest`.
pub fn groom_file(source: &Path, dest: &Path, spec: &GroomSpec) -> Result<()> {
    let file = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.display().to_string());
    let groom_err = |err: anyhow::Error| Error::Groom {
        file: file.clone(),
        reason: format!("{err:#}"),
    };

    let decoded = ImageReader::open(source)
        .context("open")
        .and_then(|reader| reader.with_guessed_format().context("probe format"))
        .and_then(|reader| reader.decode().context("decode"))
        .map_err(groom_err)?;
    let slide = compose(&decoded.to_rgba8(), spec).map_err(groom_err)?;
    slide
        .save_with_format(dest, ImageFormat::Png)
        .context("write png")
        .map_err(groom_err)?;
    debug!(
        source = %source.display(),
        dest = %dest.display(),
        width = slide.width(),
        height = slide.height(),
        "slide written"
    );
    Ok(())
}

/// Places `source` on a background-filled canvas of the target resolution.
pub fn compose(source: &RgbaImage, spec: &GroomSpec) -> anyhow::Result<RgbaImage> {
    let Resolution { width, height } = spec.resolution;
    let mut canvas = RgbaImage::from_pixel(width, height, spec.background);
    let (w, h) = match spec.fit {
        ImageFit::Stretch => (width, height),
        ImageFit::Center => resize_to_contain(
            width,
            height,
            source.width(),
            source.height(),
            width.max(height),
        ),
    };
    let resized = resize_rgba(source, w, h)?;
    let (ox, oy) = center_offset(w, h, width, height);
    imageops::overlay(&mut canvas, &resized, ox as i64, oy as i64);
    Ok(canvas)
}

pub fn resize_to_contain(
    canvas_w: u32,
    canvas_h: u32,
    src_w: u32,
    src_h: u32,
    max_dim: u32,
) -> (u32, u32) {
    let iw = src_w.max(1) as f32;
    let ih = src_h.max(1) as f32;
    let cw = canvas_w.max(1) as f32;
    let ch = canvas_h.max(1) as f32;
    let scale = (cw / iw).min(ch / ih).max(0.0);
    let scale = if scale.is_finite() { scale } else { 1.0 };
    let w = (iw * scale).round().clamp(1.0, max_dim as f32);
    let h = (ih * scale).round().clamp(1.0, max_dim as f32);
    (w as u32, h as u32)
}

pub fn center_offset(inner_w: u32, inner_h: u32, outer_w: u32, outer_h: u32) -> (u32, u32) {
    let ox = outer_w.saturating_sub(inner_w) / 2;
    let oy = outer_h.saturating_sub(inner_h) / 2;
    (ox, oy)
}

fn resize_rgba(source: &RgbaImage, target_w: u32, target_h: u32) -> anyhow::Result<RgbaImage> {
    if target_w == 0 || target_h == 0 {
        anyhow::bail!("resize dimensions must be positive");
    }
    if source.width() == target_w && source.height() == target_h {
        return Ok(source.clone());
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .context("failed to create source view for slide resize")?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .context("slide resize failed")?;
    RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| anyhow!("failed to construct resized RGBA image"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn spec(fit: ImageFit) -> GroomSpec {
        GroomSpec {
            resolution: Resolution {
                width: 160,
                height: 90,
            },
            fit,
            background: BLACK,
        }
    }

    #[test]
    fn contain_preserves_aspect_ratio() {
        assert_eq!(resize_to_contain(1920, 1080, 1000, 1000, 1920), (1080, 1080));
        assert_eq!(resize_to_contain(1920, 1080, 3840, 1080, 3840), (1920, 540));
        assert_eq!(center_offset(1080, 1080, 1920, 1080), (420, 0));
    }

    #[test]
    fn center_letterboxes_on_background() {
        let square = RgbaImage::from_pixel(40, 40, RED);
        let slide = compose(&square, &spec(ImageFit::Center)).unwrap();
        assert_eq!(slide.dimensions(), (160, 90));
        assert_eq!(*slide.get_pixel(2, 45), BLACK);
        assert_eq!(*slide.get_pixel(80, 45), RED);
    }

    #[test]
    fn stretch_fills_the_frame() {
        let square = RgbaImage::from_pixel(40, 40, RED);
        let slide = compose(&square, &spec(ImageFit::Stretch)).unwrap();
        assert_eq!(*slide.get_pixel(0, 0), RED);
        assert_eq!(*slide.get_pixel(159, 89), RED);
    }

    #[test]
    fn transparency_shows_the_background() {
        let clear = RgbaImage::from_pixel(16, 9, Rgba([255, 255, 255, 0]));
        let mut spec = spec(ImageFit::Stretch);
        spec.background = Rgba([10, 20, 30, 255]);
        let slide = compose(&clear, &spec).unwrap();
        assert_eq!(*slide.get_pixel(50, 50), Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn undecodable_input_is_a_groom_error() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = tmp.path().join("broken.png");
        std::fs::write(&bogus, b"not an image").unwrap();
        let err = groom_file(&bogus, &tmp.path().join("out.png"), &spec(ImageFit::Center))
            .unwrap_err();
        assert!(matches!(err, Error::Groom { ref file, .. } if file == "broken.png"));
    }
}
