//! Image assembly: caption overlay, homogenization, collage collapse and
//! scratch persistence.
//!
//! Input is the flat frame sequence from the composer; output is the saved,
//! publish-ready artifact. Parallel compositions are homogenized before
//! captioning so stills from different aspect ratios line up.

use std::path::PathBuf;

use ab_glyph::{FontVec, PxScale};
use chrono::Utc;
use image::imageops::{FilterType, overlay};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{AssembledArtifact, CatalogItem, Frame, Request};

/// Caption glyph height relative to the image height.
const CAPTION_SCALE: f32 = 0.055;
/// Bottom margin relative to the image height.
const CAPTION_OFFSET: f32 = 0.067;
const CAPTION_WRAP_CHARS: usize = 42;
const STROKE_PX: i32 = 2;

pub(crate) struct Assembler<'a> {
    config: &'a Config,
    font: Option<FontVec>,
}

impl<'a> Assembler<'a> {
    /// A configured font that fails to load is a startup error; no font at
    /// all just disables captions (headless rigs, dry runs without assets).
    pub(crate) fn new(config: &'a Config) -> Result<Self> {
        let font = match &config.font_path {
            Some(path) => {
                let data = std::fs::read(path)?;
                let font = FontVec::try_from_vec(data).map_err(|_| {
                    Error::Io(std::io::Error::other(format!(
                        "invalid caption font: {}",
                        path.display()
                    )))
                })?;
                Some(font)
            }
            None => {
                tracing::warn!("no caption font configured, quotes will not be burned in");
                None
            }
        };
        Ok(Self { config, font })
    }

    /// Merge the resolved frames into the final ordered image list, collapse
    /// small sets into a collage, and persist everything to a fresh scratch
    /// directory.
    pub(crate) fn assemble(&self, request: &Request, frames: Vec<Frame>) -> Result<AssembledArtifact> {
        if frames.is_empty() {
            return Err(Error::NotFound("nothing resolved".to_string()));
        }
        let parallel = request.is_parallel();
        let (description, alt_title) = self.build_description(request, &frames, parallel);

        // Flatten to (raw image, caption) pairs, preserving frame order.
        let mut flat: Vec<(DynamicImage, Option<String>)> = Vec::new();
        for frame in frames {
            let caption = (!frame.is_minute).then(|| frame.discriminator.clone());
            for img in frame.images {
                flat.push((img, caption.clone()));
            }
        }

        // Parallel comparisons align raw images before any text lands.
        if parallel {
            let (images, captions): (Vec<_>, Vec<_>) = flat.into_iter().unzip();
            flat = homogenize(images).into_iter().zip(captions).collect();
        }

        let mut images: Vec<DynamicImage> = flat
            .into_iter()
            .map(|(img, caption)| match caption {
                Some(text) => self.draw_caption(img, &text),
                None => img,
            })
            .collect();

        if should_collage(images.len(), self.config.collage_threshold) {
            images = vec![collage(&images)];
        }

        let paths = self.persist(request, &images, &description)?;
        Ok(AssembledArtifact {
            paths,
            description,
            alt_title,
        })
    }

    fn build_description(
        &self,
        request: &Request,
        frames: &[Frame],
        parallel: bool,
    ) -> (String, Option<String>) {
        let (heading, alt_title) = if parallel {
            let items: Vec<&CatalogItem> = frames.iter().map(|f| &f.item).collect();
            let joined = items
                .iter()
                .map(|item| item.short_title())
                .collect::<Vec<_>>()
                .join(" | ");
            (format!("{joined}\nCategory: Parallel"), Some(joined))
        } else {
            let item = &frames[0].item;
            let mut heading = match item.year {
                Some(year) if !item.is_episode() => {
                    format!("{} ({year})", item.pretty_title())
                }
                _ => item.pretty_title(),
            };
            if let Some(director) = &item.director {
                heading.push_str(&format!("\nDirector: {director}"));
            }
            if let Some(category) = &item.category {
                heading.push_str(&format!("\nCategory: {category}"));
            }
            (heading, None)
        };

        let stamp = Utc::now().format("Automatically executed at %H:%M UTC");
        let description = format!(
            "{heading}\n\nRequested by {} ({} {})\n\n{stamp}\nThis bot is open source: {}",
            request.user,
            request.command.as_str(),
            request.comment,
            self.config.repo_url,
        );
        (description, alt_title)
    }

    /// Burn a quote into the lower third: white fill over a black stroke,
    /// centered, wrapped.
    fn draw_caption(&self, image: DynamicImage, text: &str) -> DynamicImage {
        let Some(font) = &self.font else {
            return image;
        };
        let mut canvas = image.to_rgba8();
        let (width, height) = canvas.dimensions();
        let scale = PxScale::from(height as f32 * CAPTION_SCALE);
        let line_height = (height as f32 * CAPTION_SCALE * 1.2) as i32;
        let lines = wrap_text(text, CAPTION_WRAP_CHARS);

        let bottom = (height as f32 * CAPTION_OFFSET) as i32;
        let mut y = height as i32 - bottom - line_height * lines.len() as i32;
        for line in &lines {
            let (text_width, _) = text_size(scale, font, line);
            let x = (width as i32 - text_width as i32) / 2;
            for dx in -STROKE_PX..=STROKE_PX {
                for dy in -STROKE_PX..=STROKE_PX {
                    if dx != 0 || dy != 0 {
                        draw_text_mut(
                            &mut canvas,
                            Rgba([0, 0, 0, 255]),
                            x + dx,
                            y + dy,
                            scale,
                            font,
                            line,
                        );
                    }
                }
            }
            draw_text_mut(&mut canvas, Rgba([255, 255, 255, 255]), x, y, scale, font, line);
            y += line_height;
        }
        DynamicImage::ImageRgba8(canvas)
    }

    /// Write the images and the audit description into a fresh time-stamped
    /// scratch directory, failing fast on anything absent or empty.
    fn persist(
        &self,
        request: &Request,
        images: &[DynamicImage],
        description: &str,
    ) -> Result<Vec<PathBuf>> {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let safe_id: String = request
            .id
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        let dir = self
            .config
            .scratch_dir
            .join(format!("kinobot_{stamp}_{safe_id}"));
        std::fs::create_dir_all(&dir)?;

        let mut paths = Vec::with_capacity(images.len());
        for (index, img) in images.iter().enumerate() {
            if img.width() == 0 || img.height() == 0 {
                return Err(Error::Io(std::io::Error::other(
                    "decoder produced an empty image",
                )));
            }
            let path = dir.join(format!("{index:02}.jpg"));
            img.to_rgb8().save(&path)?;
            if std::fs::metadata(&path)?.len() == 0 {
                return Err(Error::Io(std::io::Error::other(format!(
                    "zero-sized output: {}",
                    path.display()
                ))));
            }
            paths.push(path);
        }
        std::fs::write(dir.join("description.txt"), description)?;
        Ok(paths)
    }
}

/// Collage policy: strictly more than one image, fewer than the threshold.
pub(crate) fn should_collage(count: usize, threshold: usize) -> bool {
    count > 1 && count < threshold
}

/// Resize/pad every image onto a common canvas so side-by-side stills from
/// different sources align. Scale preserves aspect; padding is black.
pub(crate) fn homogenize(images: Vec<DynamicImage>) -> Vec<DynamicImage> {
    let max_w = images.iter().map(|i| i.width()).max().unwrap_or(1).max(1);
    let max_h = images.iter().map(|i| i.height()).max().unwrap_or(1).max(1);
    images
        .into_iter()
        .map(|img| {
            if img.width() == max_w && img.height() == max_h {
                return img;
            }
            let scaled = img.resize(max_w, max_h, FilterType::Lanczos3);
            let mut canvas = RgbaImage::from_pixel(max_w, max_h, Rgba([0, 0, 0, 255]));
            let x = ((max_w - scaled.width()) / 2) as i64;
            let y = ((max_h - scaled.height()) / 2) as i64;
            overlay(&mut canvas, &scaled.to_rgba8(), x, y);
            DynamicImage::ImageRgba8(canvas)
        })
        .collect()
}

/// Stack the images into one vertical grid at a common width.
pub(crate) fn collage(images: &[DynamicImage]) -> DynamicImage {
    let target_w = images.iter().map(|i| i.width()).min().unwrap_or(1).max(1);
    let scaled: Vec<RgbaImage> = images
        .iter()
        .map(|img| {
            let h = (img.height() as u64 * target_w as u64 / img.width().max(1) as u64) as u32;
            img.resize_exact(target_w, h.max(1), FilterType::Lanczos3).to_rgba8()
        })
        .collect();
    let total_h: u32 = scaled.iter().map(|i| i.height()).sum();
    let mut canvas = RgbaImage::from_pixel(target_w, total_h, Rgba([0, 0, 0, 255]));
    let mut y = 0i64;
    for img in &scaled {
        overlay(&mut canvas, img, 0, y);
        y += img.height() as i64;
    }
    DynamicImage::ImageRgba8(canvas)
}

pub(crate) fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
