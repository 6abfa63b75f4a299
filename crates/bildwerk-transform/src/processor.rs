// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor: fit-inside resize, crop, and gaussian blur on an
// in-memory image, built on the `image` crate.

use std::path::Path;

use image::{DynamicImage, ImageFormat};
use tracing::{debug, info, instrument};

use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::CropArea;

/// Processing pipeline operating on a single in-memory image.
///
/// Each transformation consumes `self` and returns the transformed
/// processor, so calls chain:
///
/// ```ignore
/// ImageProcessor::open("cat.jpg")?
///     .resize_within(1800, 1800)
///     .blur(4.0)
///     .save("cat.jpg")?;
/// ```
pub struct ImageProcessor {
    image: DynamicImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Load an image from a file path.
    ///
    /// Reading and decoding are reported separately: a read failure is an
    /// `Io` error, undecodable content is an `Image` error.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let processor = Self::from_bytes(&data)?;
        info!(
            width = processor.width(),
            height = processor.height(),
            "image loaded"
        );
        Ok(processor)
    }

    /// Decode raw encoded bytes (JPEG, PNG, etc.).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(data)
            .map_err(|err| BildwerkError::Image(format!("failed to decode image: {err}")))?;
        Ok(Self { image })
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    // -- Transformations ------------------------------------------------------

    /// Shrink the image to fit within `max_width` x `max_height`, preserving
    /// aspect ratio.  Images already inside the bounds are left untouched.
    #[instrument(skip(self))]
    pub fn resize_within(self, max_width: u32, max_height: u32) -> Self {
        if self.image.width() <= max_width && self.image.height() <= max_height {
            debug!("already within bounds");
            return self;
        }
        let resized = self
            .image
            .resize(max_width, max_height, image::imageops::FilterType::Lanczos3);
        debug!(
            new_w = resized.width(),
            new_h = resized.height(),
            "resize complete"
        );
        Self { image: resized }
    }

    /// Extract `area`, clamped to the image bounds.
    #[instrument(skip(self))]
    pub fn crop(self, area: CropArea) -> Self {
        let img_w = self.image.width();
        let img_h = self.image.height();

        let x = area.left.min(img_w);
        let y = area.top.min(img_h);
        let w = area.width.min(img_w - x);
        let h = area.height.min(img_h - y);

        let cropped = self.image.crop_imm(x, y, w, h);
        Self { image: cropped }
    }

    /// Gaussian blur with standard deviation `sigma`.
    #[instrument(skip(self))]
    pub fn blur(self, sigma: f32) -> Self {
        Self {
            image: self.image.blur(sigma),
        }
    }

    // -- Output ---------------------------------------------------------------

    /// Encode in the given format.
    pub fn encode(&self, format: ImageFormat) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        // JPEG has no alpha channel.
        let image = if format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(self.image.to_rgb8())
        } else {
            self.image.clone()
        };
        image
            .write_to(&mut cursor, format)
            .map_err(|err| BildwerkError::Image(format!("image encoding failed: {err}")))?;
        Ok(buffer)
    }

    /// Write the image to `path`, in the format its extension names.
    ///
    /// The bytes go to a sibling temporary file that is then renamed over
    /// `path`, so readers see either the old image or the new one.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let format = ImageFormat::from_path(path).map_err(|err| {
            BildwerkError::Image(format!("no image format for {}: {err}", path.display()))
        })?;
        let bytes = self.encode(format)?;

        let Some(name) = path.file_name() else {
            return Err(BildwerkError::Validation(format!(
                "no file name in {}",
                path.display()
            )));
        };
        let mut partial = std::ffi::OsString::from(".");
        partial.push(name);
        partial.push(".partial");
        let partial = path.with_file_name(partial);

        std::fs::write(&partial, bytes)?;
        if let Err(err) = std::fs::rename(&partial, path) {
            let _ = std::fs::remove_file(&partial);
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    fn checkerboard(width: u32, height: u32) -> ImageProcessor {
        let img = RgbImage::from_fn(width, height, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        ImageProcessor::from_dynamic(DynamicImage::ImageRgb8(img))
    }

    #[test]
    fn resize_fits_inside_preserving_aspect() {
        let resized = checkerboard(400, 200).resize_within(100, 100);
        assert_eq!((resized.width(), resized.height()), (100, 50));
    }

    #[test]
    fn small_images_are_not_enlarged() {
        let resized = checkerboard(40, 20).resize_within(100, 100);
        assert_eq!((resized.width(), resized.height()), (40, 20));
    }

    #[test]
    fn crop_extracts_area() {
        let area = CropArea {
            left: 10,
            top: 5,
            width: 30,
            height: 20,
        };
        let cropped = checkerboard(100, 50).crop(area);
        assert_eq!((cropped.width(), cropped.height()), (30, 20));
    }

    #[test]
    fn crop_is_clamped_to_bounds() {
        let area = CropArea {
            left: 90,
            top: 40,
            width: 50,
            height: 50,
        };
        let cropped = checkerboard(100, 50).crop(area);
        assert_eq!((cropped.width(), cropped.height()), (10, 10));
    }

    #[test]
    fn blur_smooths_edges() {
        let before = checkerboard(32, 32);
        let original = before.into_dynamic().to_rgb8();
        let blurred = ImageProcessor::from_dynamic(DynamicImage::ImageRgb8(original.clone()))
            .blur(3.0)
            .into_dynamic()
            .to_rgb8();
        assert_eq!(blurred.dimensions(), original.dimensions());
        let Rgb([r, _, _]) = *blurred.get_pixel(4, 4);
        assert!(r > 0 && r < 255, "edge pixel still hard: {r}");
    }

    #[test]
    fn save_and_reopen_png() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("board.png");
        checkerboard(16, 8).save(&path).expect("save");
        let reopened = ImageProcessor::open(&path).expect("open");
        assert_eq!((reopened.width(), reopened.height()), (16, 8));
    }

    #[test]
    fn save_replaces_without_leftovers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("board.png");
        checkerboard(16, 8).save(&path).expect("first save");
        checkerboard(4, 4).save(&path).expect("second save");

        let reopened = ImageProcessor::open(&path).expect("open");
        assert_eq!((reopened.width(), reopened.height()), (4, 4));
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("board.png")]);
    }

    #[test]
    fn garbage_is_an_image_error() {
        let err = ImageProcessor::from_bytes(b"definitely not a picture")
            .err()
            .expect("decode must fail");
        assert!(matches!(err, BildwerkError::Image(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ImageProcessor::open("/nonexistent/cat.png")
            .err()
            .expect("open must fail");
        assert!(matches!(err, BildwerkError::Io(_)));
    }
}
