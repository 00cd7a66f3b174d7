//! Template loading and validation.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use image::{ImageReader, RgbaImage};

use crate::error::{BatchError, BatchResult};

/// A decoded template that passed the size check.
#[derive(Debug, Clone)]
pub struct Template {
    image: RgbaImage,
}

impl Template {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

/// Decode the image at `path` and enforce `width <= max_width` and
/// `height <= max_height`.
///
/// The format is guessed from the file contents, not the extension, since
/// uploads arrive under generated names. Dimensions come from the header, so
/// an oversized template is rejected before any pixel buffer is allocated.
pub fn load_template(path: &Path, max_width: u32, max_height: u32) -> BatchResult<Template> {
    let bytes = fs::read(path)
        .map_err(|e| BatchError::internal(format!("cannot read template {}: {e}", path.display())))?;

    let (width, height) = sniff(&bytes)?
        .into_dimensions()
        .map_err(|e| BatchError::UnsupportedImageFormat(e.to_string()))?;
    validate_dimensions(width, height, max_width, max_height)?;

    let decoded = sniff(&bytes)?
        .decode()
        .map_err(|e| BatchError::UnsupportedImageFormat(e.to_string()))?;

    Ok(Template {
        image: decoded.to_rgba8(),
    })
}

fn sniff(bytes: &[u8]) -> BatchResult<ImageReader<Cursor<&[u8]>>> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| BatchError::internal(format!("cannot sniff template format: {e}")))?;
    if reader.format().is_none() {
        return Err(BatchError::UnsupportedImageFormat(
            "unrecognised image signature".to_string(),
        ));
    }
    Ok(reader)
}

/// Build a template from an already-decoded image, applying the same checks.
pub fn template_from_image(
    image: RgbaImage,
    max_width: u32,
    max_height: u32,
) -> BatchResult<Template> {
    validate_dimensions(image.width(), image.height(), max_width, max_height)?;
    Ok(Template { image })
}

fn validate_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> BatchResult<()> {
    if width > max_width || height > max_height {
        return Err(BatchError::TemplateTooLarge {
            width,
            height,
            max_width,
            max_height,
        });
    }
    Ok(())
}
