use crate::error::{AlignError, Result};
use crate::pipeline::{ImageSource, MultiChannelImage};
use image::{ImageBuffer, Rgb};
use ndarray::{Array3, Axis};
use std::path::Path;

/// Decodes any format the `image` crate reads into a three-channel 16-bit
/// array. Gray images are expanded to three identical channels and 8-bit
/// samples are rescaled to the 16-bit range.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<MultiChannelImage> {
    let rgb = image::open(path.as_ref())?.into_rgb16();
    let (width, height) = rgb.dimensions();
    Array3::from_shape_vec((height as usize, width as usize, 3), rgb.into_raw()).map_err(|e| {
        AlignError::InvalidParameter(format!(
            "decoded buffer of {} does not match its dimensions: {e}",
            path.as_ref().display()
        ))
    })
}

/// Converts a three-channel array into an `image` buffer for encoding.
pub fn to_rgb16(image: &MultiChannelImage) -> Result<ImageBuffer<Rgb<u16>, Vec<u16>>> {
    let (rows, cols, channels) = image.dim();
    if channels != 3 {
        return Err(AlignError::ShapeMismatch {
            expected: vec![rows, cols, 3],
            found: image.shape().to_vec(),
        });
    }
    let raw: Vec<u16> = image.iter().copied().collect();
    ImageBuffer::from_raw(cols as u32, rows as u32, raw).ok_or_else(|| {
        AlignError::InvalidParameter(format!("cannot encode {rows}x{cols} image"))
    })
}

/// [`ImageSource`] reading from the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageSource;

impl ImageSource for FileImageSource {
    fn load(&self, path: &Path) -> Result<MultiChannelImage> {
        let image = load_image(path)?;
        tracing::debug!(
            path = %path.display(),
            rows = image.len_of(Axis(0)),
            cols = image.len_of(Axis(1)),
            "loaded image"
        );
        Ok(image)
    }
}
