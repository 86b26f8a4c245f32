//! Face crops handed to the resolver, and preparation of crops from a
//! detector rectangle.

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Detectors smaller than this (in either dimension) are discarded.
pub const DEFAULT_MIN_FACE_SIZE: u32 = 40;
/// Side length of a prepared crop.
pub const DEFAULT_CROP_SIZE: u32 = 160;

#[derive(Error, Debug)]
pub enum CropError {
    #[error("face {width}x{height} is smaller than the {min}px minimum")]
    TooSmall { width: u32, height: u32, min: u32 },
    #[error("face rectangle {rect:?} lies outside the {frame_width}x{frame_height} frame")]
    OutOfBounds {
        rect: FaceRect,
        frame_width: u32,
        frame_height: u32,
    },
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

/// Axis-aligned face rectangle in frame pixel coordinates, as reported by
/// an external detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// An aligned, decoded RGB face crop.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    image: RgbImage,
}

impl FaceCrop {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    /// Decode an image file that already contains a single aligned face.
    pub fn open(path: &Path) -> Result<Self, CropError> {
        Ok(Self {
            image: image::open(path)?.to_rgb8(),
        })
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn to_gray(&self) -> GrayImage {
        imageops::grayscale(&self.image)
    }

    /// Encode the crop as JPEG at `path`.
    pub fn save_jpeg(&self, path: &Path) -> Result<(), image::ImageError> {
        self.image.save_with_format(path, ImageFormat::Jpeg)
    }
}

/// Cut the detector rectangle out of `frame` and resize it to a
/// `size`×`size` crop.
///
/// Rejects rectangles smaller than `min_size` or not fully inside the frame.
pub fn crop_face(frame: &RgbImage, rect: FaceRect, min_size: u32, size: u32) -> Result<FaceCrop, CropError> {
    if rect.width < min_size || rect.height < min_size || rect.width == 0 || rect.height == 0 {
        return Err(CropError::TooSmall {
            width: rect.width,
            height: rect.height,
            min: min_size,
        });
    }

    let (fw, fh) = frame.dimensions();
    let in_bounds = rect.x >= 0
        && rect.y >= 0
        && (rect.x as u64 + rect.width as u64) <= fw as u64
        && (rect.y as u64 + rect.height as u64) <= fh as u64;
    if !in_bounds {
        return Err(CropError::OutOfBounds {
            rect,
            frame_width: fw,
            frame_height: fh,
        });
    }

    let region = imageops::crop_imm(frame, rect.x as u32, rect.y as u32, rect.width, rect.height).to_image();
    let resized = imageops::resize(&region, size, size, FilterType::Triangle);
    Ok(FaceCrop::from_rgb(resized))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 0]))
    }

    fn rect(x: i32, y: i32, width: u32, height: u32) -> FaceRect {
        FaceRect { x, y, width, height }
    }

    #[test]
    fn test_crop_output_size() {
        let crop = crop_face(&frame(640, 480), rect(100, 50, 80, 120), 40, 160).unwrap();
        assert_eq!((crop.width(), crop.height()), (160, 160));
    }

    #[test]
    fn test_crop_touching_edges_is_accepted() {
        assert!(crop_face(&frame(200, 100), rect(120, 20, 80, 80), 40, 160).is_ok());
    }

    #[test]
    fn test_crop_too_small() {
        let err = crop_face(&frame(640, 480), rect(0, 0, 39, 100), 40, 160).unwrap_err();
        assert!(matches!(err, CropError::TooSmall { width: 39, .. }));
    }

    #[test]
    fn test_crop_negative_origin_out_of_bounds() {
        let err = crop_face(&frame(640, 480), rect(-1, 10, 50, 50), 40, 160).unwrap_err();
        assert!(matches!(err, CropError::OutOfBounds { .. }));
    }

    #[test]
    fn test_crop_overflowing_frame_out_of_bounds() {
        let err = crop_face(&frame(100, 100), rect(60, 60, 41, 41), 40, 160).unwrap_err();
        assert!(matches!(err, CropError::OutOfBounds { .. }));
    }

    #[test]
    fn test_crop_preserves_content() {
        let mut f = RgbImage::from_pixel(100, 100, image::Rgb([0, 0, 0]));
        for y in 10..60 {
            for x in 10..60 {
                f.put_pixel(x, y, image::Rgb([200, 100, 50]));
            }
        }
        let crop = crop_face(&f, rect(10, 10, 50, 50), 40, 100).unwrap();
        assert_eq!(crop.image().get_pixel(50, 50), &image::Rgb([200, 100, 50]));
    }

    #[test]
    fn test_save_and_open_roundtrip_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.jpg");
        let crop = crop_face(&frame(320, 240), rect(10, 10, 100, 100), 40, 160).unwrap();
        crop.save_jpeg(&path).unwrap();
        let reopened = FaceCrop::open(&path).unwrap();
        assert_eq!((reopened.width(), reopened.height()), (160, 160));
    }
}
