//! Camera capture collaborators.
//!
//! A [`CaptureDevice`] turns the current [`ImageSettings`] into JPEG frames.
//! Devices are blocking and run on the capture thread owned by
//! [`stage::CaptureStage`]; the session never calls them directly.

pub mod libcamera;
pub mod stage;
pub mod test_pattern;

use image::codecs::jpeg::JpegEncoder;
use image::imageops;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use crate::error::{CaptureError, ValidationError};
use crate::settings::{SettingName, SettingsSnapshot};

pub use stage::CaptureStage;

/// A camera that produces JPEG frames
pub trait CaptureDevice: Send {
    /// Push new image parameters into the camera.
    fn apply(&mut self, settings: &ImageSettings) -> Result<(), CaptureError>;

    /// Capture one JPEG-encoded frame with the current parameters.
    fn capture(&mut self) -> Result<Vec<u8>, CaptureError>;
}

/// One encoded frame, tagged with its capture order
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub jpeg: Vec<u8>,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| format!("resolution {:?} is not WIDTHxHEIGHT", s))?;
        let width = w.parse().map_err(|_| format!("bad width in {:?}", s))?;
        let height = h.parse().map_err(|_| format!("bad height in {:?}", s))?;
        if width == 0 || height == 0 {
            return Err(format!("resolution {:?} has a zero dimension", s));
        }
        Ok(Self { width, height })
    }
}

/// The image parameters of a snapshot, typed for the camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSettings {
    pub awb_mode: String,
    pub brightness: i32,
    pub contrast: i32,
    pub effect: String,
    pub iso: u32,
    pub resolution: Resolution,
    pub saturation: i32,
}

impl ImageSettings {
    pub fn from_snapshot(snapshot: &SettingsSnapshot) -> Result<Self, ValidationError> {
        let text = |name: SettingName| -> Result<String, ValidationError> {
            snapshot
                .selected(name)
                .and_then(|c| c.as_text())
                .map(str::to_string)
                .ok_or(ValidationError::WrongShape(name))
        };
        let value = |name: SettingName| -> Result<i32, ValidationError> {
            snapshot.value(name).ok_or(ValidationError::WrongShape(name))
        };

        let iso = snapshot
            .selected(SettingName::Iso)
            .and_then(|c| c.as_number())
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(ValidationError::WrongShape(SettingName::Iso))?;

        let raw_resolution = text(SettingName::Resolution)?;
        let resolution =
            raw_resolution
                .parse::<Resolution>()
                .map_err(|_| ValidationError::Unparseable {
                    name: SettingName::Resolution,
                    value: raw_resolution.clone(),
                })?;

        Ok(Self {
            awb_mode: text(SettingName::AwbMode)?,
            brightness: value(SettingName::Brightness)?,
            contrast: value(SettingName::Contrast)?,
            effect: text(SettingName::Effect)?,
            iso,
            resolution,
            saturation: value(SettingName::Saturation)?,
        })
    }
}

/// Clockwise rotation applied after capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    None,
    Cw90,
    #[default]
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Self::None),
            90 => Some(Self::Cw90),
            180 => Some(Self::Cw180),
            270 => Some(Self::Cw270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Cw90 => 90,
            Self::Cw180 => 180,
            Self::Cw270 => 270,
        }
    }
}

/// Pure transform on captured JPEG bytes
#[derive(Debug, Clone, Copy)]
pub struct PostProcess {
    pub rotation: Rotation,
    pub quality: u8,
}

impl PostProcess {
    pub fn apply(&self, jpeg: Vec<u8>) -> Result<Vec<u8>, CaptureError> {
        if self.rotation == Rotation::None {
            return Ok(jpeg);
        }
        let img = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg)
            .map_err(|e| CaptureError::Encode(format!("JPEG decode failed: {}", e)))?
            .to_rgb8();
        let rotated = match self.rotation {
            Rotation::None => img,
            Rotation::Cw90 => imageops::rotate90(&img),
            Rotation::Cw180 => imageops::rotate180(&img),
            Rotation::Cw270 => imageops::rotate270(&img),
        };
        encode_jpeg(&rotated, self.quality)
    }
}

/// JPEG encode an RGB image
pub fn encode_jpeg(img: &image::RgbImage, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| CaptureError::Encode(format!("JPEG encode failed: {}", e)))?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    #[test]
    fn test_image_settings_from_defaults() {
        let settings = ImageSettings::from_snapshot(&SettingsSnapshot::defaults(true)).unwrap();
        assert_eq!(settings.awb_mode, "auto");
        assert_eq!(settings.brightness, 50);
        assert_eq!(settings.iso, 0);
        assert_eq!(
            settings.resolution,
            Resolution {
                width: 720,
                height: 480
            }
        );
    }

    #[test]
    fn test_resolution_parsing() {
        assert_eq!(
            "1920x1080".parse::<Resolution>().unwrap(),
            Resolution {
                width: 1920,
                height: 1080
            }
        );
        assert!("1920".parse::<Resolution>().is_err());
        assert!("0x10".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_rotation_180_moves_top_left_to_bottom_right() {
        let mut img = RgbImage::from_pixel(16, 8, Rgb([0, 0, 0]));
        for y in 0..4 {
            for x in 0..4 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let jpeg = encode_jpeg(&img, 95).unwrap();

        let post = PostProcess {
            rotation: Rotation::Cw180,
            quality: 95,
        };
        let rotated = image::load_from_memory(&post.apply(jpeg).unwrap()).unwrap();

        assert_eq!(rotated.dimensions(), (16, 8));
        assert!(rotated.get_pixel(14, 6).0[0] > 200);
        assert!(rotated.get_pixel(1, 1).0[0] < 50);
    }

    #[test]
    fn test_rotation_90_swaps_dimensions() {
        let img = RgbImage::from_pixel(32, 16, Rgb([10, 20, 30]));
        let post = PostProcess {
            rotation: Rotation::Cw90,
            quality: 80,
        };
        let out = post.apply(encode_jpeg(&img, 80).unwrap()).unwrap();
        assert_eq!(image::load_from_memory(&out).unwrap().dimensions(), (16, 32));
    }

    #[test]
    fn test_no_rotation_passes_bytes_through() {
        let post = PostProcess {
            rotation: Rotation::None,
            quality: 80,
        };
        assert_eq!(post.apply(vec![1, 2, 3]).unwrap(), vec![1, 2, 3]);
    }
}
