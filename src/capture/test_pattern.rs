//! Synthetic camera for development and tests.
//!
//! Renders a diagonal gradient that scrolls one step per frame, shaded by
//! brightness, contrast and saturation, at the selected resolution.

use image::{Rgb, RgbImage};

use super::{encode_jpeg, CaptureDevice, ImageSettings, Resolution};
use crate::error::CaptureError;
use crate::settings::catalog;

pub struct TestPattern {
    resolution: Resolution,
    brightness: i32,
    contrast: i32,
    saturation: i32,
    quality: u8,
    frame: u32,
}

impl TestPattern {
    pub fn new(quality: u8) -> Self {
        Self {
            resolution: Resolution {
                width: 720,
                height: 480,
            },
            brightness: catalog::BRIGHTNESS.0,
            contrast: catalog::CONTRAST.0,
            saturation: catalog::SATURATION.0,
            quality,
            frame: 0,
        }
    }

    fn shade(&self, r: f32, g: f32, b: f32) -> Rgb<u8> {
        // brightness 0..100 → offset -128..128, contrast/saturation -100..100 → gain 0..2
        let offset = (self.brightness - 50) as f32 * 2.56;
        let contrast = 1.0 + self.contrast as f32 / 100.0;
        let saturation = 1.0 + self.saturation as f32 / 100.0;

        let grey = (r + g + b) / 3.0;
        let px = [r, g, b].map(|c| {
            let saturated = grey + (c - grey) * saturation;
            let contrasted = (saturated - 128.0) * contrast + 128.0;
            (contrasted + offset).clamp(0.0, 255.0) as u8
        });
        Rgb(px)
    }
}

impl CaptureDevice for TestPattern {
    fn apply(&mut self, settings: &ImageSettings) -> Result<(), CaptureError> {
        self.resolution = settings.resolution;
        self.brightness = settings.brightness;
        self.contrast = settings.contrast;
        self.saturation = settings.saturation;
        Ok(())
    }

    fn capture(&mut self) -> Result<Vec<u8>, CaptureError> {
        let Resolution { width, height } = self.resolution;
        let shift = (self.frame % 1024) * 4;
        self.frame = self.frame.wrapping_add(1);

        let img = RgbImage::from_fn(width, height, |x, y| {
            let r = ((x + shift) * 255 / width.max(1)) % 256;
            let g = (y * 255 / height.max(1)) % 256;
            let b = ((x + y + shift) / 2) % 256;
            self.shade(r as f32, g as f32, b as f32)
        });

        encode_jpeg(&img, self.quality)
    }
}
