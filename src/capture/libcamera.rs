//! Raspberry Pi camera via `libcamera-still`.
//!
//! Every frame is one `libcamera-still -o -` run; the JPEG comes back on
//! stdout. Slow compared to a video pipeline, but each frame reflects the
//! latest settings exactly.

use std::process::{Command, Stdio};
use tracing::debug;

use super::{CaptureDevice, ImageSettings};
use crate::error::CaptureError;

pub const DEFAULT_PROGRAM: &str = "libcamera-still";

pub struct LibcameraStill {
    program: String,
    quality: u8,
    args: Vec<String>,
}

impl LibcameraStill {
    pub fn new(program: impl Into<String>, quality: u8) -> Self {
        Self {
            program: program.into(),
            quality,
            args: Vec::new(),
        }
    }

    /// Command line for the given settings
    pub fn build_args(settings: &ImageSettings, quality: u8) -> Result<Vec<String>, CaptureError> {
        if settings.effect != "none" {
            return Err(CaptureError::Unsupported(format!(
                "effect {:?} (libcamera has no image effects)",
                settings.effect
            )));
        }
        let awb = awb_mode(&settings.awb_mode)?;

        let mut args = vec![
            "--nopreview".to_string(),
            "--immediate".to_string(),
            "--timeout".to_string(),
            "1".to_string(),
            "--encoding".to_string(),
            "jpg".to_string(),
            "--quality".to_string(),
            quality.to_string(),
            "--width".to_string(),
            settings.resolution.width.to_string(),
            "--height".to_string(),
            settings.resolution.height.to_string(),
            // 0..100 → -1.0..1.0
            "--brightness".to_string(),
            format!("{:.2}", (settings.brightness - 50) as f32 / 50.0),
            // -100..100 → 0.0..2.0
            "--contrast".to_string(),
            format!("{:.2}", 1.0 + settings.contrast as f32 / 100.0),
            "--saturation".to_string(),
            format!("{:.2}", 1.0 + settings.saturation as f32 / 100.0),
            "--awb".to_string(),
            awb.to_string(),
        ];
        if settings.iso > 0 {
            args.push("--gain".to_string());
            args.push(format!("{:.2}", settings.iso as f32 / 100.0));
        }
        args.push("--output".to_string());
        args.push("-".to_string());
        Ok(args)
    }
}

fn awb_mode(mode: &str) -> Result<&'static str, CaptureError> {
    Ok(match mode {
        "auto" | "flash" | "horizon" => "auto",
        "sunlight" => "daylight",
        "cloudy" | "shade" => "cloudy",
        "tungsten" => "tungsten",
        "fluorescent" => "fluorescent",
        "incandescent" => "incandescent",
        "off" => "custom",
        other => return Err(CaptureError::Unsupported(format!("awb mode {:?}", other))),
    })
}

impl CaptureDevice for LibcameraStill {
    fn apply(&mut self, settings: &ImageSettings) -> Result<(), CaptureError> {
        self.args = Self::build_args(settings, self.quality)?;
        debug!("{} args: {:?}", self.program, self.args);
        Ok(())
    }

    fn capture(&mut self) -> Result<Vec<u8>, CaptureError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CaptureError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.lines().last().unwrap_or("")
            )));
        }
        if output.stdout.len() < 2 || output.stdout[..2] != [0xFF, 0xD8] {
            return Err(CaptureError::Failed(format!(
                "{} did not produce a JPEG",
                self.program
            )));
        }
        Ok(output.stdout)
    }
}
