//! The camera and servos a session drives.
//!
//! Outlives individual sessions: the capture thread keeps running (paused)
//! between peers, and the next session picks it up again.

use tracing::debug;

use crate::actuator::{PanTilt, ServoChannel};
use crate::capture::{CaptureStage, ImageSettings};
use crate::error::ValidationError;
use crate::settings::{SettingName, SettingsSnapshot};

pub struct Hardware {
    pub capture: CaptureStage,
    pan_tilt: Option<Box<dyn PanTilt>>,
}

impl Hardware {
    /// `pan_tilt` is `None` on cameras without servos.
    pub fn new(capture: CaptureStage, pan_tilt: Option<Box<dyn PanTilt>>) -> Self {
        Self { capture, pan_tilt }
    }

    /// Push a snapshot into the collaborators: image parameters first, then
    /// the servo angles when the snapshot allows pan/tilt.
    pub async fn apply(&mut self, snapshot: &SettingsSnapshot) -> Result<(), ValidationError> {
        let image = ImageSettings::from_snapshot(snapshot)?;
        self.capture.apply(image).await?;

        if !snapshot.pan_tilt_enabled {
            return Ok(());
        }
        if let Some(servos) = self.pan_tilt.as_mut() {
            let pan = snapshot
                .pan()
                .ok_or(ValidationError::Missing(SettingName::ServoPan))?;
            let tilt = snapshot
                .tilt()
                .ok_or(ValidationError::Missing(SettingName::ServoTilt))?;
            servos.set_angle(ServoChannel::Pan, pan)?;
            servos.set_angle(ServoChannel::Tilt, tilt)?;
            debug!("Servos at pan {}° tilt {}°", pan, tilt);
        }
        Ok(())
    }

    /// Put the servos into their idle state.
    pub fn release(&mut self) {
        if let Some(servos) = self.pan_tilt.as_mut() {
            servos.release();
        }
    }
}
