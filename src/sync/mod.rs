//! Settings synchronizer.
//!
//! Owns the current [`SettingsSnapshot`] for a session and decides whether a
//! peer's update request becomes the new one. Updates are all or nothing:
//! either every value reaches the camera and servos, or the collaborators
//! are put back the way they were and the peer is told what is still in
//! effect.

use tracing::{debug, error, info, warn};

use crate::discovery::{ControlChannel, Inbound};
use crate::error::ValidationError;
use crate::protocol::ControlMessage;
use crate::session::Hardware;
use crate::settings::SettingsSnapshot;

/// Verdict on one update request
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub accepted: bool,
    /// Settings in effect after the request was handled
    pub settings: SettingsSnapshot,
    pub reason: Option<String>,
}

impl SyncOutcome {
    fn accepted(settings: SettingsSnapshot) -> Self {
        Self {
            accepted: true,
            settings,
            reason: None,
        }
    }

    fn rejected(settings: SettingsSnapshot, err: &ValidationError) -> Self {
        Self {
            accepted: false,
            settings,
            reason: Some(err.to_string()),
        }
    }

    pub fn to_reply(&self) -> ControlMessage {
        ControlMessage::UpdateReply {
            accepted: self.accepted,
            settings: self.settings.clone(),
            reason: self.reason.clone(),
        }
    }
}

/// What one non-blocking pass over the control channel found
#[derive(Debug, Clone, PartialEq)]
pub enum Serviced {
    Idle,
    Applied(SyncOutcome),
    DisconnectRequested,
}

pub struct SettingsSynchronizer {
    current: SettingsSnapshot,
}

impl SettingsSynchronizer {
    pub fn new(snapshot: SettingsSnapshot) -> Self {
        Self { current: snapshot }
    }

    pub fn snapshot(&self) -> &SettingsSnapshot {
        &self.current
    }

    pub fn into_snapshot(self) -> SettingsSnapshot {
        self.current
    }

    pub fn pan_tilt_enabled(&self) -> bool {
        self.current.pan_tilt_enabled
    }

    /// Servo moves are refused outright on cameras without pan/tilt.
    fn gate(&self, request: &SettingsSnapshot) -> Result<(), ValidationError> {
        if !self.current.pan_tilt_enabled && self.current.servos_differ(request) {
            return Err(ValidationError::PanTiltDisabled);
        }
        Ok(())
    }

    /// Validate `request` and push it into the hardware.
    pub async fn apply(&mut self, request: SettingsSnapshot, hw: &mut Hardware) -> SyncOutcome {
        if let Err(e) = self
            .gate(&request)
            .and_then(|_| self.current.check_update(&request))
        {
            info!("Rejected settings update: {}", e);
            return SyncOutcome::rejected(self.current.clone(), &e);
        }

        let changed = self.current.changed(&request);
        if changed.is_empty() {
            debug!("Settings update changes nothing");
            return SyncOutcome::accepted(self.current.clone());
        }

        match hw.apply(&request).await {
            Ok(()) => {
                let names: Vec<&str> = changed.iter().map(|n| n.as_str()).collect();
                info!("⚙️  Applied settings: {}", names.join(", "));
                self.current = request;
                SyncOutcome::accepted(self.current.clone())
            }
            Err(e) => {
                warn!("Settings update failed, restoring previous: {}", e);
                if let Err(restore) = hw.apply(&self.current).await {
                    error!("Failed to restore previous settings: {}", restore);
                }
                SyncOutcome::rejected(self.current.clone(), &e)
            }
        }
    }

    /// Handle at most one pending peer message. Returns immediately when
    /// nothing is queued.
    pub async fn service(&mut self, control: &mut ControlChannel, hw: &mut Hardware) -> Serviced {
        match control.poll() {
            None => Serviced::Idle,
            Some(Inbound::Disconnect) => Serviced::DisconnectRequested,
            Some(Inbound::Update(request)) => {
                let outcome = self.apply(request, hw).await;
                if let Err(e) = control.reply(&outcome.to_reply()) {
                    debug!("Could not send update reply to {}: {}", control.peer(), e);
                }
                Serviced::Applied(outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{PanTilt, ServoChannel, SimulatedPanTilt};
    use crate::capture::{CaptureDevice, CaptureStage, ImageSettings, PostProcess, Rotation};
    use crate::error::{ActuatorError, CaptureError};
    use crate::settings::SettingName;
    use std::sync::{Arc, Mutex};

    /// Records every apply; refuses brightness 99
    #[derive(Clone, Default)]
    struct RecordingCamera {
        applied: Arc<Mutex<Vec<ImageSettings>>>,
    }

    impl RecordingCamera {
        fn last(&self) -> Option<ImageSettings> {
            self.applied.lock().unwrap().last().cloned()
        }

        fn count(&self) -> usize {
            self.applied.lock().unwrap().len()
        }
    }

    impl CaptureDevice for RecordingCamera {
        fn apply(&mut self, settings: &ImageSettings) -> Result<(), CaptureError> {
            if settings.brightness == 99 {
                return Err(CaptureError::Unsupported("brightness 99".into()));
            }
            self.applied.lock().unwrap().push(settings.clone());
            Ok(())
        }

        fn capture(&mut self) -> Result<Vec<u8>, CaptureError> {
            Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])
        }
    }

    /// Servos that jam at full tilt
    struct JammedTilt(SimulatedPanTilt);

    impl PanTilt for JammedTilt {
        fn set_angle(&mut self, channel: ServoChannel, degrees: i32) -> Result<(), ActuatorError> {
            if channel == ServoChannel::Tilt && degrees == 60 {
                return Err(ActuatorError::Bus("tilt servo stalled".into()));
            }
            self.0.set_angle(channel, degrees)
        }

        fn release(&mut self) {
            self.0.release()
        }
    }

    fn hardware(camera: &RecordingCamera, servos: Option<Box<dyn PanTilt>>) -> Hardware {
        let stage = CaptureStage::start(
            Box::new(camera.clone()),
            PostProcess {
                rotation: Rotation::None,
                quality: 80,
            },
        );
        Hardware::new(stage, servos)
    }

    #[tokio::test]
    async fn test_valid_update_becomes_current() {
        let camera = RecordingCamera::default();
        let mut hw = hardware(&camera, None);
        let mut sync = SettingsSynchronizer::new(SettingsSnapshot::defaults(false));

        let mut request = sync.snapshot().clone();
        request.set_value(SettingName::Brightness, 80).unwrap();
        let outcome = sync.apply(request.clone(), &mut hw).await;

        assert!(outcome.accepted);
        assert_eq!(outcome.settings, request);
        assert_eq!(sync.snapshot(), &request);
        assert_eq!(camera.last().unwrap().brightness, 80);
    }

    #[tokio::test]
    async fn test_out_of_range_value_is_rejected_untouched() {
        let camera = RecordingCamera::default();
        let mut hw = hardware(&camera, None);
        let mut sync = SettingsSynchronizer::new(SettingsSnapshot::defaults(false));
        let before = sync.snapshot().clone();

        let json = serde_json::to_string(&before)
            .unwrap()
            .replace("\"value\":50", "\"value\":150");
        let request: SettingsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(request.value(SettingName::Brightness), Some(150));

        let outcome = sync.apply(request, &mut hw).await;
        assert!(!outcome.accepted);
        assert_eq!(outcome.settings, before);
        assert!(outcome.reason.unwrap().contains("brightness"));
        assert_eq!(sync.snapshot(), &before);
        assert_eq!(camera.count(), 0);
    }

    #[tokio::test]
    async fn test_servo_moves_rejected_when_pan_tilt_disabled() {
        let camera = RecordingCamera::default();
        let mut hw = hardware(&camera, None);
        let mut sync = SettingsSynchronizer::new(SettingsSnapshot::defaults(false));
        let before = sync.snapshot().clone();

        let mut request = before.clone();
        request.set_value(SettingName::ServoPan, 10).unwrap();
        request.set_value(SettingName::Brightness, 70).unwrap();

        for _ in 0..3 {
            let outcome = sync.apply(request.clone(), &mut hw).await;
            assert!(!outcome.accepted);
            assert_eq!(outcome.settings, before);
            assert_eq!(sync.snapshot(), &before);
        }
        assert_eq!(camera.count(), 0);
    }

    #[tokio::test]
    async fn test_image_changes_pass_the_gate_when_servos_stay_put() {
        let camera = RecordingCamera::default();
        let mut hw = hardware(&camera, None);
        let mut sync = SettingsSynchronizer::new(SettingsSnapshot::defaults(false));

        let mut request = sync.snapshot().clone();
        request.set_raw(SettingName::AwbMode, "cloudy").unwrap();
        assert!(sync.apply(request, &mut hw).await.accepted);
    }

    #[tokio::test]
    async fn test_camera_failure_restores_previous_settings() {
        let camera = RecordingCamera::default();
        let servos = SimulatedPanTilt::new();
        let mut hw = hardware(&camera, Some(Box::new(servos.clone())));
        let mut sync = SettingsSynchronizer::new(SettingsSnapshot::defaults(true));
        let before = sync.snapshot().clone();

        let mut request = before.clone();
        request.set_value(SettingName::Brightness, 99).unwrap();
        request.set_value(SettingName::ServoPan, 150).unwrap();

        let outcome = sync.apply(request, &mut hw).await;
        assert!(!outcome.accepted);
        assert_eq!(sync.snapshot(), &before);
        assert_eq!(camera.last().unwrap().brightness, 50);
        assert_eq!(servos.state().pan, Some(90));
    }

    #[tokio::test]
    async fn test_servo_failure_rolls_back_camera_too() {
        let camera = RecordingCamera::default();
        let servos = SimulatedPanTilt::new();
        let mut hw = hardware(&camera, Some(Box::new(JammedTilt(servos.clone()))));
        let mut sync = SettingsSynchronizer::new(SettingsSnapshot::defaults(true));
        let before = sync.snapshot().clone();

        let mut request = before.clone();
        request.set_value(SettingName::Contrast, 40).unwrap();
        request.set_value(SettingName::ServoPan, 120).unwrap();
        request.set_value(SettingName::ServoTilt, 60).unwrap();

        let outcome = sync.apply(request, &mut hw).await;
        assert!(!outcome.accepted);
        assert!(outcome.reason.unwrap().contains("stalled"));
        assert_eq!(outcome.settings, before);

        // Camera got the new contrast, then the old one back
        assert_eq!(camera.last().unwrap().contrast, 0);
        assert_eq!(servos.state().pan, Some(90));
        assert_eq!(servos.state().tilt, Some(30));
    }
}
