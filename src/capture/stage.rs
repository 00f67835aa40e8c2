//! Capture stage: runs the camera in a dedicated thread.
//!
//! Frames are handed to the session through a channel with room for exactly
//! one frame: the next frame is captured while the current one is on the
//! wire, and the thread holds it back until the session takes the slot.
//! Frames therefore leave in capture order and never pile up.
//!
//! Settings changes travel on a command queue that the thread drains before
//! every capture and keeps serving while a frame is held back, so an apply
//! never waits on the session reading frames. The frame after an accepted
//! update uses the new values.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{CaptureDevice, Frame, ImageSettings, PostProcess};
use crate::error::CaptureError;

/// How often a paused stage checks whether it should exit
const IDLE_POLL: Duration = Duration::from_millis(50);

/// How long a held-back frame waits for commands before retrying the slot
const SLOT_POLL: Duration = Duration::from_millis(2);

enum StageCommand {
    Apply(ImageSettings, oneshot::Sender<Result<(), CaptureError>>),
    Resume,
    Pause,
}

pub struct CaptureStage {
    commands: std_mpsc::Sender<StageCommand>,
    frames: mpsc::Receiver<Result<Frame, CaptureError>>,
    running: Arc<AtomicBool>,
}

impl CaptureStage {
    /// Spawn the capture thread. The stage starts paused.
    pub fn start(device: Box<dyn CaptureDevice>, post: PostProcess) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let (command_tx, command_rx) = std_mpsc::channel::<StageCommand>();
        let (frame_tx, frame_rx) = mpsc::channel::<Result<Frame, CaptureError>>(1);

        let running_clone = running.clone();
        std::thread::Builder::new()
            .name("capture".into())
            .spawn(move || capture_loop(device, post, command_rx, frame_tx, running_clone))
            .map_err(|e| warn!("Failed to spawn capture thread: {}", e))
            .ok();

        Self {
            commands: command_tx,
            frames: frame_rx,
            running,
        }
    }

    /// Wait for the next captured frame.
    pub async fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        self.frames.recv().await.unwrap_or(Err(CaptureError::Stopped))
    }

    /// Push settings into the camera and wait for its verdict.
    pub async fn apply(&self, settings: ImageSettings) -> Result<(), CaptureError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(StageCommand::Apply(settings, reply_tx))
            .map_err(|_| CaptureError::Stopped)?;
        reply_rx.await.map_err(|_| CaptureError::Stopped)?
    }

    /// Start producing frames. Anything left over from before is discarded.
    pub fn resume(&mut self) {
        self.drain();
        let _ = self.commands.send(StageCommand::Resume);
    }

    /// Stop producing frames and discard the one waiting in the slot.
    pub fn pause(&mut self) {
        let _ = self.commands.send(StageCommand::Pause);
        self.drain();
    }

    fn drain(&mut self) {
        while self.frames.try_recv().is_ok() {}
    }

    /// Stop capturing
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Drop for CaptureStage {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    mut device: Box<dyn CaptureDevice>,
    post: PostProcess,
    commands: std_mpsc::Receiver<StageCommand>,
    tx: mpsc::Sender<Result<Frame, CaptureError>>,
    running: Arc<AtomicBool>,
) {
    let mut paused = true;
    let mut seq: u64 = 0;
    // Captured but not yet handed over because the slot is taken
    let mut pending: Option<Result<Frame, CaptureError>> = None;

    while running.load(Ordering::Relaxed) {
        if let Some(frame) = pending.take() {
            let failed = frame.is_err();
            match tx.try_send(frame) {
                Ok(()) => {
                    if failed {
                        // The session tears down on capture errors; wait to be resumed
                        paused = true;
                    }
                }
                Err(TrySendError::Full(frame)) => {
                    pending = Some(frame);
                    // Keep answering commands while the session is busy sending
                    match commands.recv_timeout(SLOT_POLL) {
                        Ok(cmd) => handle(cmd, &mut *device, &mut paused, &mut pending),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                Err(TrySendError::Closed(_)) => break,
            }
            continue;
        }

        let command = if paused {
            match commands.recv_timeout(IDLE_POLL) {
                Ok(cmd) => Some(cmd),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match commands.try_recv() {
                Ok(cmd) => Some(cmd),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        };

        if let Some(cmd) = command {
            handle(cmd, &mut *device, &mut paused, &mut pending);
            // Drain every queued command before the next capture
            continue;
        }

        pending = Some(
            device
                .capture()
                .and_then(|jpeg| post.apply(jpeg))
                .map(|jpeg| Frame { seq, jpeg }),
        );
        seq += 1;
    }

    debug!("Capture thread exiting after {} frames", seq);
}

fn handle(
    cmd: StageCommand,
    device: &mut dyn CaptureDevice,
    paused: &mut bool,
    pending: &mut Option<Result<Frame, CaptureError>>,
) {
    match cmd {
        StageCommand::Apply(settings, reply) => {
            // A held-back frame was taken with the old settings
            *pending = None;
            let _ = reply.send(device.apply(&settings));
        }
        StageCommand::Resume => *paused = false,
        StageCommand::Pause => {
            *pending = None;
            *paused = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::test_pattern::TestPattern;
    use crate::capture::Rotation;
    use crate::settings::{SettingName, SettingsSnapshot};
    use image::GenericImageView;
    use tokio::time::timeout;

    fn post() -> PostProcess {
        PostProcess {
            rotation: Rotation::None,
            quality: 70,
        }
    }

    fn small_settings() -> ImageSettings {
        let mut snap = SettingsSnapshot::defaults(false);
        snap.set_raw(SettingName::Resolution, "160x120").unwrap();
        ImageSettings::from_snapshot(&snap).unwrap()
    }

    struct Broken;

    impl CaptureDevice for Broken {
        fn apply(&mut self, _: &ImageSettings) -> Result<(), CaptureError> {
            Err(CaptureError::Unsupported("everything".into()))
        }

        fn capture(&mut self) -> Result<Vec<u8>, CaptureError> {
            Err(CaptureError::Failed("sensor unplugged".into()))
        }
    }

    /// Test pattern that takes a while per frame
    struct Slow(TestPattern);

    impl CaptureDevice for Slow {
        fn apply(&mut self, settings: &ImageSettings) -> Result<(), CaptureError> {
            self.0.apply(settings)
        }

        fn capture(&mut self) -> Result<Vec<u8>, CaptureError> {
            std::thread::sleep(Duration::from_millis(50));
            self.0.capture()
        }
    }

    #[tokio::test]
    async fn test_frames_arrive_in_capture_order() {
        let mut stage = CaptureStage::start(Box::new(TestPattern::new(70)), post());
        stage.apply(small_settings()).await.unwrap();
        stage.resume();

        let mut last = None;
        for _ in 0..5 {
            let frame = stage.next_frame().await.unwrap();
            assert!(!frame.is_empty());
            if let Some(prev) = last {
                assert!(frame.seq > prev);
            }
            last = Some(frame.seq);
        }
    }

    #[tokio::test]
    async fn test_paused_stage_produces_nothing() {
        let mut stage = CaptureStage::start(Box::new(TestPattern::new(70)), post());
        stage.apply(small_settings()).await.unwrap();

        let waited = timeout(Duration::from_millis(200), stage.next_frame()).await;
        assert!(waited.is_err());

        stage.resume();
        stage.next_frame().await.unwrap();
        stage.pause();
        // Allow the in-flight capture to land, then clear it
        tokio::time::sleep(Duration::from_millis(100)).await;
        stage.drain();
        let waited = timeout(Duration::from_millis(200), stage.next_frame()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_applied_settings_reach_later_frames() {
        let mut stage = CaptureStage::start(Box::new(TestPattern::new(70)), post());
        stage.apply(small_settings()).await.unwrap();
        stage.resume();
        stage.next_frame().await.unwrap();

        let mut snap = SettingsSnapshot::defaults(false);
        snap.set_raw(SettingName::Resolution, "320x240").unwrap();
        stage
            .apply(ImageSettings::from_snapshot(&snap).unwrap())
            .await
            .unwrap();

        // At most one frame captured before the update is still in the slot
        let mut dims = Vec::new();
        for _ in 0..2 {
            let frame = stage.next_frame().await.unwrap();
            dims.push(image::load_from_memory(&frame.jpeg).unwrap().dimensions());
        }
        assert_eq!(dims.last(), Some(&(320, 240)));
    }

    #[tokio::test]
    async fn test_device_errors_are_reported() {
        let mut stage = CaptureStage::start(Box::new(Broken), post());
        assert!(matches!(
            stage.apply(small_settings()).await,
            Err(CaptureError::Unsupported(_))
        ));

        stage.resume();
        assert!(matches!(
            stage.next_frame().await,
            Err(CaptureError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_apply_answers_while_slot_is_full() {
        let mut stage = CaptureStage::start(Box::new(Slow(TestPattern::new(70))), post());
        stage.apply(small_settings()).await.unwrap();
        stage.resume();

        // Nobody reads for a while: one frame sits in the slot, the next is held back
        tokio::time::sleep(Duration::from_millis(200)).await;
        stage.next_frame().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut snap = SettingsSnapshot::defaults(false);
        snap.set_raw(SettingName::Resolution, "320x240").unwrap();
        timeout(
            Duration::from_secs(3),
            stage.apply(ImageSettings::from_snapshot(&snap).unwrap()),
        )
        .await
        .expect("apply stalled behind a full slot")
        .unwrap();

        // Frames keep coming and pick up the new resolution
        let mut dims = Vec::new();
        for _ in 0..2 {
            let frame = timeout(Duration::from_secs(3), stage.next_frame())
                .await
                .unwrap()
                .unwrap();
            dims.push(image::load_from_memory(&frame.jpeg).unwrap().dimensions());
        }
        assert_eq!(dims.last(), Some(&(320, 240)));
    }
}
