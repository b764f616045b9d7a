//! Capture device boundary
//!
//! The crate does not drive camera/microphone/screen hardware itself; a
//! platform integration implements [`MediaDevices`] and vends ready
//! [`TrackRef`]s. Test harnesses implement it with in-memory tracks.

use super::TrackRef;
use crate::error::{DeviceError, ScreenShareError};
use async_trait::async_trait;
use tokio::sync::oneshot;

/// Platform capture devices consumed by the [`MediaSource`](super::MediaSource)
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open the camera and return a video track
    async fn open_camera(&self) -> std::result::Result<TrackRef, DeviceError>;

    /// Open the microphone and return an audio track
    async fn open_microphone(&self) -> std::result::Result<TrackRef, DeviceError>;

    /// Start a screen capture
    ///
    /// The returned capture carries an `ended` signal that fires if the OS
    /// or browser chrome stops the share outside our control.
    async fn open_screen(&self) -> std::result::Result<ScreenCapture, ScreenShareError>;
}

/// A running screen capture: the video track plus the out-of-band end signal
pub struct ScreenCapture {
    /// The screen video track, a drop-in replacement for the camera track
    pub track: TrackRef,

    /// Fires when the platform ends the share unilaterally
    pub ended: oneshot::Receiver<()>,
}
