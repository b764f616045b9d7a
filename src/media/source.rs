//! Owner of the local outbound track set
//!
//! The [`MediaSource`] holds the single process-wide [`LocalMediaState`]
//! and applies the per-variant device error policy: permission denials are
//! silent no-ops (the feature stays off), other failures surface to the
//! caller with the previous state left unchanged.
//!
//! Rapid toggling resolves to the latest requested state: acquisitions run
//! to completion, but a result that no longer matches the current request
//! generation is discarded rather than applied.

use super::{LocalMediaState, MediaDevices, MediaEvent, TrackRef};
use crate::config::MediaConstraints;
use crate::error::DeviceError;
use crate::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Result of a camera or microphone toggle
#[derive(Debug, Clone)]
pub struct ToggleOutcome {
    /// The state actually in effect after the toggle
    pub enabled: bool,

    /// A freshly acquired track, present only when the slot had none
    /// before; the coordinator fans it out to every peer
    pub new_track: Option<TrackRef>,
}

#[derive(Default)]
struct Inner {
    camera_enabled: bool,
    mic_enabled: bool,
    screen_active: bool,
    camera_track: Option<TrackRef>,
    audio_track: Option<TrackRef>,
    screen_track: Option<TrackRef>,
}

/// Owns the capture device handles and the active local track set
pub struct MediaSource {
    devices: Arc<dyn MediaDevices>,
    inner: Mutex<Inner>,

    // Request generations for latest-wins toggle resolution
    camera_gen: AtomicU64,
    mic_gen: AtomicU64,

    events: mpsc::Sender<MediaEvent>,
}

impl MediaSource {
    /// Create a media source over the given capture devices
    ///
    /// Lifecycle events (screen share ended by the platform) are delivered
    /// through `events`.
    pub fn new(devices: Arc<dyn MediaDevices>, events: mpsc::Sender<MediaEvent>) -> Self {
        Self {
            devices,
            inner: Mutex::new(Inner::default()),
            camera_gen: AtomicU64::new(0),
            mic_gen: AtomicU64::new(0),
            events,
        }
    }

    /// Acquire local media per the requested constraints
    ///
    /// Permission denials leave the corresponding feature off without
    /// error; any other device failure is returned and nothing acquired so
    /// far is rolled back.
    pub async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaState> {
        if constraints.video {
            match self.devices.open_camera().await {
                Ok(track) => {
                    let mut inner = self.inner.lock();
                    inner.camera_track = Some(track);
                    inner.camera_enabled = true;
                }
                Err(DeviceError::PermissionDenied) => {
                    debug!("Camera permission denied, leaving camera off");
                    self.inner.lock().camera_enabled = false;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if constraints.audio {
            match self.devices.open_microphone().await {
                Ok(track) => {
                    let mut inner = self.inner.lock();
                    inner.audio_track = Some(track);
                    inner.mic_enabled = true;
                }
                Err(DeviceError::PermissionDenied) => {
                    debug!("Microphone permission denied, leaving microphone off");
                    self.inner.lock().mic_enabled = false;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let state = self.state();
        info!(
            "Acquired local media: camera={}, mic={}",
            state.camera_enabled, state.mic_enabled
        );

        Ok(state)
    }

    /// Flip the camera flag
    ///
    /// Disabling (or re-enabling an already-acquired camera) only flips the
    /// shared track flag, which never triggers renegotiation. Enabling with
    /// no acquired camera opens the device; the returned `new_track` must
    /// then be fanned out by the coordinator.
    pub async fn toggle_camera(&self) -> Result<ToggleOutcome> {
        let (want, existing) = {
            let mut inner = self.inner.lock();
            inner.camera_enabled = !inner.camera_enabled;
            (inner.camera_enabled, inner.camera_track.clone())
        };
        let generation = self.camera_gen.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(track) = existing {
            track.set_enabled(want);
            debug!("Camera toggled {}", if want { "on" } else { "off" });
            return Ok(ToggleOutcome {
                enabled: want,
                new_track: None,
            });
        }

        if !want {
            return Ok(ToggleOutcome {
                enabled: false,
                new_track: None,
            });
        }

        match self.devices.open_camera().await {
            Ok(track) => {
                let mut inner = self.inner.lock();
                if self.camera_gen.load(Ordering::SeqCst) != generation || !inner.camera_enabled {
                    debug!("Discarding stale camera acquisition");
                    return Ok(ToggleOutcome {
                        enabled: inner.camera_enabled,
                        new_track: None,
                    });
                }
                inner.camera_track = Some(track.clone());
                info!("Camera acquired");
                Ok(ToggleOutcome {
                    enabled: true,
                    new_track: Some(track),
                })
            }
            Err(DeviceError::PermissionDenied) => {
                debug!("Camera permission denied, toggle is a no-op");
                self.revert_camera(generation);
                Ok(ToggleOutcome {
                    enabled: false,
                    new_track: None,
                })
            }
            Err(e) => {
                self.revert_camera(generation);
                Err(e.into())
            }
        }
    }

    /// Flip the microphone flag; same contract as [`toggle_camera`](Self::toggle_camera)
    pub async fn toggle_mic(&self) -> Result<ToggleOutcome> {
        let (want, existing) = {
            let mut inner = self.inner.lock();
            inner.mic_enabled = !inner.mic_enabled;
            (inner.mic_enabled, inner.audio_track.clone())
        };
        let generation = self.mic_gen.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(track) = existing {
            track.set_enabled(want);
            debug!("Microphone toggled {}", if want { "on" } else { "off" });
            return Ok(ToggleOutcome {
                enabled: want,
                new_track: None,
            });
        }

        if !want {
            return Ok(ToggleOutcome {
                enabled: false,
                new_track: None,
            });
        }

        match self.devices.open_microphone().await {
            Ok(track) => {
                let mut inner = self.inner.lock();
                if self.mic_gen.load(Ordering::SeqCst) != generation || !inner.mic_enabled {
                    debug!("Discarding stale microphone acquisition");
                    return Ok(ToggleOutcome {
                        enabled: inner.mic_enabled,
                        new_track: None,
                    });
                }
                inner.audio_track = Some(track.clone());
                info!("Microphone acquired");
                Ok(ToggleOutcome {
                    enabled: true,
                    new_track: Some(track),
                })
            }
            Err(DeviceError::PermissionDenied) => {
                debug!("Microphone permission denied, toggle is a no-op");
                self.revert_mic(generation);
                Ok(ToggleOutcome {
                    enabled: false,
                    new_track: None,
                })
            }
            Err(e) => {
                self.revert_mic(generation);
                Err(e.into())
            }
        }
    }

    /// Start a screen share
    ///
    /// The returned track is a drop-in replacement for the outbound video
    /// slot on every peer. Calling while already sharing returns the
    /// current screen track.
    pub async fn start_screen_share(&self) -> Result<TrackRef> {
        if let Some(track) = {
            let inner = self.inner.lock();
            inner.screen_active.then(|| inner.screen_track.clone()).flatten()
        } {
            debug!("Screen share already active");
            return Ok(track);
        }

        let capture = self.devices.open_screen().await?;
        let track = capture.track.clone();

        {
            let mut inner = self.inner.lock();
            inner.screen_active = true;
            inner.screen_track = Some(track.clone());
        }

        // Watch for the platform ending the share on its own. The
        // coordinator ignores the event if the share was already stopped
        // locally.
        let events = self.events.clone();
        let ended = capture.ended;
        tokio::spawn(async move {
            let _ = ended.await;
            if events.send(MediaEvent::ScreenShareEnded).await.is_err() {
                debug!("Media event receiver dropped");
            }
        });

        info!("Screen share started");
        Ok(track)
    }

    /// Stop the screen share and revert the video slot to the camera
    ///
    /// Returns the camera track to fan back out, or `None` when no camera
    /// is available (share started with camera never acquired and the
    /// device cannot be opened now). No-op when not sharing.
    pub async fn stop_screen_share(&self) -> Result<Option<TrackRef>> {
        let (camera, camera_enabled) = {
            let mut inner = self.inner.lock();
            if !inner.screen_active {
                return Ok(None);
            }
            inner.screen_active = false;
            inner.screen_track = None;
            (inner.camera_track.clone(), inner.camera_enabled)
        };

        info!("Screen share stopped, reverting to camera");

        if let Some(track) = camera {
            return Ok(Some(track));
        }

        match self.devices.open_camera().await {
            Ok(track) => {
                track.set_enabled(camera_enabled);
                self.inner.lock().camera_track = Some(track.clone());
                Ok(Some(track))
            }
            Err(DeviceError::PermissionDenied) => {
                debug!("Camera permission denied after screen share, video stays off");
                Ok(None)
            }
            Err(e) => {
                warn!("Failed to reacquire camera after screen share: {}", e);
                Err(e.into())
            }
        }
    }

    /// Whether the outbound video slot is currently the screen capture
    pub fn screen_share_active(&self) -> bool {
        self.inner.lock().screen_active
    }

    /// Snapshot of the local media state
    pub fn state(&self) -> LocalMediaState {
        let inner = self.inner.lock();
        LocalMediaState {
            camera_enabled: inner.camera_enabled,
            mic_enabled: inner.mic_enabled,
            screen_share_active: inner.screen_active,
            active_video: inner
                .screen_track
                .clone()
                .or_else(|| inner.camera_track.clone()),
            active_audio: inner.audio_track.clone(),
        }
    }

    /// The tracks to attach to a peer connection, audio first
    pub fn current_tracks(&self) -> Vec<TrackRef> {
        let state = self.state();
        state
            .active_audio
            .into_iter()
            .chain(state.active_video)
            .collect()
    }

    /// Release all capture handles
    pub fn release(&self) {
        *self.inner.lock() = Inner::default();
        debug!("Local media released");
    }

    fn revert_camera(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if self.camera_gen.load(Ordering::SeqCst) == generation {
            inner.camera_enabled = false;
        }
    }

    fn revert_mic(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if self.mic_gen.load(Ordering::SeqCst) == generation {
            inner.mic_enabled = false;
        }
    }
}
