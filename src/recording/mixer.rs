use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::media::MediaTrack;

pub const MAX_GAIN: f32 = 10.0;

/// Live-adjustable linear gain. Backends subscribe and apply changes
/// without rebuilding the mix.
#[derive(Debug, Clone)]
pub struct GainStage {
    tx: Arc<watch::Sender<f32>>,
}

impl GainStage {
    pub fn new(initial: f32) -> Self {
        let (tx, _) = watch::channel(clamp_gain(initial).unwrap_or(1.0));
        Self { tx: Arc::new(tx) }
    }

    /// Non-finite values are ignored. Returns the gain in effect.
    pub fn set(&self, gain: f32) -> f32 {
        if let Some(gain) = clamp_gain(gain) {
            self.tx.send_replace(gain);
        }
        self.get()
    }

    pub fn get(&self) -> f32 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.tx.subscribe()
    }
}

fn clamp_gain(gain: f32) -> Option<f32> {
    gain.is_finite().then(|| gain.clamp(0.0, MAX_GAIN))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixSource {
    /// System audio of the recording capture.
    Display,
    Microphone,
}

#[derive(Debug, Clone)]
pub struct MixInput {
    pub source: MixSource,
    pub track: Arc<MediaTrack>,
    pub gain: GainStage,
}

/// Display audio and microphone mixed into a single recorded track.
#[derive(Debug)]
pub struct AudioMix {
    display: Option<MixInput>,
    microphone: Option<MixInput>,
    closed: watch::Sender<bool>,
    is_closed: AtomicBool,
}

impl AudioMix {
    pub fn new(display: Option<Arc<MediaTrack>>, microphone: Option<Arc<MediaTrack>>) -> Self {
        let input = |source, track| MixInput {
            source,
            track,
            gain: GainStage::new(1.0),
        };
        let (closed, _) = watch::channel(false);
        Self {
            display: display.map(|t| input(MixSource::Display, t)),
            microphone: microphone.map(|t| input(MixSource::Microphone, t)),
            closed,
            is_closed: AtomicBool::new(false),
        }
    }

    pub fn inputs(&self) -> Vec<&MixInput> {
        self.display.iter().chain(self.microphone.iter()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.display.is_none() && self.microphone.is_none()
    }

    /// Returns the applied gain, or `None` without a display input.
    pub fn set_display_gain(&self, gain: f32) -> Option<f32> {
        self.display.as_ref().map(|input| input.gain.set(gain))
    }

    pub fn set_microphone_gain(&self, gain: f32) -> Option<f32> {
        self.microphone.as_ref().map(|input| input.gain.set(gain))
    }

    /// Resolves once the mix is closed. Backends stop pulling samples then.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::SeqCst)
    }

    /// Idempotent. Input tracks are not stopped; the microphone stays live
    /// for the call.
    pub fn close(&self) {
        if !self.is_closed.swap(true, Ordering::SeqCst) {
            self.closed.send_replace(true);
            tracing::debug!(inputs = self.inputs().len(), "Audio mix closed");
        }
    }
}
