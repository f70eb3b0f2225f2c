mod coordinator;
mod mixer;
#[cfg(feature = "gst")]
mod pipeline;
mod recorder;
mod state;
mod store;

pub use coordinator::{RecordingCoordinator, RecordingNotice, RecordingServices};
pub use mixer::{AudioMix, GainStage, MixInput, MixSource, MAX_GAIN};
#[cfg(feature = "gst")]
pub use pipeline::{GstRecorder, GstRecorderFactory};
pub use recorder::{IvfRecorder, IvfRecorderFactory, RecordedFile, Recorder, RecorderFactory, RecordingSources};
pub use state::RecordingState;
pub use store::{FinalizeRequest, HttpRecordingStore, RecordingStore, UploadResponse};

use std::path::Path;
use std::sync::Arc;

/// WebM through GStreamer (the default `gst` feature). Falls back to the
/// video-only IVF writer when GStreamer or one of its plugins is missing.
pub fn default_recorder_factory(output_dir: &Path) -> crate::Result<Arc<dyn RecorderFactory>> {
    #[cfg(feature = "gst")]
    {
        match GstRecorderFactory::new(output_dir) {
            Ok(factory) => return Ok(Arc::new(factory)),
            Err(e) => tracing::warn!(error = %e, "GStreamer unavailable, falling back to IVF recorder"),
        }
    }
    Ok(Arc::new(IvfRecorderFactory::new(output_dir)))
}
