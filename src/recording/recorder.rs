use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use webrtc::media::Sample;

use super::mixer::AudioMix;
use crate::error::{MeetError, Result};
use crate::media::MediaTrack;

/// What a recorder captures: the display video plus the audio mix.
#[derive(Debug, Clone)]
pub struct RecordingSources {
    pub video: Arc<MediaTrack>,
    pub audio: Arc<AudioMix>,
}

/// A finished recording on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFile {
    pub path: PathBuf,
    pub mime_type: String,
    pub size: u64,
}

impl RecordedFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("recording")
            .to_string()
    }
}

pub trait Recorder: Send + Sync {
    /// Finish the file. Fails when called twice.
    fn stop(&self) -> BoxFuture<'_, Result<RecordedFile>>;

    /// Abandon the recording. A file not yet finished by `stop` is removed.
    /// Idempotent.
    fn destroy(&self);
}

pub trait RecorderFactory: Send + Sync {
    fn start(&self, room_id: &str, sources: RecordingSources) -> Result<Box<dyn Recorder>>;
}

/// `{output_dir}/{room_id}/recording_{millis}.{ext}`, creating the room directory.
pub(crate) fn output_path(output_dir: &Path, room_id: &str, extension: &str) -> Result<PathBuf> {
    let room_dir = output_dir.join(room_id);
    std::fs::create_dir_all(&room_dir)
        .map_err(|e| MeetError::RecorderFailed(format!("Failed to create recording directory: {}", e)))?;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    Ok(room_dir.join(format!("recording_{}.{}", timestamp, extension)))
}

const IVF_HEADER_LEN: usize = 32;
const IVF_FRAME_COUNT_OFFSET: u64 = 24;
/// Millisecond timestamps.
const IVF_TIMEBASE_DENOMINATOR: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Running,
    Finish,
    Discard,
}

/// Records the display video as VP8 IVF without any system media stack.
/// Audio is not written; the mix is left to backends that can encode it.
pub struct IvfRecorderFactory {
    output_dir: PathBuf,
}

impl IvfRecorderFactory {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl RecorderFactory for IvfRecorderFactory {
    fn start(&self, room_id: &str, sources: RecordingSources) -> Result<Box<dyn Recorder>> {
        let path = output_path(&self.output_dir, room_id, "ivf")?;
        if !sources.audio.is_empty() {
            tracing::warn!(
                room_id = %room_id,
                inputs = sources.audio.inputs().len(),
                "IVF recorder writes video only, audio mix is not recorded"
            );
        }

        let (control, control_rx) = watch::channel(Control::Running);
        let task = tokio::spawn(write_ivf(path.clone(), sources.video.subscribe(), control_rx));

        tracing::info!(
            room_id = %room_id,
            track_id = %sources.video.id(),
            output_path = %path.display(),
            "Started IVF recorder"
        );

        Ok(Box::new(IvfRecorder {
            path,
            control,
            task: Mutex::new(Some(task)),
        }))
    }
}

pub struct IvfRecorder {
    path: PathBuf,
    control: watch::Sender<Control>,
    task: Mutex<Option<JoinHandle<Result<u32>>>>,
}

impl Recorder for IvfRecorder {
    fn stop(&self) -> BoxFuture<'_, Result<RecordedFile>> {
        async move {
            let task = self
                .task
                .lock()
                .await
                .take()
                .ok_or_else(|| MeetError::RecorderFailed("recorder already stopped".to_string()))?;

            self.control.send_replace(Control::Finish);
            let frames = task
                .await
                .map_err(|e| MeetError::RecorderFailed(format!("writer task failed: {}", e)))??;

            let size = tokio::fs::metadata(&self.path).await?.len();
            tracing::info!(
                output_path = %self.path.display(),
                frames,
                size,
                "IVF recording finished"
            );

            Ok(RecordedFile {
                path: self.path.clone(),
                mime_type: "video/x-ivf".to_string(),
                size,
            })
        }
        .boxed()
    }

    fn destroy(&self) {
        // a finished writer has already exited and ignores this
        self.control.send_if_modified(|control| {
            if *control == Control::Running {
                *control = Control::Discard;
                true
            } else {
                false
            }
        });
    }
}

impl Drop for IvfRecorder {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn ivf_file_header() -> [u8; IVF_HEADER_LEN] {
    let mut header = [0u8; IVF_HEADER_LEN];
    header[0..4].copy_from_slice(b"DKIF");
    // version 0
    header[6..8].copy_from_slice(&(IVF_HEADER_LEN as u16).to_le_bytes());
    header[8..12].copy_from_slice(b"VP80");
    header[12..14].copy_from_slice(&640u16.to_le_bytes());
    header[14..16].copy_from_slice(&480u16.to_le_bytes());
    header[16..20].copy_from_slice(&IVF_TIMEBASE_DENOMINATOR.to_le_bytes());
    header[20..24].copy_from_slice(&1u32.to_le_bytes());
    header
}

async fn write_ivf(
    path: PathBuf,
    mut samples: broadcast::Receiver<Arc<Sample>>,
    mut control: watch::Receiver<Control>,
) -> Result<u32> {
    let mut file = tokio::fs::File::create(&path).await?;
    file.write_all(&ivf_file_header()).await?;

    let started = Instant::now();
    let mut frames = 0u32;

    loop {
        tokio::select! {
            changed = control.changed() => {
                if changed.is_err() || *control.borrow() != Control::Running {
                    break;
                }
            }
            sample = samples.recv() => match sample {
                Ok(sample) => {
                    let pts = started.elapsed().as_millis() as u64;
                    let mut frame_header = [0u8; 12];
                    frame_header[0..4].copy_from_slice(&(sample.data.len() as u32).to_le_bytes());
                    frame_header[4..12].copy_from_slice(&pts.to_le_bytes());
                    file.write_all(&frame_header).await?;
                    file.write_all(&sample.data).await?;
                    frames += 1;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "IVF recorder fell behind, frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // source gone, wait for the coordinator to stop or destroy
                    let _ = control.wait_for(|c| *c != Control::Running).await;
                    break;
                }
            },
        }
    }

    let outcome = *control.borrow();
    if outcome == Control::Discard {
        drop(file);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(output_path = %path.display(), error = %e, "Failed to remove discarded recording");
        }
        tracing::info!(output_path = %path.display(), "Discarded partial recording");
        return Ok(frames);
    }

    file.seek(SeekFrom::Start(IVF_FRAME_COUNT_OFFSET)).await?;
    file.write_all(&frames.to_le_bytes()).await?;
    file.flush().await?;
    Ok(frames)
}
