use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use futures::future::BoxFuture;
use futures::FutureExt;
use webrtc::media::io::ivf_reader::IVFReader;
use webrtc::media::io::ogg_reader::OggReader;
use webrtc::media::Sample;

use super::devices::{MediaConstraints, MediaDevices};
use super::track::{random_id, MediaStream, MediaTrack, TrackKind};
use crate::config::MediaConfig;
use crate::error::{MeetError, Result};

const OGG_SAMPLE_RATE: u64 = 48000;
const DEFAULT_OGG_PAGE: Duration = Duration::from_millis(20);

/// What happens when a source file runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfFile {
    Loop,
    /// The track ends, like a user pressing "stop sharing".
    End,
}

/// Media devices backed by VP8 IVF and Opus Ogg files.
#[derive(Debug, Clone, Default)]
pub struct FileDevices {
    pub camera: Option<PathBuf>,
    pub microphone: Option<PathBuf>,
    pub display: Option<PathBuf>,
    pub display_audio: Option<PathBuf>,
}

impl FileDevices {
    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            camera: config.camera_file.clone(),
            microphone: config.microphone_file.clone(),
            display: config.display_file.clone(),
            display_audio: config.display_audio_file.clone(),
        }
    }

    async fn open(
        device: &str,
        path: Option<&Path>,
        kind: TrackKind,
        stream_id: &str,
        end: EndOfFile,
    ) -> Result<Arc<MediaTrack>> {
        let path = path.ok_or_else(|| MeetError::DeviceUnavailable(device.to_string()))?;

        let data = tokio::fs::read(path).await.map_err(|e| {
            tracing::warn!(device = %device, path = %path.display(), error = %e, "Unable to open media source");
            MeetError::PermissionDenied(device.to_string())
        })?;

        let track = MediaTrack::new(kind, device, stream_id);
        match kind {
            TrackKind::Video => {
                // validate the header before handing out the track
                IVFReader::new(Cursor::new(data.as_slice()))
                    .map_err(|e| MeetError::DeviceUnavailable(format!("{}: {}", device, e)))?;
                tokio::spawn(pace_ivf(track.clone(), data, end));
            }
            TrackKind::Audio => {
                OggReader::new(Cursor::new(data.as_slice()), true)
                    .map_err(|e| MeetError::DeviceUnavailable(format!("{}: {}", device, e)))?;
                tokio::spawn(pace_ogg(track.clone(), data, end));
            }
        }

        tracing::info!(device = %device, track_id = %track.id(), path = %path.display(), "Media source opened");
        Ok(track)
    }
}

impl MediaDevices for FileDevices {
    fn get_user_media(&self, constraints: MediaConstraints) -> BoxFuture<'_, Result<MediaStream>> {
        async move {
            let stream_id = random_id();
            let mut tracks = Vec::new();

            if constraints.video {
                tracks.push(
                    Self::open("camera", self.camera.as_deref(), TrackKind::Video, &stream_id, EndOfFile::Loop)
                        .await?,
                );
            }
            if constraints.audio {
                match Self::open(
                    "microphone",
                    self.microphone.as_deref(),
                    TrackKind::Audio,
                    &stream_id,
                    EndOfFile::Loop,
                )
                .await
                {
                    Ok(track) => tracks.push(track),
                    Err(e) => {
                        for track in &tracks {
                            track.stop();
                        }
                        return Err(e);
                    }
                }
            }

            Ok(MediaStream::new(stream_id, tracks))
        }
        .boxed()
    }

    fn get_display_media(&self, constraints: MediaConstraints) -> BoxFuture<'_, Result<MediaStream>> {
        async move {
            let stream_id = random_id();
            let video = Self::open(
                "display",
                self.display.as_deref(),
                TrackKind::Video,
                &stream_id,
                EndOfFile::End,
            )
            .await?;
            let mut tracks = vec![video];

            if constraints.audio {
                match Self::open(
                    "display-audio",
                    self.display_audio.as_deref(),
                    TrackKind::Audio,
                    &stream_id,
                    EndOfFile::End,
                )
                .await
                {
                    Ok(track) => tracks.push(track),
                    // system audio is optional for display capture
                    Err(e) => tracing::debug!(error = %e, "Display capture has no system audio"),
                }
            }

            Ok(MediaStream::new(stream_id, tracks))
        }
        .boxed()
    }
}

async fn pace_ivf(track: Arc<MediaTrack>, data: Vec<u8>, end: EndOfFile) {
    loop {
        let (mut reader, header) = match IVFReader::new(Cursor::new(data.as_slice())) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!(track_id = %track.id(), error = %e, "Failed to parse IVF source");
                break;
            }
        };

        let frame_ms = if header.timebase_denominator > 0 {
            (1000 * header.timebase_numerator as u64) / header.timebase_denominator as u64
        } else {
            33
        };
        let frame_duration = Duration::from_millis(frame_ms.max(1));
        let mut ticker = tokio::time::interval(frame_duration);

        loop {
            tokio::select! {
                _ = track.wait_ended() => return,
                _ = ticker.tick() => {}
            }

            let frame = match reader.parse_next_frame() {
                Ok((frame, _)) => frame,
                Err(_) => break,
            };

            let sample = Sample {
                data: frame.freeze(),
                duration: frame_duration,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(sample).await {
                tracing::debug!(track_id = %track.id(), error = %e, "Failed to write video sample");
            }
        }

        if end == EndOfFile::End {
            tracing::info!(track_id = %track.id(), label = %track.label(), "Media source exhausted");
            track.stop();
            break;
        }
    }
}

async fn pace_ogg(track: Arc<MediaTrack>, data: Vec<u8>, end: EndOfFile) {
    loop {
        let mut reader = match OggReader::new(Cursor::new(data.as_slice()), true) {
            Ok((reader, _)) => reader,
            Err(e) => {
                tracing::error!(track_id = %track.id(), error = %e, "Failed to parse Ogg source");
                break;
            }
        };

        let mut last_granule: u64 = 0;
        let mut ticker = tokio::time::interval(DEFAULT_OGG_PAGE);

        loop {
            tokio::select! {
                _ = track.wait_ended() => return,
                _ = ticker.tick() => {}
            }

            let (page, header) = match reader.parse_next_page() {
                Ok(parsed) => parsed,
                Err(_) => break,
            };

            let sample_count = header.granule_position.saturating_sub(last_granule);
            last_granule = header.granule_position;
            let duration = if sample_count > 0 {
                Duration::from_millis(sample_count * 1000 / OGG_SAMPLE_RATE)
            } else {
                DEFAULT_OGG_PAGE
            };

            let sample = Sample {
                data: page.freeze(),
                duration,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(sample).await {
                tracing::debug!(track_id = %track.id(), error = %e, "Failed to write audio sample");
            }
        }

        if end == EndOfFile::End {
            tracing::info!(track_id = %track.id(), label = %track.label(), "Media source exhausted");
            track.stop();
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_permission_denied() {
        let devices = FileDevices {
            camera: Some(PathBuf::from("/nonexistent/camera.ivf")),
            ..Default::default()
        };

        let err = devices
            .get_user_media(MediaConstraints::video_only())
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_unconfigured_device_is_unavailable() {
        let devices = FileDevices::default();

        let err = devices
            .get_display_media(MediaConstraints::video_only())
            .await
            .unwrap_err();
        assert!(matches!(err, MeetError::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_no_constraints_yields_empty_stream() {
        let devices = FileDevices::default();
        let stream = devices
            .get_user_media(MediaConstraints::new(false, false))
            .await
            .unwrap();
        assert!(stream.tracks.is_empty());
    }
}
