use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use webrtc::media::Sample;

use super::mixer::{AudioMix, MixInput};
use super::recorder::{output_path, RecordedFile, Recorder, RecorderFactory, RecordingSources};
use crate::error::{MeetError, Result};

const REQUIRED_ELEMENTS: &[&str] = &[
    "appsrc",
    "vp8dec",
    "videoconvert",
    "vp8enc",
    "opusdec",
    "audioconvert",
    "audioresample",
    "volume",
    "audiomixer",
    "opusenc",
    "webmmux",
    "filesink",
];

/// Element factories from `names` that are not installed.
fn missing_elements<'a>(names: &[&'a str]) -> Vec<&'a str> {
    names
        .iter()
        .copied()
        .filter(|name| gst::ElementFactory::find(name).is_none())
        .collect()
}

fn make(factory: &str) -> Result<gst::Element> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|e| MeetError::RecorderUnavailable(format!("Failed to create {}: {}", factory, e)))
}

fn make_appsrc(name: &str, caps: gst::Caps) -> Result<gst_app::AppSrc> {
    let appsrc = gst::ElementFactory::make("appsrc")
        .name(name)
        .build()
        .map_err(|e| MeetError::RecorderUnavailable(format!("Failed to create {}: {}", name, e)))?
        .dynamic_cast::<gst_app::AppSrc>()
        .map_err(|_| MeetError::RecorderUnavailable("Failed to cast to AppSrc".into()))?;

    appsrc.set_format(gst::Format::Time);
    appsrc.set_is_live(true);
    appsrc.set_do_timestamp(true);
    appsrc.set_caps(Some(&caps));
    Ok(appsrc)
}

fn pipeline_error(context: &str) -> impl Fn(gst::glib::BoolError) -> MeetError + '_ {
    move |e| MeetError::RecorderFailed(format!("{}: {}", context, e))
}

/// WebM recorder on GStreamer. Video is muxed as-is; every audio input
/// gets its own `volume` element ahead of the mixer.
pub struct GstRecorderFactory {
    output_dir: PathBuf,
}

impl GstRecorderFactory {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        gst::init().map_err(|e| MeetError::RecorderUnavailable(format!("GStreamer init failed: {}", e)))?;
        let missing = missing_elements(REQUIRED_ELEMENTS);
        if !missing.is_empty() {
            return Err(MeetError::RecorderUnavailable(format!(
                "Missing GStreamer elements: {}",
                missing.join(", ")
            )));
        }
        Ok(Self {
            output_dir: output_dir.into(),
        })
    }
}

struct AudioBranch {
    appsrc: gst_app::AppSrc,
    volume: gst::Element,
}

fn build_audio_branch(pipeline: &gst::Pipeline, mixer: &gst::Element, input: &MixInput, index: usize) -> Result<AudioBranch> {
    let caps = gst::Caps::builder("audio/x-opus")
        .field("channel-mapping-family", 0i32)
        .field("channels", 2i32)
        .field("rate", 48000i32)
        .build();
    let appsrc = make_appsrc(&format!("audio_src_{}", index), caps)?;

    let opusdec = make("opusdec")?;
    let audioconvert = make("audioconvert")?;
    let audioresample = make("audioresample")?;
    let volume = make("volume")?;
    volume.set_property("volume", input.gain.get() as f64);

    pipeline
        .add_many([appsrc.upcast_ref(), &opusdec, &audioconvert, &audioresample, &volume])
        .map_err(pipeline_error("Failed to add audio elements"))?;
    gst::Element::link_many([appsrc.upcast_ref(), &opusdec, &audioconvert, &audioresample, &volume, mixer])
        .map_err(pipeline_error("Failed to link audio elements"))?;

    Ok(AudioBranch { appsrc, volume })
}

impl RecorderFactory for GstRecorderFactory {
    fn start(&self, room_id: &str, sources: RecordingSources) -> Result<Box<dyn Recorder>> {
        let path = output_path(&self.output_dir, room_id, "webm")?;
        let location = path
            .to_str()
            .ok_or_else(|| MeetError::RecorderFailed("output path is not valid UTF-8".into()))?;

        let pipeline = gst::Pipeline::new();

        // Video branch: appsrc(VP8) -> vp8dec -> videoconvert -> vp8enc -> webmmux
        let video_caps = gst::Caps::builder("video/x-vp8").build();
        let video_appsrc = make_appsrc("video_src", video_caps)?;
        let vp8dec = make("vp8dec")?;
        let videoconvert = make("videoconvert")?;
        let vp8enc = gst::ElementFactory::make("vp8enc")
            .property("deadline", 1i64)
            .property("cpu-used", 4i32)
            .build()
            .map_err(|e| MeetError::RecorderUnavailable(format!("Failed to create vp8enc: {}", e)))?;

        let webmmux = make("webmmux")?;
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", location)
            .build()
            .map_err(|e| MeetError::RecorderUnavailable(format!("Failed to create filesink: {}", e)))?;

        pipeline
            .add_many([video_appsrc.upcast_ref(), &vp8dec, &videoconvert, &vp8enc, &webmmux, &filesink])
            .map_err(pipeline_error("Failed to add elements"))?;
        gst::Element::link_many([video_appsrc.upcast_ref(), &vp8dec, &videoconvert, &vp8enc])
            .map_err(pipeline_error("Failed to link video elements"))?;

        let video_pad = webmmux
            .request_pad_simple("video_%u")
            .ok_or_else(|| MeetError::RecorderFailed("Failed to get video pad".into()))?;
        let vp8enc_src = vp8enc
            .static_pad("src")
            .ok_or_else(|| MeetError::RecorderFailed("Failed to get vp8enc src pad".into()))?;
        vp8enc_src
            .link(&video_pad)
            .map_err(|e| MeetError::RecorderFailed(format!("Failed to link video to mux: {}", e)))?;

        // Audio: per input appsrc(Opus) -> opusdec -> ... -> volume -> audiomixer -> opusenc -> webmmux
        let mut audio_branches = Vec::new();
        if !sources.audio.is_empty() {
            let audiomixer = make("audiomixer")?;
            let opusenc = make("opusenc")?;
            pipeline
                .add_many([&audiomixer, &opusenc])
                .map_err(pipeline_error("Failed to add mixer"))?;
            audiomixer
                .link(&opusenc)
                .map_err(pipeline_error("Failed to link mixer"))?;

            for (index, input) in sources.audio.inputs().into_iter().enumerate() {
                let branch = build_audio_branch(&pipeline, &audiomixer, input, index)?;
                audio_branches.push((input.clone(), branch));
            }

            let audio_pad = webmmux
                .request_pad_simple("audio_%u")
                .ok_or_else(|| MeetError::RecorderFailed("Failed to get audio pad".into()))?;
            let opusenc_src = opusenc
                .static_pad("src")
                .ok_or_else(|| MeetError::RecorderFailed("Failed to get opusenc src pad".into()))?;
            opusenc_src
                .link(&audio_pad)
                .map_err(|e| MeetError::RecorderFailed(format!("Failed to link audio to mux: {}", e)))?;
        } else {
            tracing::warn!(room_id = %room_id, "No audio source, recording video only");
        }

        webmmux
            .link(&filesink)
            .map_err(pipeline_error("Failed to link mux to sink"))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| MeetError::RecorderFailed(format!("Failed to start pipeline: {}", e)))?;

        let mut tasks = vec![tokio::spawn(feed_appsrc(
            video_appsrc.clone(),
            sources.video.subscribe(),
            sources.audio.closed(),
        ))];
        let mut appsrcs = vec![video_appsrc];
        for (input, branch) in audio_branches {
            tasks.push(tokio::spawn(feed_appsrc(
                branch.appsrc.clone(),
                input.track.subscribe(),
                sources.audio.closed(),
            )));
            tasks.push(tokio::spawn(apply_gain(
                branch.volume,
                input.gain.subscribe(),
                sources.audio.clone(),
            )));
            appsrcs.push(branch.appsrc);
        }

        tracing::info!(
            room_id = %room_id,
            output_path = %path.display(),
            audio_inputs = appsrcs.len() - 1,
            "Created recording pipeline"
        );

        Ok(Box::new(GstRecorder {
            pipeline,
            appsrcs,
            tasks,
            path,
            finished: AtomicBool::new(false),
        }))
    }
}

async fn feed_appsrc(
    appsrc: gst_app::AppSrc,
    mut samples: broadcast::Receiver<Arc<Sample>>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = closed.wait_for(|c| *c) => break,
            sample = samples.recv() => match sample {
                Ok(sample) => {
                    let buffer = gst::Buffer::from_slice(sample.data.to_vec());
                    if let Err(e) = appsrc.push_buffer(buffer) {
                        tracing::debug!(error = ?e, "Failed to push buffer");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Recording fell behind, samples dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn apply_gain(volume: gst::Element, mut gain: watch::Receiver<f32>, mix: Arc<AudioMix>) {
    let mut closed = mix.closed();
    loop {
        tokio::select! {
            _ = closed.wait_for(|c| *c) => break,
            changed = gain.changed() => {
                if changed.is_err() {
                    break;
                }
                let value = *gain.borrow_and_update();
                volume.set_property("volume", value as f64);
            }
        }
    }
}

pub struct GstRecorder {
    pipeline: gst::Pipeline,
    appsrcs: Vec<gst_app::AppSrc>,
    tasks: Vec<JoinHandle<()>>,
    path: PathBuf,
    finished: AtomicBool,
}

impl Recorder for GstRecorder {
    fn stop(&self) -> BoxFuture<'_, Result<RecordedFile>> {
        async move {
            if self.finished.swap(true, Ordering::SeqCst) {
                return Err(MeetError::RecorderFailed("recorder already stopped".into()));
            }

            for task in &self.tasks {
                task.abort();
            }
            for appsrc in &self.appsrcs {
                let _ = appsrc.end_of_stream();
            }

            // Wait for EOS on bus
            let bus = self
                .pipeline
                .bus()
                .ok_or_else(|| MeetError::RecorderFailed("pipeline has no bus".into()))?;
            tokio::task::spawn_blocking(move || {
                for msg in bus.iter_timed(gst::ClockTime::from_seconds(5)) {
                    match msg.view() {
                        gst::MessageView::Eos(_) => break,
                        gst::MessageView::Error(err) => {
                            tracing::error!(error = %err.error(), "Recording pipeline error");
                            break;
                        }
                        _ => {}
                    }
                }
            })
            .await
            .map_err(|e| MeetError::RecorderFailed(format!("EOS wait failed: {}", e)))?;

            self.pipeline
                .set_state(gst::State::Null)
                .map_err(|e| MeetError::RecorderFailed(format!("Failed to stop pipeline: {}", e)))?;

            let size = tokio::fs::metadata(&self.path).await?.len();
            tracing::info!(output_path = %self.path.display(), size, "Recording stopped");

            Ok(RecordedFile {
                path: self.path.clone(),
                mime_type: "video/webm".to_string(),
                size,
            })
        }
        .boxed()
    }

    fn destroy(&self) {
        for task in &self.tasks {
            task.abort();
        }
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.pipeline.set_state(gst::State::Null);
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(output_path = %self.path.display(), error = %e, "No partial recording to remove");
        }
        tracing::info!(output_path = %self.path.display(), "Recording pipeline destroyed");
    }
}

impl Drop for GstRecorder {
    fn drop(&mut self) {
        self.destroy();
    }
}
