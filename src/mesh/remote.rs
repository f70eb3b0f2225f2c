use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::link::{InboundTrack, PeerLink};
use crate::media::TrackKind;

/// What is displayed for a remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub peer_id: String,
    pub video: Option<InboundTrack>,
    pub audio: Option<InboundTrack>,
    /// Bumped on every rebuild.
    pub generation: u64,
}

impl RemoteStream {
    fn same_tracks(&self, video: &Option<InboundTrack>, audio: &Option<InboundTrack>) -> bool {
        &self.video == video && &self.audio == audio
    }
}

/// Pick the current video and audio receiver. A live track wins over an
/// ended one; among equals the last receiver wins.
fn select_tracks(inbound: &[InboundTrack]) -> (Option<InboundTrack>, Option<InboundTrack>) {
    let pick = |kind: TrackKind| {
        inbound
            .iter()
            .filter(|t| t.kind == kind)
            .max_by_key(|t| !t.ended)
            .cloned()
    };
    (pick(TrackKind::Video), pick(TrackKind::Audio))
}

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Per-peer task that keeps the displayed stream in line with the link's
/// inbound receivers.
pub struct RemoteRenderer {
    stream: watch::Receiver<Option<RemoteStream>>,
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

impl RemoteRenderer {
    /// `poll_interval` is raised to at least [`MIN_POLL_INTERVAL`].
    pub fn spawn(link: Arc<dyn PeerLink>, poll_interval: Duration) -> Self {
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        let (tx, stream) = watch::channel(None);
        let notify = Arc::new(Notify::new());
        let task = tokio::spawn(render_loop(link, poll_interval, tx, notify.clone()));

        Self {
            stream,
            notify,
            task,
        }
    }

    pub fn stream(&self) -> watch::Receiver<Option<RemoteStream>> {
        self.stream.clone()
    }

    /// Re-check inbound tracks now instead of waiting for the next poll.
    pub fn refresh(&self) {
        self.notify.notify_one();
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for RemoteRenderer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn render_loop(
    link: Arc<dyn PeerLink>,
    poll_interval: Duration,
    tx: watch::Sender<Option<RemoteStream>>,
    notify: Arc<Notify>,
) {
    let peer_id = link.remote_id().to_string();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut generation = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = notify.notified() => {}
        }

        let inbound = link.inbound().await;
        let (video, audio) = select_tracks(&inbound);

        let rebuild = {
            let current = tx.borrow();
            match current.as_ref() {
                // nothing to show yet
                None => video.is_some(),
                Some(stream) => !stream.same_tracks(&video, &audio),
            }
        };

        if rebuild {
            generation += 1;
            tracing::debug!(
                peer_id = %peer_id,
                video = ?video.as_ref().map(|t| &t.id),
                generation,
                "Rebuilding remote stream"
            );
            tx.send_replace(Some(RemoteStream {
                peer_id: peer_id.clone(),
                video,
                audio,
                generation,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeLink;
    use crate::mesh::LinkRole;

    fn video(id: &str, ended: bool) -> InboundTrack {
        InboundTrack {
            id: id.to_string(),
            kind: TrackKind::Video,
            stream_id: "s".to_string(),
            ended,
        }
    }

    fn audio(id: &str) -> InboundTrack {
        InboundTrack {
            id: id.to_string(),
            kind: TrackKind::Audio,
            stream_id: "s".to_string(),
            ended: false,
        }
    }

    #[test]
    fn test_live_track_preferred() {
        let (v, a) = select_tracks(&[video("old", true), video("new", false), audio("mic")]);
        assert_eq!(v.unwrap().id, "new");
        assert_eq!(a.unwrap().id, "mic");
    }

    async fn next_stream(rx: &mut watch::Receiver<Option<RemoteStream>>) -> RemoteStream {
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("stream update")
            .expect("renderer alive");
        rx.borrow().clone().expect("stream present")
    }

    #[tokio::test]
    async fn test_zero_poll_interval_still_renders() {
        let link = FakeLink::new("b", LinkRole::Initiator);
        link.set_inbound(vec![video("cam", false)]);
        let renderer = RemoteRenderer::spawn(link.clone(), Duration::ZERO);
        let mut rx = renderer.stream();

        let stream = next_stream(&mut rx).await;
        assert_eq!(stream.video.unwrap().id, "cam");
    }

    #[tokio::test]
    async fn test_rebuilds_when_video_identity_changes() {
        let link = FakeLink::new("b", LinkRole::Initiator);
        let renderer = RemoteRenderer::spawn(link.clone(), Duration::from_millis(20));
        let mut rx = renderer.stream();

        // no video yet is tolerated
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.borrow().is_none());

        link.set_inbound(vec![video("cam", false), audio("mic")]);
        let first = next_stream(&mut rx).await;
        assert_eq!(first.video.unwrap().id, "cam");
        assert_eq!(first.audio.unwrap().id, "mic");

        link.set_inbound(vec![video("screen", false), audio("mic")]);
        renderer.refresh();
        let second = next_stream(&mut rx).await;
        assert_eq!(second.video.unwrap().id, "screen");
        assert!(second.generation > first.generation);
    }

    #[tokio::test]
    async fn test_stable_tracks_do_not_rebuild() {
        let link = FakeLink::new("b", LinkRole::Responder);
        link.set_inbound(vec![video("cam", false)]);
        let renderer = RemoteRenderer::spawn(link.clone(), Duration::from_millis(10));
        let mut rx = renderer.stream();

        let first = next_stream(&mut rx).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(rx.borrow().as_ref().unwrap().generation, first.generation);

        link.set_inbound(vec![video("cam", true)]);
        let ended = next_stream(&mut rx).await;
        assert!(ended.video.unwrap().ended);

        // an ended track that stays ended is not rebuilt again
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(rx.borrow().as_ref().unwrap().generation, ended.generation);
        renderer.stop();
    }
}
