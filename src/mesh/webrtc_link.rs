use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use futures::future::BoxFuture;
use futures::FutureExt;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::network_type::NetworkType;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_credential_type::RTCIceCredentialType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::track::track_local::TrackLocal;

use super::link::{InboundTrack, LinkEvent, LinkEvents, LinkRole, OutboundTracks, PeerConnector, PeerLink};
use crate::config::MediaConfig;
use crate::error::{MeetError, Result};
use crate::media::{MediaTrack, TrackKind};
use crate::protocol::{IceCandidate, SignalPayload};

pub fn create_webrtc_api() -> Result<Arc<API>> {
    let mut media_engine = MediaEngine::default();

    // keyframe recovery after a track swap relies on PLI/FIR
    let video_rtcp_feedback = vec![
        RTCPFeedback {
            typ: "goog-remb".to_string(),
            parameter: "".to_string(),
        },
        RTCPFeedback {
            typ: "ccm".to_string(),
            parameter: "fir".to_string(),
        },
        RTCPFeedback {
            typ: "nack".to_string(),
            parameter: "".to_string(),
        },
        RTCPFeedback {
            typ: "nack".to_string(),
            parameter: "pli".to_string(),
        },
    ];

    let mut video_capability = TrackKind::Video.codec_capability();
    video_capability.rtcp_feedback = video_rtcp_feedback;

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: video_capability,
                payload_type: 96,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .map_err(|e| MeetError::webrtc_api(format!("Failed to register VP8 codec: {}", e)))?;

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: TrackKind::Audio.codec_capability(),
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .map_err(|e| MeetError::webrtc_api(format!("Failed to register Opus codec: {}", e)))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| MeetError::webrtc_api(format!("Failed to register interceptors: {}", e)))?;

    let mut setting_engine = SettingEngine::default();
    setting_engine.set_network_types(vec![NetworkType::Udp4, NetworkType::Tcp4]);
    setting_engine.set_ice_multicast_dns_mode(webrtc::ice::mdns::MulticastDnsMode::Disabled);

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build();

    Ok(Arc::new(api))
}

pub fn get_ice_servers(config: &MediaConfig) -> Vec<RTCIceServer> {
    let mut ice_servers = Vec::new();

    for stun_server in &config.stun_servers {
        ice_servers.push(RTCIceServer {
            urls: vec![stun_server.clone()],
            ..Default::default()
        });
    }

    for turn_server in &config.turn_servers {
        ice_servers.push(RTCIceServer {
            urls: turn_server.urls.clone(),
            username: turn_server.username.clone(),
            credential: turn_server.credential.clone(),
            credential_type: RTCIceCredentialType::Password,
        });
    }

    ice_servers
}

/// Builds `RTCPeerConnection`-backed links.
pub struct WebRtcConnector {
    api: Arc<API>,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcConnector {
    pub fn new(config: &MediaConfig) -> Result<Self> {
        Ok(Self {
            api: create_webrtc_api()?,
            ice_servers: get_ice_servers(config),
        })
    }
}

impl PeerConnector for WebRtcConnector {
    fn connect(
        &self,
        remote_id: String,
        role: LinkRole,
        tracks: OutboundTracks,
        events: LinkEvents,
    ) -> BoxFuture<'_, Result<Arc<dyn PeerLink>>> {
        async move {
            let config = RTCConfiguration {
                ice_servers: self.ice_servers.clone(),
                ..Default::default()
            };
            let peer_connection = Arc::new(
                self.api
                    .new_peer_connection(config)
                    .await
                    .map_err(|e| MeetError::PeerConnectionCreation(e.to_string()))?,
            );

            let link = Arc::new(WebRtcLink {
                remote_id: remote_id.clone(),
                role,
                peer_connection,
                video_sender: tokio::sync::Mutex::new(None),
                pending_remote_candidates: tokio::sync::Mutex::new(Vec::new()),
                local_candidates: Arc::new(Mutex::new(LocalCandidates::default())),
                ended_tracks: Arc::new(Mutex::new(HashSet::new())),
                events,
                closed: AtomicBool::new(false),
            });

            if let Err(e) = link.setup(tracks).await {
                link.close().await;
                return Err(e);
            }

            if role == LinkRole::Initiator {
                if let Err(e) = link.send_offer().await {
                    link.close().await;
                    return Err(e);
                }
            }

            tracing::info!(peer_id = %remote_id, role = %role, "Peer connection created");
            Ok(link as Arc<dyn PeerLink>)
        }
        .boxed()
    }
}

/// Local ICE candidates are held back until the description they belong to
/// has been sent.
#[derive(Default)]
struct LocalCandidates {
    description_sent: bool,
    queued: Vec<IceCandidate>,
}

pub struct WebRtcLink {
    remote_id: String,
    role: LinkRole,
    peer_connection: Arc<RTCPeerConnection>,
    video_sender: tokio::sync::Mutex<Option<Arc<RTCRtpSender>>>,
    pending_remote_candidates: tokio::sync::Mutex<Vec<RTCIceCandidateInit>>,
    local_candidates: Arc<Mutex<LocalCandidates>>,
    ended_tracks: Arc<Mutex<HashSet<String>>>,
    events: LinkEvents,
    closed: AtomicBool,
}

impl WebRtcLink {
    async fn setup(&self, tracks: OutboundTracks) -> Result<()> {
        if let Some(video) = &tracks.video {
            let sender = self.add_track(video).await?;
            *self.video_sender.lock().await = Some(sender);
        } else {
            // keep the sender so a later screen share can be swapped in
            let transceiver = self
                .peer_connection
                .add_transceiver_from_kind(RTPCodecType::Video, None)
                .await
                .map_err(|e| MeetError::AddTrackFailed(e.to_string()))?;
            *self.video_sender.lock().await = Some(transceiver.sender().await);
        }

        if let Some(audio) = &tracks.audio {
            self.add_track(audio).await?;
        } else {
            self.peer_connection
                .add_transceiver_from_kind(RTPCodecType::Audio, None)
                .await
                .map_err(|e| MeetError::AddTrackFailed(e.to_string()))?;
        }

        self.register_callbacks();
        Ok(())
    }

    async fn add_track(&self, track: &Arc<MediaTrack>) -> Result<Arc<RTCRtpSender>> {
        let sender = self
            .peer_connection
            .add_track(track.local() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| MeetError::AddTrackFailed(e.to_string()))?;

        // RTCP must be drained for interceptors to work
        let rtcp_sender = sender.clone();
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = rtcp_sender.read(&mut rtcp_buf).await {}
        });

        tracing::debug!(
            peer_id = %self.remote_id,
            track_id = %track.id(),
            kind = %track.kind(),
            "Added local track"
        );
        Ok(sender)
    }

    fn register_callbacks(&self) {
        let remote_id = self.remote_id.clone();
        let events = self.events.clone();
        let local_candidates = self.local_candidates.clone();
        self.peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let remote_id = remote_id.clone();
            let events = events.clone();
            let local_candidates = local_candidates.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                let init = match candidate.to_json() {
                    Ok(init) => init,
                    Err(e) => {
                        tracing::warn!(peer_id = %remote_id, error = %e, "Failed to serialize ICE candidate");
                        return;
                    }
                };
                let candidate = IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                };

                let mut local = local_candidates.lock().unwrap_or_else(|e| e.into_inner());
                if local.description_sent {
                    let _ = events.send(LinkEvent::LocalSignal {
                        remote_id,
                        signal: SignalPayload::Candidate { candidate },
                    });
                } else {
                    local.queued.push(candidate);
                }
            })
        }));

        let remote_id = self.remote_id.clone();
        let events = self.events.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                tracing::debug!(peer_id = %remote_id, state = %state, "Peer connection state changed");
                if matches!(state, RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed) {
                    let _ = events.send(LinkEvent::Closed {
                        remote_id: remote_id.clone(),
                    });
                }
                Box::pin(async {})
            }));

        let remote_id = self.remote_id.clone();
        let events = self.events.clone();
        let ended_tracks = self.ended_tracks.clone();
        self.peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let remote_id = remote_id.clone();
            let events = events.clone();
            let ended_tracks = ended_tracks.clone();
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                _ => TrackKind::Video,
            };
            let descriptor = InboundTrack {
                id: track.id(),
                kind,
                stream_id: track.stream_id(),
                ended: false,
            };

            // the read loop runs in its own task so the handler returns at once
            tokio::spawn(async move {
                tracing::info!(peer_id = %remote_id, track_id = %descriptor.id, kind = %kind, "Inbound track");
                let _ = events.send(LinkEvent::Track {
                    remote_id: remote_id.clone(),
                    track: descriptor.clone(),
                });

                while track.read_rtp().await.is_ok() {}

                {
                    let mut ended = ended_tracks.lock().unwrap_or_else(|e| e.into_inner());
                    ended.insert(descriptor.id.clone());
                }
                tracing::debug!(peer_id = %remote_id, track_id = %descriptor.id, "Inbound track ended");
                let _ = events.send(LinkEvent::Track {
                    remote_id,
                    track: InboundTrack {
                        ended: true,
                        ..descriptor
                    },
                });
            });

            Box::pin(async {})
        }));
    }

    async fn send_offer(&self) -> Result<()> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| MeetError::CreateOfferFailed(e.to_string()))?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| MeetError::SetLocalDescriptionFailed(e.to_string()))?;

        self.send_description(SignalPayload::Offer { sdp: offer.sdp });
        tracing::info!(peer_id = %self.remote_id, "Sent offer");
        Ok(())
    }

    async fn answer(&self, sdp: String) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp)
            .map_err(|e| MeetError::InvalidSdp(format!("Failed to parse offer SDP: {}", e)))?;
        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| MeetError::SetRemoteDescriptionFailed(e.to_string()))?;
        self.flush_pending_candidates().await;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| MeetError::CreateAnswerFailed(e.to_string()))?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| MeetError::SetLocalDescriptionFailed(e.to_string()))?;

        self.send_description(SignalPayload::Answer { sdp: answer.sdp });
        tracing::info!(peer_id = %self.remote_id, "Sent answer");
        Ok(())
    }

    async fn accept_answer(&self, sdp: String) -> Result<()> {
        if self.peer_connection.signaling_state() == RTCSignalingState::Stable {
            tracing::debug!(peer_id = %self.remote_id, "Ignoring answer, connection already stable");
            return Ok(());
        }

        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| MeetError::InvalidSdp(format!("Failed to parse answer SDP: {}", e)))?;
        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| MeetError::SetRemoteDescriptionFailed(e.to_string()))?;
        tracing::info!(peer_id = %self.remote_id, "Processed answer");

        self.flush_pending_candidates().await;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        {
            let mut pending = self.pending_remote_candidates.lock().await;
            if self.peer_connection.remote_description().await.is_none() {
                pending.push(init);
                tracing::debug!(
                    peer_id = %self.remote_id,
                    queue_size = pending.len(),
                    "Queueing ICE candidate until remote description is set"
                );
                return Ok(());
            }
        }

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| MeetError::AddIceCandidateFailed(e.to_string()))?;
        tracing::debug!(peer_id = %self.remote_id, "Added ICE candidate");
        Ok(())
    }

    /// Apply queued remote candidates in arrival order.
    async fn flush_pending_candidates(&self) {
        let candidates = {
            let mut pending = self.pending_remote_candidates.lock().await;
            std::mem::take(&mut *pending)
        };

        if candidates.is_empty() {
            return;
        }
        tracing::debug!(peer_id = %self.remote_id, count = candidates.len(), "Flushing queued ICE candidates");

        for candidate in candidates {
            if let Err(e) = self.peer_connection.add_ice_candidate(candidate).await {
                tracing::warn!(peer_id = %self.remote_id, error = %e, "Failed to add queued ICE candidate");
            }
        }
    }

    fn send_description(&self, description: SignalPayload) {
        let mut local = self.local_candidates.lock().unwrap_or_else(|e| e.into_inner());
        let _ = self.events.send(LinkEvent::LocalSignal {
            remote_id: self.remote_id.clone(),
            signal: description,
        });
        for candidate in local.queued.drain(..) {
            let _ = self.events.send(LinkEvent::LocalSignal {
                remote_id: self.remote_id.clone(),
                signal: SignalPayload::Candidate { candidate },
            });
        }
        local.description_sent = true;
    }
}

impl PeerLink for WebRtcLink {
    fn remote_id(&self) -> &str {
        &self.remote_id
    }

    fn role(&self) -> LinkRole {
        self.role
    }

    fn apply_signal(&self, signal: SignalPayload) -> BoxFuture<'_, Result<()>> {
        async move {
            match signal {
                SignalPayload::Offer { sdp } => self.answer(sdp).await,
                SignalPayload::Answer { sdp } => self.accept_answer(sdp).await,
                SignalPayload::Candidate { candidate } => self.add_remote_candidate(candidate).await,
            }
        }
        .boxed()
    }

    fn is_stable(&self) -> bool {
        self.peer_connection.signaling_state() == RTCSignalingState::Stable
    }

    fn replace_video_track(&self, track: Option<Arc<MediaTrack>>) -> BoxFuture<'_, Result<()>> {
        async move {
            let sender = self.video_sender.lock().await.clone().ok_or_else(|| {
                MeetError::ReplaceTrackFailed(format!("{} (no video sender)", self.remote_id))
            })?;

            let track_id = track.as_ref().map(|t| t.id().to_string());
            let local = track.map(|t| t.local() as Arc<dyn TrackLocal + Send + Sync>);
            sender.replace_track(local).await.map_err(|e| {
                tracing::warn!(peer_id = %self.remote_id, error = %e, "replace_track failed");
                MeetError::ReplaceTrackFailed(self.remote_id.clone())
            })?;

            tracing::debug!(peer_id = %self.remote_id, track_id = ?track_id, "Replaced outbound video");
            Ok(())
        }
        .boxed()
    }

    fn inbound(&self) -> BoxFuture<'_, Vec<InboundTrack>> {
        async move {
            let mut tracks = Vec::new();
            for receiver in self.peer_connection.get_receivers().await {
                let Some(track) = receiver.track().await else {
                    continue;
                };
                let id = track.id();
                if id.is_empty() {
                    continue;
                }
                let ended = {
                    let ended = self.ended_tracks.lock().unwrap_or_else(|e| e.into_inner());
                    ended.contains(&id)
                };
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                tracks.push(InboundTrack {
                    id,
                    kind,
                    stream_id: track.stream_id(),
                    ended,
                });
            }
            tracks
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Err(e) = self.peer_connection.close().await {
                tracing::warn!(peer_id = %self.remote_id, error = %e, "Error closing peer connection");
            }
            tracing::info!(peer_id = %self.remote_id, "Peer connection closed");
        }
        .boxed()
    }
}
