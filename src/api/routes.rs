use std::sync::Arc;
use warp::Filter;

use super::websocket;
use crate::config::Config;
use crate::server::SignalingHub;

/// All signaling endpoints: the WebSocket upgrade, health and client config.
pub fn signal_routes(
    config: &Config,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let hub = Arc::new(SignalingHub::new(&config.lock));
    hub.clone().start_lease_sweeper();

    signal_websocket_route(hub.clone())
        .or(signal_health_check(hub))
        .or(signal_config_endpoint(config))
}

pub fn signal_websocket_route(
    hub: Arc<SignalingHub>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("signal")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_hub(hub))
        .map(|ws: warp::ws::Ws, hub: Arc<SignalingHub>| {
            ws.on_upgrade(move |websocket| websocket::handle_signal_websocket(websocket, hub))
        })
}

pub fn signal_health_check(
    hub: Arc<SignalingHub>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("signal" / "health")
        .and(warp::get())
        .and(with_hub(hub))
        .then(|hub: Arc<SignalingHub>| async move {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Meeting Signaling Server",
                "version": env!("CARGO_PKG_VERSION"),
                "sessions": hub.session_count().await,
                "rooms": hub.room_count().await
            }))
        })
}

/// ICE configuration handed to clients so every peer uses the same servers.
pub fn signal_config_endpoint(
    config: &Config,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let body = serde_json::json!({
        "stunServers": config.media.stun_servers,
        "turnServers": config.media.turn_servers.iter().map(|t| serde_json::json!({
            "urls": t.urls,
            "username": t.username,
            "credential": t.credential
        })).collect::<Vec<_>>(),
        "recordLockLeaseSecs": config.lock.lease_secs,
        "heartbeatIntervalMs": config.lock.heartbeat_interval().as_millis() as u64,
    });

    warp::path!("signal" / "config")
        .and(warp::get())
        .map(move || warp::reply::json(&body))
}

fn with_hub(
    hub: Arc<SignalingHub>,
) -> impl Filter<Extract = (Arc<SignalingHub>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || hub.clone())
}
