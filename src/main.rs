use meet_mesh::api;
use meet_mesh::config::Config;
use meet_mesh::telemetry;

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    telemetry::init();

    let address = config.bind_address();
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        lease_secs = config.lock.lease_secs,
        "Starting meeting signaling server"
    );

    warp::serve(api::signal_routes(&config)).run(address).await;
}
