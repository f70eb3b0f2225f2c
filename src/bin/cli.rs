// Meeting signaling CLI
// Checks a running signaling server, drives it with raw protocol frames and
// can join a room as a full mesh participant.

use clap::{Parser, Subcommand};
use colored::*;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::io::{self, Write};
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use meet_mesh::client::{MeetingSession, SessionOptions};
use meet_mesh::config::Config;
use meet_mesh::protocol::{ClientEvent, ClientFrame, ServerEvent};
use meet_mesh::recording::RecordingNotice;
use meet_mesh::telemetry;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Parser)]
#[command(name = "meet-cli")]
#[command(about = "Meeting signaling CLI", long_about = None)]
struct Cli {
    /// Signaling server address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Get client configuration served by the server
    Config,

    /// Open a signaling connection and print the issued identity
    Connect,

    /// Join a room with raw protocol frames and print what arrives
    Join {
        /// Room to join
        #[arg(short, long)]
        room_id: String,

        /// Display name
        #[arg(short, long, default_value = "cli")]
        name: String,

        /// Keep listening after the join (press Ctrl+C to exit)
        #[arg(short, long)]
        keep_alive: bool,
    },

    /// Join a room as a full participant with media from files
    Meet {
        /// Room to join
        #[arg(short, long)]
        room_id: String,

        /// Display name
        #[arg(short, long, default_value = "cli")]
        name: String,

        /// Join without camera
        #[arg(long)]
        no_video: bool,

        /// Join without microphone
        #[arg(long)]
        no_audio: bool,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(short, long)]
        scenario: Option<String>,
    },

    /// Interactive mode - send custom frames
    Interactive,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => check_health(&cli.server).await,
        Commands::Config => check_config(&cli.server).await,
        Commands::Connect => test_connection(&cli.server).await,
        Commands::Join {
            room_id,
            name,
            keep_alive,
        } => join_room(&cli.server, room_id, name, *keep_alive).await,
        Commands::Meet {
            room_id,
            name,
            no_video,
            no_audio,
        } => meet(&cli.server, room_id, name, !*no_video, !*no_audio).await,
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
        Commands::Interactive => interactive_mode(&cli.server).await,
    }
}

fn signal_url(server: &str) -> String {
    format!("ws://{}/signal", server)
}

/// A raw protocol connection that has received its identity.
struct RawClient {
    id: String,
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    next_ack: u64,
}

impl RawClient {
    async fn connect(server: &str) -> Result<Self, String> {
        let (ws_stream, _) = connect_async(signal_url(server))
            .await
            .map_err(|e| format!("connection failed: {}", e))?;
        let (write, read) = ws_stream.split();
        let mut client = Self {
            id: String::new(),
            write,
            read,
            next_ack: 1,
        };

        match client.next_event(Duration::from_secs(3)).await {
            Some(ServerEvent::Me(id)) => {
                client.id = id;
                Ok(client)
            }
            Some(other) => Err(format!("expected identity, got {:?}", other)),
            None => Err("no identity received".to_string()),
        }
    }

    async fn send(&mut self, event: ClientEvent) -> Result<(), String> {
        self.send_frame(ClientFrame::new(event)).await
    }

    /// Returns the ack id to wait for.
    async fn request(&mut self, event: ClientEvent) -> Result<u64, String> {
        let id = self.next_ack;
        self.next_ack += 1;
        self.send_frame(ClientFrame::with_ack(event, id)).await?;
        Ok(id)
    }

    async fn send_frame(&mut self, frame: ClientFrame) -> Result<(), String> {
        let text = frame.encode().map_err(|e| e.to_string())?;
        self.write
            .send(Message::text(text))
            .await
            .map_err(|e| format!("send failed: {}", e))
    }

    async fn join(&mut self, room_id: &str, name: &str) -> Result<Vec<String>, String> {
        self.send(ClientEvent::JoinRoom {
            room_id: room_id.to_string(),
            name: name.to_string(),
        })
        .await?;
        self.wait_for(Duration::from_secs(3), |event| match event {
            ServerEvent::AllUsers(ids) => Some(ids.clone()),
            _ => None,
        })
        .await
        .ok_or_else(|| "no allUsers snapshot received".to_string())
    }

    async fn next_event(&mut self, wait: Duration) -> Option<ServerEvent> {
        loop {
            match timeout(wait, self.read.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => match ServerEvent::decode(&text) {
                    Ok(event) => return Some(event),
                    Err(e) => println!("{} Undecodable frame: {}", "✗".yellow(), e),
                },
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) | Err(_) => return None,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    /// Skip events until `pick` matches or the wait runs out.
    async fn wait_for<T>(&mut self, wait: Duration, pick: impl Fn(&ServerEvent) -> Option<T>) -> Option<T> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let event = self.next_event(remaining).await?;
            if let Some(found) = pick(&event) {
                return Some(found);
            }
        }
    }

    async fn wait_ack(&mut self, ack: u64) -> Option<bool> {
        self.wait_for(Duration::from_secs(3), |event| match event {
            ServerEvent::Ack { id, response } if *id == ack => Some(response.success),
            _ => None,
        })
        .await
    }
}

fn unique_room(prefix: &str) -> String {
    format!("{}-{}", prefix, rand::random::<u32>())
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/signal/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                    println!("  Sessions: {}", body["sessions"]);
                    println!("  Rooms: {}", body["rooms"]);
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching client configuration...".cyan());

    let url = format!("http://{}/signal/config", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("{} Config endpoint accessible", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("\nConfiguration:");
                    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
                }
            } else {
                println!("{} Config fetch failed: {}", "✗".red(), resp.status());
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn test_connection(server: &str) {
    println!("{}", "Testing signaling connection...".cyan());

    match RawClient::connect(server).await {
        Ok(client) => {
            println!("{} Signaling connection established", "✓".green());
            println!("  URL: {}", signal_url(server));
            println!("  Identity: {}", client.id.green());
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
        }
    }
}

async fn join_room(server: &str, room_id: &str, name: &str, keep_alive: bool) {
    println!("{}", "Joining room...".cyan());
    println!("  Room ID: {}", room_id);
    println!("  Name: {}", name);

    let mut client = match RawClient::connect(server).await {
        Ok(client) => client,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return;
        }
    };
    println!("{} Identity: {}", "✓".green(), client.id.green().bold());

    match client.join(room_id, name).await {
        Ok(members) => {
            println!("{} Joined, {} other member(s)", "✓".green(), members.len());
            for member in members {
                println!("  - {}", member);
            }
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            return;
        }
    }

    if !keep_alive {
        return;
    }

    println!("\n{}", "Listening for room events...".yellow());
    println!("Press {} to leave.", "Ctrl+C".bold());
    loop {
        match client.next_event(Duration::from_secs(30)).await {
            Some(event) => print_event(&event),
            None => {
                if client.send(ClientEvent::RecordHeartbeat(room_id.to_string())).await.is_err() {
                    println!("{} Connection closed", "✗".yellow());
                    break;
                }
            }
        }
    }
}

fn print_event(event: &ServerEvent) {
    match event {
        ServerEvent::UserJoined { id, name } => println!("{} {} joined as {}", "◀".green(), id, name.bold()),
        ServerEvent::UserLeft(id) => println!("{} {} left", "◀".yellow(), id),
        ServerEvent::Signal { from, signal } => {
            println!("{} signal from {}: {}", "◀".cyan(), from, signal["type"])
        }
        ServerEvent::PeerScreenShareStatus { user_id, is_sharing } => {
            println!("{} {} screen share: {}", "◀".cyan(), user_id, is_sharing)
        }
        ServerEvent::RecordStarted { user_id } => println!("{} recording started by {}", "●".red(), user_id),
        ServerEvent::RecordStopped { user_id } => println!("{} recording stopped by {}", "○".yellow(), user_id),
        other => println!("{} {:?}", "◀".green(), other),
    }
}

async fn meet(server: &str, room_id: &str, name: &str, want_video: bool, want_audio: bool) {
    telemetry::init();

    let mut config = Config::from_env();
    config.signaling.url = signal_url(server);

    let mut options = SessionOptions::new(room_id, name);
    options.want_video = want_video;
    options.want_audio = want_audio;

    let (session, mut notices) = match MeetingSession::connect(&config, options).await {
        Ok(session) => session,
        Err(e) => {
            println!("{} Cannot start session: {}", "✗".red(), e);
            return;
        }
    };
    println!("{} Session started for room {}", "✓".green(), room_id.green().bold());
    print_meet_help();

    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            print_notice(&notice);
        }
    });

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "►".cyan());
        let _ = io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            _ => break,
        };
        let words: Vec<&str> = line.split_whitespace().collect();

        match words.as_slice() {
            [] => continue,
            ["quit"] | ["exit"] | ["leave"] => break,
            ["help"] => print_meet_help(),
            ["status"] => {
                println!("  Identity: {}", session.local_id().unwrap_or_else(|| "-".to_string()));
                println!("  Sharing: {}", session.is_sharing());
                println!("  Recording: {:?}", session.recording_state());
            }
            ["peers"] => {
                let view = session.view();
                for peer in view.peer_ids().await {
                    let sharing = if view.is_sharing(&peer).await { " (sharing)" } else { "" };
                    println!("  - {}{}", peer, sharing.cyan());
                }
            }
            ["mute"] => match session.toggle_audio().await {
                Ok(enabled) => println!("{} Microphone {}", "✓".green(), on_off(enabled)),
                Err(e) => println!("{} {}", "✗".red(), e),
            },
            ["video"] => match session.toggle_video().await {
                Ok(enabled) => println!("{} Camera {}", "✓".green(), on_off(enabled)),
                Err(e) => println!("{} {}", "✗".red(), e),
            },
            ["share"] => match session.start_screen_share().await {
                Ok(_) => println!("{} Screen share started", "✓".green()),
                Err(e) => println!("{} {}", "✗".red(), e),
            },
            ["unshare"] => {
                session.stop_screen_share().await;
                println!("{} Screen share stopped", "✓".green());
            }
            ["record"] => {
                if let Err(e) = session.start_recording().await {
                    println!("{} {}", "✗".red(), e);
                }
            }
            ["stop"] => {
                let recording = session.recording();
                tokio::spawn(async move {
                    let _ = recording.stop().await;
                });
            }
            ["gain", source, value] => {
                let Ok(value) = value.parse::<f32>() else {
                    println!("{} Gain must be a number", "✗".yellow());
                    continue;
                };
                let recording = session.recording();
                let applied = match *source {
                    "display" => recording.set_display_gain(value).await,
                    "mic" => recording.set_microphone_gain(value).await,
                    _ => {
                        println!("{} Source must be display or mic", "✗".yellow());
                        continue;
                    }
                };
                match applied {
                    Some(gain) => println!("{} {} gain {}", "✓".green(), source, gain),
                    None => println!("{} No such input in the current recording", "✗".yellow()),
                }
            }
            _ => println!("{} Unknown command. Type 'help'.", "✗".yellow()),
        }
    }

    session.leave().await;
    println!("Goodbye!");
}

fn on_off(enabled: bool) -> ColoredString {
    if enabled {
        "on".green()
    } else {
        "off".yellow()
    }
}

fn print_notice(notice: &RecordingNotice) {
    match notice {
        RecordingNotice::Started => println!("\n{} Recording started", "●".red()),
        RecordingNotice::Denied { reason } => println!("\n{} Recording denied: {}", "✗".red(), reason),
        RecordingNotice::CaptureFailed { reason } => println!("\n{} Capture failed: {}", "✗".red(), reason),
        RecordingNotice::RemoteStarted { holder } => println!("\n{} {} is recording", "●".red(), holder),
        RecordingNotice::RemoteStopped { holder } => println!("\n{} {} stopped recording", "○".yellow(), holder),
        RecordingNotice::LockLost => println!("\n{} Recording lock lost", "✗".yellow()),
        RecordingNotice::RecorderFailed { reason } => println!("\n{} Recorder failed: {}", "✗".red(), reason),
        RecordingNotice::UploadFailed { reason } => println!("\n{} Upload failed: {}", "✗".red(), reason),
        RecordingNotice::FinalizeFailed { reason } => println!("\n{} Finalize failed: {}", "✗".red(), reason),
        RecordingNotice::Uploaded { url } => println!("\n{} Recording uploaded: {}", "✓".green(), url),
    }
}

fn print_meet_help() {
    println!("\n{}", "Meeting Commands".bold());
    println!("{}", "─".repeat(60));
    println!("  {}            toggle microphone", "mute".cyan());
    println!("  {}           toggle camera", "video".cyan());
    println!("  {} / {}  start or stop screen share", "share".cyan(), "unshare".cyan());
    println!("  {} / {}     start or stop recording", "record".cyan(), "stop".cyan());
    println!("  {} adjust recording gain", "gain display|mic <x>".cyan());
    println!("  {} / {}  list peers, show state", "peers".cyan(), "status".cyan());
    println!("  {}           leave the room", "leave".cyan());
    println!();
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("  {} - Signaling connection and identity", "connection".cyan());
    println!("  {} - Membership snapshot and join broadcast", "join-room".cyan());
    println!("  {} - Signal relay between two members", "signal-relay".cyan());
    println!("  {} - Screen share status broadcast", "screen-share".cyan());
    println!("  {} - Recording lock contention", "record-lock".cyan());
    println!("  {} - Lock released when the holder disconnects", "record-disconnect".cyan());
    println!("  {} - Late joiner learns the current recorder", "record-late-joiner".cyan());
    println!("\nExample: meet-cli validate --scenario record-lock");
}

const SCENARIOS: &[&str] = &[
    "connection",
    "join-room",
    "signal-relay",
    "screen-share",
    "record-lock",
    "record-disconnect",
    "record-late-joiner",
];

async fn execute_scenario(server: &str, scenario: &str) -> Option<bool> {
    let result = match scenario {
        "connection" => validate_connection(server).await,
        "join-room" => validate_join_room(server).await,
        "signal-relay" => validate_signal_relay(server).await,
        "screen-share" => validate_screen_share(server).await,
        "record-lock" => validate_record_lock(server).await,
        "record-disconnect" => validate_record_disconnect(server).await,
        "record-late-joiner" => validate_record_late_joiner(server).await,
        _ => return None,
    };
    Some(match result {
        Ok(()) => true,
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            false
        }
    })
}

async fn run_scenario(server: &str, scenario: &str) {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(60));

    match execute_scenario(server, scenario).await {
        Some(true) => println!("\n{}", "Scenario passed".green().bold()),
        Some(false) => println!("\n{}", "Scenario failed".red().bold()),
        None => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
        }
    }
}

async fn run_all_validations(server: &str) {
    println!("\n{}", "Running All Validation Tests".bold().green());
    println!("{}\n", "═".repeat(60).green());

    let mut passed = 0;
    let mut failed = 0;

    for scenario in SCENARIOS {
        println!("\n{} Testing: {}", "▶".cyan(), scenario.bold());
        println!("{}", "─".repeat(60));

        if execute_scenario(server, scenario).await == Some(true) {
            passed += 1;
        } else {
            failed += 1;
        }

        sleep(Duration::from_millis(200)).await;
    }

    println!("\n{}", "═".repeat(60).green());
    println!("{}", "Validation Summary".bold());
    println!("{}", "═".repeat(60).green());
    println!("  {} Passed: {}", "✓".green(), passed.to_string().green());
    println!("  {} Failed: {}", "✗".red(), failed.to_string().red());
    println!("  Total: {}", passed + failed);

    if failed == 0 {
        println!("\n{}", "All validations passed!".green().bold());
    } else {
        println!("\n{}", "Some validations failed. Check output above.".yellow());
    }
}

fn check(condition: bool, message: &str) -> Result<(), String> {
    if condition {
        println!("{} {}", "✓".green(), message);
        Ok(())
    } else {
        Err(message.to_string())
    }
}

async fn validate_connection(server: &str) -> Result<(), String> {
    let client = RawClient::connect(server).await?;
    check(!client.id.is_empty(), "Identity issued on connect")
}

async fn validate_join_room(server: &str) -> Result<(), String> {
    let room = unique_room("join");
    let mut a = RawClient::connect(server).await?;
    let mut b = RawClient::connect(server).await?;

    let first = a.join(&room, "a").await?;
    check(first.is_empty(), "First member sees an empty room")?;

    let second = b.join(&room, "b").await?;
    check(second == vec![a.id.clone()], "Second member sees the first")?;

    let joined = a
        .wait_for(Duration::from_secs(3), |event| match event {
            ServerEvent::UserJoined { id, .. } => Some(id.clone()),
            _ => None,
        })
        .await;
    check(joined.as_deref() == Some(b.id.as_str()), "Existing member told about the joiner")?;

    b.send(ClientEvent::LeaveRoom).await?;
    let left = a
        .wait_for(Duration::from_secs(3), |event| match event {
            ServerEvent::UserLeft(id) => Some(id.clone()),
            _ => None,
        })
        .await;
    check(left.as_deref() == Some(b.id.as_str()), "Leave broadcast to the room")
}

async fn validate_signal_relay(server: &str) -> Result<(), String> {
    let room = unique_room("relay");
    let mut a = RawClient::connect(server).await?;
    let mut b = RawClient::connect(server).await?;
    a.join(&room, "a").await?;
    b.join(&room, "b").await?;

    a.send(ClientEvent::Signal {
        target_id: b.id.clone(),
        signal: serde_json::json!({"type": "offer", "sdp": "v=0"}),
    })
    .await?;

    let relayed = b
        .wait_for(Duration::from_secs(3), |event| match event {
            ServerEvent::Signal { from, signal } => Some((from.clone(), signal["type"].clone())),
            _ => None,
        })
        .await;
    check(
        relayed == Some((a.id.clone(), serde_json::json!("offer"))),
        "Offer relayed with the sender's identity",
    )
}

async fn validate_screen_share(server: &str) -> Result<(), String> {
    let room = unique_room("share");
    let mut a = RawClient::connect(server).await?;
    let mut b = RawClient::connect(server).await?;
    a.join(&room, "a").await?;
    b.join(&room, "b").await?;

    a.send(ClientEvent::ScreenShareStatus {
        room_id: room.clone(),
        is_sharing: true,
        user_id: a.id.clone(),
    })
    .await?;

    let status = b
        .wait_for(Duration::from_secs(3), |event| match event {
            ServerEvent::PeerScreenShareStatus { user_id, is_sharing } => Some((user_id.clone(), *is_sharing)),
            _ => None,
        })
        .await;
    check(status == Some((a.id.clone(), true)), "Share status broadcast to peers")?;

    let mut c = RawClient::connect(server).await?;
    c.send(ClientEvent::JoinRoom {
        room_id: room.clone(),
        name: "c".to_string(),
    })
    .await?;
    let replay = c
        .wait_for(Duration::from_secs(3), |event| match event {
            ServerEvent::PeerScreenShareStatus { user_id, is_sharing: true } => Some(user_id.clone()),
            _ => None,
        })
        .await;
    check(replay.as_deref() == Some(a.id.as_str()), "Late joiner told who is sharing")
}

async fn validate_record_lock(server: &str) -> Result<(), String> {
    let room = unique_room("lock");
    let mut a = RawClient::connect(server).await?;
    let mut b = RawClient::connect(server).await?;
    a.join(&room, "a").await?;
    b.join(&room, "b").await?;

    let ack = a.request(ClientEvent::RequestStartRecord(room.clone())).await?;
    check(a.wait_ack(ack).await == Some(true), "First start request granted")?;

    let started = b
        .wait_for(Duration::from_secs(3), |event| match event {
            ServerEvent::RecordStarted { user_id } => Some(user_id.clone()),
            _ => None,
        })
        .await;
    check(started.as_deref() == Some(a.id.as_str()), "Room told who is recording")?;

    let ack = b.request(ClientEvent::RequestStartRecord(room.clone())).await?;
    check(b.wait_ack(ack).await == Some(false), "Second start request denied")?;

    let ack = a.request(ClientEvent::RequestStopRecord(room.clone())).await?;
    a.wait_ack(ack).await;
    let stopped = b
        .wait_for(Duration::from_secs(3), |event| match event {
            ServerEvent::RecordStopped { user_id } => Some(user_id.clone()),
            _ => None,
        })
        .await;
    check(stopped.as_deref() == Some(a.id.as_str()), "Stop broadcast names the holder")?;

    let ack = b.request(ClientEvent::RequestStartRecord(room)).await?;
    check(b.wait_ack(ack).await == Some(true), "Lock available again after stop")
}

async fn validate_record_disconnect(server: &str) -> Result<(), String> {
    let room = unique_room("disconnect");
    let mut a = RawClient::connect(server).await?;
    let mut b = RawClient::connect(server).await?;
    a.join(&room, "a").await?;
    b.join(&room, "b").await?;

    let ack = a.request(ClientEvent::RequestStartRecord(room.clone())).await?;
    check(a.wait_ack(ack).await == Some(true), "Holder granted the lock")?;

    let holder = a.id.clone();
    drop(a);

    let stopped = b
        .wait_for(Duration::from_secs(5), |event| match event {
            ServerEvent::RecordStopped { user_id } => Some(user_id.clone()),
            _ => None,
        })
        .await;
    check(stopped.as_deref() == Some(holder.as_str()), "Disconnect released the lock")?;

    let ack = b.request(ClientEvent::RequestStartRecord(room)).await?;
    check(b.wait_ack(ack).await == Some(true), "Lock granted to the remaining member")
}

async fn validate_record_late_joiner(server: &str) -> Result<(), String> {
    let room = unique_room("late");
    let mut a = RawClient::connect(server).await?;
    a.join(&room, "a").await?;

    let ack = a.request(ClientEvent::RequestStartRecord(room.clone())).await?;
    check(a.wait_ack(ack).await == Some(true), "Holder granted the lock")?;

    let mut c = RawClient::connect(server).await?;
    c.send(ClientEvent::JoinRoom {
        room_id: room,
        name: "late".to_string(),
    })
    .await?;
    let started = c
        .wait_for(Duration::from_secs(3), |event| match event {
            ServerEvent::RecordStarted { user_id } => Some(user_id.clone()),
            _ => None,
        })
        .await;
    check(started.as_deref() == Some(a.id.as_str()), "Late joiner told who is recording")
}

async fn interactive_mode(server: &str) {
    println!("\n{}", "Interactive Mode".bold().green());
    println!("{}", "═".repeat(60).green());
    println!("Type {} for help, {} to quit\n", "help".cyan(), "quit".cyan());

    match connect_async(signal_url(server)).await {
        Ok((ws_stream, _)) => {
            println!("{} Connected to server", "✓".green());

            let (mut write, mut read) = ws_stream.split();

            let receive_task = tokio::spawn(async move {
                while let Some(Ok(msg)) = read.next().await {
                    if let Message::Text(text) = msg {
                        println!("\n{} {}", "◀".green(), text.bright_white());
                    }
                }
            });

            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            loop {
                print!("{} ", "►".cyan());
                let _ = io::stdout().flush();

                let input = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    _ => break,
                };
                let input = input.trim();

                if input.is_empty() {
                    continue;
                }

                if input == "quit" || input == "exit" {
                    println!("Goodbye!");
                    break;
                }

                if input == "help" {
                    print_interactive_help();
                    continue;
                }

                // only frames the server understands are sent
                match ClientFrame::decode(input) {
                    Ok(_) => {
                        if write.send(Message::text(input.to_string())).await.is_ok() {
                            println!("{} Frame sent", "✓".green());
                        } else {
                            println!("{} Failed to send frame", "✗".red());
                            break;
                        }
                    }
                    Err(e) => println!("{} Invalid frame: {}. Type 'help' for examples.", "✗".yellow(), e),
                }
            }

            receive_task.abort();
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

fn print_interactive_help() {
    println!("\n{}", "Interactive Mode Commands".bold());
    println!("{}", "─".repeat(60));
    println!("Send JSON frames directly to the server.\n");

    println!("{}", "Example Frames:".bold());
    println!("\n{}:", "Join Room".cyan());
    println!(r#"  {{"event":"joinRoom","data":{{"roomId":"X","name":"Ann"}}}}"#);

    println!("\n{}:", "Signal".cyan());
    println!(r#"  {{"event":"signal","data":{{"targetId":"<id>","signal":{{"type":"offer","sdp":"v=0"}}}}}}"#);

    println!("\n{}:", "Screen Share".cyan());
    println!(r#"  {{"event":"screenShareStatus","data":{{"roomId":"X","isSharing":true,"userId":"<id>"}}}}"#);

    println!("\n{}:", "Start Recording (acknowledged)".cyan());
    println!(r#"  {{"event":"requestStartRecord","data":"X","ack":1}}"#);

    println!("\n{}:", "Stop Recording".cyan());
    println!(r#"  {{"event":"requestStopRecord","data":"X","ack":2}}"#);

    println!("\n{}:", "Leave".cyan());
    println!(r#"  {{"event":"leaveRoom"}}"#);

    println!("\n{}: quit, exit", "Commands".bold());
    println!();
}
