use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub struct Config {
    pub server: ServerConfig,
    pub lock: LockConfig,
    pub signaling: SignalingConfig,
    pub media: MediaConfig,
    pub recording: RecordingConfig,
    pub upload: UploadConfig,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Recording lock lease kept by the signaling server
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Zero disables lease expiry; the lock is then only released by stop or disconnect.
    pub lease_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SignalingConfig {
    pub url: String,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub ack_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
    pub track_poll_interval: Duration,
    pub camera_file: Option<PathBuf>,
    pub microphone_file: Option<PathBuf>,
    pub display_file: Option<PathBuf>,
    pub display_audio_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TurnServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

#[derive(Debug, Clone)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    pub heartbeat_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub upload_url: Option<String>,
    pub meeting_api_url: Option<String>,
    pub timeout_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key = %key, value = %raw, "Unparseable environment value, using default");
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let lock = LockConfig {
            lease_secs: env_or("RECORD_LOCK_LEASE_SECS", 30),
        };

        Self {
            server: ServerConfig {
                host: env::var("SIGNAL_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("SIGNAL_PORT", 8080),
            },
            signaling: SignalingConfig::from_env(),
            media: MediaConfig::from_env(),
            recording: RecordingConfig {
                output_dir: PathBuf::from(
                    env::var("RECORDING_OUTPUT_DIR").unwrap_or_else(|_| "./recordings".to_string()),
                ),
                heartbeat_interval: lock.heartbeat_interval(),
            },
            upload: UploadConfig {
                upload_url: env::var("UPLOAD_URL").ok(),
                meeting_api_url: env::var("MEETING_API_URL").ok(),
                timeout_secs: env_or("UPLOAD_TIMEOUT_SECS", 300),
            },
            lock,
        }
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}

impl LockConfig {
    pub fn lease(&self) -> Option<Duration> {
        (self.lease_secs > 0).then(|| Duration::from_secs(self.lease_secs))
    }

    /// Holders renew three times per lease.
    pub fn heartbeat_interval(&self) -> Duration {
        match self.lease() {
            Some(lease) => lease / 3,
            None => Duration::from_secs(10),
        }
    }
}

impl SignalingConfig {
    pub fn from_env() -> Self {
        Self {
            url: env::var("SIGNALING_URL").unwrap_or_else(|_| "ws://127.0.0.1:8080/signal".to_string()),
            reconnect_base: Duration::from_millis(env_or("RECONNECT_BASE_MS", 500)),
            reconnect_max: Duration::from_millis(env_or("RECONNECT_MAX_MS", 10_000)),
            ack_timeout: Duration::from_millis(env_or("ACK_TIMEOUT_MS", 5_000)),
        }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/signal".to_string(),
            reconnect_base: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

impl MediaConfig {
    pub fn from_env() -> Self {
        let stun_server = env::var("STUN_SERVER_URL")
            .unwrap_or_else(|_| "stun:stun.l.google.com:19302".to_string());

        let mut turn_servers = vec![];

        if let (Ok(turn_url), Ok(username), Ok(credential)) = (
            env::var("TURN_SERVER_URL"),
            env::var("TURN_USERNAME"),
            env::var("TURN_CREDENTIAL"),
        ) {
            turn_servers.push(TurnServer {
                urls: vec![turn_url],
                username,
                credential,
            });
        }

        Self {
            stun_servers: vec![stun_server],
            turn_servers,
            // zero would spin the renderers
            track_poll_interval: Duration::from_millis(env_or::<u64>("TRACK_POLL_MS", 500).max(1)),
            camera_file: env::var("CAMERA_FILE").ok().map(PathBuf::from),
            microphone_file: env::var("MICROPHONE_FILE").ok().map(PathBuf::from),
            display_file: env::var("DISPLAY_FILE").ok().map(PathBuf::from),
            display_audio_file: env::var("DISPLAY_AUDIO_FILE").ok().map(PathBuf::from),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: vec![],
            track_poll_interval: Duration::from_millis(500),
            camera_file: None,
            microphone_file: None,
            display_file: None,
            display_audio_file: None,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./recordings"),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_host(host: &str, port: u16) -> Config {
        Config {
            server: ServerConfig {
                host: host.to_string(),
                port,
            },
            lock: LockConfig { lease_secs: 30 },
            signaling: SignalingConfig::default(),
            media: MediaConfig::default(),
            recording: RecordingConfig::default(),
            upload: UploadConfig {
                upload_url: None,
                meeting_api_url: None,
                timeout_secs: 300,
            },
        }
    }

    #[test]
    fn test_parse_localhost() {
        let config = config_with_host("localhost", 8080);
        assert_eq!(config.bind_address(), ([127, 0, 0, 1], 8080));
    }

    #[test]
    fn test_parse_ipv4_address() {
        let config = config_with_host("192.168.1.1", 3000);
        assert_eq!(config.bind_address(), ([192, 168, 1, 1], 3000));
    }

    #[test]
    fn test_parse_empty_host() {
        let config = config_with_host("", 8080);
        assert_eq!(config.bind_address(), ([0, 0, 0, 0], 8080));
    }

    #[test]
    fn test_parse_invalid_hostname_defaults_to_all() {
        let config = config_with_host("invalid-hostname", 9000);
        assert_eq!(config.bind_address(), ([0, 0, 0, 0], 9000));
    }

    #[test]
    fn test_lock_lease_and_heartbeat() {
        let lock = LockConfig { lease_secs: 30 };
        assert_eq!(lock.lease(), Some(Duration::from_secs(30)));
        assert_eq!(lock.heartbeat_interval(), Duration::from_secs(10));

        let disabled = LockConfig { lease_secs: 0 };
        assert_eq!(disabled.lease(), None);
    }

    #[test]
    fn test_signaling_with_url_keeps_defaults() {
        let config = SignalingConfig::with_url("ws://example:1/signal");
        assert_eq!(config.url, "ws://example:1/signal");
        assert_eq!(config.ack_timeout, Duration::from_secs(5));
    }
}
