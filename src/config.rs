use serde::Deserialize;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{DEFAULT_CONTROL_PORT, DEFAULT_DATA_PORT};

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// One UDP datagram per pose frame
    #[default]
    Udp,
    /// Length-prefixed frames over a TCP stream
    Stream,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Receive poll interval; a timeout just re-checks the stop signal
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
    /// Grace period for the listener thread on shutdown
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    /// Largest legacy stream frame accepted
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { DEFAULT_DATA_PORT }
fn default_recv_timeout_ms() -> u64 { 1000 }
fn default_join_timeout_ms() -> u64 { 2000 }
fn default_max_frame_length() -> usize { 1024 * 1024 }

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            host: default_host(),
            port: default_port(),
            recv_timeout_ms: default_recv_timeout_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            max_frame_length: default_max_frame_length(),
        }
    }
}

impl TransportConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        resolve(&format!("{}:{}", self.host, self.port))
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoseConfig {
    /// Samples a landmark needs before its target is re-averaged
    #[serde(default = "default_samples_for_pose")]
    pub samples_for_pose: u32,
    /// Scale applied to averaged producer coordinates
    #[serde(default = "default_multiplier")]
    pub multiplier: f32,
    /// Rendered position speed cap (units per second)
    #[serde(default = "default_max_speed")]
    pub max_speed: f32,
}

fn default_samples_for_pose() -> u32 { 1 }
fn default_multiplier() -> f32 { 10.0 }
fn default_max_speed() -> f32 { 50.0 }

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            samples_for_pose: default_samples_for_pose(),
            multiplier: default_multiplier(),
            max_speed: default_max_speed(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProducerConfig {
    /// Launch and supervise the producer process
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_script")]
    pub script: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Defaults to the script's directory
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Where the quit sentinel is sent
    #[serde(default = "default_control_addr")]
    pub control_addr: String,
    #[serde(default = "default_exit_timeout_ms")]
    pub exit_timeout_ms: u64,
}

fn default_interpreter() -> String { "python".to_string() }
fn default_script() -> PathBuf { PathBuf::from("PythonScripts/main.py") }
fn default_control_addr() -> String { format!("127.0.0.1:{}", DEFAULT_CONTROL_PORT) }
fn default_exit_timeout_ms() -> u64 { 3000 }

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interpreter: default_interpreter(),
            script: default_script(),
            args: Vec::new(),
            working_dir: None,
            control_addr: default_control_addr(),
            exit_timeout_ms: default_exit_timeout_ms(),
        }
    }
}

impl ProducerConfig {
    pub fn control_addr(&self) -> Result<SocketAddr> {
        resolve(&self.control_addr)
    }

    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_timeout_ms)
    }

    pub fn working_dir(&self) -> Option<PathBuf> {
        self.working_dir.clone().or_else(|| {
            self.script
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    /// Seconds between status log lines
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: f32,
}

fn default_target_fps() -> u32 { 60 }
fn default_status_interval() -> f32 { 1.0 }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            status_interval_secs: default_status_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Filter directive; RUST_LOG takes precedence when set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write to logs/receiver_<timestamp>.log
    #[serde(default)]
    pub file: bool,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: false,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Falls back to defaults when the file is missing or invalid.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("config {}: {} (using defaults)", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pose.samples_for_pose == 0 {
            return Err(Error::InvalidConfig("pose.samples_for_pose must be at least 1".into()));
        }
        if !(self.pose.max_speed > 0.0) {
            return Err(Error::InvalidConfig("pose.max_speed must be positive".into()));
        }
        if !self.pose.multiplier.is_finite() {
            return Err(Error::InvalidConfig("pose.multiplier must be finite".into()));
        }
        if self.app.target_fps == 0 {
            return Err(Error::InvalidConfig("app.target_fps must be at least 1".into()));
        }
        if self.transport.recv_timeout_ms == 0 {
            return Err(Error::InvalidConfig("transport.recv_timeout_ms must be positive".into()));
        }
        if self.transport.join_timeout_ms == 0 {
            return Err(Error::InvalidConfig("transport.join_timeout_ms must be positive".into()));
        }
        if self.producer.exit_timeout_ms == 0 {
            return Err(Error::InvalidConfig("producer.exit_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| Error::InvalidAddress(addr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.transport.kind, TransportKind::Udp);
        assert_eq!(config.transport.port, 52733);
        assert_eq!(config.transport.recv_timeout(), Duration::from_secs(1));
        assert_eq!(config.transport.join_timeout(), Duration::from_secs(2));
        assert_eq!(config.pose.samples_for_pose, 1);
        assert_eq!(config.producer.exit_timeout(), Duration::from_secs(3));
        assert_eq!(config.producer.control_addr, "127.0.0.1:54321");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_sections() {
        let config = Config::parse(
            r#"
            [transport]
            kind = "stream"
            port = 6000

            [pose]
            samples_for_pose = 3
            multiplier = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.transport.kind, TransportKind::Stream);
        assert_eq!(config.transport.port, 6000);
        assert_eq!(config.transport.host, "127.0.0.1");
        assert_eq!(config.pose.samples_for_pose, 3);
        assert_eq!(config.pose.multiplier, 2.5);
        assert_eq!(config.pose.max_speed, 50.0);
    }

    #[test]
    fn test_rejects_zero_samples_for_pose() {
        let err = Config::parse("[pose]\nsamples_for_pose = 0\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_non_finite_multiplier() {
        let err = Config::parse("[pose]\nmultiplier = nan\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        let err = Config::parse("[pose]\nmultiplier = inf\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let err = Config::parse("[transport]\njoin_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        let err = Config::parse("[producer]\nexit_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_unknown_transport() {
        let err = Config::parse("[transport]\nkind = \"pipe\"\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[producer]\nenabled = true\ninterpreter = \"/usr/bin/python3\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert!(config.producer.enabled);
        assert_eq!(config.producer.interpreter, "/usr/bin/python3");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default("/nonexistent/landmark-stream.toml");
        assert_eq!(config.transport.port, 52733);
    }

    #[test]
    fn test_producer_working_dir_defaults_to_script_dir() {
        let producer = ProducerConfig {
            script: PathBuf::from("scripts/main.py"),
            ..ProducerConfig::default()
        };
        assert_eq!(producer.working_dir(), Some(PathBuf::from("scripts")));

        let bare = ProducerConfig {
            script: PathBuf::from("main.py"),
            ..ProducerConfig::default()
        };
        assert_eq!(bare.working_dir(), None);
    }

    #[test]
    fn test_bind_addr() {
        let transport = TransportConfig::default();
        let addr = transport.bind_addr().unwrap();
        assert_eq!(addr, "127.0.0.1:52733".parse().unwrap());
    }
}
