//! Producer process supervision and coordinated shutdown.
//!
//! The quit sentinel is a courtesy: UDP gives no delivery guarantee, so the
//! exit timeout followed by a kill is what actually bounds shutdown.

use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::ProducerConfig;
use crate::error::{Error, Result};
use crate::listener::{Listener, StopOutcome};
use crate::protocol::QUIT_SENTINEL;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerOutcome {
    /// Exited on its own within the timeout
    Graceful,
    /// Still running at the deadline and was killed
    ForcedKill,
    /// No process was being supervised
    NotRunning,
    /// Waiting or killing failed; details were logged
    Failed,
}

/// Set `flag` on SIGINT or SIGTERM so the main loop can run a coordinated
/// shutdown instead of dying with the producer still attached.
pub fn register_shutdown_signals(flag: &Arc<AtomicBool>) -> Result<()> {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(flag))?;
    }
    Ok(())
}

/// Send the quit sentinel once. Delivery is not confirmed.
pub fn send_quit_signal(addr: SocketAddr) -> std::io::Result<()> {
    let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind)?;
    socket.send_to(QUIT_SENTINEL.as_bytes(), addr)?;
    Ok(())
}

/// Poll `child` until it exits or `timeout` passes.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
    }
}

/// Kill `child` and wait for it so no zombie is left behind.
fn kill_and_reap(child: &mut Child) -> std::io::Result<ExitStatus> {
    child.kill()?;
    child.wait()
}

/// Handle to the external pose producer.
pub struct ProducerProcess {
    child: Option<Child>,
    program: String,
    control_addr: SocketAddr,
    exit_timeout: Duration,
}

impl ProducerProcess {
    /// Start `interpreter script args...` in the script's directory.
    /// An empty `script` runs the interpreter with `args` only.
    pub fn launch(config: &ProducerConfig) -> Result<Self> {
        let mut command = Command::new(&config.interpreter);
        if !config.script.as_os_str().is_empty() {
            command.arg(absolute(config.script.clone()));
        }
        command.args(&config.args).stdin(Stdio::null());
        if let Some(dir) = config.working_dir() {
            command.current_dir(absolute(dir));
        }

        let process = Self::spawn(command, config.control_addr()?, config.exit_timeout())?;
        info!(
            program = %config.interpreter,
            script = %config.script.display(),
            pid = process.id(),
            "producer started"
        );
        Ok(process)
    }

    pub fn spawn(mut command: Command, control_addr: SocketAddr, exit_timeout: Duration) -> Result<Self> {
        let program = command.get_program().to_string_lossy().into_owned();
        let child = command.spawn().map_err(|source| Error::Spawn {
            program: program.clone(),
            source,
        })?;
        Ok(Self {
            child: Some(child),
            program,
            control_addr,
            exit_timeout,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Ask the producer to quit, wait up to the exit timeout, then kill it.
    /// Never fails; problems are logged and reported in the outcome.
    pub fn shutdown(&mut self) -> ProducerOutcome {
        let Some(mut child) = self.child.take() else {
            return ProducerOutcome::NotRunning;
        };

        match send_quit_signal(self.control_addr) {
            Ok(()) => info!(addr = %self.control_addr, "sent quit signal"),
            Err(e) => warn!(addr = %self.control_addr, error = %e, "failed to send quit signal"),
        }

        match wait_with_timeout(&mut child, self.exit_timeout) {
            Ok(Some(status)) => {
                info!(program = %self.program, %status, "producer closed gracefully");
                ProducerOutcome::Graceful
            }
            Ok(None) => match kill_and_reap(&mut child) {
                Ok(_) => {
                    warn!(
                        program = %self.program,
                        timeout_ms = self.exit_timeout.as_millis() as u64,
                        "producer forced to close"
                    );
                    ProducerOutcome::ForcedKill
                }
                Err(e) => {
                    error!(program = %self.program, error = %e, "failed to kill producer");
                    ProducerOutcome::Failed
                }
            },
            Err(e) => {
                error!(program = %self.program, error = %e, "failed waiting for producer");
                if let Err(e) = kill_and_reap(&mut child) {
                    error!(program = %self.program, error = %e, "failed to kill producer");
                }
                ProducerOutcome::Failed
            }
        }
    }
}

impl Drop for ProducerProcess {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub producer: ProducerOutcome,
    pub listener: StopOutcome,
}

/// Tears down the producer and the listener together.
pub struct ShutdownSupervisor {
    listener: Listener,
    producer: Option<ProducerProcess>,
}

impl ShutdownSupervisor {
    pub fn new(listener: Listener, producer: Option<ProducerProcess>) -> Self {
        Self { listener, producer }
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn producer_mut(&mut self) -> Option<&mut ProducerProcess> {
        self.producer.as_mut()
    }

    /// Producer first so it stops sending, then the listener. Repeat calls
    /// report `NotRunning` / `AlreadyClosed`.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let producer = match self.producer.as_mut() {
            Some(p) => p.shutdown(),
            None => ProducerOutcome::NotRunning,
        };
        let listener = self.listener.stop();
        let report = ShutdownReport { producer, listener };
        info!(?report, "shutdown complete");
        report
    }
}

impl Drop for ShutdownSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::mailbox::Mailbox;

    fn control_socket() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    #[test]
    fn test_send_quit_signal() {
        let (socket, addr) = control_socket();
        send_quit_signal(addr).unwrap();
        let mut buf = [0u8; 64];
        let (len, _) = socket.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], QUIT_SENTINEL.as_bytes());
    }

    #[test]
    fn test_spawn_failure() {
        let (_socket, addr) = control_socket();
        let command = Command::new("/nonexistent/producer-binary");
        assert!(matches!(
            ProducerProcess::spawn(command, addr, Duration::from_secs(1)),
            Err(Error::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_quick_exit_is_graceful() {
        let (socket, addr) = control_socket();
        let mut command = Command::new("sleep");
        command.arg("0.2");
        let mut producer = ProducerProcess::spawn(command, addr, Duration::from_secs(3)).unwrap();
        assert!(producer.is_running());

        assert_eq!(producer.shutdown(), ProducerOutcome::Graceful);
        assert!(!producer.is_running());
        let mut buf = [0u8; 64];
        let (len, _) = socket.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"__QUIT__");
    }

    #[cfg(unix)]
    #[test]
    fn test_stuck_process_is_killed() {
        let (_socket, addr) = control_socket();
        let mut command = Command::new("sleep");
        command.arg("30");
        let mut producer =
            ProducerProcess::spawn(command, addr, Duration::from_millis(200)).unwrap();

        let started = Instant::now();
        assert_eq!(producer.shutdown(), ProducerOutcome::ForcedKill);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(producer.shutdown(), ProducerOutcome::NotRunning);
    }

    #[cfg(unix)]
    #[test]
    fn test_kill_and_reap_leaves_no_zombie() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let status = kill_and_reap(&mut child).unwrap();
        assert!(!status.success());
        // reaped: the exit status is already collected
        assert_eq!(child.try_wait().unwrap(), Some(status));
    }

    #[cfg(unix)]
    #[test]
    fn test_shutdown_signal_sets_flag() {
        use std::sync::atomic::Ordering;

        let flag = Arc::new(AtomicBool::new(false));
        register_shutdown_signals(&flag).unwrap();
        signal_hook::low_level::raise(signal_hook::consts::SIGTERM).unwrap();
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_supervisor_without_producer() {
        let config = TransportConfig {
            port: 0,
            recv_timeout_ms: 50,
            ..TransportConfig::default()
        };
        let mut listener = Listener::new(config, Mailbox::new());
        listener.start().unwrap();

        let mut supervisor = ShutdownSupervisor::new(listener, None);
        let report = supervisor.shutdown();
        assert_eq!(report.producer, ProducerOutcome::NotRunning);
        assert_eq!(report.listener, StopOutcome::Joined);

        let again = supervisor.shutdown();
        assert_eq!(again.listener, StopOutcome::AlreadyClosed);
    }

    #[test]
    fn test_absolute_path() {
        let abs = PathBuf::from("/opt/producer/main.py");
        assert_eq!(absolute(abs.clone()), abs);
        assert!(absolute(PathBuf::from("scripts/main.py")).is_absolute());
    }
}
