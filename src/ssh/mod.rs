//! Remote execution over SSH
//!
//! - `known_hosts` - trust-on-first-use host key pinning
//! - session-per-step execution with streamed stdout/stderr
//! - SFTP upload with a privilege-raising move
//! - reboot handling: drop the session, poll for sshd, resume
//!
//! ssh2 sessions are blocking, so all transport work runs on the blocking
//! thread pool; the async wrappers are thin. Cancellation reaches in-flight
//! sessions through a watchdog thread that force-closes the TCP socket when
//! the token fires, which unblocks any read mid-handshake or mid-script.

mod known_hosts;

pub use known_hosts::KnownHostsStore;

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ssh2::Session;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::{HolodeckError, Result};
use crate::output::OutputLine;

/// First dial to a host: 20 attempts, 1 second apart.
pub const INITIAL_DIAL_ATTEMPTS: u32 = 20;
const DIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Reboot wait: 30 polls, 10 seconds apart.
pub const REBOOT_WAIT_ATTEMPTS: u32 = 30;
const REBOOT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const STDERR_TAIL_LINES: usize = 20;

/// How often the watchdog looks at the cancellation token while a blocking
/// session operation is in flight.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Connection parameters for one host.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub private_key: PathBuf,
}

impl SshConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>, private_key: PathBuf) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            private_key,
        }
    }
}

/// Executes scripts and uploads files on a single remote host.
///
/// Each step opens a fresh connection: some steps change group membership
/// that only takes effect for new shells, so sessions are never reused
/// across steps.
pub struct RemoteExecutor {
    transport: Transport,
}

impl RemoteExecutor {
    pub fn new(
        config: SshConfig,
        known_hosts: Arc<KnownHostsStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport: Transport {
                config,
                known_hosts,
                cancel,
                dialed: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    pub fn host(&self) -> &str {
        &self.transport.config.host
    }

    /// Run a script, streaming its output into `sink`. With `expect_reboot`
    /// the session dropping mid-script is treated as the reboot starting and
    /// the call blocks until sshd is reachable again.
    pub async fn run_script(
        &self,
        node: &str,
        script: &str,
        expect_reboot: bool,
        sink: mpsc::Sender<OutputLine>,
    ) -> Result<()> {
        let transport = self.transport.clone();
        let node = node.to_string();
        let script = script.to_string();
        tokio::task::spawn_blocking(move || {
            transport.run_script_blocking(&node, &script, expect_reboot, &sink)
        })
        .await
        .map_err(|_| HolodeckError::Cancelled)?
    }

    /// Run a command and return its stdout. Output is captured, not
    /// streamed; credential extraction must never reach the progress sink.
    pub async fn capture(&self, node: &str, command: &str) -> Result<String> {
        let transport = self.transport.clone();
        let node = node.to_string();
        let command = command.to_string();
        tokio::task::spawn_blocking(move || transport.capture_blocking(&node, &command))
            .await
            .map_err(|_| HolodeckError::Cancelled)?
    }

    /// Upload `content` to `remote_path` through SFTP plus a privileged move.
    pub async fn upload(&self, node: &str, content: Vec<u8>, remote_path: &str) -> Result<()> {
        let transport = self.transport.clone();
        let node = node.to_string();
        let remote_path = remote_path.to_string();
        tokio::task::spawn_blocking(move || {
            transport.upload_blocking(&node, &content, &remote_path)
        })
        .await
        .map_err(|_| HolodeckError::Cancelled)?
    }
}

#[derive(Clone)]
struct Transport {
    config: SshConfig,
    known_hosts: Arc<KnownHostsStore>,
    cancel: CancellationToken,
    dialed: Arc<AtomicBool>,
}

/// An authenticated session plus a clone of its TCP socket. The clone is
/// what the cancellation watchdog shuts down to unblock reads.
struct Connection {
    session: Session,
    socket: TcpStream,
}

impl Transport {
    fn run_script_blocking(
        &self,
        node: &str,
        script: &str,
        expect_reboot: bool,
        sink: &mpsc::Sender<OutputLine>,
    ) -> Result<()> {
        let connection = self.connect()?;

        let mut channel = connection
            .session
            .channel_session()
            .map_err(|e| HolodeckError::ssh(&self.config.host, e))?;
        channel
            .exec(script)
            .map_err(|e| HolodeckError::ssh(&self.config.host, e))?;

        // Drain stdout here, stderr on the copy worker; the worker is joined
        // before the exit status is inspected so the caller observes every
        // remote line even on failures. Cancellation closes the socket, so
        // both loops unblock, drain and fall through to the check below.
        let stderr_tail = self.with_cancel_watchdog(&connection.socket, || {
            std::thread::scope(|scope| {
                let stderr_stream = channel.stderr();
                let worker = scope.spawn(|| {
                    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                    for line in BufReader::new(stderr_stream).lines() {
                        let Ok(line) = line else { break };
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line.clone());
                        let _ = sink.blocking_send(OutputLine::remote(line));
                        if self.cancel.is_cancelled() {
                            break;
                        }
                    }
                    tail
                });

                for line in BufReader::new(channel.stream(0)).lines() {
                    let Ok(line) = line else { break };
                    let _ = sink.blocking_send(OutputLine::remote(line));
                    if self.cancel.is_cancelled() {
                        break;
                    }
                }

                worker.join().expect("stderr copy worker panicked")
            })
        });

        if self.cancel.is_cancelled() {
            return Err(HolodeckError::Cancelled);
        }

        let _ = channel.send_eof();
        let close_result = channel.wait_close();

        if expect_reboot {
            // A clean non-zero exit means the script failed before the
            // reboot was issued; a dropped transport is the reboot kicking in
            if close_result.is_ok() {
                if let Ok(exit_code) = channel.exit_status() {
                    if exit_code != 0 {
                        return Err(HolodeckError::RemoteExec {
                            node: node.to_string(),
                            exit_code,
                            stderr_tail: stderr_tail.into_iter().collect::<Vec<_>>().join("\n"),
                        });
                    }
                }
            }
            drop(channel);
            drop(connection);
            self.wait_for_reboot(node, sink)?;
            return Ok(());
        }

        close_result.map_err(|e| HolodeckError::ssh(&self.config.host, e))?;
        let exit_code = channel
            .exit_status()
            .map_err(|e| HolodeckError::ssh(&self.config.host, e))?;
        if exit_code != 0 {
            return Err(HolodeckError::RemoteExec {
                node: node.to_string(),
                exit_code,
                stderr_tail: stderr_tail.into_iter().collect::<Vec<_>>().join("\n"),
            });
        }
        Ok(())
    }

    fn capture_blocking(&self, node: &str, command: &str) -> Result<String> {
        let connection = self.connect()?;
        let mut channel = connection
            .session
            .channel_session()
            .map_err(|e| HolodeckError::ssh(&self.config.host, e))?;
        channel
            .exec(command)
            .map_err(|e| HolodeckError::ssh(&self.config.host, e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let read_result = self.with_cancel_watchdog(&connection.socket, || {
            let result = channel.read_to_string(&mut stdout);
            let _ = channel.stderr().read_to_string(&mut stderr);
            result
        });

        if self.cancel.is_cancelled() {
            return Err(HolodeckError::Cancelled);
        }
        read_result.map_err(|e| HolodeckError::io(&self.config.host, e))?;

        channel
            .wait_close()
            .map_err(|e| HolodeckError::ssh(&self.config.host, e))?;
        let exit_code = channel
            .exit_status()
            .map_err(|e| HolodeckError::ssh(&self.config.host, e))?;
        if exit_code != 0 {
            let tail: Vec<&str> = stderr.lines().rev().take(STDERR_TAIL_LINES).collect();
            return Err(HolodeckError::RemoteExec {
                node: node.to_string(),
                exit_code,
                stderr_tail: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
            });
        }
        Ok(stdout)
    }

    fn upload_blocking(&self, node: &str, content: &[u8], remote_path: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(HolodeckError::Cancelled);
        }
        let connection = self.connect()?;

        let file_name = remote_path.rsplit('/').next().unwrap_or(remote_path);
        let staging = format!("/tmp/holodeck-{file_name}");

        self.with_cancel_watchdog(&connection.socket, || -> Result<()> {
            let sftp = connection
                .session
                .sftp()
                .map_err(|e| HolodeckError::ssh(&self.config.host, e))?;
            let mut remote_file = sftp
                .create(std::path::Path::new(&staging))
                .map_err(|e| HolodeckError::ssh(&self.config.host, e))?;
            remote_file
                .write_all(content)
                .map_err(|e| HolodeckError::io(&staging, e))?;
            Ok(())
        })?;
        if self.cancel.is_cancelled() {
            return Err(HolodeckError::Cancelled);
        }

        // The final location usually needs root; move it there in a fresh
        // session and create the destination directory on the way
        let directory = remote_path.rsplit_once('/').map(|(d, _)| d).unwrap_or("/");
        let move_command = format!(
            "sudo mkdir -p '{directory}' && sudo mv '{staging}' '{remote_path}' && sudo chmod 0644 '{remote_path}'"
        );
        drop(connection);
        self.capture_blocking(node, &move_command)?;
        Ok(())
    }

    /// Run `f` while a watchdog thread watches the cancellation token. When
    /// the token fires the watchdog shuts the socket down, so any read `f`
    /// is blocked on returns; callers re-check the token afterwards and map
    /// the torn-down session to the cancellation error.
    fn with_cancel_watchdog<T>(&self, socket: &TcpStream, f: impl FnOnce() -> T) -> T {
        let done = Mutex::new(false);
        let finished = Condvar::new();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let mut guard = done.lock().expect("watchdog mutex poisoned");
                while !*guard {
                    if self.cancel.is_cancelled() {
                        let _ = socket.shutdown(Shutdown::Both);
                        return;
                    }
                    let (next, _timed_out) = finished
                        .wait_timeout(guard, CANCEL_POLL_INTERVAL)
                        .expect("watchdog mutex poisoned");
                    guard = next;
                }
            });

            let result = f();
            *done.lock().expect("watchdog mutex poisoned") = true;
            finished.notify_all();
            result
        })
    }

    /// Connect, verify the host key (TOFU) and authenticate. The first dial
    /// to a host retries; later dials fail fast and leave retries to the
    /// caller.
    fn connect(&self) -> Result<Connection> {
        let attempts = if self.dialed.load(Ordering::Relaxed) {
            1
        } else {
            INITIAL_DIAL_ATTEMPTS
        };

        let mut last_error = None;
        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return Err(HolodeckError::Cancelled);
            }
            match self.connect_once() {
                Ok(connection) => {
                    self.dialed.store(true, Ordering::Relaxed);
                    return Ok(connection);
                }
                // A pinned-key mismatch is never retried; neither is a
                // cancellation
                Err(e @ HolodeckError::HostKeyMismatch { .. })
                | Err(e @ HolodeckError::Cancelled) => return Err(e),
                Err(e) => {
                    tracing::debug!(
                        host = %self.config.host,
                        attempt,
                        attempts,
                        error = %e,
                        "ssh dial failed"
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        std::thread::sleep(DIAL_RETRY_DELAY);
                    }
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Err(HolodeckError::Cancelled);
        }
        match last_error {
            Some(HolodeckError::Ssh { .. }) | Some(HolodeckError::Io { .. }) | None => {
                Err(HolodeckError::HostUnreachable {
                    host: self.config.host.clone(),
                    attempts,
                })
            }
            Some(other) => Err(other),
        }
    }

    fn connect_once(&self) -> Result<Connection> {
        let address = format!("{}:{}", self.config.host, self.config.port);
        let socket_addr = address
            .parse()
            .or_else(|_| {
                use std::net::ToSocketAddrs;
                address
                    .to_socket_addrs()
                    .and_then(|mut addrs| {
                        addrs.next().ok_or_else(|| {
                            std::io::Error::new(
                                std::io::ErrorKind::NotFound,
                                "hostname resolved to no addresses",
                            )
                        })
                    })
            })
            .map_err(|e| HolodeckError::io(&self.config.host, e))?;

        let stream = TcpStream::connect_timeout(&socket_addr, TCP_CONNECT_TIMEOUT)
            .map_err(|e| HolodeckError::io(&self.config.host, e))?;
        let socket = stream
            .try_clone()
            .map_err(|e| HolodeckError::io(&self.config.host, e))?;

        // Neither the handshake nor auth carries its own timeout; the
        // watchdog is what unblocks them when the run is cancelled
        let session = self.with_cancel_watchdog(&socket, || -> Result<Session> {
            let mut session =
                Session::new().map_err(|e| HolodeckError::ssh(&self.config.host, e))?;
            session.set_tcp_stream(stream);
            session
                .handshake()
                .map_err(|e| HolodeckError::ssh(&self.config.host, e))?;

            let (key, key_type) = session.host_key().ok_or_else(|| {
                HolodeckError::ssh(
                    &self.config.host,
                    ssh2::Error::from_errno(ssh2::ErrorCode::Session(-1)),
                )
            })?;
            let key_line = marshal_host_key(key, key_type);
            self.known_hosts
                .verify_or_pin(&self.config.host, &key_line)?;

            session
                .userauth_pubkey_file(&self.config.username, None, &self.config.private_key, None)
                .map_err(|e| HolodeckError::ssh(&self.config.host, e))?;
            Ok(session)
        })?;

        if self.cancel.is_cancelled() {
            return Err(HolodeckError::Cancelled);
        }
        Ok(Connection { session, socket })
    }

    /// Poll for sshd after a reboot, bounded by the configured attempts.
    fn wait_for_reboot(&self, node: &str, sink: &mpsc::Sender<OutputLine>) -> Result<()> {
        let _ = sink.blocking_send(OutputLine::info(format!(
            "waiting for {node} to come back after reboot"
        )));

        for attempt in 1..=REBOOT_WAIT_ATTEMPTS {
            if self.cancel.is_cancelled() {
                return Err(HolodeckError::Cancelled);
            }
            std::thread::sleep(REBOOT_POLL_INTERVAL);
            match self.connect_once() {
                Ok(connection) => {
                    drop(connection);
                    let _ = sink.blocking_send(OutputLine::info(format!(
                        "{node} is back (attempt {attempt})"
                    )));
                    return Ok(());
                }
                Err(e @ HolodeckError::HostKeyMismatch { .. })
                | Err(e @ HolodeckError::Cancelled) => return Err(e),
                Err(e) => {
                    tracing::debug!(host = %self.config.host, attempt, error = %e, "reboot poll");
                }
            }
        }

        Err(HolodeckError::HostUnreachable {
            host: self.config.host.clone(),
            attempts: REBOOT_WAIT_ATTEMPTS,
        })
    }
}

/// Marshal a raw host key into its authorized-keys representation.
fn marshal_host_key(key: &[u8], key_type: ssh2::HostKeyType) -> String {
    format!("{} {}", host_key_type_name(key_type), BASE64.encode(key))
}

fn host_key_type_name(key_type: ssh2::HostKeyType) -> &'static str {
    use ssh2::HostKeyType;
    match key_type {
        HostKeyType::Rsa => "ssh-rsa",
        HostKeyType::Dss => "ssh-dss",
        HostKeyType::Ecdsa256 => "ecdsa-sha2-nistp256",
        HostKeyType::Ecdsa384 => "ecdsa-sha2-nistp384",
        HostKeyType::Ecdsa521 => "ecdsa-sha2-nistp521",
        HostKeyType::Ed25519 => "ssh-ed25519",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_host_key_is_type_then_base64() {
        let line = marshal_host_key(&[1, 2, 3], ssh2::HostKeyType::Rsa);
        assert_eq!(line, format!("ssh-rsa {}", BASE64.encode([1, 2, 3])));
    }

    #[test]
    fn test_marshalled_keys_differ_when_bytes_differ() {
        let k1 = marshal_host_key(&[1, 2, 3], ssh2::HostKeyType::Ed25519);
        let k2 = marshal_host_key(&[1, 2, 4], ssh2::HostKeyType::Ed25519);
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_tofu_with_marshalled_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnownHostsStore::open(Some(dir.path())).unwrap();

        let k1 = marshal_host_key(&[9, 9, 9], ssh2::HostKeyType::Ed25519);
        let k2 = marshal_host_key(&[8, 8, 8], ssh2::HostKeyType::Ed25519);

        store.verify_or_pin("198.51.100.7", &k1).unwrap();
        store.verify_or_pin("198.51.100.7", &k1).unwrap();
        let err = store.verify_or_pin("198.51.100.7", &k2).unwrap_err();
        assert!(matches!(err, HolodeckError::HostKeyMismatch { .. }));
    }

    /// A TCP server that accepts the connection and then says nothing, so
    /// the SSH handshake blocks on a read with no timeout of its own.
    fn silent_ssh_server() -> std::net::SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((socket, _)) = listener.accept() {
                std::thread::sleep(Duration::from_secs(30));
                drop(socket);
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_cancel_tears_down_an_inflight_session() {
        let addr = silent_ssh_server();
        let dir = tempfile::tempdir().unwrap();
        let known_hosts = Arc::new(KnownHostsStore::open(Some(dir.path())).unwrap());

        let mut config = SshConfig::new(
            addr.ip().to_string(),
            "ubuntu",
            PathBuf::from("/nonexistent/id_ed25519"),
        );
        config.port = addr.port();

        let cancel = CancellationToken::new();
        let executor = RemoteExecutor::new(config, known_hosts, cancel.clone());

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let (sink, _drain) = mpsc::channel(16);
        let started = std::time::Instant::now();
        let err = executor
            .run_script("node-0", "echo hello", false, sink)
            .await
            .unwrap_err();

        // The watchdog closed the socket: the blocked session unwound well
        // inside the 20x1s dial budget and the run reports cancellation
        assert!(matches!(err, HolodeckError::Cancelled), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancelled_capture_never_dials() {
        let dir = tempfile::tempdir().unwrap();
        let known_hosts = Arc::new(KnownHostsStore::open(Some(dir.path())).unwrap());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let executor = RemoteExecutor::new(
            SshConfig::new("203.0.113.1", "ubuntu", PathBuf::from("/nonexistent/key")),
            known_hosts,
            cancel,
        );
        let err = executor.capture("node-0", "true").await.unwrap_err();
        assert!(matches!(err, HolodeckError::Cancelled));
    }
}
