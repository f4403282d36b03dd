//! Error kinds surfaced by the provisioning core
//!
//! Each variant maps to a distinct exit condition and a distinct condition
//! message. Configuration errors and host-key mismatches are fatal; remote
//! execution errors halt the run and mark the environment Degraded.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HolodeckError {
    /// The declarative spec violates an invariant. Reported before any side effect.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A cloud provider call failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// Git ref resolution failed.
    #[error(transparent)]
    Resolver(#[from] ResolverError),

    /// A remote script exited non-zero.
    #[error("remote script failed on {node} (exit code {exit_code}):\n{stderr_tail}")]
    RemoteExec {
        node: String,
        exit_code: i32,
        stderr_tail: String,
    },

    /// Host did not accept SSH within the configured bound.
    #[error("host {host} unreachable after {attempts} attempts")]
    HostUnreachable { host: String, attempts: u32 },

    /// The trust-on-first-use cache disagrees with the presented host key.
    /// Never retried, never recovered.
    #[error("host key mismatch for {host}: presented key differs from the pinned key (possible man-in-the-middle)")]
    HostKeyMismatch { host: String },

    /// kubeadm init or join failed.
    #[error("cluster bootstrap failed on {node} during {phase}: {message}")]
    ClusterBootstrap {
        node: String,
        phase: String,
        message: String,
    },

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying SSH transport failure (handshake, auth, channel).
    #[error("ssh error on {host}: {source}")]
    Ssh {
        host: String,
        #[source]
        source: ssh2::Error,
    },

    /// Local filesystem failure (cache file, known-hosts store, key material).
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Script or config template failed to render.
    #[error("failed to render {name}: {source}")]
    Template {
        name: String,
        #[source]
        source: tera::Error,
    },
}

impl HolodeckError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn ssh(host: impl Into<String>, source: ssh2::Error) -> Self {
        Self::Ssh {
            host: host.into(),
            source,
        }
    }
}

/// Ref resolution failures, distinguished so callers can decide retry policy.
/// The resolver itself never retries.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("ref {reference:?} not found in {repo}")]
    RefNotFound { repo: String, reference: String },

    #[error("rate limited while resolving {reference:?} in {repo}")]
    RateLimited { repo: String, reference: String },

    #[error("unsupported repository url {url:?}: only github.com repositories are supported")]
    InvalidRepoUrl { url: String },

    #[error("resolver request failed with status {status}: {body}")]
    Failed { status: u16, body: String },

    #[error("commit response carried no sha")]
    MissingSha,

    #[error("resolver request error: {0}")]
    Request(String),

    #[error("resolver deadline exceeded")]
    DeadlineExceeded,
}

pub type Result<T, E = HolodeckError> = std::result::Result<T, E>;
