//! Join credential extraction
//!
//! After `kubeadm init` succeeds on the first control plane, the
//! orchestrator mints everything joining nodes need: a fresh bootstrap
//! token, the CA certificate hash, and (HA only) the certificate key from a
//! re-upload of the control-plane certificates. All three live only in
//! process memory and are discarded at end of run.

use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::errors::{HolodeckError, Result};
use crate::provision::validate::{BOOTSTRAP_TOKEN_RE, CERTIFICATE_KEY_RE};
use crate::ssh::RemoteExecutor;

/// In-memory join credentials. Deliberately not serialisable and opaque in
/// debug output so they cannot leak into the cache file or logs.
pub struct JoinCredentials {
    pub token: String,
    pub ca_cert_hash: String,
    pub certificate_key: Option<String>,
}

impl std::fmt::Debug for JoinCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinCredentials")
            .field("token", &"<redacted>")
            .field("ca_cert_hash", &self.ca_cert_hash)
            .field(
                "certificate_key",
                &self.certificate_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Mint fresh join credentials on the first control plane.
///
/// The token is always created anew with a 2-hour TTL rather than parsed
/// out of the init log, so the cluster can be scaled later without relying
/// on ephemeral state.
pub async fn mint_credentials(
    executor: &RemoteExecutor,
    node: &str,
    ha: bool,
) -> Result<JoinCredentials> {
    let token_output = executor
        .capture(node, "sudo kubeadm token create --ttl 2h")
        .await?;
    let token = parse_bootstrap_token(&token_output).ok_or_else(|| {
        HolodeckError::ClusterBootstrap {
            node: node.to_string(),
            phase: "token-create".to_string(),
            message: "kubeadm token create returned no token".to_string(),
        }
    })?;

    let ca_pem = executor
        .capture(node, "sudo cat /etc/kubernetes/pki/ca.crt")
        .await?;
    let ca_cert_hash =
        compute_ca_cert_hash(&ca_pem).map_err(|e| HolodeckError::ClusterBootstrap {
            node: node.to_string(),
            phase: "ca-hash".to_string(),
            message: e.to_string(),
        })?;

    let certificate_key = if ha {
        let output = executor
            .capture(node, "sudo kubeadm init phase upload-certs --upload-certs")
            .await?;
        let key = parse_certificate_key(&output).ok_or_else(|| {
            HolodeckError::ClusterBootstrap {
                node: node.to_string(),
                phase: "upload-certs".to_string(),
                message: "upload-certs output carried no certificate key".to_string(),
            }
        })?;
        Some(key)
    } else {
        None
    };

    tracing::info!(node = %node, ha, "minted fresh join credentials");
    Ok(JoinCredentials {
        token,
        ca_cert_hash,
        certificate_key,
    })
}

/// Pick the bootstrap token out of `kubeadm token create` output.
pub fn parse_bootstrap_token(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| BOOTSTRAP_TOKEN_RE.is_match(line))
        .map(str::to_string)
}

/// Pick the certificate key out of `upload-certs` output: the last line
/// that is a bare 64-hex string.
pub fn parse_certificate_key(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| CERTIFICATE_KEY_RE.is_match(line))
        .next_back()
        .map(str::to_string)
}

/// Compute the kubeadm discovery hash from the cluster CA certificate:
/// SHA-256 over the DER-encoded SubjectPublicKeyInfo, `sha256:` prefixed.
pub fn compute_ca_cert_hash(ca_pem: &str) -> Result<String> {
    let block = ::pem::parse(ca_pem).map_err(|e| {
        HolodeckError::ConfigInvalid(format!("cluster CA is not valid PEM: {e}"))
    })?;
    if block.tag() != "CERTIFICATE" {
        return Err(HolodeckError::ConfigInvalid(format!(
            "cluster CA PEM holds a {:?} block, expected CERTIFICATE",
            block.tag()
        )));
    }

    let (_, certificate) = X509Certificate::from_der(block.contents()).map_err(|e| {
        HolodeckError::ConfigInvalid(format!("cluster CA does not parse as X.509: {e}"))
    })?;

    let spki_der = certificate.tbs_certificate.subject_pki.raw;
    let digest = Sha256::digest(spki_der);
    Ok(format!("sha256:{}", hex_encode(&digest)))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bootstrap_token() {
        let output = "abcdef.0123456789abcdef\n";
        assert_eq!(
            parse_bootstrap_token(output).as_deref(),
            Some("abcdef.0123456789abcdef")
        );

        // Warnings around the token line are ignored
        let noisy = "W0601 kubeadm cannot validate component configs\nabcdef.0123456789abcdef\n";
        assert_eq!(
            parse_bootstrap_token(noisy).as_deref(),
            Some("abcdef.0123456789abcdef")
        );

        assert_eq!(parse_bootstrap_token("error: no token"), None);
    }

    #[test]
    fn test_parse_certificate_key_takes_last_hex_line() {
        let key = "9aef25f4e4f1a4da0c6ba03ab4d10d16f61faf186d1a136cfbea917a04cdd434";
        let output = format!(
            "[upload-certs] Storing the certificates in Secret \"kubeadm-certs\"\n\
             [upload-certs] Using certificate key:\n{key}\n"
        );
        assert_eq!(parse_certificate_key(&output).as_deref(), Some(key));
        assert_eq!(parse_certificate_key("nothing here"), None);
    }

    #[test]
    fn test_ca_hash_rejects_garbage() {
        assert!(compute_ca_cert_hash("not pem at all").is_err());
        let wrong_block = "-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n";
        assert!(compute_ca_cert_hash(wrong_block).is_err());
    }

    #[test]
    fn test_debug_never_prints_the_token() {
        let credentials = JoinCredentials {
            token: "abcdef.0123456789abcdef".to_string(),
            ca_cert_hash: format!("sha256:{}", "a".repeat(64)),
            certificate_key: Some("0f".repeat(32)),
        };
        let printed = format!("{credentials:?}");
        assert!(!printed.contains("abcdef.0123456789abcdef"));
        assert!(!printed.contains(&"0f".repeat(32)));
        assert!(printed.contains("<redacted>"));
    }
}
