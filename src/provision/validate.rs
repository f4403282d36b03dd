//! Allow-list validation for values interpolated into rendered shell
//!
//! Every string that reaches a script template passes through one of these
//! checks first. This is the security boundary for remote command
//! construction, not a defence-in-depth layer: a failure here prevents the
//! script from being produced at all.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{HolodeckError, Result};

pub static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Za-z][0-9A-Za-z._+~:-]*$").expect("invalid VERSION_RE"));

pub static GIT_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Za-z][0-9A-Za-z._/-]*$").expect("invalid GIT_REF_RE"));

pub static COMMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{4,40}$").expect("invalid COMMIT_RE"));

pub static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://[0-9A-Za-z][0-9A-Za-z._/~%+=-]*$").expect("invalid URL_RE"));

pub static SHA256_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{64}$").expect("invalid SHA256_RE"));

pub static ENDPOINT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Za-z][0-9A-Za-z.-]*$").expect("invalid ENDPOINT_RE"));

pub static CIDR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{1,3}(\.[0-9]{1,3}){3}/[0-9]{1,2}$").expect("invalid CIDR_RE"));

pub static FEATURE_GATES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+=(true|false)(,[A-Za-z0-9]+=(true|false))*$").expect("invalid FEATURE_GATES_RE"));

pub static BOOTSTRAP_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]{6}\.[a-z0-9]{16}$").expect("invalid BOOTSTRAP_TOKEN_RE"));

pub static CA_CERT_HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^sha256:[0-9a-f]{64}$").expect("invalid CA_CERT_HASH_RE"));

pub static CERTIFICATE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{64}$").expect("invalid CERTIFICATE_KEY_RE"));

pub static MAKE_TARGET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Za-z][0-9A-Za-z._-]*$").expect("invalid MAKE_TARGET_RE"));

pub static ENV_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").expect("invalid ENV_NAME_RE"));

pub static ENV_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Za-z ._/:,=+-]*$").expect("invalid ENV_VALUE_RE"));

pub static NODE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Za-z][0-9A-Za-z.-]*$").expect("invalid NODE_NAME_RE"));

/// Check `value` against `pattern`, naming the offending field on failure.
pub fn checked(field: &str, value: &str, pattern: &Regex) -> Result<String> {
    if pattern.is_match(value) {
        Ok(value.to_string())
    } else {
        Err(HolodeckError::ConfigInvalid(format!(
            "{field} value {value:?} contains characters not allowed in a rendered script"
        )))
    }
}

/// Like [`checked`] for optional values; `None` passes through.
pub fn checked_opt(field: &str, value: Option<&str>, pattern: &Regex) -> Result<Option<String>> {
    value.map(|v| checked(field, v, pattern)).transpose()
}
