//! Declarative environment configuration
//!
//! - `types` - the environment file data model
//! - `loader` - file discovery and parsing
//! - `validator` - hard invariant checks

mod loader;
mod types;
mod validator;

pub use loader::{expand_home, EnvFileLoader};
pub use types::*;
pub use validator::{validate, validate_labels, LABEL_RE};
