//! Thread identifiers: opaque version-chain ids shared by every revision of a record.
//!
//! A thread id looks like `dthr_k8f2m9x1p4qz`: a fixed per-kind prefix, an
//! underscore, and a 12-character random token over `[A-Za-z0-9_-]`.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of the random part of a thread id.
pub const TOKEN_LEN: usize = 12;

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Record kinds that own a thread prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadKind {
    Decision,
    Insight,
    Context,
    Plan,
}

impl ThreadKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Decision => "dthr",
            Self::Insight => "ithr",
            Self::Context => "cthr",
            Self::Plan => "pthr",
        }
    }

    /// Mint a fresh thread id for this kind.
    pub fn generate(&self) -> String {
        generate(self.prefix())
    }

    /// True if `id` is a valid thread id carrying this kind's prefix.
    pub fn owns(&self, id: &str) -> bool {
        valid(id) && id.split_once('_').map(|(p, _)| p) == Some(self.prefix())
    }
}

/// Generate `"{prefix}_{token}"`.
pub fn generate(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let token: String = (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect();
    format!("{prefix}_{token}")
}

/// True iff `id` splits on its first `_` into a non-empty prefix and a 12-char token.
pub fn valid(id: &str) -> bool {
    let Some((prefix, token)) = id.split_once('_') else {
        return false;
    };
    !prefix.is_empty()
        && token.len() == TOKEN_LEN
        && token.bytes().all(|b| TOKEN_ALPHABET.contains(&b))
}

/// [`valid`] for untyped JSON input; anything but a string is invalid.
pub fn valid_value(value: &serde_json::Value) -> bool {
    value.as_str().is_some_and(valid)
}
