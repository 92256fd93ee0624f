//! Deterministic user id derivation.
//!
//! A user id is `prefix_digest` where `prefix` is the first 20 `[a-z0-9]`
//! characters of the lower-cased email and `digest` is the first 12 lower-hex
//! characters of the MD5 of the lower-cased email. MD5 is used as a short,
//! stable fingerprint only; nothing here relies on it being collision-proof
//! against an adversary.
//!
//! The derivation must stay a pure function of the email: upstream and the
//! local user cache both key on it across restarts.

use md5::{Digest, Md5};

use crate::types::{Email, UserId};

/// Maximum number of alphanumeric characters kept from the email.
pub const PREFIX_LEN: usize = 20;

/// Number of hex characters kept from the digest.
pub const DIGEST_LEN: usize = 12;

impl UserId {
    /// Derive the stable user id for an email address.
    ///
    /// ```
    /// use replica_chat_core::{Email, UserId};
    ///
    /// let email = Email::parse("Jane.Doe@Example.com").unwrap();
    /// assert_eq!(UserId::derive(&email).as_str(), "janedoeexamplecom_0cba00ca3da1");
    /// ```
    #[must_use]
    pub fn derive(email: &Email) -> Self {
        derive_normalized(&email.normalized())
    }
}

/// `lower` must already be trimmed and lower-cased.
fn derive_normalized(lower: &str) -> UserId {
    let prefix: String = lower
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .take(PREFIX_LEN)
        .collect();

    let digest: String = hex::encode(Md5::digest(lower.as_bytes()))
        .chars()
        .take(DIGEST_LEN)
        .collect();

    UserId::new(format!("{prefix}_{digest}"))
}
