use rand::RngCore;
use subtle::ConstantTimeEq;

use samp_core::{ClientId, HubError};

/// Number of random bytes behind each issued secret.
const SECRET_BYTES: usize = 24;

/// The transport family a secret was issued for.
///
/// Secrets carry a per-scope prefix so a key issued on one transport is
/// recognisably foreign on the other: a web-profile client can never
/// replay a standard-profile key, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileScope {
    Standard,
    Web,
}

impl ProfileScope {
    pub fn prefix(self) -> &'static str {
        match self {
            ProfileScope::Standard => "sk:",
            ProfileScope::Web => "wk:",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProfileScope::Standard => "standard",
            ProfileScope::Web => "web",
        }
    }
}

/// Generates one unpredictable secret for `scope` from the OS RNG.
pub fn generate_secret(scope: ProfileScope) -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("{}{}", scope.prefix(), hex::encode(bytes))
}

/// Compares two secrets in time independent of where they differ.
///
/// Both are padded to a common length and the length equality is folded
/// into the comparison, so neither content nor length leaks through
/// timing.
pub fn constant_time_secret_eq(a: &str, b: &str) -> bool {
    let len = a.len().max(b.len()).max(1);
    let mut a_padded = vec![0u8; len];
    let mut b_padded = vec![0u8; len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());
    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);
    bool::from(lengths_equal & contents_equal)
}

struct KeyEntry {
    secret: String,
    id: ClientId,
    scope: ProfileScope,
}

/// Issues per-registration secrets and maps presented secrets back to
/// client identity.
#[derive(Default)]
pub struct KeyAuthority {
    issued: Vec<KeyEntry>,
}

impl KeyAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh secret bound to `id`. Uniqueness comes from the
    /// RNG width; a collision within one process lifetime is checked
    /// anyway and rejected by regeneration.
    pub fn issue(&mut self, scope: ProfileScope, id: ClientId) -> String {
        let mut secret = generate_secret(scope);
        while self.issued.iter().any(|entry| entry.secret == secret) {
            secret = generate_secret(scope);
        }
        self.issued.push(KeyEntry {
            secret: secret.clone(),
            id,
            scope,
        });
        secret
    }

    /// Maps a presented secret to the client it authenticates.
    ///
    /// The scan visits every issued entry with a constant-time compare
    /// and never exits early, so response time does not depend on the
    /// secret's content or on which entry (if any) matched.
    pub fn authenticate(&self, presented: &str) -> Result<ClientId, HubError> {
        let mut matched: Option<&ClientId> = None;
        for entry in &self.issued {
            if constant_time_secret_eq(&entry.secret, presented) {
                matched = Some(&entry.id);
            }
        }
        matched.cloned().ok_or(HubError::AuthenticationFailure)
    }

    /// As [`authenticate`](Self::authenticate), additionally requiring
    /// the secret to have been issued for `scope`.
    pub fn authenticate_scoped(
        &self,
        presented: &str,
        scope: ProfileScope,
    ) -> Result<ClientId, HubError> {
        let mut matched: Option<&ClientId> = None;
        for entry in &self.issued {
            if constant_time_secret_eq(&entry.secret, presented) && entry.scope == scope {
                matched = Some(&entry.id);
            }
        }
        matched.cloned().ok_or(HubError::AuthenticationFailure)
    }

    /// Drops every secret bound to `id`; called on unregistration.
    pub fn revoke(&mut self, id: &ClientId) {
        self.issued.retain(|entry| &entry.id != id);
    }

    /// Drops all issued key material; called at hub shutdown.
    pub fn clear(&mut self) {
        self.issued.clear();
    }
}
