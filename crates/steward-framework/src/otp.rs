//! Time based one-time passwords guarding admin commands.
//!
//! Tokens are six digit HMAC-SHA1 TOTP codes over a base32 secret, so any
//! standard authenticator app can produce them.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::warn;

use crate::error::{ExtensionError, ExtensionResult};

type HmacSha1 = Hmac<Sha1>;

/// Default token accepted without verification.
pub const DEFAULT_BYPASS_TOKEN: &str = "000000";

/// Verifies admin tokens.
#[derive(Clone)]
pub struct OtpVerifier {
    key: Vec<u8>,
    bypass: Option<String>,
    period: u64,
    window: u64,
}

impl OtpVerifier {
    /// Creates a verifier over a base32 `secret` with a 30 second period and
    /// a window of one period either side.
    pub fn new(secret: &str) -> ExtensionResult<Self> {
        let normalized = secret.trim().trim_end_matches('=').to_ascii_uppercase();
        let key = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, &normalized)
            .ok_or_else(|| ExtensionError::validation("动态密码密钥不是有效的base32"))?;
        if key.is_empty() {
            return Err(ExtensionError::validation("动态密码密钥为空"));
        }
        Ok(Self {
            key,
            bypass: Some(DEFAULT_BYPASS_TOKEN.to_string()),
            period: 30,
            window: 1,
        })
    }

    /// A verifier without a secret: only the bypass token is accepted.
    pub fn bypass_only() -> Self {
        Self {
            key: Vec::new(),
            bypass: Some(DEFAULT_BYPASS_TOKEN.to_string()),
            period: 30,
            window: 1,
        }
    }

    /// Token accepted as is. An empty token disables the bypass.
    pub fn with_bypass(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.bypass = (!token.is_empty()).then_some(token);
        self
    }

    pub fn with_period(mut self, secs: u64) -> Self {
        self.period = secs.max(1);
        self
    }

    /// Number of periods accepted before and after the current one.
    pub fn with_window(mut self, periods: u64) -> Self {
        self.window = periods;
        self
    }

    /// The token valid at unix time `timestamp`.
    pub fn token_at(&self, timestamp: u64) -> String {
        self.token_for_counter(timestamp / self.period)
    }

    fn token_for_counter(&self, counter: u64) -> String {
        let Ok(mut mac) = HmacSha1::new_from_slice(&self.key) else {
            warn!("HMAC key rejected");
            return String::new();
        };
        mac.update(&counter.to_be_bytes());
        let hash = mac.finalize().into_bytes();
        let offset = usize::from(hash[hash.len() - 1] & 0x0f);
        let truncated = u32::from_be_bytes([
            hash[offset],
            hash[offset + 1],
            hash[offset + 2],
            hash[offset + 3],
        ]);
        format!("{:06}", (truncated & 0x7fff_ffff) % 1_000_000)
    }

    /// Checks `code` against the bypass token and the current time window.
    pub fn verify(&self, code: &str) -> bool {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        self.verify_at(code, now)
    }

    pub fn verify_at(&self, code: &str, timestamp: u64) -> bool {
        if self.bypass.as_deref() == Some(code) {
            return true;
        }
        if self.key.is_empty() || code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        let current = timestamp / self.period;
        let first = current.saturating_sub(self.window);
        (first..=current + self.window).any(|counter| self.token_for_counter(counter) == code)
    }
}

impl std::fmt::Debug for OtpVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpVerifier")
            .field("period", &self.period)
            .field("window", &self.window)
            .field("bypass", &self.bypass.is_some())
            .finish_non_exhaustive()
    }
}
