//! Email verification: token issue/redeem plus the delivery interface.
//!
//! Delivery itself is external; the service only hands a token to a
//! [`Mailer`]. Tokens are random, purpose-bound, TTL-bound and one-shot:
//! redeeming consumes the token whether or not it matches, so a token cannot
//! be brute-forced by repeated `createAccount` calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use lockbox_types::api::v1::VerificationPurpose;
use parking_lot::Mutex;
use rand::{CryptoRng, Rng};
use subtle::ConstantTimeEq as _;

/// Dynamic trait object for the mailer service.
pub type MailerService = Arc<dyn Mailer + Send + Sync>;

/// Trait that mail delivery backends must provide.
#[async_trait]
pub trait Mailer {
    /// Delivers a verification token to `email`.
    async fn send_verification(
        &self,
        email: &str,
        token: &str,
        purpose: VerificationPurpose,
    ) -> eyre::Result<()>;
}

/// A mailer that keeps messages in memory. Dev and tests only.
#[derive(Default)]
pub struct MemoryMailer {
    outbox: Mutex<Vec<(String, String, VerificationPurpose)>>,
}

impl MemoryMailer {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the most recent token sent to `email`, if any.
    pub fn last_token_for(&self, email: &str) -> Option<String> {
        self.outbox
            .lock()
            .iter()
            .rev()
            .find(|(to, _, _)| to == email)
            .map(|(_, token, _)| token.clone())
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send_verification(
        &self,
        email: &str,
        token: &str,
        purpose: VerificationPurpose,
    ) -> eyre::Result<()> {
        tracing::debug!("verification mail to {email} for {purpose:?}");
        self.outbox
            .lock()
            .push((email.to_owned(), token.to_owned(), purpose));
        Ok(())
    }
}

struct IssuedToken {
    token: String,
    expires_at: SystemTime,
}

/// Issued verification tokens, keyed by email and purpose.
#[derive(Default, Clone)]
pub(crate) struct VerificationTokens(
    Arc<Mutex<HashMap<(String, VerificationPurpose), IssuedToken>>>,
);

impl VerificationTokens {
    /// Issues a fresh token, replacing any outstanding one for the same email
    /// and purpose.
    pub(crate) fn issue<R: Rng + CryptoRng>(
        &self,
        rng: &mut R,
        email: &str,
        purpose: VerificationPurpose,
        ttl: Duration,
        now: SystemTime,
    ) -> String {
        let mut raw = [0u8; 16];
        rng.fill_bytes(&mut raw);
        let token = URL_SAFE_NO_PAD.encode(raw);
        self.0.lock().insert(
            (email.to_owned(), purpose),
            IssuedToken {
                token: token.clone(),
                expires_at: now + ttl,
            },
        );
        token
    }

    /// Redeems a token. One-shot: the stored token is consumed regardless of
    /// whether the presented one matched.
    pub(crate) fn redeem(
        &self,
        email: &str,
        purpose: VerificationPurpose,
        presented: &str,
        now: SystemTime,
    ) -> bool {
        let Some(issued) = self.0.lock().remove(&(email.to_owned(), purpose)) else {
            return false;
        };
        issued.expires_at > now
            && bool::from(issued.token.as_bytes().ct_eq(presented.as_bytes()))
    }

    /// Drops expired tokens.
    pub(crate) fn sweep(&self, now: SystemTime) {
        self.0.lock().retain(|_, issued| issued.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng as _;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn tokens_are_one_shot() {
        let mut rng = ChaCha12Rng::seed_from_u64(6);
        let tokens = VerificationTokens::default();
        let now = SystemTime::now();
        let token = tokens.issue(
            &mut rng,
            "a@x",
            VerificationPurpose::Signup,
            Duration::from_secs(60),
            now,
        );
        assert!(tokens.redeem("a@x", VerificationPurpose::Signup, &token, now));
        assert!(!tokens.redeem("a@x", VerificationPurpose::Signup, &token, now));
    }

    #[test]
    fn wrong_token_burns_the_issued_one() {
        let mut rng = ChaCha12Rng::seed_from_u64(7);
        let tokens = VerificationTokens::default();
        let now = SystemTime::now();
        let token = tokens.issue(
            &mut rng,
            "a@x",
            VerificationPurpose::Signup,
            Duration::from_secs(60),
            now,
        );
        assert!(!tokens.redeem("a@x", VerificationPurpose::Signup, "guess", now));
        assert!(!tokens.redeem("a@x", VerificationPurpose::Signup, &token, now));
    }

    #[test]
    fn purposes_do_not_cross() {
        let mut rng = ChaCha12Rng::seed_from_u64(8);
        let tokens = VerificationTokens::default();
        let now = SystemTime::now();
        let token = tokens.issue(
            &mut rng,
            "a@x",
            VerificationPurpose::Recover,
            Duration::from_secs(60),
            now,
        );
        assert!(!tokens.redeem("a@x", VerificationPurpose::Signup, &token, now));
    }
}
