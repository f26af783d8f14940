//! Augmented-PAKE authentication (SRP-6a).
//!
//! The server stores a password *verifier*, never the password. A login is a
//! two-message handshake: the server hands out its ephemeral `B` together with
//! the stored KDF parameters, the client answers with its ephemeral `A` and a
//! proof `M`, and both sides end up with the same session key without the
//! password ever crossing the wire.
//!
//! The SRP private value `x` is not derived from the raw password but from a
//! PBKDF2-hardened auth key, so the verifier inherits the KDF's brute-force
//! resistance. Group: RFC 5054 2048-bit, hash SHA-256.
//!
//! For unknown emails the server must not reveal account existence, so
//! [`ServerSecret::simulated_record`] produces a well-formed [`AuthRecord`]
//! drawn deterministically from an HMAC of the email.

use hkdf::Hkdf;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use srp::client::SrpClient;
use srp::groups::G_2048;
use srp::server::SrpServer;
use zeroize::Zeroizing;

use crate::account::AccountId;
use crate::crypto::{self, AeadKey, CryptoError, HmacKey, KdfParams};

const SESSION_KEY_INFO: &[u8] = b"lockbox/v1/session-key";
const SIM_VERIFIER_DS: &[u8] = b"lockbox/v1/sim-verifier";
const SIM_AUTH_SALT_DS: &[u8] = b"lockbox/v1/sim-auth-salt";
const SIM_MASTER_SALT_DS: &[u8] = b"lockbox/v1/sim-master-salt";
const SIM_ACCOUNT_DS: &[u8] = b"lockbox/v1/sim-account";

/// Size of the random ephemeral secrets `a` and `b`.
const EPHEMERAL_SIZE: usize = 64;

/// Errors produced during the authentication handshake.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The proof did not verify. Deliberately carries no detail: the caller
    /// must not be able to distinguish wrong-password from unknown-account.
    #[error("authentication failed")]
    ProofRejected,
    /// The client ephemeral `A` was zero modulo the group order.
    #[error("illegal client ephemeral")]
    IllegalEphemeral,
    /// A primitive failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Identifies the SRP group an [`AuthRecord`] was created under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SrpGroupId {
    /// RFC 5054 2048-bit group.
    #[serde(rename = "RFC5054-2048")]
    Rfc5054Bits2048,
}

/// The server-side authentication record for one account.
///
/// Holds the verifier `v`, the group it lives in, and the KDF parameters the
/// client needs to re-derive the master key and the auth key. The verifier is
/// derivable only from the password; the server learns nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRecord {
    /// The account this record authenticates.
    pub account: AccountId,
    /// The account email, used as the SRP identity.
    pub email: String,
    /// KDF parameters for the envelope master key.
    pub master_kdf: KdfParams,
    /// KDF parameters for the SRP auth key.
    pub auth_kdf: KdfParams,
    /// The SRP group of the verifier.
    pub group: SrpGroupId,
    /// The SRP verifier `v = g^x mod N`.
    #[serde(with = "crypto::base64_bytes")]
    pub verifier: Vec<u8>,
}

/// Derives the SRP auth key from the password.
fn derive_auth_key(password: &str, params: &KdfParams) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    crypto::derive_key_bytes(password.as_bytes(), params)
}

impl AuthRecord {
    /// Creates a record for a new password.
    ///
    /// `master_kdf` is the account's envelope KDF parameters; they are echoed
    /// in the record so `initAuth` can hand them to the client in one round.
    pub fn create<R: rand::Rng + rand::CryptoRng>(
        rng: &mut R,
        account: AccountId,
        email: &str,
        password: &str,
        master_kdf: KdfParams,
    ) -> Result<Self, AuthError> {
        let auth_kdf = KdfParams::generate(rng);
        let auth_key = derive_auth_key(password, &auth_kdf)?;
        let client = SrpClient::<Sha256>::new(&G_2048);
        let verifier = client.compute_verifier(email.as_bytes(), &auth_key, &auth_kdf.salt);
        Ok(Self {
            account,
            email: email.to_owned(),
            master_kdf,
            auth_kdf,
            group: SrpGroupId::Rfc5054Bits2048,
            verifier,
        })
    }
}

/// The public part of an auth record, handed to clients by `initAuth`.
///
/// Identical in shape for real and simulated accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthInfo {
    /// The account id (deterministic for simulated records).
    pub account: AccountId,
    /// The account email.
    pub email: String,
    /// KDF parameters for the envelope master key.
    pub master_kdf: KdfParams,
    /// KDF parameters for the SRP auth key.
    pub auth_kdf: KdfParams,
    /// The SRP group of the verifier.
    pub group: SrpGroupId,
}

impl From<&AuthRecord> for AuthInfo {
    fn from(record: &AuthRecord) -> Self {
        Self {
            account: record.account,
            email: record.email.clone(),
            master_kdf: record.master_kdf.clone(),
            auth_kdf: record.auth_kdf.clone(),
            group: record.group,
        }
    }
}

/// Client side of the login handshake.
pub struct ClientHandshake {
    a: Zeroizing<Vec<u8>>,
}

/// The client's result of a completed handshake: the proof to send and the
/// derived session key.
pub struct ClientLogin {
    /// Proof `M` to present to `createSession`.
    pub proof: Vec<u8>,
    /// The derived session key.
    pub session_key: AeadKey,
    verifier: srp::client::SrpClientVerifier<Sha256>,
}

impl ClientLogin {
    /// Verifies the server's proof `M2`, authenticating the server to the client.
    pub fn verify_server(&self, server_proof: &[u8]) -> Result<(), AuthError> {
        self.verifier
            .verify_server(server_proof)
            .map_err(|_| AuthError::ProofRejected)
    }
}

impl ClientHandshake {
    /// Samples the client ephemeral `a`.
    pub fn start<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        Self {
            a: Zeroizing::new(crypto::random_bytes(rng, EPHEMERAL_SIZE)),
        }
    }

    /// Returns the public ephemeral `A`.
    pub fn a_pub(&self) -> Vec<u8> {
        SrpClient::<Sha256>::new(&G_2048).compute_public_ephemeral(&self.a)
    }

    /// Completes the handshake against the server's `B`.
    pub fn finish(
        self,
        auth: &AuthInfo,
        password: &str,
        b_pub: &[u8],
    ) -> Result<ClientLogin, AuthError> {
        let auth_key = derive_auth_key(password, &auth.auth_kdf)?;
        let client = SrpClient::<Sha256>::new(&G_2048);
        let verifier = client
            .process_reply(
                &self.a,
                auth.email.as_bytes(),
                &auth_key,
                &auth.auth_kdf.salt,
                b_pub,
            )
            .map_err(|_| AuthError::ProofRejected)?;
        let session_key = session_key_from_premaster(verifier.key())?;
        Ok(ClientLogin {
            proof: verifier.proof().to_vec(),
            session_key,
            verifier,
        })
    }
}

/// Server side of the login handshake. Held between `initAuth` and
/// `createSession`, then discarded.
pub struct ServerHandshake {
    b: Zeroizing<Vec<u8>>,
    b_pub: Vec<u8>,
    verifier: Vec<u8>,
}

/// The server's result of a verified handshake.
pub struct ServerLogin {
    /// The derived session key.
    pub session_key: AeadKey,
    /// Server proof `M2` returned to the client.
    pub server_proof: Vec<u8>,
}

impl ServerHandshake {
    /// Samples the server ephemeral `b` and computes `B` for the record's verifier.
    pub fn start<R: rand::Rng + rand::CryptoRng>(rng: &mut R, auth: &AuthRecord) -> Self {
        let b = Zeroizing::new(crypto::random_bytes(rng, EPHEMERAL_SIZE));
        let b_pub = SrpServer::<Sha256>::new(&G_2048).compute_public_ephemeral(&b, &auth.verifier);
        Self {
            b,
            b_pub,
            verifier: auth.verifier.clone(),
        }
    }

    /// Returns the public ephemeral `B`.
    pub fn b_pub(&self) -> &[u8] {
        &self.b_pub
    }

    /// Validates the client's `(A, M)` and derives the session key.
    ///
    /// `A ≡ 0 (mod N)` is rejected before any verifier arithmetic; a zero `A`
    /// forces the shared secret to zero regardless of the password.
    pub fn verify(self, a_pub: &[u8], proof: &[u8]) -> Result<ServerLogin, AuthError> {
        if BigUint::from_bytes_be(a_pub) % &G_2048.n == BigUint::default() {
            return Err(AuthError::IllegalEphemeral);
        }
        let server = SrpServer::<Sha256>::new(&G_2048);
        let verifier = server
            .process_reply(&self.b, &self.verifier, a_pub)
            .map_err(|_| AuthError::ProofRejected)?;
        verifier
            .verify_client(proof)
            .map_err(|_| AuthError::ProofRejected)?;
        let session_key = session_key_from_premaster(verifier.key())?;
        Ok(ServerLogin {
            session_key,
            server_proof: verifier.proof().to_vec(),
        })
    }
}

/// Expands the SRP premaster secret into the AEAD session key.
fn session_key_from_premaster(premaster: &[u8]) -> Result<AeadKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, premaster);
    let mut okm = Zeroizing::new([0u8; crypto::AEAD_KEY_SIZE]);
    hk.expand(SESSION_KEY_INFO, okm.as_mut())
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    AeadKey::from_slice(okm.as_ref())
}

/// The server secret used to fabricate deterministic auth records for unknown
/// emails, so `initAuth` does not reveal account existence.
pub struct ServerSecret(HmacKey);

impl ServerSecret {
    /// Generates a fresh secret.
    pub fn generate<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        Self(HmacKey::generate(rng))
    }

    /// Wraps existing secret bytes (32 bytes).
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self(HmacKey::from_slice(bytes)?))
    }

    fn derive(&self, domain: &[u8], email: &str) -> [u8; 32] {
        let mut msg = Vec::with_capacity(domain.len() + 1 + email.len());
        msg.extend_from_slice(domain);
        msg.push(0x00);
        msg.extend_from_slice(email.as_bytes());
        self.0.tag(&msg)
    }

    /// Fabricates a deterministic, well-formed [`AuthRecord`] for an email
    /// with no account.
    ///
    /// The record is stable across calls, its salts and verifier are
    /// indistinguishable in length and shape from a real record's, and the
    /// fake password never leaves this function, so the subsequent proof
    /// verification fails exactly like a wrong password would.
    pub fn simulated_record(&self, email: &str) -> AuthRecord {
        let account_seed = self.derive(SIM_ACCOUNT_DS, email);
        let account = AccountId::from_uuid(
            uuid::Builder::from_random_bytes(
                account_seed[..16].try_into().expect("seed is 32 bytes"),
            )
            .into_uuid(),
        );
        let auth_kdf =
            KdfParams::with_salt(self.derive(SIM_AUTH_SALT_DS, email)[..KdfParams::SALT_SIZE].to_vec());
        let master_kdf = KdfParams::with_salt(
            self.derive(SIM_MASTER_SALT_DS, email)[..KdfParams::SALT_SIZE].to_vec(),
        );
        let fake_password = Zeroizing::new(self.derive(SIM_VERIFIER_DS, email));
        let client = SrpClient::<Sha256>::new(&G_2048);
        let verifier =
            client.compute_verifier(email.as_bytes(), fake_password.as_ref(), &auth_kdf.salt);
        AuthRecord {
            account,
            email: email.to_owned(),
            master_kdf,
            auth_kdf,
            group: SrpGroupId::Rfc5054Bits2048,
            verifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng as _;
    use rand_chacha::ChaCha12Rng;

    fn rng() -> ChaCha12Rng {
        ChaCha12Rng::seed_from_u64(7)
    }

    fn record(rng: &mut ChaCha12Rng, email: &str, password: &str) -> AuthRecord {
        let master_kdf = KdfParams::generate(rng);
        AuthRecord::create(rng, AccountId::generate(), email, password, master_kdf).unwrap()
    }

    #[test]
    fn handshake_with_correct_password_succeeds() {
        let mut rng = rng();
        let auth = record(&mut rng, "a@x", "pw1");
        let server = ServerHandshake::start(&mut rng, &auth);
        let client = ClientHandshake::start(&mut rng);
        let a_pub = client.a_pub();
        let b_pub = server.b_pub().to_vec();
        let login = client.finish(&AuthInfo::from(&auth), "pw1", &b_pub).unwrap();
        let issued = server.verify(&a_pub, &login.proof).unwrap();
        assert_eq!(
            issued.session_key.as_bytes(),
            login.session_key.as_bytes()
        );
        login.verify_server(&issued.server_proof).unwrap();
    }

    #[test]
    fn handshake_with_wrong_password_fails() {
        let mut rng = rng();
        let auth = record(&mut rng, "a@x", "pw1");
        let server = ServerHandshake::start(&mut rng, &auth);
        let client = ClientHandshake::start(&mut rng);
        let a_pub = client.a_pub();
        let b_pub = server.b_pub().to_vec();
        let login = client.finish(&AuthInfo::from(&auth), "pw2", &b_pub).unwrap();
        assert!(matches!(
            server.verify(&a_pub, &login.proof),
            Err(AuthError::ProofRejected)
        ));
    }

    #[test]
    fn zero_ephemeral_is_rejected() {
        let mut rng = rng();
        let auth = record(&mut rng, "a@x", "pw1");
        let server = ServerHandshake::start(&mut rng, &auth);
        let zero = vec![0u8; 256];
        assert!(matches!(
            server.verify(&zero, &[0u8; 32]),
            Err(AuthError::IllegalEphemeral)
        ));
    }

    #[test]
    fn simulated_records_are_stable_and_shaped_like_real_ones() {
        let mut rng = rng();
        let secret = ServerSecret::generate(&mut rng);
        let sim_a = secret.simulated_record("ghost@x");
        let sim_b = secret.simulated_record("ghost@x");
        assert_eq!(sim_a.account, sim_b.account);
        assert_eq!(sim_a.verifier, sim_b.verifier);
        assert_eq!(sim_a.auth_kdf.salt, sim_b.auth_kdf.salt);

        let real = record(&mut rng, "real@x", "pw1");
        assert_eq!(sim_a.verifier.len(), real.verifier.len());
        assert_eq!(sim_a.auth_kdf.salt.len(), real.auth_kdf.salt.len());
        assert_eq!(sim_a.master_kdf.salt.len(), real.master_kdf.salt.len());
    }

    #[test]
    fn simulated_handshake_rejects_any_password() {
        let mut rng = rng();
        let secret = ServerSecret::generate(&mut rng);
        let sim = secret.simulated_record("ghost@x");
        let server = ServerHandshake::start(&mut rng, &sim);
        let client = ClientHandshake::start(&mut rng);
        let a_pub = client.a_pub();
        let b_pub = server.b_pub().to_vec();
        let login = client
            .finish(&AuthInfo::from(&sim), "any password", &b_pub)
            .unwrap();
        assert!(matches!(
            server.verify(&a_pub, &login.proof),
            Err(AuthError::ProofRejected)
        ));
    }
}
