//! Cryptographic primitives consumed by the rest of the crate.
//!
//! Everything here is a thin, typed layer over the underlying providers:
//! AES-256-GCM for authenticated encryption, PBKDF2-HMAC-SHA256 for password
//! key derivation, RSA-2048 with OAEP for key wrapping and PSS for signatures,
//! and HMAC-SHA256 for keyed tags. Entropy is always passed in explicitly as
//! `Rng + CryptoRng`; this module holds no global state.
//!
//! Main types:
//! * [`AeadKey`] / [`SealedBytes`]
//! * [`KeyPair`] / [`PublicKey`] / [`PrivateKey`]
//! * [`HmacKey`]
//! * [`KdfParams`] / [`SigningParams`]

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use rand::{CryptoRng, Rng};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier as _};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size in bytes of an [`AeadKey`].
pub const AEAD_KEY_SIZE: usize = 32;
/// Size in bytes of an AEAD nonce.
pub const AEAD_NONCE_SIZE: usize = 12;
/// Size in bytes of an [`HmacKey`] and of HMAC-SHA256 tags.
pub const HMAC_KEY_SIZE: usize = 32;
/// RSA modulus size used for long-term and signing keypairs.
pub const RSA_BITS: usize = 2048;

/// Serde helpers for binary fields, encoded as standard base64 strings on the wire.
pub mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize as _, Deserializer, Serializer};

    /// Serializes a byte slice as a base64 string.
    pub fn serialize<S: Serializer>(bytes: impl AsRef<[u8]>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    /// Deserializes a base64 string into a byte vector.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// All errors produced by the primitive layer.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD decryption failed; the ciphertext or its associated data was tampered with.
    #[error("AEAD open failed")]
    DecryptionFailed,
    /// RSA key unwrap failed. Distinguished from [`CryptoError::DecryptionFailed`]
    /// because callers translate it into an access decision, not a tamper verdict.
    #[error("key unwrap failed")]
    UnwrapFailed,
    /// The unwrapped key material has the wrong length.
    #[error("unwrapped key has invalid size {0}")]
    InvalidKeySize(usize),
    /// Keypair generation failed.
    #[error("RSA keygen failed: {0}")]
    KeyGeneration(rsa::Error),
    /// RSA key wrap failed.
    #[error("key wrap failed: {0}")]
    WrapFailed(rsa::Error),
    /// A key could not be decoded from its DER representation.
    #[error("malformed key encoding")]
    MalformedKey,
    /// The KDF or signing parameters name an unsupported scheme.
    #[error("unsupported parameters: {0}")]
    UnsupportedParams(&'static str),
}

/// Returns `n` cryptographically random bytes.
pub fn random_bytes<R: Rng + CryptoRng>(rng: &mut R, n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n];
    rng.fill_bytes(&mut out);
    out
}

/// Password key-derivation parameters.
///
/// The parameters travel with the account so that clients can re-derive the
/// same key on every device. Only PBKDF2-HMAC-SHA256 is recognized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// The KDF algorithm identifier.
    pub algorithm: KdfAlgorithm,
    /// PBKDF2 iteration count.
    pub iterations: u32,
    /// Per-derivation random salt.
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    /// Length of the derived key in bytes.
    pub key_length: usize,
}

/// Recognized KDF algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfAlgorithm {
    /// PBKDF2 with HMAC-SHA256 as the PRF.
    #[serde(rename = "PBKDF2-HMAC-SHA256")]
    Pbkdf2HmacSha256,
}

impl KdfParams {
    /// Default iteration count for newly generated parameters.
    pub const DEFAULT_ITERATIONS: u32 = 100_000;
    /// Salt length for newly generated parameters.
    pub const SALT_SIZE: usize = 16;

    /// Generates fresh parameters with a random salt and default hardness.
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        Self {
            algorithm: KdfAlgorithm::Pbkdf2HmacSha256,
            iterations: Self::DEFAULT_ITERATIONS,
            salt: random_bytes(rng, Self::SALT_SIZE),
            key_length: AEAD_KEY_SIZE,
        }
    }

    /// Like [`KdfParams::generate`] but with a caller-provided salt.
    ///
    /// Used for simulated auth records where the salt must be deterministic.
    pub fn with_salt(salt: Vec<u8>) -> Self {
        Self {
            algorithm: KdfAlgorithm::Pbkdf2HmacSha256,
            iterations: Self::DEFAULT_ITERATIONS,
            salt,
            key_length: AEAD_KEY_SIZE,
        }
    }
}

/// Derives raw key bytes from a password under the given parameters.
pub fn derive_key_bytes(password: &[u8], params: &KdfParams) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let KdfAlgorithm::Pbkdf2HmacSha256 = params.algorithm;
    if params.iterations == 0 {
        return Err(CryptoError::UnsupportedParams("iterations must be non-zero"));
    }
    let mut out = Zeroizing::new(vec![0u8; params.key_length]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password, &params.salt, params.iterations, &mut out);
    Ok(out)
}

/// Derives an [`AeadKey`] from a password under the given parameters.
pub fn derive_key(password: &[u8], params: &KdfParams) -> Result<AeadKey, CryptoError> {
    if params.key_length != AEAD_KEY_SIZE {
        return Err(CryptoError::UnsupportedParams("key length must be 32"));
    }
    let bytes = derive_key_bytes(password, params)?;
    AeadKey::from_slice(&bytes)
}

/// A nonce-and-ciphertext pair produced by [`AeadKey::seal`].
///
/// The AEAD tag is appended to the ciphertext; the associated data used at
/// seal time must be presented again to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBytes {
    /// The fresh nonce chosen at seal time.
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    /// Ciphertext with appended authentication tag.
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

/// A 256-bit symmetric AEAD key. Zeroized on drop and never serialized.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey([u8; AEAD_KEY_SIZE]);

impl fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AeadKey(..)")
    }
}

impl AeadKey {
    /// Generates a fresh random key.
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let mut key = [0u8; AEAD_KEY_SIZE];
        rng.fill_bytes(&mut key);
        Self(key)
    }

    /// Wraps existing key bytes. Fails if the slice is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; AEAD_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeySize(bytes.len()))?;
        Ok(Self(key))
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Seals `plaintext` with a fresh random nonce, binding `aad` into the tag.
    pub fn seal<R: Rng + CryptoRng>(
        &self,
        rng: &mut R,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<SealedBytes, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.0).expect("key is 32 bytes");
        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        rng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(SealedBytes {
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    /// Opens a [`SealedBytes`], verifying the tag over ciphertext and `aad`.
    ///
    /// Failure means tampering or the wrong key and is fatal to the caller.
    pub fn open(&self, aad: &[u8], sealed: &SealedBytes) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.0).expect("key is 32 bytes");
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&sealed.nonce),
                Payload {
                    msg: &sealed.ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(Zeroizing::new(plaintext))
    }
}

/// An [`AeadKey`] wrapped under an accessor's RSA public key with OAEP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey(#[serde(with = "base64_bytes")] pub Vec<u8>);

/// SHA-256 fingerprint of a public key's SPKI DER encoding.
///
/// Stored in accessor tables as a trust-on-first-use defense against key
/// substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(#[serde(with = "fingerprint_serde")] [u8; 32]);

mod fingerprint_serde {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(de)?;
        let bytes = STANDARD.decode(s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("fingerprint must be 32 bytes"))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Signature scheme parameters. They travel with every signed object so a
/// verifier reconstructs the exact scheme the signer used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningParams {
    /// The signature scheme identifier.
    pub scheme: SignatureScheme,
    /// PSS salt length in bytes.
    pub salt_length: usize,
}

/// Recognized signature schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureScheme {
    /// RSA-PSS with SHA-256 as both message digest and MGF1 hash.
    #[serde(rename = "RSA-PSS-SHA256")]
    RsaPssSha256,
}

impl Default for SigningParams {
    fn default() -> Self {
        Self {
            scheme: SignatureScheme::RsaPssSha256,
            salt_length: 32,
        }
    }
}

/// A public key together with a signature over its SPKI DER encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPublicKey {
    /// The raw signature bytes.
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    /// The scheme the signature was produced under.
    pub params: SigningParams,
}

/// An RSA public key, serialized as base64 SPKI DER.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.fingerprint()).finish()
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        let der = self.to_der().map_err(serde::ser::Error::custom)?;
        base64_bytes::serialize(der, ser)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let der = base64_bytes::deserialize(de)?;
        Self::from_der(&der).map_err(serde::de::Error::custom)
    }
}

impl PublicKey {
    /// Encodes the key as SPKI DER.
    pub fn to_der(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self
            .0
            .to_public_key_der()
            .map_err(|_| CryptoError::MalformedKey)?
            .as_bytes()
            .to_vec())
    }

    /// Decodes a key from SPKI DER.
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        RsaPublicKey::from_public_key_der(der)
            .map(Self)
            .map_err(|_| CryptoError::MalformedKey)
    }

    /// Returns the SHA-256 fingerprint of the SPKI DER encoding.
    pub fn fingerprint(&self) -> Fingerprint {
        let der = self
            .0
            .to_public_key_der()
            .expect("a valid RSA public key encodes");
        Fingerprint(Sha256::digest(der.as_bytes()).into())
    }

    /// Wraps an [`AeadKey`] under this key with RSA-OAEP-SHA256.
    pub fn wrap_key<R: Rng + CryptoRng>(
        &self,
        rng: &mut R,
        key: &AeadKey,
    ) -> Result<WrappedKey, CryptoError> {
        let blob = self
            .0
            .encrypt(rng, Oaep::new::<Sha256>(), key.as_bytes())
            .map_err(CryptoError::WrapFailed)?;
        Ok(WrappedKey(blob))
    }

    /// Verifies an RSA-PSS signature over `msg`.
    ///
    /// Returns `false` on any mismatch, including unrecognized parameters.
    pub fn verify(&self, msg: &[u8], signature: &[u8], params: &SigningParams) -> bool {
        let SignatureScheme::RsaPssSha256 = params.scheme;
        if params.salt_length != SigningParams::default().salt_length {
            return false;
        }
        let Ok(signature) = Signature::try_from(signature) else {
            return false;
        };
        VerifyingKey::<Sha256>::new(self.0.clone())
            .verify(msg, &signature)
            .is_ok()
    }
}

/// An RSA private key. Never serialized directly; it only leaves memory inside
/// an AEAD-sealed envelope or a container payload.
#[derive(Clone)]
pub struct PrivateKey(RsaPrivateKey);

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl PrivateKey {
    /// Encodes the key as PKCS#8 DER. The returned buffer zeroizes on drop.
    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let doc = self
            .0
            .to_pkcs8_der()
            .map_err(|_| CryptoError::MalformedKey)?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    /// Decodes a key from PKCS#8 DER.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
        RsaPrivateKey::from_pkcs8_der(der)
            .map(Self)
            .map_err(|_| CryptoError::MalformedKey)
    }

    /// Returns the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(RsaPublicKey::from(&self.0))
    }

    /// Unwraps an [`AeadKey`] previously wrapped under the matching public key.
    ///
    /// # Errors
    /// Returns [`CryptoError::UnwrapFailed`] if the blob does not decrypt
    /// under this key.
    pub fn unwrap_key(&self, blob: &WrappedKey) -> Result<AeadKey, CryptoError> {
        let bytes = Zeroizing::new(
            self.0
                .decrypt(Oaep::new::<Sha256>(), &blob.0)
                .map_err(|_| CryptoError::UnwrapFailed)?,
        );
        AeadKey::from_slice(&bytes)
    }

    /// Signs `msg` with RSA-PSS-SHA256.
    pub fn sign<R: Rng + CryptoRng>(
        &self,
        rng: &mut R,
        msg: &[u8],
        params: &SigningParams,
    ) -> Result<Vec<u8>, CryptoError> {
        let SignatureScheme::RsaPssSha256 = params.scheme;
        if params.salt_length != SigningParams::default().salt_length {
            return Err(CryptoError::UnsupportedParams("unsupported PSS salt length"));
        }
        let signing_key = SigningKey::<Sha256>::new(self.0.clone());
        let signature = signing_key.sign_with_rng(rng, msg);
        Ok(signature.to_vec())
    }
}

/// A freshly generated RSA keypair.
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// The public half.
    pub public: PublicKey,
    /// The private half.
    pub private: PrivateKey,
}

impl KeyPair {
    /// Generates a new RSA-2048 keypair.
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(rng, RSA_BITS).map_err(CryptoError::KeyGeneration)?;
        let public = RsaPublicKey::from(&private);
        Ok(Self {
            public: PublicKey(public),
            private: PrivateKey(private),
        })
    }
}

/// A 256-bit HMAC-SHA256 key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HmacKey([u8; HMAC_KEY_SIZE]);

impl fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HmacKey(..)")
    }
}

impl HmacKey {
    /// Generates a fresh random key.
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let mut key = [0u8; HMAC_KEY_SIZE];
        rng.fill_bytes(&mut key);
        Self(key)
    }

    /// Wraps existing key bytes. Fails if the slice is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; HMAC_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeySize(bytes.len()))?;
        Ok(Self(key))
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Computes the HMAC-SHA256 tag over `msg`.
    pub fn tag(&self, msg: &[u8]) -> [u8; 32] {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.0).expect("HMAC accepts any key length");
        mac.update(msg);
        mac.finalize().into_bytes().into()
    }

    /// Verifies a tag over `msg` in constant time.
    pub fn verify(&self, msg: &[u8], tag: &[u8]) -> bool {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.0).expect("HMAC accepts any key length");
        mac.update(msg);
        mac.verify_slice(tag).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng as _;
    use rand_chacha::ChaCha12Rng;

    fn rng() -> ChaCha12Rng {
        ChaCha12Rng::seed_from_u64(42)
    }

    #[test]
    fn seal_open_roundtrip() {
        let mut rng = rng();
        let key = AeadKey::generate(&mut rng);
        let sealed = key.seal(&mut rng, b"aad", b"attack at dawn").unwrap();
        let opened = key.open(b"aad", &sealed).unwrap();
        assert_eq!(&opened[..], b"attack at dawn");
    }

    #[test]
    fn open_rejects_tampered_ciphertext() {
        let mut rng = rng();
        let key = AeadKey::generate(&mut rng);
        let mut sealed = key.seal(&mut rng, b"aad", b"payload").unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert!(matches!(
            key.open(b"aad", &sealed),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn open_rejects_wrong_aad() {
        let mut rng = rng();
        let key = AeadKey::generate(&mut rng);
        let sealed = key.seal(&mut rng, b"container-a", b"payload").unwrap();
        assert!(key.open(b"container-b", &sealed).is_err());
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let mut rng = rng();
        let pair = KeyPair::generate(&mut rng).unwrap();
        let key = AeadKey::generate(&mut rng);
        let wrapped = pair.public.wrap_key(&mut rng, &key).unwrap();
        let unwrapped = pair.private.unwrap_key(&wrapped).unwrap();
        assert_eq!(key.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn unwrap_under_wrong_key_fails() {
        let mut rng = rng();
        let pair = KeyPair::generate(&mut rng).unwrap();
        let other = KeyPair::generate(&mut rng).unwrap();
        let key = AeadKey::generate(&mut rng);
        let wrapped = pair.public.wrap_key(&mut rng, &key).unwrap();
        assert!(matches!(
            other.private.unwrap_key(&wrapped),
            Err(CryptoError::UnwrapFailed)
        ));
    }

    #[test]
    fn sign_verify_and_bitflip() {
        let mut rng = rng();
        let pair = KeyPair::generate(&mut rng).unwrap();
        let params = SigningParams::default();
        let msg = b"public key material";
        let sig = pair.private.sign(&mut rng, msg, &params).unwrap();
        assert!(pair.public.verify(msg, &sig, &params));
        let mut bad = msg.to_vec();
        bad[0] ^= 0x80;
        assert!(!pair.public.verify(&bad, &sig, &params));
    }

    #[test]
    fn kdf_is_deterministic_per_params() {
        let mut rng = rng();
        let params = KdfParams::generate(&mut rng);
        let a = derive_key(b"password", &params).unwrap();
        let b = derive_key(b"password", &params).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        let c = derive_key(b"Password", &params).unwrap();
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn public_key_serde_roundtrip() {
        let mut rng = rng();
        let pair = KeyPair::generate(&mut rng).unwrap();
        let json = serde_json::to_string(&pair.public).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back.fingerprint(), pair.public.fingerprint());
    }

    #[test]
    fn hmac_tag_verifies() {
        let mut rng = rng();
        let key = HmacKey::generate(&mut rng);
        let tag = key.tag(b"msg");
        assert!(key.verify(b"msg", &tag));
        assert!(!key.verify(b"other", &tag));
    }
}
