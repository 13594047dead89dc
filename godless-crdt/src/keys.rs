//! Signing identities for head links.
//!
//! An [`Identity`] is an ed25519 signing key held by the local node; an
//! [`IdentityId`] is the corresponding verifying key, used to check the
//! signatures carried by replicated head links. Both render as lowercase
//! unpadded base32 for config files and CLI output.

use std::{cmp::Ordering, fmt, str::FromStr};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::CryptoRngCore;

/// Errors from parsing key material.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid base32: {0}")]
    InvalidEncoding(#[from] data_encoding::DecodeError),

    #[error("invalid key length")]
    InvalidLength,

    #[error("invalid curve point")]
    InvalidKey(#[from] ed25519_dalek::SignatureError),
}

/// A private signing identity.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a fresh identity from the given randomness source.
    pub fn generate<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Self {
        Identity {
            signing_key: SigningKey::generate(rng),
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Identity {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// The public identifier for this identity.
    pub fn id(&self) -> IdentityId {
        IdentityId(self.signing_key.verifying_key())
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.signing_key.sign(msg)
    }
}

/// The public half of an [`Identity`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityId(VerifyingKey);

impl IdentityId {
    /// Strictly verify a signature over `msg`.
    pub fn verify(&self, msg: &[u8], signature: &Signature) -> bool {
        self.0.verify_strict(msg, signature).is_ok()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        Ok(IdentityId(VerifyingKey::from_bytes(bytes)?))
    }
}

impl PartialOrd for IdentityId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdentityId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base32::fmt(self.to_bytes()))
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base32::fmt(self.as_bytes()))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shows the public id; the private scalar stays out of logs.
        write!(f, "Identity({})", self.id())
    }
}

impl fmt::Debug for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityId({})", self)
    }
}

impl FromStr for Identity {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_bytes(&base32::parse_array(s)?))
    }
}

impl FromStr for IdentityId {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(&base32::parse_array(s)?)
    }
}

mod base32 {
    use super::KeyError;

    /// Lowercase unpadded base32.
    pub fn fmt(bytes: impl AsRef<[u8]>) -> String {
        let mut text = data_encoding::BASE32_NOPAD.encode(bytes.as_ref());
        text.make_ascii_lowercase();
        text
    }

    pub fn parse_array<const N: usize>(input: &str) -> Result<[u8; N], KeyError> {
        data_encoding::BASE32_NOPAD
            .decode(input.to_ascii_uppercase().as_bytes())?
            .try_into()
            .map_err(|_| KeyError::InvalidLength)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn identity_roundtrips_through_base32() {
        let identity = Identity::generate(&mut OsRng);
        let text = identity.to_string();
        let parsed: Identity = text.parse().unwrap();
        assert_eq!(identity.to_bytes(), parsed.to_bytes());

        let id = identity.id();
        let parsed_id: IdentityId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed_id);
    }

    #[test]
    fn signatures_verify_against_the_public_id() {
        let identity = Identity::generate(&mut OsRng);
        let other = Identity::generate(&mut OsRng);
        let sig = identity.sign(b"head");

        assert!(identity.id().verify(b"head", &sig));
        assert!(!identity.id().verify(b"tail", &sig));
        assert!(!other.id().verify(b"head", &sig));
    }

    #[test]
    fn malformed_key_text_is_rejected() {
        assert!("not!base32".parse::<IdentityId>().is_err());
        assert!("mfzq".parse::<IdentityId>().is_err());
    }
}
