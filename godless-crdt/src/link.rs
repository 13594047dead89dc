//! Content-addressed links.
//!
//! A [`Link`] names an immutable blob in the content-addressed store by its
//! cid, plus a set of detached signatures over the cid bytes. Heads exchanged
//! between peers are signed links; links used purely locally may be unsigned.

use std::collections::BTreeSet;
use std::fmt;

use cid::Cid;
use ed25519_dalek::Signature;
use serde::{de, Deserialize, Serialize};

use crate::keys::{Identity, IdentityId};

/// A detached ed25519 signature, ordered bytewise so signature sets
/// canonicalize.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_signature(self) -> Signature {
        Signature::from_bytes(&self.0)
    }
}

impl From<Signature> for SignatureBytes {
    fn from(sig: Signature) -> Self {
        SignatureBytes(sig.to_bytes())
    }
}

impl From<[u8; 64]> for SignatureBytes {
    fn from(bytes: [u8; 64]) -> Self {
        SignatureBytes(bytes)
    }
}

impl TryFrom<&[u8]> for SignatureBytes {
    type Error = std::array::TryFromSliceError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(SignatureBytes(bytes.try_into()?))
    }
}

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({}..)", hex::encode(&self.0[..6]))
    }
}

impl Serialize for SignatureBytes {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for SignatureBytes {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl<'de> de::Visitor<'de> for Visitor {
            type Value = SignatureBytes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("64 signature bytes")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                SignatureBytes::try_from(v).map_err(|_| E::invalid_length(v.len(), &self))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut bytes = [0u8; 64];
                for (i, slot) in bytes.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }
                Ok(SignatureBytes(bytes))
            }
        }

        deserializer.deserialize_bytes(Visitor)
    }
}

/// A content address plus the signatures vouching for it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Link {
    target: Cid,
    signatures: BTreeSet<SignatureBytes>,
}

impl Link {
    /// A link carrying no signatures, admissible only for local operations.
    pub fn unsigned(target: Cid) -> Self {
        Link {
            target,
            signatures: BTreeSet::new(),
        }
    }

    pub fn new<I>(target: Cid, signatures: I) -> Self
    where
        I: IntoIterator<Item = SignatureBytes>,
    {
        Link {
            target,
            signatures: signatures.into_iter().collect(),
        }
    }

    pub fn target(&self) -> &Cid {
        &self.target
    }

    /// The bytes a signature over this link covers.
    pub fn signable_bytes(&self) -> Vec<u8> {
        self.target.to_bytes()
    }

    pub fn signatures(&self) -> impl Iterator<Item = &SignatureBytes> {
        self.signatures.iter()
    }

    pub fn is_signed(&self) -> bool {
        !self.signatures.is_empty()
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// A copy of this link additionally signed by `identity`.
    pub fn signed_by(&self, identity: &Identity) -> Link {
        let mut signatures = self.signatures.clone();
        signatures.insert(identity.sign(&self.signable_bytes()).into());
        Link {
            target: self.target,
            signatures,
        }
    }

    /// True iff at least one signature verifies against `id`.
    pub fn verified_by(&self, id: &IdentityId) -> bool {
        let msg = self.signable_bytes();
        self.signatures
            .iter()
            .any(|sig| id.verify(&msg, &sig.to_signature()))
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.target.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multihash_codetable::{Code, MultihashDigest};
    use rand::rngs::OsRng;

    const RAW: u64 = 0x55;

    fn cid_of(data: &[u8]) -> Cid {
        Cid::new_v1(RAW, Code::Sha2_256.digest(data))
    }

    #[test]
    fn signed_link_verifies() {
        let identity = Identity::generate(&mut OsRng);
        let stranger = Identity::generate(&mut OsRng);
        let link = Link::unsigned(cid_of(b"index")).signed_by(&identity);

        assert!(link.is_signed());
        assert!(link.verified_by(&identity.id()));
        assert!(!link.verified_by(&stranger.id()));
    }

    #[test]
    fn unsigned_link_never_verifies() {
        let identity = Identity::generate(&mut OsRng);
        let link = Link::unsigned(cid_of(b"index"));
        assert!(!link.is_signed());
        assert!(!link.verified_by(&identity.id()));
    }

    #[test]
    fn signing_twice_is_idempotent() {
        let identity = Identity::generate(&mut OsRng);
        let once = Link::unsigned(cid_of(b"index")).signed_by(&identity);
        let twice = once.signed_by(&identity);
        assert_eq!(once, twice);
    }
}
