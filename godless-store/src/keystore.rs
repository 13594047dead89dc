//! Process-wide key material.
//!
//! The key store holds the node's private identities and the public ids of
//! trusted peers. Updates take a write lock; readers work on snapshots and
//! never block behind a signer.

use std::collections::BTreeSet;
use std::sync::Arc;

use cid::Cid;
use godless_crdt::{Identity, IdentityId, Link};
use parking_lot::RwLock;

#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    identities: Vec<Identity>,
    publics: BTreeSet<IdentityId>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a private identity. Its public id becomes known as well.
    pub fn insert_identity(&self, identity: Identity) {
        let mut inner = self.inner.write();
        let id = identity.id();
        if !inner.identities.iter().any(|known| known.id() == id) {
            inner.identities.push(identity);
        }
        inner.publics.insert(id);
    }

    /// Add a trusted public id.
    pub fn insert_public(&self, id: IdentityId) {
        self.inner.write().publics.insert(id);
    }

    /// Snapshot of the private identities.
    pub fn identities(&self) -> Vec<Identity> {
        self.inner.read().identities.clone()
    }

    /// Snapshot of the known public ids.
    pub fn public_ids(&self) -> Vec<IdentityId> {
        self.inner.read().publics.iter().copied().collect()
    }

    pub fn contains(&self, id: &IdentityId) -> bool {
        self.inner.read().publics.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read();
        inner.identities.is_empty() && inner.publics.is_empty()
    }

    /// A link to `target` carrying one signature per private identity.
    ///
    /// With no private identities the link comes back unsigned, which is
    /// admissible for local operations only.
    pub fn sign_link(&self, target: Cid) -> Link {
        let mut link = Link::unsigned(target);
        for identity in self.identities() {
            link = link.signed_by(&identity);
        }
        link
    }

    /// True iff at least one of the link's signatures matches a known
    /// public id. Unsigned links never verify.
    pub fn verify(&self, link: &Link) -> bool {
        if !link.is_signed() {
            return false;
        }
        self.public_ids().iter().any(|id| link.verified_by(id))
    }
}
