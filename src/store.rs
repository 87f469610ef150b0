use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use facetrack_vision::Embedding;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::matcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(Uuid);

impl IdentityId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for IdentityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    pub embedding: Embedding,
}

/// Outcome of a combined match-or-add.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Existing(Identity),
    Created(Identity),
}

impl Resolution {
    pub fn identity(&self) -> &Identity {
        match self {
            Resolution::Existing(identity) | Resolution::Created(identity) => identity,
        }
    }

    pub fn into_identity(self) -> Identity {
        match self {
            Resolution::Existing(identity) | Resolution::Created(identity) => identity,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Resolution::Created(_))
    }
}

/// In-memory identity catalog shared by every session.
///
/// Lookups run concurrently under a read lock. Inserts and edits take the
/// write lock, and [`IdentityStore::match_or_add`] performs its lookup and
/// insert under one write lock so two callers racing with the same face create
/// one identity. Calling [`IdentityStore::find`] then [`IdentityStore::add`]
/// separately has no such guarantee.
///
/// Every critical section either fully applies or does not touch the
/// catalog, so a poisoned lock is recovered rather than propagated.
#[derive(Debug, Default)]
pub struct IdentityStore {
    identities: RwLock<Vec<Identity>>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Identity>> {
        self.identities.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Identity>> {
        self.identities.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, embedding: Embedding, name: &str) -> Result<Identity> {
        let mut identities = self.write();
        check_embedding(&identities, &embedding)?;
        Ok(insert(&mut identities, embedding, name))
    }

    /// Nearest identity within `tolerance` of `embedding`.
    pub fn find(&self, embedding: &Embedding, tolerance: f32) -> Result<Option<Identity>> {
        let identities = self.read();
        check_embedding(&identities, embedding)?;
        Ok(lookup(&identities, embedding, tolerance).map(|idx| identities[idx].clone()))
    }

    pub fn match_or_add(
        &self,
        embedding: Embedding,
        name: &str,
        tolerance: f32,
    ) -> Result<Resolution> {
        let mut identities = self.write();
        check_embedding(&identities, &embedding)?;
        if let Some(idx) = lookup(&identities, &embedding, tolerance) {
            return Ok(Resolution::Existing(identities[idx].clone()));
        }
        Ok(Resolution::Created(insert(&mut identities, embedding, name)))
    }

    pub fn rename(&self, id: IdentityId, new_name: &str) -> bool {
        let mut identities = self.write();
        match identities.iter_mut().find(|identity| identity.id == id) {
            Some(identity) => {
                log::info!("renamed {} from {:?} to {:?}", id, identity.name, new_name);
                identity.name = new_name.to_string();
                true
            }
            None => false,
        }
    }

    /// Replaces the stored embedding of an existing identity.
    pub fn update_embedding(&self, id: IdentityId, embedding: Embedding) -> Result<bool> {
        let mut identities = self.write();
        check_embedding(&identities, &embedding)?;
        match identities.iter_mut().find(|identity| identity.id == id) {
            Some(identity) => {
                identity.embedding = embedding;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get(&self, id: IdentityId) -> Option<Identity> {
        self.read().iter().find(|identity| identity.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Snapshot of the catalog in insertion order.
    pub fn identities(&self) -> Vec<Identity> {
        self.read().clone()
    }
}

fn check_embedding(identities: &[Identity], embedding: &Embedding) -> Result<()> {
    if !embedding.is_finite() {
        return Err(Error::NonFiniteEmbedding);
    }
    match identities.first() {
        Some(first) if first.embedding.dim() != embedding.dim() => Err(Error::DimensionMismatch {
            expected: first.embedding.dim(),
            actual: embedding.dim(),
        }),
        _ => Ok(()),
    }
}

fn lookup(identities: &[Identity], embedding: &Embedding, tolerance: f32) -> Option<usize> {
    matcher::nearest(identities, embedding)
        .filter(|&(_, dist)| dist <= tolerance)
        .map(|(idx, _)| idx)
}

fn insert(identities: &mut Vec<Identity>, embedding: Embedding, name: &str) -> Identity {
    let identity = Identity {
        id: IdentityId::generate(),
        name: name.to_string(),
        embedding,
    };
    log::info!("registered identity {} as {:?}", identity.id, identity.name);
    identities.push(identity.clone());
    identity
}
