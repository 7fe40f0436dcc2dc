//! In-memory store of the last base photo each user submitted.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// User identifier as handed in by the messaging layer.
pub type UserId = i64;

/// Last submitted base photo per user.
///
/// Photos are shared as `Arc<[u8]>`, so a comparison holds its base photo
/// without keeping the lock.
#[derive(Debug, Default)]
pub struct BasePhotoStore {
    photos: RwLock<HashMap<UserId, Arc<[u8]>>>,
}

impl BasePhotoStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `photo` as the base photo of `user`, replacing any earlier one.
    pub fn put(&self, user: UserId, photo: Vec<u8>) {
        self.photos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user, photo.into());
    }

    /// Base photo of `user`. Empty photos count as missing.
    #[must_use]
    pub fn get(&self, user: UserId) -> Option<Arc<[u8]>> {
        self.photos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .filter(|photo| !photo.is_empty())
            .cloned()
    }

    /// Forget the base photo of `user`. Returns whether one was stored.
    pub fn remove(&self, user: UserId) -> bool {
        self.photos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user)
            .is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.photos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
