use std::collections::{HashMap, HashSet};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::Profile;
use crate::error::ChatError;

/// Read-only profile lookups, always batched: one read resolves every
/// counterpart of a conversation list.
#[derive(Clone)]
pub struct ProfileDirectory {
    inner: Arc<RwLock<HashMap<Uuid, Profile>>>,
    #[cfg(test)]
    fail_next_batch: Arc<AtomicBool>,
}

impl ProfileDirectory {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            #[cfg(test)]
            fail_next_batch: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn upsert(&self, profile: Profile) {
        let mut inner = self.inner.write().await;
        inner.insert(profile.user_id, profile);
    }

    /// Resolve profiles for a set of user ids in one read. Unknown ids are
    /// simply absent from the result; callers render placeholders for them.
    pub async fn batch_get(
        &self,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Profile>, ChatError> {
        #[cfg(test)]
        if self.fail_next_batch.swap(false, Ordering::SeqCst) {
            return Err(ChatError::Store("profile lookup failed".into()));
        }

        let unique: HashSet<Uuid> = user_ids.iter().copied().collect();
        let inner = self.inner.read().await;
        Ok(unique
            .into_iter()
            .filter_map(|user_id| inner.get(&user_id).map(|p| (user_id, p.clone())))
            .collect())
    }

    #[cfg(test)]
    pub(crate) fn fail_next_batch(&self) {
        self.fail_next_batch.store(true, Ordering::SeqCst);
    }
}

impl Default for ProfileDirectory {
    fn default() -> Self {
        Self::new()
    }
}
