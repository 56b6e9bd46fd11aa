//! Staff directory lookups.

use std::sync::Arc;

use tracing::warn;

use atlerts_shared::constants::FIELD_NAME;
use atlerts_shared::{UserIdentity, UserProfile};
use atlerts_store::{Direction, DocumentStore, Query};

use crate::codec::{decode_profile, users_collection};
use crate::error::Result;

#[derive(Clone)]
pub struct Directory {
    store: Arc<dyn DocumentStore>,
}

impl Directory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Everyone except `local`, ordered by name.
    pub async fn list_users(&self, local: &UserIdentity) -> Result<Vec<UserProfile>> {
        let query = Query::collection(users_collection()?).order_by(FIELD_NAME, Direction::Ascending);
        let docs = self.store.query(&query).await?;

        Ok(docs
            .iter()
            .filter_map(|doc| match decode_profile(doc) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable profile");
                    None
                }
            })
            .filter(|profile| profile.uid != *local)
            .collect())
    }

    pub async fn profile(&self, uid: &UserIdentity) -> Result<Option<UserProfile>> {
        Ok(self.profiles(std::slice::from_ref(uid)).await?.into_iter().next())
    }

    /// Batch lookup. Unknown ids are left out.
    pub async fn profiles(&self, uids: &[UserIdentity]) -> Result<Vec<UserProfile>> {
        let ids: Vec<String> = uids.iter().map(|u| u.to_string()).collect();
        let docs = self.store.get_all(&users_collection()?, &ids).await?;
        docs.iter().map(decode_profile).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_user, user};
    use atlerts_store::MemoryStore;

    #[tokio::test]
    async fn test_list_excludes_self_and_sorts_by_name() {
        let store = MemoryStore::new();
        seed_user(&store, "u3", "Carol");
        seed_user(&store, "u1", "Alice");
        seed_user(&store, "u2", "Bob");
        let directory = Directory::new(Arc::new(store));

        let names: Vec<String> = directory
            .list_users(&user("u2"))
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Alice", "Carol"]);
    }

    #[tokio::test]
    async fn test_profile_lookup() {
        let store = MemoryStore::new();
        seed_user(&store, "u1", "Alice");
        let directory = Directory::new(Arc::new(store));

        let found = directory.profile(&user("u1")).await.unwrap();
        assert_eq!(found.map(|p| p.name).as_deref(), Some("Alice"));
        assert!(directory.profile(&user("nobody")).await.unwrap().is_none());
    }
}
