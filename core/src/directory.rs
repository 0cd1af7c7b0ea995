/// User profiles: registration, counterpart lookup and name search
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::model::UserProfile;
use crate::store::{EqualityFilter, RemoteTreeStore, TreePath};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct UserDirectory<S> {
    store: Arc<S>,
    config: Arc<Config>,
}

impl<S> Clone for UserDirectory<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: RemoteTreeStore> UserDirectory<S> {
    pub fn new(store: Arc<S>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// Store or replace a profile under `users/<uid>`
    pub async fn register(&self, profile: &UserProfile) -> Result<()> {
        Config::check_id("uid", &profile.uid)?;
        self.store
            .write(&self.config.user_path(&profile.uid), serde_json::to_value(profile)?)
            .await?;
        info!("Registered user {} ({})", profile.uid, profile.name);
        Ok(())
    }

    /// One-shot lookup by uid
    pub async fn lookup(&self, uid: &str) -> Result<Option<UserProfile>> {
        let found = self
            .store
            .query_equal(
                &self.config.users_path(),
                EqualityFilter::new(TreePath::parse("uid"), Value::String(uid.to_string())),
            )
            .await
            .map_err(|e| ChatError::QueryFailed(format!("lookup {}: {}", uid, e)))?;

        let profile = match found.into_iter().next() {
            Some((_, value)) => Some(serde_json::from_value(value)?),
            None => {
                debug!("No profile for {}", uid);
                None
            }
        };
        Ok(profile)
    }

    /// Everyone except `self_id`, in uid order
    pub async fn list_others(&self, self_id: &str) -> Result<Vec<UserProfile>> {
        let users = self
            .store
            .read(&self.config.users_path())
            .await
            .map_err(|e| ChatError::QueryFailed(format!("list users: {}", e)))?;

        let Some(Value::Object(users)) = users else {
            return Ok(Vec::new());
        };
        Ok(users
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value::<UserProfile>(value) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!("Skipping unreadable profile {}: {}", key, e);
                    None
                }
            })
            .filter(|profile| profile.uid != self_id)
            .collect())
    }
}

/// Case-insensitive name filter; a blank query matches everyone
pub fn search<'a>(users: &'a [UserProfile], query: &str) -> Vec<&'a UserProfile> {
    let query = query.trim().to_lowercase();
    users
        .iter()
        .filter(|user| query.is_empty() || user.name.to_lowercase().contains(&query))
        .collect()
}
