/// Store view that enforces [`OwnershipRules`] for one acting participant
use super::{ChildEvent, EqualityFilter, RemoteTreeStore, Subscription, TreePath};
use crate::config::Config;
use crate::error::Result;
use crate::model::Conversation;
use crate::rules::OwnershipRules;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

pub struct GuardedStore<S> {
    inner: Arc<S>,
    actor: String,
    rules: OwnershipRules,
}

impl<S: RemoteTreeStore> GuardedStore<S> {
    pub fn new(inner: Arc<S>, actor: impl Into<String>, config: &Config) -> Self {
        Self {
            inner,
            actor: actor.into(),
            rules: OwnershipRules::new(config),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    async fn check(&self, path: &TreePath, new: Option<&Value>) -> Result<()> {
        let conversation = match self.rules.conversation_of(path) {
            Some(conversation_path) => match self.inner.read(&conversation_path).await? {
                Some(value) => Some(serde_json::from_value::<Conversation>(value)?),
                None => None,
            },
            None => None,
        };
        let verdict = self
            .rules
            .authorize(&self.actor, path, new, conversation.as_ref());
        if let Err(e) = &verdict {
            warn!("Rejected write: {}", e);
        }
        verdict
    }
}

impl<S: RemoteTreeStore> RemoteTreeStore for GuardedStore<S> {
    async fn read(&self, path: &TreePath) -> Result<Option<Value>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &TreePath, value: Value) -> Result<()> {
        let new = if value.is_null() { None } else { Some(&value) };
        self.check(path, new).await?;
        self.inner.write(path, value).await
    }

    async fn write_field(&self, path: &TreePath, field: &str, value: Value) -> Result<()> {
        let target = path.child(field);
        let new = if value.is_null() { None } else { Some(&value) };
        self.check(&target, new).await?;
        self.inner.write_field(path, field, value).await
    }

    async fn delete(&self, path: &TreePath) -> Result<()> {
        self.check(path, None).await?;
        self.inner.delete(path).await
    }

    async fn query_equal(
        &self,
        path: &TreePath,
        filter: EqualityFilter,
    ) -> Result<Vec<(String, Value)>> {
        self.inner.query_equal(path, filter).await
    }

    async fn subscribe_snapshot(&self, path: &TreePath) -> Result<Subscription<Option<Value>>> {
        self.inner.subscribe_snapshot(path).await
    }

    async fn subscribe_child_diff(
        &self,
        path: &TreePath,
        filter: Option<EqualityFilter>,
    ) -> Result<Subscription<ChildEvent>> {
        self.inner.subscribe_child_diff(path, filter).await
    }

    async fn push(&self, path: &TreePath) -> Result<String> {
        self.inner.push(path).await
    }
}
