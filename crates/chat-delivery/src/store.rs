//! Persisted conversations with per-message version history.
//!
//! Every mutation is a load-mutate-save round trip through [`ConversationStore::mutate`],
//! which serialises writers per conversation id and saves with a revision
//! compare-and-swap, so no caller ever holds an authoritative in-memory copy.

use std::future::Future;
use std::sync::Arc;

use chat_core::storage::{read_json, write_json};
use chat_core::{Conversation, KeyValueStore, Message, Role, StorageError, VersionSwitch};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;

pub const CONVERSATION_INDEX_KEY: &str = "conversations";
pub const CONVERSATION_KEY_PREFIX: &str = "conversation:";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Version {version} not found on message {message_id}")]
    VersionNotFound { message_id: String, version: u32 },

    #[error("Conversation {id} changed since it was loaded (expected revision {expected}, found {found})")]
    Conflict { id: String, expected: u64, found: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// What the caller has to do after an edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// A user message with a reply was edited; regenerate the reply as a new
    /// version of `assistant_id` answering `user_version`.
    RegenerateReply {
        assistant_id: String,
        user_version: u32,
    },
    /// A user message without a reply was edited; generate a fresh reply.
    NeedsReply { user_version: u32 },
    /// Nothing follows (assistant edit, or the text did not change).
    Unchanged,
}

/// Where the reply to an edited message ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditReply {
    /// The existing reply gained `version`, answering the edited message
    Regenerated { assistant_id: String, version: u32 },
    /// The edited message had no reply; one was inserted after it
    Replied { assistant_id: String },
    Unchanged,
}

pub struct ConversationStore {
    store: Arc<dyn KeyValueStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Serialises read-modify-write of the shared conversation index
    index_lock: Mutex<()>,
}

fn record_key(id: &str) -> String {
    format!("{}{}", CONVERSATION_KEY_PREFIX, id)
}

impl ConversationStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            index_lock: Mutex::new(()),
        }
    }

    /// New in-memory conversation. Nothing is written until the first
    /// non-empty save.
    pub fn create(&self, provider: impl Into<String>, model: impl Into<String>) -> Conversation {
        Conversation::new(provider, model)
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `body` holding the lock of conversation `id`.
    ///
    /// The lock entry is dropped afterwards only when nobody else holds or
    /// waits on it, so the map stays bounded by the ids in use.
    async fn with_lock<T, Fut>(&self, id: &str, body: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            body.await
        };
        drop(lock);
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Load a conversation. Malformed records are treated as absent.
    pub async fn load(&self, id: &str) -> Result<Option<Conversation>> {
        match read_json::<Conversation>(self.store.as_ref(), &record_key(id)).await {
            Ok(conversation) => Ok(conversation),
            Err(StorageError::Serialization(e)) => {
                log::warn!("Ignoring malformed conversation {}: {}", id, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn index(&self) -> Result<Vec<String>> {
        match read_json::<Vec<String>>(self.store.as_ref(), CONVERSATION_INDEX_KEY).await {
            Ok(ids) => Ok(ids.unwrap_or_default()),
            Err(StorageError::Serialization(e)) => {
                log::warn!("Conversation index is malformed, rebuilding: {}", e);
                let keys = self.store.keys_with_prefix(CONVERSATION_KEY_PREFIX).await?;
                Ok(keys
                    .into_iter()
                    .filter_map(|k| k.strip_prefix(CONVERSATION_KEY_PREFIX).map(str::to_string))
                    .collect())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist `conversation`.
    ///
    /// Fails with [`StoreError::Conflict`] when the stored revision moved
    /// since `conversation` was loaded. A conversation that was never
    /// persisted is not written while it has no messages.
    pub async fn save(&self, conversation: &mut Conversation) -> Result<()> {
        let id = conversation.id.clone();
        self.with_lock(&id, self.save_locked(conversation)).await
    }

    async fn save_locked(&self, conversation: &mut Conversation) -> Result<()> {
        let stored = self.load(&conversation.id).await?;
        match &stored {
            Some(current) if current.revision != conversation.revision => {
                return Err(StoreError::Conflict {
                    id: conversation.id.clone(),
                    expected: conversation.revision,
                    found: current.revision,
                });
            }
            None if conversation.is_empty() => {
                log::debug!("Not persisting empty conversation {}", conversation.id);
                return Ok(());
            }
            _ => {}
        }

        let previous = (conversation.revision, conversation.updated_at);
        conversation.revision += 1;
        conversation.touch();
        if let Err(e) = write_json(self.store.as_ref(), &record_key(&conversation.id), conversation).await {
            (conversation.revision, conversation.updated_at) = previous;
            return Err(e.into());
        }

        if stored.is_none() {
            let _index = self.index_lock.lock().await;
            let mut ids = self.index().await?;
            if !ids.contains(&conversation.id) {
                ids.push(conversation.id.clone());
                write_json(self.store.as_ref(), CONVERSATION_INDEX_KEY, &ids).await?;
            }
        }
        Ok(())
    }

    /// All persisted conversations, most recently updated first.
    pub async fn list(&self) -> Result<Vec<Conversation>> {
        let mut conversations = Vec::new();
        for id in self.index().await? {
            if let Some(conversation) = self.load(&id).await? {
                conversations.push(conversation);
            }
        }
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    /// Delete a conversation. Returns whether a record existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.with_lock(id, async {
            let removed = self.store.remove(&record_key(id)).await?;

            let _index = self.index_lock.lock().await;
            let mut ids = self.index().await?;
            let before = ids.len();
            ids.retain(|existing| existing != id);
            if ids.len() != before {
                write_json(self.store.as_ref(), CONVERSATION_INDEX_KEY, &ids).await?;
            }
            Ok(removed)
        })
        .await
    }

    /// Serialized load-mutate-save of one conversation.
    ///
    /// `f` runs on a freshly loaded copy; nothing is written if it fails.
    pub async fn mutate<T, F>(&self, id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Conversation) -> Result<T>,
    {
        self.with_conversation(id, || None, f).await
    }

    /// Like [`mutate`](Self::mutate), creating the conversation when it
    /// does not exist yet.
    pub async fn mutate_or_create<T, F>(
        &self,
        id: &str,
        provider: &str,
        model: &str,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut Conversation) -> Result<T>,
    {
        self.with_conversation(id, || Some(Conversation::with_id(id, provider, model)), f)
            .await
    }

    async fn with_conversation<T, F, C>(&self, id: &str, create: C, f: F) -> Result<T>
    where
        F: FnOnce(&mut Conversation) -> Result<T>,
        C: FnOnce() -> Option<Conversation>,
    {
        self.with_lock(id, async {
            let mut conversation = match self.load(id).await? {
                Some(conversation) => conversation,
                None => create().ok_or_else(|| StoreError::NotFound(id.to_string()))?,
            };
            let output = f(&mut conversation)?;
            self.save_locked(&mut conversation).await?;
            Ok(output)
        })
        .await
    }

    pub async fn append_messages(&self, id: &str, messages: Vec<Message>) -> Result<()> {
        self.mutate(id, |conversation| {
            for message in messages {
                conversation.add_message(message);
            }
            Ok(())
        })
        .await
    }

    /// Edit a message's text as a new version.
    pub async fn edit_message(
        &self,
        id: &str,
        message_id: &str,
        new_text: &str,
    ) -> Result<EditOutcome> {
        self.mutate(id, |conversation| {
            apply_edit(conversation, message_id, new_text).map(|(outcome, _)| outcome)
        })
        .await
    }

    /// Edit a user message and store `reply` as its answer in one save.
    ///
    /// The reply becomes a new version of the following assistant message,
    /// or a new assistant message right after the edited one. Callers
    /// generate `reply` first, so a failed generation leaves nothing edited.
    pub async fn edit_with_reply(
        &self,
        id: &str,
        message_id: &str,
        new_text: &str,
        reply: &str,
        provider: &str,
    ) -> Result<EditReply> {
        self.mutate(id, |conversation| {
            let (outcome, position) = apply_edit(conversation, message_id, new_text)?;
            match outcome {
                EditOutcome::RegenerateReply {
                    assistant_id,
                    user_version,
                } => {
                    let message = conversation
                        .message_mut(&assistant_id)
                        .ok_or_else(|| StoreError::MessageNotFound(assistant_id.clone()))?;
                    let version =
                        message.push_version(reply, Some(provider.to_string()), Some(user_version));
                    Ok(EditReply::Regenerated {
                        assistant_id,
                        version,
                    })
                }
                EditOutcome::NeedsReply { user_version } => {
                    let message = Message::assistant(reply, provider).with_reply_to(user_version);
                    let assistant_id = message.id.clone();
                    conversation.messages.insert(position + 1, message);
                    conversation.touch();
                    Ok(EditReply::Replied { assistant_id })
                }
                EditOutcome::Unchanged => Ok(EditReply::Unchanged),
            }
        })
        .await
    }

    /// Add a regenerated reply as a new active version answering
    /// `reply_to`. Returns the new version number.
    pub async fn add_reply_version(
        &self,
        id: &str,
        assistant_id: &str,
        text: &str,
        provider: &str,
        reply_to: u32,
    ) -> Result<u32> {
        self.mutate(id, |conversation| {
            let message = conversation
                .message_mut(assistant_id)
                .ok_or_else(|| StoreError::MessageNotFound(assistant_id.to_string()))?;
            Ok(message.push_version(text, Some(provider.to_string()), Some(reply_to)))
        })
        .await
    }

    /// Activate `version` of a message.
    ///
    /// For a user message directly followed by an assistant reply, the reply
    /// switches to the version linked to `version`, or to its newest version
    /// when none is linked.
    pub async fn switch_version(
        &self,
        id: &str,
        message_id: &str,
        version: u32,
    ) -> Result<VersionSwitch> {
        self.mutate(id, |conversation| {
            let position = conversation
                .position_of(message_id)
                .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))?;

            let switched = conversation.messages[position].switch_to_version(version);
            if switched == VersionSwitch::NotFound {
                return Err(StoreError::VersionNotFound {
                    message_id: message_id.to_string(),
                    version,
                });
            }

            if conversation.messages[position].role == Role::User {
                if let Some(reply) = conversation.messages.get_mut(position + 1) {
                    if reply.role == Role::Assistant {
                        let target = reply
                            .version_answering(version)
                            .unwrap_or_else(|| reply.highest_version_number());
                        let outcome = reply.switch_to_version(target);
                        log::debug!(
                            "Correlated reply {} -> version {} ({:?})",
                            reply.id,
                            target,
                            outcome
                        );
                    }
                }
            }
            Ok(switched)
        })
        .await
    }

    /// Remove a message. Not versioned.
    pub async fn delete_message(&self, id: &str, message_id: &str) -> Result<Message> {
        self.mutate(id, |conversation| {
            let position = conversation
                .position_of(message_id)
                .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))?;
            Ok(conversation.messages.remove(position))
        })
        .await
    }

    /// Add a reaction (no duplicates). Returns whether it was added.
    pub async fn set_reaction(&self, id: &str, message_id: &str, reaction: &str) -> Result<bool> {
        self.mutate(id, |conversation| {
            let message = conversation
                .message_mut(message_id)
                .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))?;
            if message.reactions.iter().any(|r| r == reaction) {
                return Ok(false);
            }
            message.reactions.push(reaction.to_string());
            Ok(true)
        })
        .await
    }

    pub async fn remove_reaction(&self, id: &str, message_id: &str, reaction: &str) -> Result<bool> {
        self.mutate(id, |conversation| {
            let message = conversation
                .message_mut(message_id)
                .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))?;
            let before = message.reactions.len();
            message.reactions.retain(|r| r != reaction);
            Ok(message.reactions.len() != before)
        })
        .await
    }

    /// Flip the favourite flag. Returns the new value.
    pub async fn toggle_favorite(&self, id: &str, message_id: &str) -> Result<bool> {
        self.mutate(id, |conversation| {
            let message = conversation
                .message_mut(message_id)
                .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))?;
            message.is_favorite = !message.is_favorite;
            Ok(message.is_favorite)
        })
        .await
    }

    pub async fn set_title(&self, id: &str, title: &str) -> Result<()> {
        self.mutate(id, |conversation| {
            let title = title.trim();
            conversation.title = (!title.is_empty()).then(|| title.to_string());
            Ok(())
        })
        .await
    }

    /// Delete persisted conversations that have no messages.
    pub async fn cleanup_empty(&self) -> Result<usize> {
        let mut removed = 0;
        for conversation in self.list().await? {
            if conversation.is_empty() && self.delete(&conversation.id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("Removed {} empty conversation(s)", removed);
        }
        Ok(removed)
    }
}

/// Apply an edit in place. Returns the follow-up and the message position.
fn apply_edit(
    conversation: &mut Conversation,
    message_id: &str,
    new_text: &str,
) -> Result<(EditOutcome, usize)> {
    let position = conversation
        .position_of(message_id)
        .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))?;

    let message = &mut conversation.messages[position];
    if message.text == new_text {
        return Ok((EditOutcome::Unchanged, position));
    }
    let version = message.edit(new_text);
    if message.role == Role::Assistant {
        return Ok((EditOutcome::Unchanged, position));
    }

    let outcome = match conversation.messages.get(position + 1) {
        Some(next) if next.role == Role::Assistant => EditOutcome::RegenerateReply {
            assistant_id: next.id.clone(),
            user_version: version,
        },
        _ => EditOutcome::NeedsReply {
            user_version: version,
        },
    };
    Ok((outcome, position))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::{FileStore, MemoryStore};
    use tempfile::tempdir;

    fn store() -> (Arc<MemoryStore>, ConversationStore) {
        let kv = Arc::new(MemoryStore::new());
        (kv.clone(), ConversationStore::new(kv))
    }

    async fn seeded(store: &ConversationStore, messages: Vec<Message>) -> Conversation {
        let mut conversation = store.create("openai", "gpt-4o");
        for message in messages {
            conversation.add_message(message);
        }
        store.save(&mut conversation).await.unwrap();
        conversation
    }

    #[tokio::test]
    async fn test_empty_conversation_is_not_persisted() {
        let (kv, store) = store();
        let mut conversation = store.create("openai", "gpt-4o");
        store.save(&mut conversation).await.unwrap();

        assert_eq!(conversation.revision, 0);
        assert!(store.load(&conversation.id).await.unwrap().is_none());
        assert!(kv.get(CONVERSATION_INDEX_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_load_and_list_order() {
        let (_, store) = store();
        let first = seeded(&store, vec![Message::user("one")]).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = seeded(&store, vec![Message::user("two")]).await;

        let loaded = store.load(&first.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages[0].text, "one");
        assert_eq!(loaded.revision, 1);

        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_stale_save_is_rejected() {
        let (_, store) = store();
        let conversation = seeded(&store, vec![Message::user("hi")]).await;

        let mut a = store.load(&conversation.id).await.unwrap().unwrap();
        let mut b = store.load(&conversation.id).await.unwrap().unwrap();

        a.add_message(Message::assistant("from a", "openai"));
        store.save(&mut a).await.unwrap();

        b.add_message(Message::assistant("from b", "openai"));
        match store.save(&mut b).await {
            Err(StoreError::Conflict { expected, found, .. }) => {
                assert_eq!(expected, 1);
                assert_eq!(found, 2);
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        let stored = store.load(&conversation.id).await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(stored.messages[1].text, "from a");
    }

    #[tokio::test]
    async fn test_concurrent_mutations_are_serialized() {
        let (_, store) = store();
        let store = Arc::new(store);
        let conversation = seeded(&store, vec![Message::user("start")]).await;

        let mut tasks = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            let id = conversation.id.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .append_messages(&id, vec![Message::user(format!("msg {}", i))])
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = store.load(&conversation.id).await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 11);
        assert_eq!(stored.revision, 11);
    }

    #[tokio::test]
    async fn test_edit_user_message_with_reply() {
        let (_, store) = store();
        let user = Message::user("What is X");
        let reply = Message::assistant("X is a letter", "openai");
        let (user_id, reply_id) = (user.id.clone(), reply.id.clone());
        let conversation = seeded(&store, vec![user, reply]).await;

        let outcome = store
            .edit_message(&conversation.id, &user_id, "What is Y")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            EditOutcome::RegenerateReply {
                assistant_id: reply_id,
                user_version: 2
            }
        );

        let stored = store.load(&conversation.id).await.unwrap().unwrap();
        let edited = &stored.messages[0];
        assert_eq!(edited.text, "What is Y");
        assert_eq!(edited.versions.len(), 2);
        assert_eq!(edited.edit_history.len(), 1);
        assert_eq!(edited.edit_history[0].previous_text, "What is X");
    }

    #[tokio::test]
    async fn test_edit_last_user_message_needs_reply() {
        let (_, store) = store();
        let user = Message::user("draft");
        let user_id = user.id.clone();
        let conversation = seeded(&store, vec![user]).await;

        let outcome = store
            .edit_message(&conversation.id, &user_id, "final")
            .await
            .unwrap();
        assert_eq!(outcome, EditOutcome::NeedsReply { user_version: 2 });
    }

    #[tokio::test]
    async fn test_edit_with_same_text_is_unchanged() {
        let (_, store) = store();
        let user = Message::user("same");
        let user_id = user.id.clone();
        let conversation = seeded(&store, vec![user]).await;

        let outcome = store
            .edit_message(&conversation.id, &user_id, "same")
            .await
            .unwrap();
        assert_eq!(outcome, EditOutcome::Unchanged);
        let stored = store.load(&conversation.id).await.unwrap().unwrap();
        assert!(stored.messages[0].versions.is_empty());
    }

    #[tokio::test]
    async fn test_switch_follows_reply_links() {
        let (_, store) = store();
        let user = Message::user("Q1");
        let reply = Message::assistant("A1", "openai");
        let (user_id, reply_id) = (user.id.clone(), reply.id.clone());
        let conversation = seeded(&store, vec![user, reply]).await;
        let id = conversation.id.clone();

        // Two edits, two regenerated replies: user v2 -> reply v2, user v3 -> reply v3
        store.edit_message(&id, &user_id, "Q2").await.unwrap();
        store.add_reply_version(&id, &reply_id, "A2", "openai", 2).await.unwrap();
        store.edit_message(&id, &user_id, "Q3").await.unwrap();
        store.add_reply_version(&id, &reply_id, "A3", "gemini", 3).await.unwrap();

        store.switch_version(&id, &user_id, 1).await.unwrap();
        let stored = store.load(&id).await.unwrap().unwrap();
        assert_eq!(stored.messages[0].text, "Q1");
        assert_eq!(stored.messages[1].text, "A1");

        store.switch_version(&id, &user_id, 3).await.unwrap();
        let stored = store.load(&id).await.unwrap().unwrap();
        assert_eq!(stored.messages[1].text, "A3");
        assert_eq!(stored.messages[1].provider.as_deref(), Some("gemini"));
    }

    #[tokio::test]
    async fn test_switch_falls_back_to_newest_reply() {
        let (_, store) = store();
        let user = Message::user("Q1");
        let reply = Message::assistant("A1", "openai");
        let (user_id, reply_id) = (user.id.clone(), reply.id.clone());
        let id = seeded(&store, vec![user, reply]).await.id;

        // Reply regenerated twice for v2; v3 edit never got an answer
        store.edit_message(&id, &user_id, "Q2").await.unwrap();
        store.add_reply_version(&id, &reply_id, "A2a", "openai", 2).await.unwrap();
        store.add_reply_version(&id, &reply_id, "A2b", "openai", 2).await.unwrap();
        store.edit_message(&id, &user_id, "Q3").await.unwrap();
        store.switch_version(&id, &user_id, 1).await.unwrap();

        store.switch_version(&id, &user_id, 3).await.unwrap();
        let stored = store.load(&id).await.unwrap().unwrap();
        assert_eq!(stored.messages[1].text, "A2b");
        assert_eq!(stored.messages[1].active_version_number(), 3);

        store.switch_version(&id, &user_id, 2).await.unwrap();
        let stored = store.load(&id).await.unwrap().unwrap();
        assert_eq!(stored.messages[1].text, "A2b");
    }

    #[tokio::test]
    async fn test_switch_to_active_version_changes_nothing() {
        let (_, store) = store();
        let user = Message::user("Q1");
        let user_id = user.id.clone();
        let id = seeded(&store, vec![user]).await.id;
        store.edit_message(&id, &user_id, "Q2").await.unwrap();

        let before = store.load(&id).await.unwrap().unwrap();
        let outcome = store.switch_version(&id, &user_id, 2).await.unwrap();
        let after = store.load(&id).await.unwrap().unwrap();

        assert_eq!(outcome, VersionSwitch::AlreadyActive);
        assert_eq!(before.messages, after.messages);
    }

    #[tokio::test]
    async fn test_switch_to_unknown_version() {
        let (_, store) = store();
        let user = Message::user("Q1");
        let user_id = user.id.clone();
        let id = seeded(&store, vec![user]).await.id;

        assert!(matches!(
            store.switch_version(&id, &user_id, 4).await,
            Err(StoreError::VersionNotFound { version: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_message_ids_survive_deletes() {
        let (_, store) = store();
        let first = Message::user("first");
        let second = Message::user("second");
        let (first_id, second_id) = (first.id.clone(), second.id.clone());
        let id = seeded(&store, vec![first, second]).await.id;

        let removed = store.delete_message(&id, &first_id).await.unwrap();
        assert_eq!(removed.text, "first");

        store.edit_message(&id, &second_id, "second!").await.unwrap();
        let stored = store.load(&id).await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 1);
        assert_eq!(stored.messages[0].text, "second!");

        assert!(matches!(
            store.delete_message(&id, &first_id).await,
            Err(StoreError::MessageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reactions_favorite_and_title() {
        let (_, store) = store();
        let reply = Message::assistant("answer", "openai");
        let reply_id = reply.id.clone();
        let id = seeded(&store, vec![reply]).await.id;

        assert!(store.set_reaction(&id, &reply_id, "👍").await.unwrap());
        assert!(!store.set_reaction(&id, &reply_id, "👍").await.unwrap());
        assert!(store.toggle_favorite(&id, &reply_id).await.unwrap());
        store.set_title(&id, "  Trip planning ").await.unwrap();

        let stored = store.load(&id).await.unwrap().unwrap();
        assert_eq!(stored.messages[0].reactions, vec!["👍"]);
        assert!(stored.messages[0].is_favorite);
        assert_eq!(stored.title.as_deref(), Some("Trip planning"));

        assert!(store.remove_reaction(&id, &reply_id, "👍").await.unwrap());
        assert!(!store.toggle_favorite(&id, &reply_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_mutate_missing_conversation() {
        let (_, store) = store();
        assert!(matches!(
            store.append_messages("nope", vec![Message::user("x")]).await,
            Err(StoreError::NotFound(_))
        ));

        store
            .mutate_or_create("c1", "gemini", "gemini-1.5-flash", |c| {
                c.add_message(Message::user("hello"));
                Ok(())
            })
            .await
            .unwrap();
        let created = store.load("c1").await.unwrap().unwrap();
        assert_eq!(created.provider, "gemini");
        assert_eq!(created.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_empty_and_delete() {
        let (_, store) = store();
        let keep = seeded(&store, vec![Message::user("keep")]).await;
        let emptied = seeded(&store, vec![Message::user("gone")]).await;
        let gone_id = emptied.messages[0].id.clone();
        store.delete_message(&emptied.id, &gone_id).await.unwrap();

        assert_eq!(store.cleanup_empty().await.unwrap(), 1);
        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![keep.id.clone()]);

        assert!(store.delete(&keep.id).await.unwrap());
        assert!(!store.delete(&keep.id).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_record_is_absent() {
        let (kv, store) = store();
        let good = seeded(&store, vec![Message::user("ok")]).await;
        kv.set("conversation:broken", "{oops".to_string()).await.unwrap();
        kv.set(
            CONVERSATION_INDEX_KEY,
            serde_json::to_string(&vec![good.id.clone(), "broken".to_string()]).unwrap(),
        )
        .await
        .unwrap();

        assert!(store.load("broken").await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_all_reach_the_index() {
        let dir = tempdir().unwrap();
        let store = Arc::new(ConversationStore::new(Arc::new(FileStore::new(dir.path()))));

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .mutate_or_create(&format!("c{}", i), "openai", "gpt-4o", |c| {
                        c.add_message(Message::user("hello"));
                        Ok(())
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.list().await.unwrap().len(), 20);
        assert!(store.locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delete_racing_mutations_never_conflicts() {
        let (_, store) = store();
        let store = Arc::new(store);
        let id = seeded(&store, vec![Message::user("start")]).await.id;

        let mut tasks = Vec::new();
        for i in 0..30 {
            let store = store.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                if i == 10 {
                    store.delete(&id).await.map(|_| ())
                } else {
                    store
                        .mutate_or_create(&id, "openai", "gpt-4o", |c| {
                            c.add_message(Message::user(format!("msg {}", i)));
                            Ok(())
                        })
                        .await
                }
            }));
        }
        for task in tasks {
            let result = task.await.unwrap();
            assert!(
                !matches!(result, Err(StoreError::Conflict { .. })),
                "mutations of one id ran concurrently: {result:?}"
            );
        }
        assert!(store.locks.is_empty());
    }

    #[tokio::test]
    async fn test_edit_with_reply_saves_both_or_nothing() {
        let (_, store) = store();
        let user = Message::user("What is X");
        let reply = Message::assistant("X answer", "openai");
        let later = Message::user("Thanks");
        let (user_id, reply_id, later_id) = (user.id.clone(), reply.id.clone(), later.id.clone());
        let id = seeded(&store, vec![user, reply, later]).await.id;

        let outcome = store
            .edit_with_reply(&id, &user_id, "What is Y", "Y answer", "gemini")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            EditReply::Regenerated {
                assistant_id: reply_id.clone(),
                version: 2
            }
        );

        // A trailing question without a reply gets one inserted right after it
        let outcome = store
            .edit_with_reply(&id, &later_id, "Thanks!", "You're welcome", "gemini")
            .await
            .unwrap();
        let EditReply::Replied { assistant_id } = outcome else {
            panic!("expected an inserted reply, got {outcome:?}");
        };

        let stored = store.load(&id).await.unwrap().unwrap();
        assert_eq!(stored.revision, 3);
        assert_eq!(stored.messages[1].text, "Y answer");
        assert_eq!(stored.messages[1].reply_to, Some(2));
        assert_eq!(stored.messages[3].id, assistant_id);
        assert_eq!(stored.messages[3].reply_to, Some(2));

        assert!(matches!(
            store.edit_with_reply(&id, "missing", "x", "y", "gemini").await,
            Err(StoreError::MessageNotFound(_))
        ));
        assert_eq!(store.load(&id).await.unwrap().unwrap().revision, 3);
    }

    #[tokio::test]
    async fn test_file_backed_store() {
        let dir = tempdir().unwrap();
        let kv = Arc::new(FileStore::new(dir.path()));
        let id = {
            let store = ConversationStore::new(kv.clone());
            seeded(&store, vec![Message::user("persisted")]).await.id
        };

        let reopened = ConversationStore::new(kv);
        let stored = reopened.load(&id).await.unwrap().unwrap();
        assert_eq!(stored.messages[0].text, "persisted");
    }
}
