use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use guardian_core::types::{ActorId, ConversationId, MessageId, MessageRole};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::error::{Result, StoreError};
use crate::types::{title_from, Conversation, SaveMessage, StoredMessage};

/// Durable conversation storage, always scoped to the owning actor.
///
/// A conversation that belongs to someone else behaves exactly like one
/// that does not exist.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, actor: &ActorId) -> Result<Conversation>;

    async fn get_conversation(
        &self,
        actor: &ActorId,
        id: &ConversationId,
    ) -> Result<Option<Conversation>>;

    /// Conversations owned by `actor`, most recently active first.
    async fn list_conversations(&self, actor: &ActorId, limit: usize) -> Result<Vec<Conversation>>;

    /// Save one message. Saving the same message id twice is a no-op that
    /// returns the stored copy.
    async fn save_message(
        &self,
        actor: &ActorId,
        conversation: &ConversationId,
        message: SaveMessage,
    ) -> Result<StoredMessage>;

    /// Messages in creation order.
    async fn get_messages(
        &self,
        actor: &ActorId,
        conversation: &ConversationId,
    ) -> Result<Vec<StoredMessage>>;
}

/// SQLite-backed conversation store. One connection behind a `Mutex`.
pub struct SqliteConversationStore {
    db: Mutex<Connection>,
}

impl SqliteConversationStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| StoreError::Unavailable("conversation connection poisoned".to_string()))
    }

    #[instrument(skip(self), fields(actor = %actor))]
    pub fn create(&self, actor: &ActorId) -> Result<Conversation> {
        let id = ConversationId::new();
        let now = timestamp(Utc::now());
        let db = self.conn()?;
        db.execute(
            "INSERT INTO conversations (id, actor_id, title, created_at, updated_at)
             VALUES (?1, ?2, NULL, ?3, ?3)",
            rusqlite::params![id.as_str(), actor.as_str(), now],
        )?;
        debug!(conversation = %id, "conversation created");
        Ok(Conversation {
            id,
            actor_id: actor.clone(),
            title: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn find(&self, actor: &ActorId, id: &ConversationId) -> Result<Option<Conversation>> {
        let db = self.conn()?;
        find_conversation(&db, actor, id)
    }

    pub fn list_for_actor(&self, actor: &ActorId, limit: usize) -> Result<Vec<Conversation>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, actor_id, title, created_at, updated_at
             FROM conversations
             WHERE actor_id = ?1
             ORDER BY updated_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![actor.as_str(), limit as i64],
            row_to_conversation,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[instrument(skip(self, message), fields(actor = %actor, conversation = %conversation, message = %message.id))]
    pub fn save(
        &self,
        actor: &ActorId,
        conversation: &ConversationId,
        message: SaveMessage,
    ) -> Result<StoredMessage> {
        if message.id.as_str().is_empty() {
            return Err(StoreError::InvalidMessage("message id must not be empty".to_string()));
        }
        let context_json = message
            .context_used
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::InvalidMessage(e.to_string()))?;

        let mut db = self.conn()?;
        let tx = db.transaction()?;
        if find_conversation(&tx, actor, conversation)?.is_none() {
            return Err(StoreError::NotFound {
                id: conversation.to_string(),
            });
        }

        let now = timestamp(Utc::now());
        let created_at = match message.created_at.as_deref() {
            Some(raw) => normalize_created_at(raw)?,
            None => now.clone(),
        };
        let inserted = tx.execute(
            "INSERT INTO messages
             (id, conversation_id, role, content, context_used, function_calls, prompt_strength, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO NOTHING",
            rusqlite::params![
                message.id.as_str(),
                conversation.as_str(),
                message.role.as_str(),
                message.content,
                context_json,
                message.function_calls,
                message.prompt_strength,
                created_at,
            ],
        )?;

        if inserted > 0 {
            if message.role == MessageRole::User {
                tx.execute(
                    "UPDATE conversations SET title = ?1 WHERE id = ?2 AND title IS NULL",
                    rusqlite::params![title_from(&message.content), conversation.as_str()],
                )?;
            }
            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, conversation.as_str()],
            )?;
        } else {
            debug!("message already stored");
        }

        let stored = tx.query_row(
            "SELECT id, conversation_id, role, content, context_used, function_calls,
                    prompt_strength, created_at
             FROM messages WHERE id = ?1",
            rusqlite::params![message.id.as_str()],
            row_to_message,
        )?;
        tx.commit()?;

        if stored.conversation_id != *conversation {
            return Err(StoreError::InvalidMessage(format!(
                "message {} belongs to another conversation",
                stored.id
            )));
        }
        Ok(stored)
    }

    pub fn messages(
        &self,
        actor: &ActorId,
        conversation: &ConversationId,
    ) -> Result<Vec<StoredMessage>> {
        let db = self.conn()?;
        if find_conversation(&db, actor, conversation)?.is_none() {
            return Err(StoreError::NotFound {
                id: conversation.to_string(),
            });
        }
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, role, content, context_used, function_calls,
                    prompt_strength, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at, seq",
        )?;
        let rows = stmt.query_map(rusqlite::params![conversation.as_str()], row_to_message)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create_conversation(&self, actor: &ActorId) -> Result<Conversation> {
        self.create(actor)
    }

    async fn get_conversation(
        &self,
        actor: &ActorId,
        id: &ConversationId,
    ) -> Result<Option<Conversation>> {
        self.find(actor, id)
    }

    async fn list_conversations(&self, actor: &ActorId, limit: usize) -> Result<Vec<Conversation>> {
        self.list_for_actor(actor, limit)
    }

    async fn save_message(
        &self,
        actor: &ActorId,
        conversation: &ConversationId,
        message: SaveMessage,
    ) -> Result<StoredMessage> {
        self.save(actor, conversation, message)
    }

    async fn get_messages(
        &self,
        actor: &ActorId,
        conversation: &ConversationId,
    ) -> Result<Vec<StoredMessage>> {
        self.messages(actor, conversation)
    }
}

/// Stored timestamps are UTC with a fixed width so text order is time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn normalize_created_at(raw: &str) -> Result<String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| timestamp(at.with_timezone(&Utc)))
        .map_err(|e| StoreError::InvalidMessage(format!("createdAt {raw:?} is not RFC 3339: {e}")))
}

fn find_conversation(
    conn: &Connection,
    actor: &ActorId,
    id: &ConversationId,
) -> Result<Option<Conversation>> {
    Ok(conn
        .query_row(
            "SELECT id, actor_id, title, created_at, updated_at
             FROM conversations WHERE id = ?1 AND actor_id = ?2",
            rusqlite::params![id.as_str(), actor.as_str()],
            row_to_conversation,
        )
        .optional()?)
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: ConversationId(row.get(0)?),
        actor_id: ActorId(row.get(1)?),
        title: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role: String = row.get(2)?;
    let role = role.parse::<MessageRole>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    let context_used = row
        .get::<_, Option<String>>(4)?
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(StoredMessage {
        id: MessageId(row.get(0)?),
        conversation_id: ConversationId(row.get(1)?),
        role,
        content: row.get(3)?,
        context_used,
        function_calls: row.get(5)?,
        prompt_strength: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use guardian_protocol::ContextUsed;

    fn store() -> SqliteConversationStore {
        let conn = Connection::open_in_memory().unwrap();
        db::init_db(&conn).unwrap();
        SqliteConversationStore::new(conn)
    }

    #[test]
    fn first_user_message_sets_title() {
        let s = store();
        let actor = ActorId::from("parent-demo");
        let conv = s.create(&actor).unwrap();
        s.save(&actor, &conv.id, SaveMessage::user(MessageId::new(), "Điểm toán của Minh thế nào?"))
            .unwrap();
        s.save(&actor, &conv.id, SaveMessage::user(MessageId::new(), "Còn môn văn?"))
            .unwrap();
        let found = s.find(&actor, &conv.id).unwrap().unwrap();
        assert_eq!(found.title.as_deref(), Some("Điểm toán của Minh thế nào?"));
    }

    #[test]
    fn messages_come_back_in_creation_order_with_metadata() {
        let s = store();
        let actor = ActorId::from("parent-demo");
        let conv = s.create(&actor).unwrap();
        let user_id = MessageId::new();
        let asst_id = MessageId::new();
        let ctx = ContextUsed {
            students: 1,
            grades: 4,
            ..ContextUsed::default()
        };
        // Assistant saved first but stamped later.
        let mut asst = SaveMessage::assistant(asst_id.clone(), "Minh học tốt.")
            .with_created_at("2026-10-18T10:00:01+00:00");
        asst.context_used = Some(ctx);
        asst.function_calls = Some(1);
        asst.prompt_strength = Some(0.58);
        s.save(&actor, &conv.id, asst).unwrap();
        s.save(
            &actor,
            &conv.id,
            SaveMessage::user(user_id.clone(), "Minh?").with_created_at("2026-10-18T10:00:00+00:00"),
        )
        .unwrap();

        let msgs = s.messages(&actor, &conv.id).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].id, user_id);
        assert_eq!(msgs[1].id, asst_id);
        assert_eq!(msgs[1].context_used, Some(ctx));
        assert_eq!(msgs[1].function_calls, Some(1));
    }

    #[test]
    fn created_at_offsets_are_normalized_to_utc() {
        let s = store();
        let actor = ActorId::from("parent-demo");
        let conv = s.create(&actor).unwrap();
        // 09:00 UTC, written with a +07:00 offset.
        let first = s
            .save(
                &actor,
                &conv.id,
                SaveMessage::user(MessageId::new(), "first")
                    .with_created_at("2026-10-18T16:00:00+07:00"),
            )
            .unwrap();
        s.save(
            &actor,
            &conv.id,
            SaveMessage::assistant(MessageId::new(), "second")
                .with_created_at("2026-10-18T10:00:00+00:00"),
        )
        .unwrap();

        assert_eq!(first.created_at, "2026-10-18T09:00:00.000000Z");
        let order: Vec<_> = s
            .messages(&actor, &conv.id)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(order, vec!["first", "second"]);
    }

    #[test]
    fn unparseable_created_at_is_rejected() {
        let s = store();
        let actor = ActorId::from("parent-demo");
        let conv = s.create(&actor).unwrap();
        let err = s
            .save(
                &actor,
                &conv.id,
                SaveMessage::user(MessageId::new(), "g").with_created_at("not a time"),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidMessage(_)));
        assert!(s.messages(&actor, &conv.id).unwrap().is_empty());
    }

    #[test]
    fn saving_same_id_twice_is_idempotent() {
        let s = store();
        let actor = ActorId::from("parent-demo");
        let conv = s.create(&actor).unwrap();
        let id = MessageId::new();
        s.save(&actor, &conv.id, SaveMessage::user(id.clone(), "một")).unwrap();
        let again = s.save(&actor, &conv.id, SaveMessage::user(id, "hai")).unwrap();
        assert_eq!(again.content, "một");
        assert_eq!(s.messages(&actor, &conv.id).unwrap().len(), 1);
    }

    #[test]
    fn other_actors_cannot_see_or_write() {
        let s = store();
        let owner = ActorId::from("parent-demo");
        let stranger = ActorId::from("parent-other");
        let conv = s.create(&owner).unwrap();
        assert!(s.find(&stranger, &conv.id).unwrap().is_none());
        assert!(matches!(
            s.messages(&stranger, &conv.id),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            s.save(&stranger, &conv.id, SaveMessage::user(MessageId::new(), "x")),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn list_for_actor_is_scoped() {
        let s = store();
        let a = ActorId::from("a");
        s.create(&a).unwrap();
        s.create(&a).unwrap();
        s.create(&ActorId::from("b")).unwrap();
        assert_eq!(s.list_for_actor(&a, 10).unwrap().len(), 2);
    }
}
