use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::memory_node::ensure_namespace;
use super::turn::Turn;

stored_object!(Conversation, "conversation", {
    namespace: String,
    title: String
});

impl Conversation {
    pub fn new(namespace: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            namespace,
            title,
        }
    }

    /// Fetch an existing conversation in this namespace, or start a fresh one.
    pub async fn get_or_create(
        db: &SurrealDbClient,
        namespace: &str,
        conversation_id: Option<&str>,
        title: &str,
    ) -> Result<Self, AppError> {
        ensure_namespace(namespace)?;

        if let Some(id) = conversation_id {
            let conversation: Self = db
                .get_item(id)
                .await?
                .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;
            if conversation.namespace != namespace {
                return Err(AppError::Auth(
                    "You don't have access to this conversation".to_string(),
                ));
            }
            return Ok(conversation);
        }

        let conversation = Self::new(namespace.to_string(), title.to_string());
        db.store_item(conversation.clone()).await?;
        Ok(conversation)
    }

    /// The conversation with its turns in chronological order.
    pub async fn get_complete(
        conversation_id: &str,
        namespace: &str,
        db: &SurrealDbClient,
    ) -> Result<(Self, Vec<Turn>), AppError> {
        let conversation: Self = db
            .get_item(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

        if conversation.namespace != namespace {
            return Err(AppError::Auth(
                "You don't have access to this conversation".to_string(),
            ));
        }

        let turns: Vec<Turn> = db
            .client
            .query(
                "SELECT * FROM type::table($table_name)
                 WHERE conversation_id = $conversation_id
                 ORDER BY created_at",
            )
            .bind(("table_name", Turn::table_name()))
            .bind(("conversation_id", conversation_id.to_string()))
            .await?
            .take(0)?;

        Ok((conversation, turns))
    }

    pub async fn list(
        db: &SurrealDbClient,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<Self>, AppError> {
        ensure_namespace(namespace)?;

        Ok(db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE namespace = $namespace
                 ORDER BY updated_at DESC
                 LIMIT $limit",
            )
            .bind(("table", Self::table_name()))
            .bind(("namespace", namespace.to_owned()))
            .bind(("limit", limit))
            .await?
            .take(0)?)
    }

    /// Delete a conversation and its turns after a namespace check.
    pub async fn delete(
        db: &SurrealDbClient,
        conversation_id: &str,
        namespace: &str,
    ) -> Result<(), AppError> {
        let (conversation, _) = Self::get_complete(conversation_id, namespace, db).await?;

        db.client
            .query(
                "BEGIN TRANSACTION;
                 DELETE FROM turn WHERE conversation_id = $conversation_id;
                 DELETE type::thing('conversation', $conversation_id);
                 COMMIT TRANSACTION;",
            )
            .bind(("conversation_id", conversation.id))
            .await?
            .check()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized(3)
            .await
            .expect("Failed to initialize schema");
        db
    }

    #[tokio::test]
    async fn test_get_or_create_creates_and_finds() {
        let db = setup_test_db().await;

        let created = Conversation::get_or_create(&db, "user_a", None, "First chat")
            .await
            .expect("create conversation");
        assert_eq!(created.namespace, "user_a");

        let found = Conversation::get_or_create(&db, "user_a", Some(&created.id), "ignored")
            .await
            .expect("find conversation");
        assert_eq!(found.id, created.id);
        assert_eq!(found.title, "First chat");
    }

    #[tokio::test]
    async fn test_get_or_create_rejects_foreign_namespace() {
        let db = setup_test_db().await;

        let created = Conversation::get_or_create(&db, "user_a", None, "Private")
            .await
            .expect("create conversation");

        let result = Conversation::get_or_create(&db, "user_b", Some(&created.id), "x").await;
        assert!(matches!(result, Err(AppError::Auth(_))));
    }

    #[tokio::test]
    async fn test_get_complete_returns_turns_in_order() {
        let db = setup_test_db().await;

        let conversation = Conversation::get_or_create(&db, "user_a", None, "Chat")
            .await
            .expect("create conversation");

        for (i, text) in ["first", "second", "third"].iter().enumerate() {
            let mut turn = Turn::new(
                conversation.id.clone(),
                (*text).to_string(),
                format!("reply {i}"),
            );
            // Force distinct timestamps so ordering is observable
            turn.created_at = Utc::now() + chrono::Duration::milliseconds(i as i64);
            db.store_item(turn).await.expect("store turn");
        }

        let (_, turns) = Conversation::get_complete(&conversation.id, "user_a", &db)
            .await
            .expect("get complete");

        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].user_text, "first");
        assert_eq!(turns[2].user_text, "third");
    }

    #[tokio::test]
    async fn test_delete_removes_conversation_and_turns() {
        let db = setup_test_db().await;

        let conversation = Conversation::get_or_create(&db, "user_a", None, "Chat")
            .await
            .expect("create conversation");
        db.store_item(Turn::new(
            conversation.id.clone(),
            "hello".to_string(),
            "hi".to_string(),
        ))
        .await
        .expect("store turn");

        Conversation::delete(&db, &conversation.id, "user_a")
            .await
            .expect("delete conversation");

        assert!(db
            .get_item::<Conversation>(&conversation.id)
            .await
            .expect("get")
            .is_none());
        let turns: Vec<Turn> = db.get_all_stored_items().await.expect("all turns");
        assert!(turns.is_empty());
    }
}
