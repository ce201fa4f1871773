use uuid::Uuid;

use crate::stored_object;

stored_object!(Turn, "turn", {
    conversation_id: String,
    user_text: String,
    assistant_text: String
});

impl Turn {
    pub fn new(conversation_id: String, user_text: String, assistant_text: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            conversation_id,
            user_text,
            assistant_text,
        }
    }
}
