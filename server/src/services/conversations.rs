/// Support chat between a student or guest and staff.
///
/// Clients poll for new messages; there is no push delivery. When the
/// conversation owner mentions an admission topic, an automated reply from
/// the `system` sender is appended after their message.

use crate::auth::tokens::{TokenKind, TokenSigner};
use crate::auth::SessionUser;
use crate::db::models::{
    Conversation, ConversationStatus, ConversationThread, GuestSessionResponse, Message,
    PostMessageResponse, SYSTEM_SENDER,
};
use crate::db::Storage;
use crate::error::{AppError, Result};
use crate::services::assistant::{
    build_system_instruction, is_admission_topic, ReplyGenerator, EMPTY_REPLY_FALLBACK,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub const GUEST_TOKEN_TTL_HOURS: i64 = 24;
const GUEST_ID_PREFIX: &str = "guest-";

/// Whoever is acting on a conversation.
#[derive(Debug, Clone)]
pub enum Participant {
    User(SessionUser),
    Guest(String),
}

impl Participant {
    pub fn id(&self) -> &str {
        match self {
            Participant::User(user) => &user.id,
            Participant::Guest(guest_id) => guest_id,
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Participant::User(user) if user.role.is_staff())
    }

    fn may_access(&self, conversation: &Conversation) -> bool {
        conversation.student_id == self.id() || self.is_staff()
    }
}

pub struct ConversationService {
    storage: Arc<dyn Storage>,
    assistant: Arc<dyn ReplyGenerator>,
    signer: TokenSigner,
}

impl ConversationService {
    pub fn new(
        storage: Arc<dyn Storage>,
        assistant: Arc<dyn ReplyGenerator>,
        signer: TokenSigner,
    ) -> Self {
        ConversationService {
            storage,
            assistant,
            signer,
        }
    }

    /// Issue a guest credential. A still-valid token is renewed for the same
    /// guest id; anything else starts a fresh guest.
    pub fn open_guest_session(&self, existing_token: Option<&str>) -> GuestSessionResponse {
        let now = Utc::now();
        let guest_id = existing_token
            .and_then(|token| self.signer.verify(TokenKind::Guest, token, now).ok())
            .map(|claim| claim.subject)
            .unwrap_or_else(|| format!("{}{}", GUEST_ID_PREFIX, Uuid::new_v4()));

        let expires_at = now + Duration::hours(GUEST_TOKEN_TTL_HOURS);
        GuestSessionResponse {
            guest_token: self.signer.sign(TokenKind::Guest, &guest_id, expires_at),
            guest_id,
            expires_at,
        }
    }

    async fn load(&self, id: &str) -> Result<Conversation> {
        self.storage
            .get_conversation(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation".to_string()))
    }

    async fn load_for(&self, id: &str, participant: &Participant) -> Result<Conversation> {
        let conversation = self.load(id).await?;
        if !participant.may_access(&conversation) {
            return Err(AppError::Forbidden);
        }
        Ok(conversation)
    }

    pub async fn start_conversation(
        &self,
        participant: &Participant,
        subject: &str,
    ) -> Result<Conversation> {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(AppError::missing_fields(&["subject"]));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            student_id: participant.id().to_string(),
            support_staff_id: None,
            subject: subject.to_string(),
            status: ConversationStatus::Open,
            created_at: now,
            updated_at: now,
        };
        self.storage.insert_conversation(&conversation).await?;
        log::info!(
            "Conversation {} opened by {}",
            conversation.id,
            conversation.student_id
        );
        Ok(conversation)
    }

    pub async fn list_own(&self, participant: &Participant) -> Result<Vec<Conversation>> {
        Ok(self
            .storage
            .list_conversations_for_student(participant.id())
            .await?)
    }

    /// Pure read, oldest first.
    pub async fn messages(
        &self,
        conversation_id: &str,
        participant: &Participant,
    ) -> Result<Vec<Message>> {
        self.load_for(conversation_id, participant).await?;
        Ok(self.storage.list_messages(conversation_id).await?)
    }

    /// Store the participant's message, then try for an automated reply.
    /// The reply is best effort: any failure leaves just the human message.
    pub async fn post_message(
        &self,
        conversation_id: &str,
        participant: &Participant,
        text: &str,
    ) -> Result<PostMessageResponse> {
        let text = text.trim();
        let mut missing = Vec::new();
        if conversation_id.trim().is_empty() {
            missing.push("conversationId");
        }
        if text.is_empty() {
            missing.push("message");
        }
        if !missing.is_empty() {
            return Err(AppError::missing_fields(&missing));
        }

        let conversation = self.load_for(conversation_id, participant).await?;
        if conversation.status == ConversationStatus::Closed {
            return Err(AppError::Conflict("Conversation is closed".to_string()));
        }

        let user_message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation.id.clone(),
            sender_id: participant.id().to_string(),
            message: text.to_string(),
            created_at: Utc::now(),
        };
        self.storage.insert_message(&user_message).await?;

        let ai_message = if participant.id() == conversation.student_id {
            self.automated_reply(&conversation, text).await
        } else {
            None
        };

        Ok(PostMessageResponse {
            user_message,
            ai_message,
        })
    }

    async fn automated_reply(&self, conversation: &Conversation, text: &str) -> Option<Message> {
        if !is_admission_topic(text) {
            return None;
        }

        let reply = async {
            let courses = self.storage.list_courses().await?;
            let instruction = build_system_instruction(&courses);
            let generated = self.assistant.generate_reply(&instruction, text).await?;
            let generated = generated.trim();

            let message = Message {
                id: Uuid::new_v4().to_string(),
                conversation_id: conversation.id.clone(),
                sender_id: SYSTEM_SENDER.to_string(),
                message: if generated.is_empty() {
                    EMPTY_REPLY_FALLBACK.to_string()
                } else {
                    generated.to_string()
                },
                created_at: Utc::now(),
            };
            self.storage.insert_message(&message).await?;
            Ok::<_, AppError>(message)
        };

        match reply.await {
            Ok(message) => Some(message),
            Err(e) => {
                log::warn!(
                    "Automated reply skipped for conversation {}: {}",
                    conversation.id,
                    e
                );
                None
            }
        }
    }

    /// Admin inbox: every conversation with its transcript and student.
    pub async fn list_threads(&self, actor: &SessionUser) -> Result<Vec<ConversationThread>> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden);
        }

        let conversations = self.storage.list_conversations().await?;
        let mut threads = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let messages = self.storage.list_messages(&conversation.id).await?;
            let student = self.storage.get_user(&conversation.student_id).await?;
            threads.push(ConversationThread {
                conversation,
                messages,
                student,
            });
        }
        Ok(threads)
    }

    /// Assign a staff member, defaulting to the acting admin.
    pub async fn assign_staff(
        &self,
        conversation_id: &str,
        staff_id: Option<&str>,
        actor: &SessionUser,
    ) -> Result<Conversation> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden);
        }

        let staff_id = staff_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(&actor.id);
        let staff = self
            .storage
            .get_user(staff_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Staff member".to_string()))?;
        if !staff.role.is_staff() {
            return Err(AppError::Validation(
                "Conversations can only be assigned to admin or support staff".to_string(),
            ));
        }

        if !self
            .storage
            .assign_conversation(conversation_id, &staff.id, Utc::now())
            .await?
        {
            return Err(AppError::NotFound("Conversation".to_string()));
        }

        log::info!("Conversation {} assigned to {}", conversation_id, staff.id);
        self.load(conversation_id).await
    }

    pub async fn close_conversation(
        &self,
        conversation_id: &str,
        actor: &SessionUser,
    ) -> Result<Conversation> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden);
        }

        if !self
            .storage
            .close_conversation(conversation_id, Utc::now())
            .await?
        {
            return Err(AppError::NotFound("Conversation".to_string()));
        }

        log::info!("Conversation {} closed by {}", conversation_id, actor.id);
        self.load(conversation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Role, User};
    use crate::db::{create_test_pool, SqliteStorage};
    use crate::services::assistant::DisabledReplyGenerator;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedReply {
        text: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReplyGenerator for CannedReply {
        async fn generate_reply(&self, instruction: &str, _message: &str) -> Result<String> {
            assert!(instruction.contains("admission"));
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.to_string())
        }
    }

    struct Fixture {
        storage: Arc<SqliteStorage>,
        assistant: Arc<CannedReply>,
        service: ConversationService,
    }

    fn fixture(text: &'static str) -> Fixture {
        let storage = Arc::new(SqliteStorage::new(create_test_pool()));
        let assistant = Arc::new(CannedReply {
            text,
            calls: AtomicUsize::new(0),
        });
        Fixture {
            service: ConversationService::new(
                storage.clone(),
                assistant.clone(),
                TokenSigner::new(b"test-secret"),
            ),
            storage,
            assistant,
        }
    }

    fn user(id: &str, role: Role) -> SessionUser {
        SessionUser {
            id: id.into(),
            role,
            session_id: format!("sess-{}", id),
        }
    }

    async fn insert_user(storage: &SqliteStorage, id: &str, role: Role) {
        storage
            .insert_user(&User {
                id: id.into(),
                email: format!("{}@example.com", id),
                password_hash: "hash".into(),
                full_name: id.into(),
                role,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_admission_question_gets_system_reply() {
        let f = fixture("Fees are listed on the courses page.");
        let student = Participant::User(user("s1", Role::Student));
        let conv = f
            .service
            .start_conversation(&student, "  Fees  ")
            .await
            .unwrap();
        assert_eq!(conv.subject, "Fees");
        assert_eq!(conv.status, ConversationStatus::Open);

        let response = f
            .service
            .post_message(&conv.id, &student, "tell me about admission fees")
            .await
            .unwrap();
        let ai = response.ai_message.expect("Expected automated reply");
        assert!(ai.is_automated());

        let messages = f.service.messages(&conv.id, &student).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender_id, "s1");
        assert_eq!(messages[1].sender_id, SYSTEM_SENDER);
    }

    #[tokio::test]
    async fn test_off_topic_message_is_stored_alone() {
        let f = fixture("unused");
        let student = Participant::User(user("s1", Role::Student));
        let conv = f.service.start_conversation(&student, "Hi").await.unwrap();

        let response = f
            .service
            .post_message(&conv.id, &student, "what's the weather today")
            .await
            .unwrap();
        assert!(response.ai_message.is_none());
        assert_eq!(f.assistant.calls.load(Ordering::SeqCst), 0);

        let first = f.service.messages(&conv.id, &student).await.unwrap();
        let second = f.service.messages(&conv.id, &student).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_reply_uses_fallback() {
        let f = fixture("   ");
        let student = Participant::User(user("s1", Role::Student));
        let conv = f.service.start_conversation(&student, "Q").await.unwrap();
        let response = f
            .service
            .post_message(&conv.id, &student, "course list?")
            .await
            .unwrap();
        assert_eq!(response.ai_message.unwrap().message, EMPTY_REPLY_FALLBACK);
    }

    #[tokio::test]
    async fn test_generator_failure_degrades() {
        let storage = Arc::new(SqliteStorage::new(create_test_pool()));
        let service = ConversationService::new(
            storage.clone(),
            Arc::new(DisabledReplyGenerator),
            TokenSigner::new(b"test-secret"),
        );
        let guest = Participant::Guest("guest-1".into());
        let conv = service.start_conversation(&guest, "Help").await.unwrap();

        let response = service
            .post_message(&conv.id, &guest, "scholarship deadline?")
            .await
            .expect("Post should succeed without a reply");
        assert!(response.ai_message.is_none());
        assert_eq!(storage.list_messages(&conv.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_staff_reply_does_not_trigger_assistant() {
        let f = fixture("auto");
        let student = Participant::User(user("s1", Role::Student));
        let staff = Participant::User(user("t1", Role::Support));
        let conv = f.service.start_conversation(&student, "Q").await.unwrap();

        let response = f
            .service
            .post_message(&conv.id, &staff, "Your application documents look fine")
            .await
            .unwrap();
        assert!(response.ai_message.is_none());
        assert_eq!(f.assistant.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_outsiders_and_closed_conversations() {
        let f = fixture("auto");
        insert_user(&f.storage, "a1", Role::Admin).await;
        let admin = user("a1", Role::Admin);
        let guest = Participant::Guest("guest-1".into());
        let other_guest = Participant::Guest("guest-2".into());
        let conv = f.service.start_conversation(&guest, "Q").await.unwrap();

        assert!(matches!(
            f.service.messages(&conv.id, &other_guest).await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            f.service.post_message(&conv.id, &other_guest, "hi").await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            f.service.post_message(&conv.id, &guest, "   ").await,
            Err(AppError::Validation(_))
        ));

        assert!(matches!(
            f.service
                .close_conversation(&conv.id, &user("s9", Role::Student))
                .await,
            Err(AppError::Forbidden)
        ));
        let closed = f.service.close_conversation(&conv.id, &admin).await.unwrap();
        assert_eq!(closed.status, ConversationStatus::Closed);
        assert!(matches!(
            f.service.post_message(&conv.id, &guest, "hello?").await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_assign_staff() {
        let f = fixture("auto");
        insert_user(&f.storage, "a1", Role::Admin).await;
        insert_user(&f.storage, "t1", Role::Support).await;
        insert_user(&f.storage, "s1", Role::Student).await;
        let admin = user("a1", Role::Admin);
        let conv = f
            .service
            .start_conversation(&Participant::User(user("s1", Role::Student)), "Q")
            .await
            .unwrap();

        let assigned = f.service.assign_staff(&conv.id, None, &admin).await.unwrap();
        assert_eq!(assigned.support_staff_id.as_deref(), Some("a1"));

        let assigned = f
            .service
            .assign_staff(&conv.id, Some("t1"), &admin)
            .await
            .unwrap();
        assert_eq!(assigned.support_staff_id.as_deref(), Some("t1"));

        assert!(matches!(
            f.service.assign_staff(&conv.id, Some("s1"), &admin).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            f.service.assign_staff(&conv.id, Some("ghost"), &admin).await,
            Err(AppError::NotFound(_))
        ));

        let threads = f.service.list_threads(&admin).await.unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].student.as_ref().unwrap().id, "s1");
    }

    #[tokio::test]
    async fn test_assign_after_close_keeps_it_closed() {
        let f = fixture("auto");
        insert_user(&f.storage, "a1", Role::Admin).await;
        let admin = user("a1", Role::Admin);
        let conv = f
            .service
            .start_conversation(&Participant::User(user("s1", Role::Student)), "Q")
            .await
            .unwrap();

        f.service.close_conversation(&conv.id, &admin).await.unwrap();
        let assigned = f.service.assign_staff(&conv.id, None, &admin).await.unwrap();
        assert_eq!(assigned.status, ConversationStatus::Closed);
        assert_eq!(assigned.support_staff_id.as_deref(), Some("a1"));

        assert!(matches!(
            f.service.close_conversation("missing", &admin).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_guest_session_renewal() {
        let f = fixture("auto");
        let first = f.service.open_guest_session(None);
        assert!(first.guest_id.starts_with(GUEST_ID_PREFIX));

        let renewed = f.service.open_guest_session(Some(&first.guest_token));
        assert_eq!(renewed.guest_id, first.guest_id);

        let fresh = f.service.open_guest_session(Some("forged.token"));
        assert_ne!(fresh.guest_id, first.guest_id);
    }
}
