/// Database layer for persistent storage.
/// `Storage` is the persistence capability the services depend on;
/// `SqliteStorage` is the one implementation shipped.
pub mod init;
pub mod models;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::{
    Application, ApplicationStatus, Conversation, ConversationStatus, Course, DocumentDescriptor,
    Message, Session, User, VerificationCode, DETAILS_SCHEMA_VERSION,
};
use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

pub type DbPool = Arc<Mutex<Connection>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Create a connection pool (simplified for single-threaded SQLite)
pub fn create_pool(db_path: &str) -> rusqlite::Result<DbPool> {
    let conn = Connection::open(db_path)?;
    init::initialize_database(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Create an in-memory database for testing
pub fn create_test_pool() -> DbPool {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory DB");
    init::initialize_database(&conn).expect("Failed to initialize DB");
    Arc::new(Mutex::new(conn))
}

/// Persistence capability. Every call is atomic for the row(s) it touches.
/// Updates write only the columns they own: status moves are
/// compare-and-set, content edits are last write wins.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert_user(&self, user: &User) -> StorageResult<()>;
    async fn get_user(&self, id: &str) -> StorageResult<Option<User>>;
    /// Case-insensitive lookup.
    async fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>>;

    async fn insert_session(&self, session: &Session) -> StorageResult<()>;
    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>>;
    async fn delete_session(&self, id: &str) -> StorageResult<()>;
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StorageResult<usize>;

    async fn list_courses(&self) -> StorageResult<Vec<Course>>;
    async fn get_course(&self, id: &str) -> StorageResult<Option<Course>>;
    async fn insert_course(&self, course: &Course) -> StorageResult<()>;
    async fn update_course(&self, course: &Course) -> StorageResult<bool>;
    async fn delete_course(&self, id: &str) -> StorageResult<bool>;

    async fn insert_application(&self, application: &Application) -> StorageResult<()>;
    async fn get_application(&self, id: &str) -> StorageResult<Option<Application>>;
    async fn list_applications(&self) -> StorageResult<Vec<Application>>;
    async fn list_applications_for_student(
        &self,
        student_id: &str,
    ) -> StorageResult<Vec<Application>>;
    /// Rewrite course and detail blocks. Status is left alone.
    async fn update_application_content(&self, application: &Application)
        -> StorageResult<bool>;
    /// Move status from `from` to `to`. Returns false when the row is gone
    /// or its status is no longer `from`.
    async fn update_application_status(
        &self,
        id: &str,
        from: ApplicationStatus,
        to: ApplicationStatus,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<bool>;
    /// Replace one document slot in place.
    async fn set_application_document(
        &self,
        id: &str,
        slot: &str,
        descriptor: &DocumentDescriptor,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    async fn insert_conversation(&self, conversation: &Conversation) -> StorageResult<()>;
    async fn get_conversation(&self, id: &str) -> StorageResult<Option<Conversation>>;
    /// Most recently active first.
    async fn list_conversations_for_student(
        &self,
        student_id: &str,
    ) -> StorageResult<Vec<Conversation>>;
    /// Most recently active first.
    async fn list_conversations(&self) -> StorageResult<Vec<Conversation>>;
    async fn assign_conversation(
        &self,
        id: &str,
        staff_id: &str,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<bool>;
    async fn close_conversation(&self, id: &str, updated_at: DateTime<Utc>)
        -> StorageResult<bool>;

    /// Store a message and bump its conversation's `updated_at` together.
    async fn insert_message(&self, message: &Message) -> StorageResult<()>;
    /// Oldest first.
    async fn list_messages(&self, conversation_id: &str) -> StorageResult<Vec<Message>>;

    async fn insert_verification_code(&self, code: &VerificationCode) -> StorageResult<()>;
    /// The most recently created code for the email, verified or not.
    async fn latest_verification_code(&self, email: &str)
        -> StorageResult<Option<VerificationCode>>;
    async fn mark_code_verified(&self, id: &str) -> StorageResult<()>;
    /// Drop codes that are expired or already consumed.
    async fn purge_verification_codes(&self, now: DateTime<Utc>) -> StorageResult<usize>;
}

/// SQLite-backed `Storage`.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: DbPool,
}

impl SqliteStorage {
    pub fn new(pool: DbPool) -> Self {
        SqliteStorage { pool }
    }
}

fn map_write_error(err: rusqlite::Error) -> StorageError {
    if let rusqlite::Error::SqliteFailure(ref failure, ref message) = err {
        if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
            || failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        {
            return StorageError::UniqueViolation(message.clone().unwrap_or_default());
        }
    }
    StorageError::Sqlite(err)
}

fn parse_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const USER_COLUMNS: &str = "id, email, password_hash, full_name, role, created_at";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        full_name: row.get(3)?,
        role: parse_column(row, 4)?,
        created_at: row.get(5)?,
    })
}

const SESSION_COLUMNS: &str = "id, user_id, is_admin, created_at, expires_at";

fn session_from_row(row: &Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        is_admin: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
    })
}

const COURSE_COLUMNS: &str = "id, name, code, description, duration, degree";

fn course_from_row(row: &Row) -> rusqlite::Result<Course> {
    Ok(Course {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        description: row.get(3)?,
        duration: row.get(4)?,
        degree: row.get(5)?,
    })
}

const APPLICATION_COLUMNS: &str = "id, student_id, course_id, status, details_version, \
     personal_details, academic_details, documents, submitted_at, updated_at";

fn application_from_row(row: &Row) -> rusqlite::Result<Application> {
    let version: i64 = row.get(4)?;
    if version != DETAILS_SCHEMA_VERSION {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Integer,
            Box::new(models::UnknownVariant {
                kind: "details version",
                value: version.to_string(),
            }),
        ));
    }

    Ok(Application {
        id: row.get(0)?,
        student_id: row.get(1)?,
        course_id: row.get(2)?,
        status: parse_column(row, 3)?,
        personal_details: json_column(row, 5)?,
        academic_details: json_column(row, 6)?,
        documents: json_column(row, 7)?,
        submitted_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const CONVERSATION_COLUMNS: &str =
    "id, student_id, support_staff_id, subject, status, created_at, updated_at";

fn conversation_from_row(row: &Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        student_id: row.get(1)?,
        support_staff_id: row.get(2)?,
        subject: row.get(3)?,
        status: parse_column(row, 4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, message, created_at";

fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        message: row.get(3)?,
        created_at: row.get(4)?,
    })
}

const CODE_COLUMNS: &str = "id, email, code, expires_at, is_verified, created_at";

fn code_from_row(row: &Row) -> rusqlite::Result<VerificationCode> {
    Ok(VerificationCode {
        id: row.get(0)?,
        email: row.get(1)?,
        code: row.get(2)?,
        expires_at: row.get(3)?,
        is_verified: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn insert_user(&self, user: &User) -> StorageResult<()> {
        let conn = self.pool.lock().await;
        conn.execute(
            "INSERT INTO users (id, email, password_hash, full_name, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id,
                user.email,
                user.password_hash,
                user.full_name,
                user.role.as_str(),
                user.created_at
            ],
        )
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> StorageResult<Option<User>> {
        let conn = self.pool.lock().await;
        let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], user_from_row).optional()?)
    }

    async fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let conn = self.pool.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?1 COLLATE NOCASE"
        ))?;
        Ok(stmt.query_row(params![email.trim()], user_from_row).optional()?)
    }

    async fn insert_session(&self, session: &Session) -> StorageResult<()> {
        let conn = self.pool.lock().await;
        conn.execute(
            "INSERT INTO sessions (id, user_id, is_admin, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id,
                session.user_id,
                session.is_admin,
                session.created_at,
                session.expires_at
            ],
        )
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>> {
        let conn = self.pool.lock().await;
        let mut stmt =
            conn.prepare(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], session_from_row).optional()?)
    }

    async fn delete_session(&self, id: &str) -> StorageResult<()> {
        let conn = self.pool.lock().await;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let conn = self.pool.lock().await;
        Ok(conn.execute("DELETE FROM sessions WHERE expires_at < ?1", params![now])?)
    }

    async fn list_courses(&self) -> StorageResult<Vec<Course>> {
        let conn = self.pool.lock().await;
        let mut stmt =
            conn.prepare(&format!("SELECT {COURSE_COLUMNS} FROM courses ORDER BY name, code"))?;
        let courses = stmt
            .query_map([], course_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(courses)
    }

    async fn get_course(&self, id: &str) -> StorageResult<Option<Course>> {
        let conn = self.pool.lock().await;
        let mut stmt =
            conn.prepare(&format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], course_from_row).optional()?)
    }

    async fn insert_course(&self, course: &Course) -> StorageResult<()> {
        let conn = self.pool.lock().await;
        conn.execute(
            "INSERT INTO courses (id, name, code, description, duration, degree)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                course.id,
                course.name,
                course.code,
                course.description,
                course.duration,
                course.degree
            ],
        )
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn update_course(&self, course: &Course) -> StorageResult<bool> {
        let conn = self.pool.lock().await;
        let changed = conn
            .execute(
                "UPDATE courses SET name = ?2, code = ?3, description = ?4, duration = ?5, degree = ?6
                 WHERE id = ?1",
                params![
                    course.id,
                    course.name,
                    course.code,
                    course.description,
                    course.duration,
                    course.degree
                ],
            )
            .map_err(map_write_error)?;
        Ok(changed > 0)
    }

    async fn delete_course(&self, id: &str) -> StorageResult<bool> {
        let conn = self.pool.lock().await;
        Ok(conn.execute("DELETE FROM courses WHERE id = ?1", params![id])? > 0)
    }

    async fn insert_application(&self, application: &Application) -> StorageResult<()> {
        let personal = serde_json::to_string(&application.personal_details)?;
        let academic = serde_json::to_string(&application.academic_details)?;
        let documents = serde_json::to_string(&application.documents)?;

        let conn = self.pool.lock().await;
        conn.execute(
            "INSERT INTO applications (id, student_id, course_id, status, details_version,
                 personal_details, academic_details, documents, submitted_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                application.id,
                application.student_id,
                application.course_id,
                application.status.as_str(),
                DETAILS_SCHEMA_VERSION,
                personal,
                academic,
                documents,
                application.submitted_at,
                application.updated_at
            ],
        )
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn get_application(&self, id: &str) -> StorageResult<Option<Application>> {
        let conn = self.pool.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1"
        ))?;
        Ok(stmt.query_row(params![id], application_from_row).optional()?)
    }

    async fn list_applications(&self) -> StorageResult<Vec<Application>> {
        let conn = self.pool.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications ORDER BY submitted_at DESC, rowid DESC"
        ))?;
        let applications = stmt
            .query_map([], application_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(applications)
    }

    async fn list_applications_for_student(
        &self,
        student_id: &str,
    ) -> StorageResult<Vec<Application>> {
        let conn = self.pool.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE student_id = ?1
             ORDER BY submitted_at DESC, rowid DESC"
        ))?;
        let applications = stmt
            .query_map(params![student_id], application_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(applications)
    }

    async fn update_application_content(
        &self,
        application: &Application,
    ) -> StorageResult<bool> {
        let personal = serde_json::to_string(&application.personal_details)?;
        let academic = serde_json::to_string(&application.academic_details)?;
        let documents = serde_json::to_string(&application.documents)?;

        let conn = self.pool.lock().await;
        let changed = conn.execute(
            "UPDATE applications SET course_id = ?2, details_version = ?3,
                 personal_details = ?4, academic_details = ?5, documents = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                application.id,
                application.course_id,
                DETAILS_SCHEMA_VERSION,
                personal,
                academic,
                documents,
                application.updated_at
            ],
        )?;
        Ok(changed > 0)
    }

    async fn update_application_status(
        &self,
        id: &str,
        from: ApplicationStatus,
        to: ApplicationStatus,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let conn = self.pool.lock().await;
        let changed = conn.execute(
            "UPDATE applications SET status = ?3, updated_at = ?4
             WHERE id = ?1 AND status = ?2",
            params![id, from.as_str(), to.as_str(), updated_at],
        )?;
        Ok(changed > 0)
    }

    async fn set_application_document(
        &self,
        id: &str,
        slot: &str,
        descriptor: &DocumentDescriptor,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let descriptor = serde_json::to_string(descriptor)?;
        let path = format!("$.\"{}\"", slot);

        let conn = self.pool.lock().await;
        let changed = conn.execute(
            "UPDATE applications SET documents = json_set(documents, ?2, json(?3)),
                 updated_at = ?4
             WHERE id = ?1",
            params![id, path, descriptor, updated_at],
        )?;
        Ok(changed > 0)
    }

    async fn insert_conversation(&self, conversation: &Conversation) -> StorageResult<()> {
        let conn = self.pool.lock().await;
        conn.execute(
            "INSERT INTO conversations (id, student_id, support_staff_id, subject, status,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                conversation.id,
                conversation.student_id,
                conversation.support_staff_id,
                conversation.subject,
                conversation.status.as_str(),
                conversation.created_at,
                conversation.updated_at
            ],
        )
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> StorageResult<Option<Conversation>> {
        let conn = self.pool.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"
        ))?;
        Ok(stmt.query_row(params![id], conversation_from_row).optional()?)
    }

    async fn list_conversations_for_student(
        &self,
        student_id: &str,
    ) -> StorageResult<Vec<Conversation>> {
        let conn = self.pool.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE student_id = ?1
             ORDER BY updated_at DESC, rowid DESC"
        ))?;
        let conversations = stmt
            .query_map(params![student_id], conversation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(conversations)
    }

    async fn list_conversations(&self) -> StorageResult<Vec<Conversation>> {
        let conn = self.pool.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations ORDER BY updated_at DESC, rowid DESC"
        ))?;
        let conversations = stmt
            .query_map([], conversation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(conversations)
    }

    async fn assign_conversation(
        &self,
        id: &str,
        staff_id: &str,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let conn = self.pool.lock().await;
        let changed = conn.execute(
            "UPDATE conversations SET support_staff_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, staff_id, updated_at],
        )?;
        Ok(changed > 0)
    }

    async fn close_conversation(
        &self,
        id: &str,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let conn = self.pool.lock().await;
        let changed = conn.execute(
            "UPDATE conversations SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, ConversationStatus::Closed.as_str(), updated_at],
        )?;
        Ok(changed > 0)
    }

    async fn insert_message(&self, message: &Message) -> StorageResult<()> {
        let mut conn = self.pool.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO messages (id, conversation_id, sender_id, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id,
                message.conversation_id,
                message.sender_id,
                message.message,
                message.created_at
            ],
        )
        .map_err(map_write_error)?;
        tx.execute(
            "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
            params![message.conversation_id, message.created_at],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> StorageResult<Vec<Message>> {
        let conn = self.pool.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let messages = stmt
            .query_map(params![conversation_id], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    async fn insert_verification_code(&self, code: &VerificationCode) -> StorageResult<()> {
        let conn = self.pool.lock().await;
        conn.execute(
            "INSERT INTO verification_codes (id, email, code, expires_at, is_verified, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                code.id,
                code.email,
                code.code,
                code.expires_at,
                code.is_verified,
                code.created_at
            ],
        )
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn latest_verification_code(
        &self,
        email: &str,
    ) -> StorageResult<Option<VerificationCode>> {
        let conn = self.pool.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CODE_COLUMNS} FROM verification_codes WHERE email = ?1 COLLATE NOCASE
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))?;
        Ok(stmt.query_row(params![email.trim()], code_from_row).optional()?)
    }

    async fn mark_code_verified(&self, id: &str) -> StorageResult<()> {
        let conn = self.pool.lock().await;
        conn.execute(
            "UPDATE verification_codes SET is_verified = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    async fn purge_verification_codes(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let conn = self.pool.lock().await;
        Ok(conn.execute(
            "DELETE FROM verification_codes WHERE is_verified = 1 OR expires_at < ?1",
            params![now],
        )?)
    }
}
