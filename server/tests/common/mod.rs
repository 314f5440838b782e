//! Shared fixtures for the integration tests: an in-memory app with a
//! recording mailer, a scripted reply generator and a temp-dir object store.
#![allow(dead_code, unused_macros)]

use actix_web::body::MessageBody;
use actix_web::cookie::Cookie;
use actix_web::dev::ServiceResponse;
use actix_web::http::StatusCode;
use actix_web::test;
use actix_web::web;
use admission_server::auth::session::SESSION_COOKIE;
use admission_server::config::Settings;
use admission_server::db::models::{LoginRequest, RegisterRequest, User};
use admission_server::db::{create_test_pool, SqliteStorage};
use admission_server::error::Result;
use admission_server::services::{LocalObjectStore, Mailer, ReplyGenerator};
use admission_server::state::{AppState, Collaborators};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const TEST_CODE: &str = "123456";
pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "admin-password";

/// Build the service the same way for every test.
macro_rules! init_app {
    ($state:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data($state.clone())
                .app_data(admission_server::server::json_config())
                .configure(admission_server::server::configure_routes),
        )
        .await
    };
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMailer {
    pub fn sent_to(&self, email: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == email)
            .map(|(_, code)| code.clone())
            .collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_verification_code(&self, email: &str, code: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), code.to_string()));
        Ok(())
    }
}

pub struct ScriptedReplyGenerator {
    pub reply: String,
    pub calls: AtomicUsize,
}

impl ScriptedReplyGenerator {
    pub fn new(reply: &str) -> Self {
        ScriptedReplyGenerator {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplyGenerator for ScriptedReplyGenerator {
    async fn generate_reply(&self, _system_instruction: &str, _message: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

pub struct TestApp {
    pub state: web::Data<AppState>,
    pub mailer: Arc<RecordingMailer>,
    pub assistant: Arc<ScriptedReplyGenerator>,
    pub uploads: TempDir,
}

pub fn test_app() -> TestApp {
    let uploads = tempfile::tempdir().expect("Failed to create upload dir");
    let settings = Settings::for_testing(uploads.path().to_path_buf());

    let mailer = Arc::new(RecordingMailer::default());
    let assistant = Arc::new(ScriptedReplyGenerator::new(
        "Fees depend on the course; see the catalog for details.",
    ));
    let collaborators = Collaborators {
        mailer: mailer.clone(),
        assistant: assistant.clone(),
        object_store: Arc::new(LocalObjectStore::new(
            uploads.path(),
            &settings.public_base_url,
        )),
        code_generator: Some(Arc::new(|| TEST_CODE.to_string())),
    };

    let storage = Arc::new(SqliteStorage::new(create_test_pool()));
    TestApp {
        state: web::Data::new(AppState::new(storage, settings, collaborators)),
        mailer,
        assistant,
        uploads,
    }
}

/// Status, JSON body and any session cookie set by a response.
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
    pub session: Option<String>,
}

impl Reply {
    pub async fn read<B: MessageBody>(resp: ServiceResponse<B>) -> Self {
        let status = resp.status();
        let session = resp
            .response()
            .cookies()
            .find(|c| c.name() == SESSION_COOKIE)
            .map(|c| c.value().to_string());
        let bytes = test::read_body(resp).await;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        Reply {
            status,
            body,
            session,
        }
    }

    pub fn error(&self) -> &str {
        self.body["error"].as_str().unwrap_or("")
    }
}

pub fn session_cookie(session_id: &str) -> Cookie<'static> {
    Cookie::new(SESSION_COOKIE, session_id.to_string())
}

/// Run the full verify-then-register flow through the service layer and
/// return the new user with their session id.
pub async fn register_student(state: &AppState, email: &str) -> (User, String) {
    state
        .identity
        .request_verification_code(email)
        .await
        .expect("Failed to send code");
    let ticket = state
        .identity
        .verify_code(email, TEST_CODE)
        .await
        .expect("Failed to verify code")
        .verification_ticket;
    let (user, session) = state
        .identity
        .register(RegisterRequest {
            email: email.to_string(),
            password: "student-pass".to_string(),
            full_name: "Test Student".to_string(),
            role: None,
            verification_ticket: Some(ticket),
        })
        .await
        .expect("Failed to register");
    (user, session.id)
}

pub async fn admin_session(state: &AppState) -> (User, String) {
    state
        .identity
        .ensure_admin(ADMIN_EMAIL, ADMIN_PASSWORD)
        .await
        .expect("Failed to seed admin");
    let (user, session) = state
        .identity
        .login(LoginRequest {
            email: ADMIN_EMAIL.to_string(),
            password: ADMIN_PASSWORD.to_string(),
        })
        .await
        .expect("Admin login failed");
    (user, session.id)
}

pub fn multipart_body(boundary: &str, slot: Option<&str>, file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(slot) = slot {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"fieldName\"\r\n\r\n{slot}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, data)) = file {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}
