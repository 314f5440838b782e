/// HTTP server factory and configuration.
/// Provides the route table and a reusable function to create the HTTP server
/// for use in both the main binary and tests.
use crate::config::Settings;
use crate::db::{create_test_pool, SqliteStorage};
use crate::error::AppError;
use crate::handlers::{applications, auth, chat, courses, health};
use crate::state::{AppState, Collaborators};
use actix_web::{middleware, web, App, HttpServer};
use std::sync::Arc;

/// Malformed JSON bodies answer with the same `{"error": ...}` shape as
/// every other failure.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| AppError::Validation(format!("Invalid JSON: {}", err)).into())
}

/// REST endpoints. Mounted under `/api` by the binary.
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        // Identity & verification
        .route("/auth/register", web::post().to(auth::register))
        .route("/auth/login", web::post().to(auth::login))
        .route("/auth/logout", web::post().to(auth::logout))
        .route("/auth/me", web::get().to(auth::me))
        .route("/auth/check-email/{email}", web::get().to(auth::check_email))
        .route("/verification/send-code", web::post().to(auth::send_code))
        .route("/verification/verify-code", web::post().to(auth::verify_code))
        // Course catalog
        .route("/courses", web::get().to(courses::list_courses))
        .route("/courses", web::post().to(courses::create_course))
        .route("/courses/{id}", web::get().to(courses::get_course))
        .route("/courses/{id}", web::patch().to(courses::update_course))
        .route("/courses/{id}", web::delete().to(courses::delete_course))
        // Applications & documents
        .route("/applications", web::get().to(applications::list_applications))
        .route("/applications", web::post().to(applications::create_application))
        .route("/applications/{id}", web::get().to(applications::get_application))
        .route("/applications/{id}", web::patch().to(applications::update_application))
        .route(
            "/applications/{id}/documents/{slot}",
            web::put().to(applications::attach_document),
        )
        .route("/upload-document", web::post().to(applications::upload_document))
        // Chat
        .route("/chat/conversations", web::get().to(chat::list_conversations))
        .route("/chat/conversations", web::post().to(chat::start_conversation))
        .route("/chat/messages/{id}", web::get().to(chat::get_messages))
        .route("/chat/messages", web::post().to(chat::post_message))
        .route("/chat/guest/session", web::post().to(chat::guest_session))
        .route(
            "/chat/guest/conversations",
            web::get().to(chat::guest_list_conversations),
        )
        .route(
            "/chat/guest/conversations",
            web::post().to(chat::guest_start_conversation),
        )
        .route("/chat/guest/messages/{id}", web::get().to(chat::guest_get_messages))
        .route("/chat/guest/messages", web::post().to(chat::guest_post_message))
        .route(
            "/admin/chat/conversations",
            web::get().to(chat::admin_list_conversations),
        )
        .route(
            "/admin/chat/conversations/{id}/assign",
            web::patch().to(chat::admin_assign),
        )
        .route(
            "/admin/chat/conversations/{id}/close",
            web::patch().to(chat::admin_close),
        );
}

/// Stored documents, always at the root so their URLs stay stable.
pub fn configure_uploads(cfg: &mut web::ServiceConfig) {
    cfg.route("/uploads/{key:.*}", web::get().to(applications::serve_upload));
}

/// Everything at the root, as the tests mount it.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    configure_api(cfg);
    configure_uploads(cfg);
}

/// Create a configured HTTP server
///
/// Takes the shared application state and a bind address, then returns a
/// fully configured `HttpServer` ready to be run.
///
/// # Example
/// ```ignore
/// let state = web::Data::new(AppState::new(storage, settings, collaborators));
/// let server = server::create_http_server(state, "127.0.0.1:5000")?;
/// server.await?;
/// ```
pub fn create_http_server(
    state: web::Data<AppState>,
    bind_addr: &str,
) -> std::io::Result<actix_web::dev::Server> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(json_config())
            .wrap(middleware::Logger::default())
            .service(web::scope("/api").configure(configure_api))
            .configure(configure_uploads)
    })
    .bind(bind_addr)?
    .run();

    Ok(server)
}

/// State over an in-memory database with disabled mail and language model.
pub fn create_test_state(settings: Settings) -> web::Data<AppState> {
    let storage = Arc::new(SqliteStorage::new(create_test_pool()));
    let collaborators = Collaborators {
        mailer: Arc::new(crate::services::DisabledMailer),
        assistant: Arc::new(crate::services::DisabledReplyGenerator),
        object_store: Arc::new(crate::services::LocalObjectStore::new(
            &settings.upload_dir,
            &settings.public_base_url,
        )),
        code_generator: None,
    };
    web::Data::new(AppState::new(storage, settings, collaborators))
}

/// Create a test HTTP server with an in-memory database
///
/// Binds to a random available port and returns the server together with
/// the address it is listening on.
pub fn create_test_http_server() -> std::io::Result<(actix_web::dev::Server, String)> {
    let settings = Settings::for_testing(std::env::temp_dir().join("admission-server-uploads"));
    let state = create_test_state(settings);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(json_config())
            .wrap(middleware::Logger::default())
            .service(web::scope("/api").configure(configure_api))
            .configure(configure_uploads)
    })
    .bind("127.0.0.1:0")?;

    let addr_str = server
        .addrs()
        .first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "No bind address found"))?
        .to_string();

    Ok((server.run(), addr_str))
}
