/// Support chat endpoints for signed-in users, guests and admins.
/// Clients poll `GET .../messages/{id}`; nothing is pushed.
use crate::auth::session::guest_token_from;
use crate::auth::RequestContext;
use crate::db::models::{
    AssignStaffRequest, GuestSessionRequest, PostMessageRequest, StartConversationRequest,
};
use crate::error::Result;
use crate::services::Participant;
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};

fn user_participant(ctx: &RequestContext) -> Result<Participant> {
    Ok(Participant::User(ctx.require_user()?.clone()))
}

fn guest_participant(ctx: &RequestContext) -> Result<Participant> {
    Ok(Participant::Guest(ctx.require_guest()?.guest_id.clone()))
}

async fn list_for(state: &AppState, participant: Participant) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.conversations.list_own(&participant).await?))
}

async fn start_for(
    state: &AppState,
    participant: Participant,
    req: StartConversationRequest,
) -> Result<HttpResponse> {
    let conversation = state
        .conversations
        .start_conversation(&participant, &req.subject)
        .await?;
    Ok(HttpResponse::Created().json(conversation))
}

async fn messages_for(
    state: &AppState,
    participant: Participant,
    conversation_id: &str,
) -> Result<HttpResponse> {
    let messages = state
        .conversations
        .messages(conversation_id, &participant)
        .await?;
    Ok(HttpResponse::Ok().json(messages))
}

async fn post_for(
    state: &AppState,
    participant: Participant,
    req: PostMessageRequest,
) -> Result<HttpResponse> {
    let response = state
        .conversations
        .post_message(&req.conversation_id, &participant, &req.message)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// GET /chat/conversations
pub async fn list_conversations(
    state: web::Data<AppState>,
    ctx: RequestContext,
) -> Result<HttpResponse> {
    list_for(&state, user_participant(&ctx)?).await
}

/// POST /chat/conversations
pub async fn start_conversation(
    state: web::Data<AppState>,
    ctx: RequestContext,
    req: web::Json<StartConversationRequest>,
) -> Result<HttpResponse> {
    start_for(&state, user_participant(&ctx)?, req.into_inner()).await
}

/// GET /chat/messages/{id}
pub async fn get_messages(
    state: web::Data<AppState>,
    ctx: RequestContext,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    messages_for(&state, user_participant(&ctx)?, &id).await
}

/// POST /chat/messages
pub async fn post_message(
    state: web::Data<AppState>,
    ctx: RequestContext,
    req: web::Json<PostMessageRequest>,
) -> Result<HttpResponse> {
    post_for(&state, user_participant(&ctx)?, req.into_inner()).await
}

/// Issue or renew a guest credential. The current token may come in the
/// body, the `X-Guest-Token` header or the `guestToken` query parameter.
/// POST /chat/guest/session
pub async fn guest_session(
    state: web::Data<AppState>,
    http: HttpRequest,
    req: Option<web::Json<GuestSessionRequest>>,
) -> Result<HttpResponse> {
    let token = req
        .and_then(|r| r.into_inner().guest_token)
        .or_else(|| guest_token_from(&http));
    let session = state.conversations.open_guest_session(token.as_deref());
    Ok(HttpResponse::Ok().json(session))
}

/// GET /chat/guest/conversations
pub async fn guest_list_conversations(
    state: web::Data<AppState>,
    ctx: RequestContext,
) -> Result<HttpResponse> {
    list_for(&state, guest_participant(&ctx)?).await
}

/// POST /chat/guest/conversations
pub async fn guest_start_conversation(
    state: web::Data<AppState>,
    ctx: RequestContext,
    req: web::Json<StartConversationRequest>,
) -> Result<HttpResponse> {
    start_for(&state, guest_participant(&ctx)?, req.into_inner()).await
}

/// GET /chat/guest/messages/{id}
pub async fn guest_get_messages(
    state: web::Data<AppState>,
    ctx: RequestContext,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    messages_for(&state, guest_participant(&ctx)?, &id).await
}

/// POST /chat/guest/messages
pub async fn guest_post_message(
    state: web::Data<AppState>,
    ctx: RequestContext,
    req: web::Json<PostMessageRequest>,
) -> Result<HttpResponse> {
    post_for(&state, guest_participant(&ctx)?, req.into_inner()).await
}

/// Every conversation with its messages and student
/// GET /admin/chat/conversations
pub async fn admin_list_conversations(
    state: web::Data<AppState>,
    ctx: RequestContext,
) -> Result<HttpResponse> {
    let actor = ctx.require_user()?;
    Ok(HttpResponse::Ok().json(state.conversations.list_threads(actor).await?))
}

/// PATCH /admin/chat/conversations/{id}/assign
pub async fn admin_assign(
    state: web::Data<AppState>,
    ctx: RequestContext,
    id: web::Path<String>,
    req: Option<web::Json<AssignStaffRequest>>,
) -> Result<HttpResponse> {
    let actor = ctx.require_user()?;
    let staff_id = req.and_then(|r| r.into_inner().support_staff_id);
    let conversation = state
        .conversations
        .assign_staff(&id, staff_id.as_deref(), actor)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// PATCH /admin/chat/conversations/{id}/close
pub async fn admin_close(
    state: web::Data<AppState>,
    ctx: RequestContext,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let actor = ctx.require_user()?;
    let conversation = state.conversations.close_conversation(&id, actor).await?;
    Ok(HttpResponse::Ok().json(conversation))
}
