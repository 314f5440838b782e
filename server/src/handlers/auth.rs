/// Account, session and email verification endpoints.
use crate::auth::session::{expired_session_cookie, session_cookie};
use crate::auth::RequestContext;
use crate::db::models::{LoginRequest, RegisterRequest, SendCodeRequest, VerifyCodeRequest};
use crate::error::Result;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Create an account for a verified email and sign it in
/// POST /auth/register
pub async fn register(
    state: web::Data<AppState>,
    req: web::Json<RegisterRequest>,
) -> Result<HttpResponse> {
    let (user, session) = state.identity.register(req.into_inner()).await?;
    Ok(HttpResponse::Created()
        .cookie(session_cookie(&session.id))
        .json(user))
}

/// POST /auth/login
pub async fn login(
    state: web::Data<AppState>,
    req: web::Json<LoginRequest>,
) -> Result<HttpResponse> {
    let (user, session) = state.identity.login(req.into_inner()).await?;
    Ok(HttpResponse::Ok()
        .cookie(session_cookie(&session.id))
        .json(user))
}

/// Drop the server-side session, if any, and expire the cookie
/// POST /auth/logout
pub async fn logout(state: web::Data<AppState>, ctx: RequestContext) -> Result<HttpResponse> {
    if let Some(user) = ctx.user() {
        state.identity.logout(&user.session_id).await?;
    }
    Ok(HttpResponse::Ok()
        .cookie(expired_session_cookie())
        .json(json!({ "success": true })))
}

/// GET /auth/me
pub async fn me(state: web::Data<AppState>, ctx: RequestContext) -> Result<HttpResponse> {
    let user = ctx.require_user()?;
    let user = state.identity.current_user(&user.id).await?;
    Ok(HttpResponse::Ok().json(user))
}

/// GET /auth/check-email/{email}
pub async fn check_email(
    state: web::Data<AppState>,
    email: web::Path<String>,
) -> Result<HttpResponse> {
    let response = state.identity.check_email_availability(&email).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// POST /verification/send-code
pub async fn send_code(
    state: web::Data<AppState>,
    req: web::Json<SendCodeRequest>,
) -> Result<HttpResponse> {
    let response = state.identity.request_verification_code(&req.email).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// POST /verification/verify-code
pub async fn verify_code(
    state: web::Data<AppState>,
    req: web::Json<VerifyCodeRequest>,
) -> Result<HttpResponse> {
    let response = state.identity.verify_code(&req.email, &req.code).await?;
    Ok(HttpResponse::Ok().json(response))
}
