/// Per-request identity resolution.
///
/// `RequestContext` is extracted once per request from the session cookie or
/// the guest token and handed to handlers as an ordinary argument.
use crate::auth::tokens::TokenKind;
use crate::db::models::Role;
use crate::error::{AppError, Result};
use crate::state::AppState;
use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use chrono::Utc;
use futures::future::LocalBoxFuture;
use serde::Deserialize;

pub const SESSION_COOKIE: &str = "admission_sid";
pub const GUEST_TOKEN_HEADER: &str = "X-Guest-Token";
pub const SESSION_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionUser {
    pub id: String,
    pub role: Role,
    pub session_id: String,
}

impl SessionUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuestIdentity {
    pub guest_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    User(SessionUser),
    Guest(GuestIdentity),
    Anonymous,
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub identity: Identity,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        RequestContext {
            identity: Identity::Anonymous,
        }
    }

    pub fn user(&self) -> Option<&SessionUser> {
        match &self.identity {
            Identity::User(user) => Some(user),
            _ => None,
        }
    }

    pub fn require_user(&self) -> Result<&SessionUser> {
        self.user().ok_or(AppError::NotAuthenticated)
    }

    pub fn require_admin(&self) -> Result<&SessionUser> {
        let user = self.require_user()?;
        if user.is_admin() {
            Ok(user)
        } else {
            Err(AppError::Forbidden)
        }
    }

    pub fn require_guest(&self) -> Result<&GuestIdentity> {
        match &self.identity {
            Identity::Guest(guest) => Ok(guest),
            _ => Err(AppError::NotAuthenticated),
        }
    }

    /// Resolve the caller. An unknown or expired session falls through to
    /// the guest token, and from there to anonymous.
    pub async fn resolve(
        state: &AppState,
        session_id: Option<String>,
        guest_token: Option<String>,
    ) -> Result<Self> {
        let now = Utc::now();

        if let Some(session_id) = session_id {
            if let Some(session) = state.storage.get_session(&session_id).await? {
                if session.expires_at >= now {
                    if let Some(user) = state.storage.get_user(&session.user_id).await? {
                        return Ok(RequestContext {
                            identity: Identity::User(SessionUser {
                                id: user.id,
                                role: user.role,
                                session_id: session.id,
                            }),
                        });
                    }
                } else {
                    log::debug!("Ignoring expired session for user {}", session.user_id);
                }
            }
        }

        if let Some(token) = guest_token {
            match state.signer.verify(TokenKind::Guest, &token, now) {
                Ok(claim) => {
                    return Ok(RequestContext {
                        identity: Identity::Guest(GuestIdentity {
                            guest_id: claim.subject,
                        }),
                    })
                }
                Err(e) => log::debug!("Rejected guest token: {}", e),
            }
        }

        Ok(RequestContext::anonymous())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GuestTokenQuery {
    guest_token: Option<String>,
}

pub fn guest_token_from(req: &HttpRequest) -> Option<String> {
    if let Some(value) = req.headers().get(GUEST_TOKEN_HEADER) {
        if let Ok(token) = value.to_str() {
            return Some(token.to_string());
        }
    }

    web::Query::<GuestTokenQuery>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.into_inner().guest_token)
}

impl FromRequest for RequestContext {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let session_id = req.cookie(SESSION_COOKIE).map(|c| c.value().to_string());
        let guest_token = guest_token_from(req);

        Box::pin(async move {
            let state =
                state.ok_or_else(|| AppError::Internal("application state missing".into()))?;
            RequestContext::resolve(&state, session_id, guest_token).await
        })
    }
}

/// HTTP-only cookie carrying the opaque session id.
pub fn session_cookie(session_id: &str) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, session_id.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(SESSION_TTL_DAYS))
        .finish()
}

pub fn expired_session_cookie() -> Cookie<'static> {
    let mut cookie = session_cookie("");
    cookie.make_removal();
    cookie
}
