/// Identity store and email verification gate.
///
/// Account creation is gated on a verification ticket: `verify_code` hands
/// one out for the email it just confirmed, and `register` refuses to create
/// an account for any other address.

use crate::auth::password::{hash_password, verify_password};
use crate::auth::session::SESSION_TTL_DAYS;
use crate::auth::tokens::{TokenKind, TokenSigner};
use crate::db::models::{
    EmailAvailabilityResponse, LoginRequest, RegisterRequest, Role, SendCodeResponse, Session,
    User, VerificationCode, VerifyCodeResponse,
};
use crate::db::{Storage, StorageError};
use crate::error::{AppError, Result};
use crate::services::mailer::Mailer;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;
use validator::ValidateEmail;

pub const CODE_TTL_MINUTES: i64 = 10;
pub const TICKET_TTL_MINUTES: i64 = 30;
pub const MIN_PASSWORD_LEN: usize = 6;

/// Produces the six-digit codes mailed to users. Swappable so tests can pin it.
pub type CodeGenerator = Arc<dyn Fn() -> String + Send + Sync>;

pub fn random_code_generator() -> CodeGenerator {
    Arc::new(|| rand::rng().random_range(100_000..1_000_000).to_string())
}

fn new_session_id() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validated_email(email: &str) -> Result<String> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(AppError::missing_fields(&["email"]));
    }
    if !email.validate_email() {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    Ok(email)
}

pub struct IdentityService {
    storage: Arc<dyn Storage>,
    mailer: Arc<dyn Mailer>,
    signer: TokenSigner,
    code_generator: CodeGenerator,
    expose_codes: bool,
    open_role_signup: bool,
}

impl IdentityService {
    pub fn new(
        storage: Arc<dyn Storage>,
        mailer: Arc<dyn Mailer>,
        signer: TokenSigner,
        expose_codes: bool,
        open_role_signup: bool,
    ) -> Self {
        IdentityService {
            storage,
            mailer,
            signer,
            code_generator: random_code_generator(),
            expose_codes,
            open_role_signup,
        }
    }

    pub fn with_code_generator(mut self, generator: CodeGenerator) -> Self {
        self.code_generator = generator;
        self
    }

    pub async fn request_verification_code(&self, email: &str) -> Result<SendCodeResponse> {
        let email = validated_email(email)?;
        let now = Utc::now();

        let purged = self.storage.purge_verification_codes(now).await?;
        if purged > 0 {
            log::debug!("Purged {} stale verification codes", purged);
        }

        let code = (self.code_generator)();
        self.storage
            .insert_verification_code(&VerificationCode {
                id: Uuid::new_v4().to_string(),
                email: email.clone(),
                code: code.clone(),
                expires_at: now + Duration::minutes(CODE_TTL_MINUTES),
                is_verified: false,
                created_at: now,
            })
            .await?;
        log::info!("Verification code issued for {}", email);

        let warning = match self.mailer.send_verification_code(&email, &code).await {
            Ok(()) => None,
            Err(e) => {
                log::warn!("Failed to deliver verification code to {}: {}", email, e);
                Some("Verification email could not be delivered".to_string())
            }
        };

        Ok(SendCodeResponse {
            success: true,
            message: "Verification code sent".to_string(),
            warning,
            code: self.expose_codes.then_some(code),
        })
    }

    pub async fn verify_code(&self, email: &str, code: &str) -> Result<VerifyCodeResponse> {
        self.verify_code_at(email, code, Utc::now()).await
    }

    /// Accepts iff the most recent code for the email matches and
    /// `now <= expires_at`. Wrong and expired codes fail identically.
    pub async fn verify_code_at(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifyCodeResponse> {
        let email = normalize_email(email);
        let code = code.trim();
        if email.is_empty() || code.is_empty() {
            return Err(AppError::InvalidOrExpiredCode);
        }

        let stored = self
            .storage
            .latest_verification_code(&email)
            .await?
            .ok_or(AppError::InvalidOrExpiredCode)?;

        if stored.is_verified || stored.code != code || now > stored.expires_at {
            return Err(AppError::InvalidOrExpiredCode);
        }

        self.storage.mark_code_verified(&stored.id).await?;
        log::info!("Email verified: {}", email);

        let ticket = self.signer.sign(
            TokenKind::Verification,
            &email,
            now + Duration::minutes(TICKET_TTL_MINUTES),
        );

        Ok(VerifyCodeResponse {
            success: true,
            message: "Email verified successfully".to_string(),
            verification_ticket: ticket,
        })
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<(User, Session)> {
        let mut missing = Vec::new();
        if request.email.trim().is_empty() {
            missing.push("email");
        }
        if request.password.is_empty() {
            missing.push("password");
        }
        if request.full_name.trim().is_empty() {
            missing.push("fullName");
        }
        if !missing.is_empty() {
            return Err(AppError::missing_fields(&missing));
        }

        let email = validated_email(&request.email)?;
        if request.password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let role = request.role.unwrap_or(Role::Student);
        if role != Role::Student && !self.open_role_signup {
            return Err(AppError::Forbidden);
        }

        if self.storage.get_user_by_email(&email).await?.is_some() {
            return Err(AppError::DuplicateEmail);
        }

        let ticket = request
            .verification_ticket
            .as_deref()
            .ok_or_else(|| AppError::Validation("Email must be verified first".to_string()))?;
        let claim = self
            .signer
            .verify(TokenKind::Verification, ticket, Utc::now())
            .map_err(|e| {
                log::debug!("Rejected verification ticket: {}", e);
                AppError::InvalidOrExpiredCode
            })?;
        if claim.subject != email {
            return Err(AppError::InvalidOrExpiredCode);
        }

        let user = self
            .create_user(&email, &request.password, request.full_name.trim(), role)
            .await?;
        log::info!("Registered {} as {}", user.email, user.role);

        let session = self.start_session(&user).await?;
        Ok((user, session))
    }

    async fn create_user(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        role: Role,
    ) -> Result<User> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: hash_password(password)?,
            full_name: full_name.to_string(),
            role,
            created_at: Utc::now(),
        };

        match self.storage.insert_user(&user).await {
            Ok(()) => Ok(user),
            Err(StorageError::UniqueViolation(_)) => Err(AppError::DuplicateEmail),
            Err(e) => Err(e.into()),
        }
    }

    async fn start_session(&self, user: &User) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: new_session_id(),
            user_id: user.id.clone(),
            is_admin: user.role == Role::Admin,
            created_at: now,
            expires_at: now + Duration::days(SESSION_TTL_DAYS),
        };
        self.storage.insert_session(&session).await?;
        Ok(session)
    }

    /// Unknown email and wrong password are indistinguishable to the caller.
    pub async fn login(&self, request: LoginRequest) -> Result<(User, Session)> {
        let email = normalize_email(&request.email);
        if email.is_empty() || request.password.is_empty() {
            return Err(AppError::InvalidCredentials);
        }

        let user = self
            .storage
            .get_user_by_email(&email)
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        if !verify_password(&request.password, &user.password_hash)? {
            return Err(AppError::InvalidCredentials);
        }

        let session = self.start_session(&user).await?;
        log::info!("User logged in: {}", user.email);
        Ok((user, session))
    }

    pub async fn logout(&self, session_id: &str) -> Result<()> {
        self.storage.delete_session(session_id).await?;
        Ok(())
    }

    pub async fn current_user(&self, user_id: &str) -> Result<User> {
        self.storage
            .get_user(user_id)
            .await?
            .ok_or(AppError::NotAuthenticated)
    }

    /// Advisory only: a later `register` may still lose the race.
    pub async fn check_email_availability(&self, email: &str) -> Result<EmailAvailabilityResponse> {
        let email = normalize_email(email);
        let available = self.storage.get_user_by_email(&email).await?.is_none();
        Ok(EmailAvailabilityResponse { available, email })
    }

    /// Create the bootstrap admin if no account holds the email yet.
    /// Returns whether an account was created.
    pub async fn ensure_admin(&self, email: &str, password: &str) -> Result<bool> {
        let email = validated_email(email)?;
        if self.storage.get_user_by_email(&email).await?.is_some() {
            return Ok(false);
        }
        self.create_user(&email, password, "Administrator", Role::Admin)
            .await?;
        log::info!("Seeded admin account {}", email);
        Ok(true)
    }

    /// Drop stale verification codes and expired sessions.
    pub async fn purge_stale(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let codes = self.storage.purge_verification_codes(now).await?;
        let sessions = self.storage.purge_expired_sessions(now).await?;
        Ok((codes, sessions))
    }
}
