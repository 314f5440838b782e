/// Shared application state handed to every handler through `web::Data`.
use crate::auth::TokenSigner;
use crate::config::Settings;
use crate::db::Storage;
use crate::error::Result;
use crate::services::identity::CodeGenerator;
use crate::services::{
    ApplicationService, ConversationService, CourseCatalog, DisabledMailer,
    DisabledReplyGenerator, DocumentIntake, GeminiReplyGenerator, IdentityService,
    LocalObjectStore, Mailer, ObjectStore, ReplyGenerator, SmtpMailer,
};
use std::sync::Arc;

/// External systems the services talk to.
pub struct Collaborators {
    pub mailer: Arc<dyn Mailer>,
    pub assistant: Arc<dyn ReplyGenerator>,
    pub object_store: Arc<dyn ObjectStore>,
    pub code_generator: Option<CodeGenerator>,
}

impl Collaborators {
    /// Real collaborators where configured, disabled stand-ins otherwise.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mailer: Arc<dyn Mailer> = match &settings.smtp {
            Some(smtp) => Arc::new(SmtpMailer::from_settings(smtp)?),
            None => {
                log::warn!("SMTP not configured, verification emails will not be sent");
                Arc::new(DisabledMailer)
            }
        };

        let assistant: Arc<dyn ReplyGenerator> = match &settings.gemini {
            Some(gemini) => Arc::new(GeminiReplyGenerator::new(gemini.clone())),
            None => {
                log::warn!("GEMINI_API_KEY not set, automated chat replies are disabled");
                Arc::new(DisabledReplyGenerator)
            }
        };

        Ok(Collaborators {
            mailer,
            assistant,
            object_store: Arc::new(LocalObjectStore::new(
                &settings.upload_dir,
                &settings.public_base_url,
            )),
            code_generator: None,
        })
    }
}

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub signer: TokenSigner,
    pub settings: Settings,
    pub identity: IdentityService,
    pub courses: CourseCatalog,
    pub applications: ApplicationService,
    pub documents: Arc<DocumentIntake>,
    pub conversations: ConversationService,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, settings: Settings, collaborators: Collaborators) -> Self {
        let signer = TokenSigner::new(settings.session_secret.as_bytes());

        let mut identity = IdentityService::new(
            storage.clone(),
            collaborators.mailer,
            signer.clone(),
            settings.expose_verification_codes,
            settings.open_role_signup,
        );
        if let Some(generator) = collaborators.code_generator {
            identity = identity.with_code_generator(generator);
        }

        let documents = Arc::new(DocumentIntake::new(collaborators.object_store));

        AppState {
            courses: CourseCatalog::new(storage.clone()),
            applications: ApplicationService::new(storage.clone(), documents.clone()),
            documents,
            conversations: ConversationService::new(
                storage.clone(),
                collaborators.assistant,
                signer.clone(),
            ),
            identity,
            signer,
            settings,
            storage,
        }
    }
}
