/// Service layer: the admission workflow and its collaborators.
/// Handlers stay thin and delegate every rule to these types.
pub mod applications;
pub mod assistant;
pub mod conversations;
pub mod courses;
pub mod documents;
pub mod identity;
pub mod mailer;

pub use applications::ApplicationService;
pub use assistant::{DisabledReplyGenerator, GeminiReplyGenerator, ReplyGenerator};
pub use conversations::{ConversationService, Participant};
pub use courses::CourseCatalog;
pub use documents::{DocumentIntake, IncomingFile, LocalObjectStore, ObjectStore};
pub use identity::IdentityService;
pub use mailer::{DisabledMailer, Mailer, SmtpMailer};
