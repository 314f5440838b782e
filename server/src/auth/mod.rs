/// Authentication primitives: password hashing, signed tokens and the
/// per-request identity extractor.
pub mod password;
pub mod session;
pub mod tokens;

pub use session::{GuestIdentity, Identity, RequestContext, SessionUser};
pub use tokens::{TokenKind, TokenSigner};
