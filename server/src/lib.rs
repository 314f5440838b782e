/// Admission portal server library.
///
/// Students verify their email, register, submit multi-step admission
/// applications with documents and chat with staff. Admins review
/// applications and run the course catalog and the support inbox.
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod server;
pub mod services;
pub mod state;

pub use error::{AppError, Result};
pub use state::{AppState, Collaborators};
