//! Session domain module.

pub mod message;
pub mod model;
pub mod repository;

pub use message::{ConversationMessage, Feedback, MessageRole};
pub use model::Session;
pub use repository::SessionRepository;
