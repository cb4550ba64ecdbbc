pub mod json_session_repository;
pub mod paths;

pub use crate::json_session_repository::JsonDirSessionRepository;
pub use crate::paths::SahayakPaths;
