mod ai_handler;
pub mod config;
mod error;
pub mod routes;
pub mod session;
pub mod standalone;

pub use ai_handler::{init_ai_handlers, AIHandler};
pub use error::{ApiError, ApiResult};

use session::SessionStore;

#[derive(Clone, Debug)]
pub struct AppState {
    pub ai: AIHandler,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(ai: AIHandler) -> Self {
        Self {
            ai,
            sessions: SessionStore::new(),
        }
    }
}
