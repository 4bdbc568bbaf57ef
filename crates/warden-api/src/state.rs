use std::sync::Arc;

use warden_moderation::Moderation;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub moderation: Moderation,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn new(moderation: Moderation, jwt_secret: impl Into<String>) -> AppState {
        Arc::new(Self {
            moderation,
            jwt_secret: jwt_secret.into(),
        })
    }
}
