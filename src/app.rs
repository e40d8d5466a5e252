//! App Core for Linkmirror.
//!
//! Holds the settings engine, the configured backend and the current session,
//! and drives sign-in and sign-out.

use std::fs;
use std::sync::Arc;

use tracing::info;

use crate::managers::session_manager::{Session, SessionOptions, StaticIdentity};
use crate::services::backend::Backend;
use crate::services::local_backend::LocalBackend;
use crate::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use crate::types::errors::{BackendError, SessionError};
use crate::types::settings::BackendSettings;

/// Central application struct.
pub struct App {
    pub settings_engine: SettingsEngine,
    backend: Arc<dyn Backend>,
    session: Option<Session>,
}

impl App {
    /// Creates an App whose backend is built from the engine's settings.
    ///
    /// The settings should already be loaded.
    pub fn new(settings_engine: SettingsEngine) -> Result<Self, BackendError> {
        let backend = build_backend(&settings_engine)?;
        Ok(Self::with_backend(settings_engine, backend))
    }

    /// Creates an App around an existing backend.
    pub fn with_backend(settings_engine: SettingsEngine, backend: Arc<dyn Backend>) -> Self {
        Self {
            settings_engine,
            backend,
            session: None,
        }
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// The current session, or [`SessionError::NotActive`].
    pub fn require_session(&self) -> Result<&Session, SessionError> {
        self.session.as_ref().ok_or(SessionError::NotActive)
    }

    /// Starts a session for `user_id`, ending another user's session first.
    pub async fn sign_in(&mut self, user_id: &str) -> Result<&Session, SessionError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(SessionError::NoIdentity);
        }
        if let Some(current) = &self.session {
            if current.owner_id() == user_id {
                return Err(SessionError::AlreadyActive(user_id.to_string()));
            }
        }
        if let Some(previous) = self.session.take() {
            info!(owner_id = %previous.owner_id(), "replacing active session");
            previous.end().await;
        }

        let options = SessionOptions::from(self.settings_engine.get_settings());
        let identity = StaticIdentity::signed_in(user_id);
        let session = Session::start(self.backend.clone(), &identity, &options).await?;
        Ok(self.session.insert(session))
    }

    /// Ends the current session.
    pub async fn sign_out(&mut self) -> Result<(), SessionError> {
        let session = self.session.take().ok_or(SessionError::NotActive)?;
        session.end().await;
        Ok(())
    }

    /// Ends the current session, if any.
    pub async fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            session.end().await;
        }
    }
}

/// Builds the backend selected in settings.
pub fn build_backend(settings_engine: &SettingsEngine) -> Result<Arc<dyn Backend>, BackendError> {
    let settings = settings_engine.get_settings();
    let capacity = settings.realtime.channel_capacity;

    match &settings.backend {
        BackendSettings::Local { .. } => {
            let path = settings_engine.local_database_path().ok_or_else(|| {
                BackendError::DatabaseError("no database path for local backend".to_string())
            })?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    BackendError::DatabaseError(format!("Failed to create data directory: {}", e))
                })?;
            }
            info!(path = %path.display(), "using local backend");
            let backend = LocalBackend::open(&path)?.with_channel_capacity(capacity);
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "http")]
        BackendSettings::Http { base_url, api_key } => {
            use crate::services::http_backend::HttpBackend;

            info!(base_url = %base_url, "using http backend");
            let backend = HttpBackend::new(base_url, &settings.collection, api_key.clone())?
                .with_channel_capacity(capacity);
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "http"))]
        BackendSettings::Http { .. } => Err(BackendError::Rejected(
            "http backend support is not compiled in".to_string(),
        )),
    }
}
