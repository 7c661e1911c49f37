//! Client-side token store.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use super::error::ClientError;
use super::storage::{DurableStorage, EphemeralStorage, SessionStorage, StorageScope};

/// User returned by `/login` and `/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub display_name: String,
}

/// Everything the client keeps between requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSession {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(rename = "rememberMe", default)]
    pub remember_me: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_user: Option<CurrentUser>,
}

impl ClientSession {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            token_type: self.token_type.clone(),
            access_token: self.access_token.clone(),
        }
    }
}

/// An access token together with its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token_type: String,
    pub access_token: String,
}

impl Credentials {
    /// Value for the `Authorization` header, e.g. `Bearer abc`.
    pub fn header_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

struct Active {
    session: Option<ClientSession>,
    storage: Option<Arc<dyn SessionStorage>>,
}

/// Owns the current session and the storage scope it was written to.
///
/// The scope is picked at login from `remember_me` and kept until the session
/// ends; the other scope is cleared so a session never exists in both.
pub struct SessionManager {
    durable: Arc<dyn SessionStorage>,
    ephemeral: Arc<dyn SessionStorage>,
    active: Mutex<Active>,
}

impl SessionManager {
    pub fn new(durable: Arc<dyn SessionStorage>, ephemeral: Arc<dyn SessionStorage>) -> Self {
        Self {
            durable,
            ephemeral,
            active: Mutex::new(Active {
                session: None,
                storage: None,
            }),
        }
    }

    /// Durable sessions go to a JSON file at `path`.
    pub fn with_session_file(path: impl Into<PathBuf>) -> Self {
        Self::new(
            Arc::new(DurableStorage::new(path)),
            Arc::new(EphemeralStorage::new()),
        )
    }

    fn lock(&self) -> MutexGuard<'_, Active> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a previously stored session, durable scope first.
    pub fn restore(&self) -> Result<Option<ClientSession>, ClientError> {
        let mut active = self.lock();
        if active.session.is_some() {
            return Ok(active.session.clone());
        }

        for storage in [&self.durable, &self.ephemeral] {
            if let Some(session) = storage.load()? {
                active.session = Some(session.clone());
                active.storage = Some(Arc::clone(storage));
                return Ok(Some(session));
            }
        }
        Ok(None)
    }

    /// Start a new session after login.
    pub fn begin(&self, session: ClientSession) -> Result<(), ClientError> {
        let (storage, other) = if session.remember_me {
            (&self.durable, &self.ephemeral)
        } else {
            (&self.ephemeral, &self.durable)
        };

        let mut active = self.lock();
        other.clear()?;
        storage.save(&session)?;
        active.session = Some(session);
        active.storage = Some(Arc::clone(storage));
        Ok(())
    }

    /// Replace the access token after a refresh.
    pub fn update_access_token(
        &self,
        access_token: String,
        token_type: String,
    ) -> Result<Credentials, ClientError> {
        let mut active = self.lock();
        let Active { session, storage } = &mut *active;
        let session = session.as_mut().ok_or(ClientError::NotAuthenticated)?;

        session.access_token = access_token;
        session.token_type = token_type;
        if let Some(storage) = storage {
            storage.save(session)?;
        }
        Ok(session.credentials())
    }

    pub fn set_current_user(&self, user: CurrentUser) -> Result<(), ClientError> {
        let mut active = self.lock();
        let Active { session, storage } = &mut *active;
        let session = session.as_mut().ok_or(ClientError::NotAuthenticated)?;

        session.current_user = Some(user);
        if let Some(storage) = storage {
            storage.save(session)?;
        }
        Ok(())
    }

    /// End the session and wipe both storage scopes.
    pub fn clear(&self) -> Result<(), ClientError> {
        let mut active = self.lock();
        active.session = None;
        active.storage = None;
        self.durable.clear()?;
        self.ephemeral.clear()
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.lock().session.as_ref().map(ClientSession::credentials)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock()
            .session
            .as_ref()
            .and_then(|s| s.refresh_token.clone())
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.lock()
            .session
            .as_ref()
            .and_then(|s| s.current_user.clone())
    }

    pub fn snapshot(&self) -> Option<ClientSession> {
        self.lock().session.clone()
    }

    /// Scope the current session is written to.
    pub fn scope(&self) -> Option<StorageScope> {
        self.lock().storage.as_ref().map(|s| s.scope())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(remember_me: bool) -> ClientSession {
        ClientSession {
            access_token: "access".into(),
            token_type: "Bearer".into(),
            refresh_token: Some("refresh".into()),
            remember_me,
            current_user: None,
        }
    }

    fn manager() -> (SessionManager, Arc<EphemeralStorage>, Arc<EphemeralStorage>) {
        // Two in-memory slots stand in for the durable and ephemeral scopes.
        let durable = Arc::new(EphemeralStorage::new());
        let ephemeral = Arc::new(EphemeralStorage::new());
        let manager = SessionManager::new(durable.clone(), ephemeral.clone());
        (manager, durable, ephemeral)
    }

    #[test]
    fn test_remembered_session_goes_to_durable_scope() {
        let (manager, durable, ephemeral) = manager();

        manager.begin(session(true)).unwrap();

        assert!(durable.load().unwrap().is_some());
        assert!(ephemeral.load().unwrap().is_none());
    }

    #[test]
    fn test_session_never_in_both_scopes() {
        let (manager, durable, ephemeral) = manager();

        manager.begin(session(true)).unwrap();
        manager.begin(session(false)).unwrap();

        assert!(durable.load().unwrap().is_none());
        assert!(ephemeral.load().unwrap().is_some());
    }

    #[test]
    fn test_update_writes_to_selected_scope() {
        let (manager, durable, ephemeral) = manager();
        manager.begin(session(false)).unwrap();

        let credentials = manager
            .update_access_token("new".into(), "Bearer".into())
            .unwrap();

        assert_eq!(credentials.header_value(), "Bearer new");
        assert_eq!(ephemeral.load().unwrap().unwrap().access_token, "new");
        assert!(durable.load().unwrap().is_none());
    }

    #[test]
    fn test_update_without_session_fails() {
        let (manager, _, _) = manager();
        let result = manager.update_access_token("new".into(), "Bearer".into());
        assert!(matches!(result, Err(ClientError::NotAuthenticated)));
    }

    #[test]
    fn test_restore_prefers_durable() {
        let (manager, durable, ephemeral) = manager();
        durable.save(&session(true)).unwrap();
        let mut other = session(false);
        other.access_token = "other".into();
        ephemeral.save(&other).unwrap();

        let restored = manager.restore().unwrap().unwrap();
        assert_eq!(restored.access_token, "access");
        assert_eq!(manager.credentials().unwrap().access_token, "access");
        assert_eq!(manager.snapshot(), Some(restored));
    }

    #[test]
    fn test_snapshot_tracks_updates() {
        let (manager, _, _) = manager();
        assert_eq!(manager.snapshot(), None);

        manager.begin(session(false)).unwrap();
        manager
            .update_access_token("new".into(), "Bearer".into())
            .unwrap();

        let snapshot = manager.snapshot().unwrap();
        assert_eq!(snapshot.access_token, "new");
        assert_eq!(snapshot.refresh_token.as_deref(), Some("refresh"));
        assert!(!snapshot.remember_me);

        manager.clear().unwrap();
        assert_eq!(manager.snapshot(), None);
    }

    #[test]
    fn test_clear_destroys_session() {
        let (manager, durable, _) = manager();
        manager.begin(session(true)).unwrap();

        manager.clear().unwrap();

        assert!(manager.credentials().is_none());
        assert!(manager.refresh_token().is_none());
        assert!(durable.load().unwrap().is_none());
    }

    #[test]
    fn test_session_file_scope() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::with_session_file(dir.path().join("session.json"));

        manager.begin(session(true)).unwrap();
        assert_eq!(manager.scope(), Some(StorageScope::Durable));

        let reopened = SessionManager::with_session_file(dir.path().join("session.json"));
        assert_eq!(reopened.restore().unwrap(), Some(session(true)));
        assert_eq!(reopened.scope(), Some(StorageScope::Durable));
    }
}
