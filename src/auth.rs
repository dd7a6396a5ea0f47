//! Session & Authentication Context
//!
//! The link never logs users in or out; it only asks whether a session is
//! active and which credential to present. [`SessionStore`] answers those
//! questions from a JSON file written after login.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

/// What the link needs to know about the current session
pub trait AuthContext: Send + Sync {
    /// Whether a session is active
    fn is_authenticated(&self) -> bool;

    /// Token presented when opening a connection
    fn credential(&self) -> Option<String>;

    /// Pick up a login or logout made elsewhere, e.g. by another process
    fn reload(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Point-in-time answer from an [`AuthContext`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub authenticated: bool,
    pub credential: Option<String>,
}

impl AuthSnapshot {
    pub fn capture(context: &dyn AuthContext) -> Self {
        let authenticated = context.is_authenticated();
        Self {
            authenticated,
            credential: if authenticated {
                context.credential()
            } else {
                None
            },
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            credential: Some(token.into()),
        }
    }
}

/// A fixed credential, e.g. passed on the command line
#[derive(Debug, Clone)]
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl AuthContext for StaticCredential {
    fn is_authenticated(&self) -> bool {
        token_is_usable(&self.token)
    }

    fn credential(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

/// Application roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[serde(alias = "GERENTE")]
    Manager,
    #[serde(alias = "TECNICO")]
    Technician,
    #[serde(alias = "CLIENTE")]
    Client,
}

impl Role {
    /// Landing page for the role's dashboard
    pub fn home_page(&self) -> &'static str {
        match self {
            Role::Manager => "/pages/gerente.html",
            Role::Technician => "/pages/tecnico.html",
            Role::Client => "/pages/cliente.html",
        }
    }
}

/// User details returned by the login endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, alias = "rol", skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Persisted session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: UserInfo,
}

/// Session store errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to access session file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to decode session file {path:?}: {error}")]
    Serialization { path: PathBuf, error: String },
}

/// File-backed session, shared between the CLI and the link
pub struct SessionStore {
    path: PathBuf,
    session: RwLock<Session>,
}

impl SessionStore {
    /// Open the store, starting empty when the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let path = path.into();
        let session = read_session(&path)?;

        Ok(Self {
            path,
            session: RwLock::new(session),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store a new session after a successful login
    pub fn save_session(&self, token: impl Into<String>, user: UserInfo) -> Result<(), SessionError> {
        let session = Session {
            token: Some(token.into()),
            user,
        };
        self.persist(&session)?;
        *self.write_guard() = session;
        tracing::info!(path = ?self.path, "Session saved");
        Ok(())
    }

    /// Forget the session (logout)
    pub fn clear(&self) -> Result<(), SessionError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| SessionError::Io {
                path: self.path.clone(),
                error: e.to_string(),
            })?;
        }
        *self.write_guard() = Session::default();
        tracing::info!(path = ?self.path, "Session cleared");
        Ok(())
    }

    pub fn session(&self) -> Session {
        self.read_guard().clone()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.read_guard().user.role == Some(role)
    }

    fn persist(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SessionError::Io {
                path: parent.to_path_buf(),
                error: e.to_string(),
            })?;
        }
        let content =
            serde_json::to_string_pretty(session).map_err(|e| SessionError::Serialization {
                path: self.path.clone(),
                error: e.to_string(),
            })?;
        std::fs::write(&self.path, content).map_err(|e| SessionError::Io {
            path: self.path.clone(),
            error: e.to_string(),
        })
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AuthContext for SessionStore {
    fn is_authenticated(&self) -> bool {
        self.read_guard()
            .token
            .as_deref()
            .map(token_is_usable)
            .unwrap_or(false)
    }

    fn credential(&self) -> Option<String> {
        self.read_guard().token.clone()
    }

    /// Re-read the file; a missing file means logged out. On error the
    /// cached session is kept.
    fn reload(&self) -> Result<(), SessionError> {
        let session = read_session(&self.path)?;
        *self.write_guard() = session;
        Ok(())
    }
}

fn read_session(path: &Path) -> Result<Session, SessionError> {
    if !path.exists() {
        return Ok(Session::default());
    }
    let content = std::fs::read_to_string(path).map_err(|e| SessionError::Io {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| SessionError::Serialization {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

#[derive(Deserialize)]
struct Claims {
    exp: Option<f64>,
}

/// A token is usable when present, not the string `"null"`, and not expired
fn token_is_usable(token: &str) -> bool {
    let token = token.trim();
    !token.is_empty() && token != "null" && !is_token_expired(token, Utc::now().timestamp())
}

/// Check the `exp` claim of a JWT against `now` (seconds)
///
/// Tokens whose payload cannot be decoded count as expired; a payload
/// without `exp` never expires.
pub fn is_token_expired(token: &str, now: i64) -> bool {
    let payload = match token.split('.').nth(1) {
        Some(payload) => payload.trim_end_matches('='),
        None => return true,
    };

    let claims = URL_SAFE_NO_PAD
        .decode(payload)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Claims>(&bytes).ok());

    match claims {
        Some(Claims { exp: Some(exp) }) => exp < now as f64,
        Some(Claims { exp: None }) => false,
        None => {
            tracing::debug!("Could not decode token claims; treating as expired");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn jwt(claims: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(claims)
        )
    }

    fn future_token() -> String {
        jwt(&format!(r#"{{"sub":"ana","exp":{}}}"#, Utc::now().timestamp() + 3600))
    }

    #[test]
    fn test_token_expiry() {
        assert!(!is_token_expired(&jwt(r#"{"exp":2000}"#), 1000));
        assert!(is_token_expired(&jwt(r#"{"exp":1000}"#), 2000));
        assert!(!is_token_expired(&jwt(r#"{"sub":"x"}"#), 2000));
        assert!(is_token_expired("opaque-token", 0));
        assert!(is_token_expired("a.%%%.c", 0));
    }

    #[test]
    fn test_null_token_is_not_usable() {
        assert!(!StaticCredential::new("null").is_authenticated());
        assert!(!StaticCredential::new("").is_authenticated());
        assert!(StaticCredential::new(future_token()).is_authenticated());
    }

    #[test]
    fn test_snapshot_hides_credential_when_unauthenticated() {
        let snapshot = AuthSnapshot::capture(&StaticCredential::new("null"));
        assert!(!snapshot.authenticated);
        assert!(snapshot.credential.is_none());
    }

    #[test]
    fn test_session_store_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = SessionStore::open(&path).unwrap();
        assert!(!store.is_authenticated());

        let user = UserInfo {
            email: Some("ana@example.com".to_string()),
            role: Some(Role::Technician),
            ..UserInfo::default()
        };
        let token = future_token();
        store.save_session(token.clone(), user).unwrap();
        assert!(store.is_authenticated());
        assert_eq!(store.credential(), Some(token));

        let reopened = SessionStore::open(&path).unwrap();
        assert!(reopened.is_authenticated());
        assert!(reopened.has_role(Role::Technician));
        assert!(!reopened.has_role(Role::Manager));

        reopened.clear().unwrap();
        assert!(!reopened.is_authenticated());
        assert!(!path.exists());
    }

    #[test]
    fn test_reload_sees_other_writers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");

        let listener = SessionStore::open(&path).unwrap();
        let cli = SessionStore::open(&path).unwrap();

        cli.save_session(future_token(), UserInfo::default()).unwrap();
        assert!(!listener.is_authenticated());
        listener.reload().unwrap();
        assert!(listener.is_authenticated());

        cli.clear().unwrap();
        listener.reload().unwrap();
        assert!(!listener.is_authenticated());
        assert!(listener.credential().is_none());
    }

    #[test]
    fn test_reload_keeps_session_on_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = SessionStore::open(&path).unwrap();
        store.save_session(future_token(), UserInfo::default()).unwrap();

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(store.reload(), Err(SessionError::Serialization { .. })));
        assert!(store.is_authenticated());
    }

    #[test]
    fn test_role_wire_aliases() {
        let user: UserInfo =
            serde_json::from_str(r#"{"correo":"x@y.z","rol":"GERENTE"}"#).unwrap();
        assert_eq!(user.role, Some(Role::Manager));
        assert_eq!(user.extra.get("correo"), Some(&serde_json::json!("x@y.z")));
        assert_eq!(Role::Manager.home_page(), "/pages/gerente.html");
    }

    #[test]
    fn test_corrupt_session_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = SessionStore::open(&path);
        assert!(matches!(result, Err(SessionError::Serialization { .. })));
    }
}
