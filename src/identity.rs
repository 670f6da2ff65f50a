//! Bundled [`IdentityProvider`] implementations.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{ClientId, IdentityProvider, RelayError, Role};

/// A fixed identity, for clients whose identity and role never change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity {
    id: ClientId,
    display_name: String,
    role: Role,
}

impl StaticIdentity {
    /// Creates a fixed identity.
    #[must_use]
    pub fn new(id: impl Into<ClientId>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role,
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn self_id(&self) -> Result<ClientId, RelayError> {
        Ok(self.id.clone())
    }

    fn display_name(&self) -> Result<String, RelayError> {
        Ok(self.display_name.clone())
    }

    fn role(&self) -> Result<Role, RelayError> {
        Ok(self.role)
    }
}

#[derive(Debug)]
struct IdentityState {
    identity: Option<StaticIdentity>,
}

/// A cloneable identity handle the environment can update at runtime.
///
/// All clones observe the same state. While [`disconnect`](Self::disconnect)ed, every query
/// fails with [`RelayError::IdentityUnavailable`], which is how a client behaves before the
/// host environment is ready.
///
/// ```
/// use record_relay::{IdentityProvider, Role, SharedIdentity};
///
/// let identity = SharedIdentity::new("p1", "Ana", Role::Owner);
/// let handle = identity.clone();
/// handle.set_role(Role::Viewer);
/// assert_eq!(identity.role().unwrap(), Role::Viewer);
/// ```
#[derive(Debug, Clone)]
pub struct SharedIdentity {
    state: Arc<RwLock<IdentityState>>,
}

impl SharedIdentity {
    /// Creates a connected identity.
    #[must_use]
    pub fn new(id: impl Into<ClientId>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            state: Arc::new(RwLock::new(IdentityState {
                identity: Some(StaticIdentity::new(id, display_name, role)),
            })),
        }
    }

    /// Creates a handle that is not connected to any identity yet.
    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            state: Arc::new(RwLock::new(IdentityState { identity: None })),
        }
    }

    /// Replaces the identity.
    pub fn connect(&self, id: impl Into<ClientId>, display_name: impl Into<String>, role: Role) {
        self.state.write().identity = Some(StaticIdentity::new(id, display_name, role));
    }

    /// Makes every query fail until the next [`connect`](Self::connect).
    pub fn disconnect(&self) {
        self.state.write().identity = None;
    }

    /// Changes the role. Has no effect while disconnected.
    pub fn set_role(&self, role: Role) {
        if let Some(identity) = self.state.write().identity.as_mut() {
            identity.role = role;
        }
    }

    /// Changes the display name. Has no effect while disconnected.
    pub fn set_display_name(&self, display_name: impl Into<String>) {
        if let Some(identity) = self.state.write().identity.as_mut() {
            identity.display_name = display_name.into();
        }
    }

    fn with<T>(&self, query: &str, f: impl FnOnce(&StaticIdentity) -> T) -> Result<T, RelayError> {
        self.state
            .read()
            .identity
            .as_ref()
            .map(f)
            .ok_or_else(|| RelayError::IdentityUnavailable {
                context: format!("{query}: identity provider not connected"),
            })
    }
}

impl IdentityProvider for SharedIdentity {
    fn self_id(&self) -> Result<ClientId, RelayError> {
        self.with("self_id", |identity| identity.id.clone())
    }

    fn display_name(&self) -> Result<String, RelayError> {
        self.with("display_name", |identity| identity.display_name.clone())
    }

    fn role(&self) -> Result<Role, RelayError> {
        self.with("role", |identity| identity.role)
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn static_identity_answers_every_query() {
        let identity = StaticIdentity::new("gm", "Game Master", Role::Viewer);
        assert_eq!(identity.self_id().unwrap(), ClientId::from("gm"));
        assert_eq!(identity.display_name().unwrap(), "Game Master");
        assert_eq!(identity.role().unwrap(), Role::Viewer);
    }

    #[test]
    fn disconnected_identity_reports_unavailable() {
        let identity = SharedIdentity::disconnected();
        assert!(matches!(
            identity.self_id(),
            Err(RelayError::IdentityUnavailable { .. })
        ));
        identity.set_role(Role::Viewer);
        assert!(identity.role().is_err());

        identity.connect("p1", "Ana", Role::Owner);
        assert_eq!(identity.self_id().unwrap(), ClientId::from("p1"));
    }

    #[test]
    fn clones_share_updates() {
        let identity = SharedIdentity::new("p1", "Ana", Role::Owner);
        let clone = identity.clone();
        clone.set_display_name("Ana B.");
        assert_eq!(identity.display_name().unwrap(), "Ana B.");
        clone.disconnect();
        assert!(identity.display_name().is_err());
    }
}
