//! Source of the current caller identity.
//!
//! Services never consult this on their own; callers read the identity here
//! and pass it into each operation.

use tokio::sync::watch;
use tracing::info;

use crate::domain::Identity;

pub trait IdentityGateway: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;

    /// Receiver that observes every sign-in / sign-out
    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;
}

/// Session-scoped gateway backed by a watch channel
pub struct SessionGateway {
    tx: watch::Sender<Option<Identity>>,
}

impl SessionGateway {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn sign_in(&self, identity: Identity) {
        info!(user_id = %identity.id, role = %identity.role, "Signed in");
        self.tx.send_replace(Some(identity));
    }

    pub fn sign_out(&self) {
        if let Some(previous) = self.tx.send_replace(None) {
            info!(user_id = %previous.id, "Signed out");
        }
    }
}

impl Default for SessionGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityGateway for SessionGateway {
    fn current_identity(&self) -> Option<Identity> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }
}
