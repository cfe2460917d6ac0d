use rand::{thread_rng, Rng};
use tokio::sync::watch;
use uuid::Uuid;

/// The local user, as the identity collaborator reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub display_name: String,
    pub is_ephemeral: bool,
}

impl Identity {
    /// Identity for a known member.
    pub fn named(user_id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            is_ephemeral: false,
        }
    }

    /// Throwaway identity with a generated display name (demo sessions and
    /// tests).
    pub fn ephemeral() -> Self {
        Self {
            user_id: Uuid::new_v4(),
            display_name: generate_display_name(),
            is_ephemeral: true,
        }
    }
}

/// Create a linked auth controller/handle pair. The controller side belongs
/// to the identity provider; sessions hold the handle.
pub fn auth_channel(initial: Option<Identity>) -> (AuthController, AuthHandle) {
    let (tx, rx) = watch::channel(initial);
    (AuthController { tx }, AuthHandle { rx })
}

/// Write side of the auth state.
pub struct AuthController {
    tx: watch::Sender<Option<Identity>>,
}

impl AuthController {
    pub fn sign_in(&self, identity: Identity) {
        self.tx.send_replace(Some(identity));
    }

    pub fn sign_out(&self) {
        self.tx.send_replace(None);
    }
}

/// Read side of the auth state: the current user plus change notification.
#[derive(Clone)]
pub struct AuthHandle {
    rx: watch::Receiver<Option<Identity>>,
}

impl AuthHandle {
    pub fn current_user(&self) -> Option<Identity> {
        self.rx.borrow().clone()
    }

    /// Wait for the next sign-in/sign-out. Returns false if the provider
    /// went away.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Random display name in the style of auto-assigned alumni handles:
/// `{adjective}{mascot}{number}`.
fn generate_display_name() -> String {
    let adjectives = [
        "golden", "crimson", "varsity", "emerald", "scarlet", "azure", "amber", "silver",
        "cobalt", "maroon", "ivory", "indigo",
    ];

    let mascots = [
        "falcon", "badger", "wolverine", "cardinal", "husky", "mustang", "beaver", "terrapin",
        "wildcat", "gopher", "jayhawk", "bruin",
    ];

    let mut rng = thread_rng();
    let adjective = adjectives[rng.gen_range(0..adjectives.len())];
    let mascot = mascots[rng.gen_range(0..mascots.len())];
    let number: u16 = rng.gen_range(100..9999);

    format!("{}{}{}", adjective, mascot, number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_identities_are_distinct() {
        let a = Identity::ephemeral();
        let b = Identity::ephemeral();
        assert_ne!(a.user_id, b.user_id);
        assert!(a.is_ephemeral);
        assert!(!a.display_name.is_empty());
    }

    #[tokio::test]
    async fn test_auth_handle_tracks_sign_in_and_out() {
        let (controller, handle) = auth_channel(None);
        assert!(handle.current_user().is_none());

        let identity = Identity::named(Uuid::new_v4(), "Avery Lindqvist");
        controller.sign_in(identity.clone());
        assert_eq!(handle.current_user(), Some(identity));

        controller.sign_out();
        assert!(handle.current_user().is_none());
    }

    #[tokio::test]
    async fn test_changed_fires_on_sign_in() {
        let (controller, mut handle) = auth_channel(None);
        let waiter = tokio::spawn(async move {
            let changed = handle.changed().await;
            (changed, handle.current_user())
        });

        controller.sign_in(Identity::ephemeral());
        let (changed, user) = waiter.await.unwrap();
        assert!(changed);
        assert!(user.is_some());
    }
}
