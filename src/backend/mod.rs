pub use directory::{ConversationDirectory, ConversationListing, ConversationSummary};
pub use profiles::ProfileDirectory;
pub use store::MessageStore;
pub use types::{display_name, initials, Conversation, Message, Profile};

mod directory;
mod profiles;
mod store;
mod types;

use crate::config::Config;
use crate::realtime::{PresenceChannel, RealtimeHub};

/// Handle to the hosted-backend collaborators: message store, conversation
/// directory, profile directory and the realtime hub.
///
/// One `Backend` is constructed at bootstrap and passed into every session;
/// there is no module-level singleton. Clones share the same state.
#[derive(Clone)]
pub struct Backend {
    store: MessageStore,
    directory: ConversationDirectory,
    profiles: ProfileDirectory,
    realtime: RealtimeHub,
}

impl Backend {
    pub fn new(config: &Config) -> Self {
        let realtime = RealtimeHub::new(config.typing_expiry());
        let profiles = ProfileDirectory::new();
        let store = MessageStore::new(realtime.clone());
        let directory = ConversationDirectory::new(store.clone(), profiles.clone());
        Self {
            store,
            directory,
            profiles,
            realtime,
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn profiles(&self) -> &ProfileDirectory {
        &self.profiles
    }

    pub fn realtime(&self) -> &RealtimeHub {
        &self.realtime
    }

    pub fn presence(&self) -> &PresenceChannel {
        self.realtime.presence()
    }
}
