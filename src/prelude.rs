//! Convenient re-exports for common usage.
//!
//! # Usage
//!
//! ```rust
//! use record_relay::prelude::*;
//! ```
//!
//! # What's Included
//!
//! - **Client types**: [`RelayClient`], [`RelayBuilder`], [`DirectoryEntry`]
//! - **Core traits**: [`IdentityProvider`], [`PrivateStore`], [`SharedStore`], [`BroadcastBus`]
//! - **Bundled implementations**: [`MemoryPrivateStore`], [`FilePrivateStore`],
//!   [`MemorySharedStore`], [`MemoryBroker`], [`StaticIdentity`], [`SharedIdentity`]
//! - **Data types**: [`Record`], [`RecordId`], [`ClientId`], [`Fields`], [`FieldValue`],
//!   [`IndexEntry`], [`Role`]
//! - **Events and view state**: [`RelayEvent`], [`NoticeLevel`], [`ViewerState`],
//!   [`ViewingContext`], [`MessageKind`]
//! - **Configuration**: [`RelayConfig`], [`ViewerConfig`], [`OwnerConfig`], [`IndexWriteMode`]
//! - **Error handling**: [`RelayError`]
//!
//! # Example
//!
//! ```rust
//! use record_relay::prelude::*;
//!
//! fn render(client: &mut RelayClient) {
//!     for event in client.events() {
//!         match event {
//!             RelayEvent::Notice { level, message } => {
//!                 let _ = (level, message);
//!             },
//!             RelayEvent::ViewUpdated { fields, .. } => {
//!                 let _ = fields;
//!             },
//!             _ => {},
//!         }
//!     }
//! }
//! ```

// Client types
pub use crate::sessions::builder::RelayBuilder;
pub use crate::sessions::client::{DirectoryEntry, RelayClient};

// Core traits
pub use crate::{BroadcastBus, IdentityProvider, PrivateStore, SharedStore};

// Bundled implementations
pub use crate::identity::{SharedIdentity, StaticIdentity};
pub use crate::network::memory_bus::MemoryBroker;
pub use crate::store::private_store::{FilePrivateStore, MemoryPrivateStore};
pub use crate::store::shared_store::MemorySharedStore;

// Data types
pub use crate::index::IndexEntry;
pub use crate::record::{FieldValue, Fields, Record};
pub use crate::{ClientId, RecordId, Role};

// Events and view state
pub use crate::network::messages::MessageKind;
pub use crate::sessions::viewer::{ViewerState, ViewingContext};
pub use crate::{NoticeLevel, RelayEvent};

// Configuration
pub use crate::index::IndexWriteMode;
pub use crate::sessions::config::{OwnerConfig, RelayConfig, ViewerConfig};

// Error handling
pub use crate::RelayError;

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
    fn prelude_is_enough_to_join_a_room() {
        let broker = MemoryBroker::new();
        let mut client = RelayBuilder::new()
            .start(
                StaticIdentity::new("p1", "Ana", Role::Owner),
                MemoryPrivateStore::new(),
                MemorySharedStore::new(),
                broker.endpoint(),
            )
            .unwrap();
        client.create_record().unwrap();
        assert_eq!(client.viewer_state(), &ViewerState::Idle);
    }
}
