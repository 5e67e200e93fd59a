pub mod push;
pub mod store;
pub mod time;

pub use push::PushDispatcher;
pub use store::{CredentialVerifier, NotificationStore, PushStore, QueueStore, SubscriberStore};
pub use self::time::TimeProvider;
