//! Mobile SDK messaging core: the in-app action queue that decides which message is on
//! screen, and the identity derivation that merges anonymous users into identified
//! profiles.

pub mod action;
pub mod choice;
pub mod definitions;
pub mod display;
pub mod events;
pub mod hashing;
pub mod identity;
pub mod identity_manager;
pub mod impressions;
pub mod manager;
pub mod presentation;
pub mod queue;
pub mod scheduler;
pub mod store;

pub use action::{Action, ActionContext, ActionType, ActionsTrigger, Priority};
pub use choice::MessageDisplayChoice;
pub use definitions::{ActionArg, ActionDefinition, ActionKind, Definitions};
pub use events::EventSinkListener;
pub use identity::Identity;
pub use identity_manager::{IdentityManager, LoginState};
pub use impressions::ImpressionLog;
pub use manager::{ActionManager, ActionManagerBuilder};
pub use presentation::Presentation;
pub use scheduler::{ActionScheduler, ManualScheduler, TokioScheduler};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
