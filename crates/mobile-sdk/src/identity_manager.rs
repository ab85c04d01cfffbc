//! Identity manager: derives the downstream identifier and tracks the one-time
//! anonymous to identified merge.
//!
//! Identifier shapes:
//!   - anonymous: `device_part`
//!   - identified, same user the anonymous profile was merged into: `device_part`
//!   - identified otherwise: `device_part + "_" + hash10(user_id)`
//!
//! Login state and the merge record live in a [`KeyValueStore`] and are re-read on every
//! query, so several managers over one store always agree.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::identity::{DefaultDeviceIdValidator, DeviceIdValidator, Identity};
use crate::store::KeyValueStore;

pub const LOGIN_STATE_KEY: &str = "campaign.identity.login_state";
pub const MERGE_USER_ID_HASH_KEY: &str = "campaign.identity.anonymous_merge_user_id_hash";

/// Profile payload key holding the raw user id.
pub const PROFILE_IDENTITY_KEY: &str = "Identity";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginState {
    /// Never started on this device.
    #[default]
    Undefined,
    Anonymous,
    Identified,
}

impl LoginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginState::Undefined => "undefined",
            LoginState::Anonymous => "anonymous",
            LoginState::Identified => "identified",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "undefined" => Some(LoginState::Undefined),
            "anonymous" => Some(LoginState::Anonymous),
            "identified" => Some(LoginState::Identified),
            _ => None,
        }
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct IdentityManager {
    identity: Identity,
    store: Arc<dyn KeyValueStore>,
    first_time_start: bool,
}

impl IdentityManager {
    pub fn new(
        device_id: impl Into<String>,
        user_id: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self::with_validator(device_id, user_id, store, &DefaultDeviceIdValidator)
    }

    pub fn with_validator(
        device_id: impl Into<String>,
        user_id: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        validator: &dyn DeviceIdValidator,
    ) -> Self {
        let manager = Self::open(Identity::with_validator(device_id, user_id, validator), store);
        manager.start();
        manager
    }

    /// Starts for a user the backend already reports as logged in. The user becomes current,
    /// the state is identified and no merge is recorded.
    pub fn with_logged_in_user(
        device_id: impl Into<String>,
        logged_in_user_id: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let manager = Self::open(Identity::new(device_id, logged_in_user_id), store);
        info!(
            user_id_part = %manager.identity.user_id_part(),
            "Starting with logged in user"
        );
        manager.write_login_state(LoginState::Identified);
        manager
    }

    fn open(identity: Identity, store: Arc<dyn KeyValueStore>) -> Self {
        let first_time_start = read_login_state(store.as_ref()) == LoginState::Undefined;
        Self {
            identity,
            store,
            first_time_start,
        }
    }

    fn start(&self) {
        let state = self.login_state();
        if self.identity.is_anonymous() {
            // A returning anonymous user never downgrades an identified device.
            if state != LoginState::Identified {
                self.write_login_state(LoginState::Anonymous);
            }
            return;
        }

        match state {
            LoginState::Undefined => self.write_login_state(LoginState::Identified),
            LoginState::Anonymous => self.record_merge(self.identity.user_id_part()),
            LoginState::Identified => {}
        }
    }

    fn record_merge(&self, user_id_hash: &str) {
        self.store.set_string(MERGE_USER_ID_HASH_KEY, user_id_hash);
        self.write_login_state(LoginState::Identified);
        info!(
            merge_user_id_hash = %user_id_hash,
            "Anonymous data will be merged into identified user"
        );
    }

    fn write_login_state(&self, state: LoginState) {
        debug!(login_state = %state, "Login state updated");
        self.store.set_string(LOGIN_STATE_KEY, state.as_str());
    }

    pub fn login_state(&self) -> LoginState {
        read_login_state(self.store.as_ref())
    }

    pub fn merge_user_id_hash(&self) -> Option<String> {
        self.store.get_string(MERGE_USER_ID_HASH_KEY)
    }

    /// Anonymous means the user id equals the device id on a device that has never been
    /// identified.
    pub fn is_anonymous(&self) -> bool {
        self.identity.is_anonymous() && self.login_state() != LoginState::Identified
    }

    /// The downstream identifier, at most 61 characters.
    pub fn identifier(&self) -> String {
        let device_part = self.identity.device_id_part();
        if self.is_anonymous() {
            return device_part.to_string();
        }
        let user_part = self.identity.user_id_part();
        if self.merge_user_id_hash().as_deref() == Some(user_part) {
            return device_part.to_string();
        }
        format!("{device_part}_{user_part}")
    }

    /// Switches the current user. Returns `false` for an empty or unchanged id. The first
    /// switch away from an anonymous user records the merge.
    pub fn set_user_id(&mut self, user_id: &str) -> bool {
        if user_id.is_empty() || user_id == self.identity.user_id() {
            return false;
        }
        if self.login_state() == LoginState::Anonymous {
            self.record_merge(&crate::hashing::hash10(user_id));
        }
        self.identity.set_user_id(user_id)
    }

    /// `{"Identity": user_id}` for identified users.
    pub fn profile(&self) -> Option<BTreeMap<String, String>> {
        if self.is_anonymous() {
            return None;
        }
        Some(BTreeMap::from([(
            PROFILE_IDENTITY_KEY.to_string(),
            self.identity.user_id().to_string(),
        )]))
    }

    /// Whether no login state was persisted before this manager started.
    pub fn is_first_time_start(&self) -> bool {
        self.first_time_start
    }

    pub fn is_device_id_hashed(&self) -> bool {
        self.identity.is_device_id_hashed()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user_id(&self) -> &str {
        self.identity.user_id()
    }
}

impl fmt::Debug for IdentityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityManager")
            .field("identity", &self.identity)
            .field("login_state", &self.login_state())
            .finish()
    }
}

fn read_login_state(store: &dyn KeyValueStore) -> LoginState {
    store
        .get_string(LOGIN_STATE_KEY)
        .and_then(|s| LoginState::parse(&s))
        .unwrap_or_default()
}
