//! Identity value: normalizes device and user ids into the parts of a downstream
//! identifier.
//!
//! The device part is the raw device id when it is short enough and passes the validator,
//! otherwise `hash50(device_id)`. The user part is always `hash10(user_id)`.

use crate::hashing::{hash10, hash50};

/// Longest device id used verbatim.
pub const DEVICE_ID_MAX_LENGTH: usize = 50;

/// Format check applied to device ids before they are used verbatim.
pub trait DeviceIdValidator: Send + Sync {
    fn is_valid(&self, device_id: &str) -> bool;
}

/// Accepts 1 to 64 characters from `A-Z a-z 0-9 = | < > ; + . ( ) ! : $ @ _ -`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDeviceIdValidator;

impl DefaultDeviceIdValidator {
    const MAX_LENGTH: usize = 64;

    fn is_allowed(c: char) -> bool {
        c.is_ascii_alphanumeric() || "=|<>;+.()!:$@_-".contains(c)
    }
}

impl DeviceIdValidator for DefaultDeviceIdValidator {
    fn is_valid(&self, device_id: &str) -> bool {
        !device_id.is_empty()
            && device_id.len() <= Self::MAX_LENGTH
            && device_id.chars().all(Self::is_allowed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    device_id: String,
    user_id: String,
    device_id_hash: Option<String>,
    user_id_hash: String,
}

impl Identity {
    pub fn new(device_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::with_validator(device_id, user_id, &DefaultDeviceIdValidator)
    }

    pub fn with_validator(
        device_id: impl Into<String>,
        user_id: impl Into<String>,
        validator: &dyn DeviceIdValidator,
    ) -> Self {
        let device_id = device_id.into();
        let user_id = user_id.into();
        let device_id_hash = (device_id.len() > DEVICE_ID_MAX_LENGTH
            || !validator.is_valid(&device_id))
        .then(|| hash50(&device_id));
        let user_id_hash = hash10(&user_id);
        Self {
            device_id,
            user_id,
            device_id_hash,
            user_id_hash,
        }
    }

    /// Device id as it appears in identifiers.
    pub fn device_id_part(&self) -> &str {
        self.device_id_hash.as_deref().unwrap_or(&self.device_id)
    }

    /// User id as it appears in identifiers.
    pub fn user_id_part(&self) -> &str {
        &self.user_id_hash
    }

    pub fn original_device_id(&self) -> &str {
        &self.device_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id == self.device_id
    }

    pub fn is_device_id_hashed(&self) -> bool {
        self.device_id_hash.is_some()
    }

    /// Replaces the user id. Returns `false` when it is unchanged.
    pub fn set_user_id(&mut self, user_id: impl Into<String>) -> bool {
        let user_id = user_id.into();
        if user_id == self.user_id {
            return false;
        }
        self.user_id_hash = hash10(&user_id);
        self.user_id = user_id;
        true
    }
}
