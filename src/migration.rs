//! Encryption-state detection run before a store is used.
//!
//! The presence of two marker tables tells which form the data is in. Combined with
//! whether an encryption key was supplied, this decides if the caller must migrate the
//! plaintext store to an encrypted one, or whether startup has to be refused.

use crate::error::StoreError;

/// Marker table present in stores whose payloads are sealed.
pub const ENCRYPTED_METADATA_TABLE: &str = "encrypted_metadata";
/// Marker table present in stores whose payloads are plaintext.
pub const UNENCRYPTED_METADATA_TABLE: &str = "unencrypted_metadata";

/// Which marker tables exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkerState {
    pub unencrypted: bool,
    pub encrypted: bool,
}

/// Coarse classification of the store derived from its markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseState {
    Empty,
    Unencrypted,
    Encrypted,
    Both,
}

impl MarkerState {
    #[must_use]
    pub fn database_state(self) -> DatabaseState {
        match (self.unencrypted, self.encrypted) {
            (false, false) => DatabaseState::Empty,
            (true, false) => DatabaseState::Unencrypted,
            (false, true) => DatabaseState::Encrypted,
            (true, true) => DatabaseState::Both,
        }
    }
}

/// Decide whether an unencrypted → encrypted migration is required.
///
/// # Errors
/// [`StoreError::HaveEncryptedAndUnencrypted`] when both markers exist and
/// [`StoreError::HaveEncryptedWithNoKey`] for an encrypted store opened without a key.
/// Either one means the store must not be used.
pub fn classify(markers: MarkerState, key_present: bool) -> Result<bool, StoreError> {
    match (markers.database_state(), key_present) {
        (DatabaseState::Both, _) => Err(StoreError::HaveEncryptedAndUnencrypted),
        (DatabaseState::Unencrypted, key_present) => Ok(key_present),
        (DatabaseState::Encrypted, false) => Err(StoreError::HaveEncryptedWithNoKey),
        (DatabaseState::Encrypted, true) | (DatabaseState::Empty, _) => Ok(false),
    }
}

/// True for the outcomes after which the store must be left alone.
#[must_use]
pub fn is_fatal(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::HaveEncryptedAndUnencrypted | StoreError::HaveEncryptedWithNoKey
    )
}
