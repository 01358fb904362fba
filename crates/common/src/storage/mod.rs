//! Local persistence on top of the at-rest cipher
//!
//! - [`device_key`] derives the default storage key from the machine id
//! - [`SecureStore`] is an encrypted key/value file with the
//!   get/set/merge/remove surface mobile apps expect from secure storage

mod device;
mod store;

pub use device::{device_key, DeviceKeyError, DEVICE_ID_ENV};
pub use store::{SecureStore, StoreError};
