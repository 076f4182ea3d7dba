// hkv-common - the error type shared by the hash field expiration engine.

pub mod error;

pub use error::{HkvError, HkvResult};
