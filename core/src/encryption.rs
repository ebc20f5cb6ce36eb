//! Per-event encryption hook.
//!
//! Applications that store personal data encrypt it with a key tied to the
//! event (typically its aggregate). The engine resolves an [`Encryption`] for
//! every event before invoking the projection and passes it along; the absence
//! of a resolver means no encryption.

use crate::event::ReadModelEvent;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Encryption failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncryptionError {
    /// No key is available (for example it was deleted to forget a user).
    #[error("Encryption key unavailable: {0}")]
    KeyUnavailable(String),

    /// The cipher operation failed.
    #[error("Cipher error: {0}")]
    Cipher(String),
}

/// Encrypt/decrypt pair bound to one event.
pub trait Encryption: Send + Sync {
    /// Encrypt plain text.
    ///
    /// # Errors
    ///
    /// Returns an [`EncryptionError`] if the key is missing or the cipher fails.
    fn encrypt(&self, plain: &str) -> Result<String, EncryptionError>;

    /// Decrypt cipher text.
    ///
    /// # Errors
    ///
    /// Returns an [`EncryptionError`] if the key is missing or the cipher fails.
    fn decrypt(&self, cipher: &str) -> Result<String, EncryptionError>;
}

/// Resolves the encryption for an event; `Ok(None)` means the event is not encrypted.
pub type EncryptionResolver = Arc<
    dyn Fn(
            &ReadModelEvent,
        ) -> Pin<
            Box<dyn Future<Output = Result<Option<Arc<dyn Encryption>>, EncryptionError>> + Send>,
        > + Send
        + Sync,
>;
