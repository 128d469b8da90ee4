//! The user's passphrase, held so it never lingers in memory or a debug print longer
//! than it has to.

use secrecy::{ExposeSecret, SecretBox};

/// A passphrase used to open or save a database.
///
/// `Debug` is implemented manually so printing a `DatabaseKey` (or anything that embeds
/// one) never leaks the passphrase into logs.
pub struct DatabaseKey {
    passphrase: SecretBox<String>,
}

impl DatabaseKey {
    pub fn new(passphrase: impl Into<String>) -> Self {
        DatabaseKey {
            passphrase: SecretBox::new(Box::new(passphrase.into())),
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.passphrase.expose_secret().as_bytes()
    }
}

impl std::fmt::Debug for DatabaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseKey").field("passphrase", &"[redacted]").finish()
    }
}

impl Clone for DatabaseKey {
    fn clone(&self) -> Self {
        DatabaseKey::new(self.passphrase.expose_secret().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_does_not_contain_the_passphrase() {
        let key = DatabaseKey::new("hunter2");
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn as_bytes_round_trips() {
        let key = DatabaseKey::new("hunter2");
        assert_eq!(key.as_bytes(), b"hunter2");
    }
}
