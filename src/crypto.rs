//! Bridge identity keypair and NIP-44 content encryption.

use anyhow::{Context, Result};
use nostr::nips::nip44;
use nostr::{Keys, PublicKey};

/// The bridge's own keypair. Alert events are addressed to this key and their
/// content is NIP-44 ciphertext only this key (or the sender) can open.
#[derive(Clone)]
pub struct BridgeKeys {
    keys: Keys,
}

impl BridgeKeys {
    /// Load the keypair from a hex-encoded secret key.
    pub fn from_secret(secret: &str) -> Result<Self> {
        let keys = Keys::parse(secret).context("invalid secret key")?;
        Ok(Self { keys })
    }

    /// Generate a fresh keypair.
    pub fn generate() -> Self {
        Self {
            keys: Keys::generate(),
        }
    }

    /// Hex-encoded public key.
    pub fn public_hex(&self) -> String {
        self.keys.public_key().to_hex()
    }

    /// Hex-encoded secret key.
    pub fn secret_hex(&self) -> String {
        self.keys.secret_key().to_secret_hex()
    }

    /// Decrypt NIP-44 ciphertext produced by `sender` for this key.
    pub fn decrypt(&self, sender: &str, ciphertext: &str) -> Result<String> {
        let sender = PublicKey::from_hex(sender).context("invalid sender pubkey")?;
        nip44::decrypt(self.keys.secret_key(), &sender, ciphertext)
            .context("nip44 decryption failed")
    }

    /// Encrypt `plaintext` for `recipient` under this key.
    pub fn encrypt(&self, recipient: &str, plaintext: &str) -> Result<String> {
        let recipient = PublicKey::from_hex(recipient).context("invalid recipient pubkey")?;
        nip44::encrypt(
            self.keys.secret_key(),
            &recipient,
            plaintext,
            nip44::Version::V2,
        )
        .context("nip44 encryption failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_between_two_keypairs() {
        let alice = BridgeKeys::generate();
        let bob = BridgeKeys::generate();
        let ciphertext = alice.encrypt(&bob.public_hex(), "hello").unwrap();
        assert_ne!(ciphertext, "hello");
        let plaintext = bob.decrypt(&alice.public_hex(), &ciphertext).unwrap();
        assert_eq!(plaintext, "hello");
    }

    #[test]
    fn decrypt_with_wrong_counterparty_fails() {
        let alice = BridgeKeys::generate();
        let bob = BridgeKeys::generate();
        let mallory = BridgeKeys::generate();
        let ciphertext = alice.encrypt(&bob.public_hex(), "secret").unwrap();
        assert!(bob.decrypt(&mallory.public_hex(), &ciphertext).is_err());
    }

    #[test]
    fn decrypt_rejects_garbage() {
        let keys = BridgeKeys::generate();
        let other = BridgeKeys::generate();
        assert!(keys.decrypt(&other.public_hex(), "not a payload").is_err());
    }

    #[test]
    fn from_secret_round_trips() {
        let keys = BridgeKeys::generate();
        let restored = BridgeKeys::from_secret(&keys.secret_hex()).unwrap();
        assert_eq!(restored.public_hex(), keys.public_hex());
    }

    #[test]
    fn from_secret_rejects_invalid() {
        assert!(BridgeKeys::from_secret("nope").is_err());
    }
}
