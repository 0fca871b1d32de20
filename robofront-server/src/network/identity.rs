//! Player Identities
//!
//! Durable per-player records that outlive connections. An identity is
//! found again by its 128-bit key; its player index is assigned once and
//! never reused.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::network::protocol::{peer_flags, PeerEntry};

/// Opaque identity key chosen by the client.
pub type IdentityKey = [u8; 16];

/// Highest player index (owner bytes on the wire are signed).
pub const MAX_PLAYER_INDEX: u8 = i8::MAX as u8;

/// Longest accepted display name, in characters.
pub const MAX_NAME_CHARS: usize = 24;

/// Handshake identity failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Key is all zeros.
    #[error("identity key must not be zero")]
    ZeroKey,
    /// Name fails the name pattern.
    #[error("invalid name '{0}'")]
    InvalidName(String),
    /// Another identity uses this name.
    #[error("name '{0}' is already taken")]
    NameTaken(String),
    /// The identity already has a live connection.
    #[error("'{0}' is already connected")]
    AlreadyOnline(String),
    /// No player index left.
    #[error("server is full")]
    Full,
}

/// Check a display name: 1-24 characters of letters, digits, `_`, `-` or
/// inner spaces.
pub fn validate_name(name: &str) -> bool {
    let count = name.chars().count();
    (1..=MAX_NAME_CHARS).contains(&count)
        && !name.starts_with(' ')
        && !name.ends_with(' ')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ' ')
}

/// Short hex form of a key for logs.
pub fn key_prefix(key: &IdentityKey) -> String {
    hex::encode(&key[..4])
}

/// A known player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerIdentity {
    /// Stable key.
    pub key: IdentityKey,
    /// Display name.
    pub name: String,
    /// Stable slot.
    pub index: u8,
    /// Host of the session.
    pub is_host: bool,
    /// Has a live connection.
    pub is_online: bool,
    /// Ready in the lobby.
    pub is_ready: bool,
}

impl PlayerIdentity {
    /// PeerList flag byte.
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.is_host {
            flags |= peer_flags::HOST;
        }
        if self.is_online {
            flags |= peer_flags::ONLINE;
        }
        if self.is_ready {
            flags |= peer_flags::READY;
        }
        flags
    }
}

/// Result of a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Player index of the identity.
    pub index: u8,
    /// Whether the identity was created by this admission.
    pub is_new: bool,
}

/// All identities known to the session.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    identities: BTreeMap<u8, PlayerIdentity>,
    next_index: u8,
    host: Option<u8>,
}

impl IdentityRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a handshake and attach it to a new or existing identity.
    ///
    /// On success the identity is online.
    pub fn admit(&mut self, key: IdentityKey, name: &str) -> Result<Admission, IdentityError> {
        if key == [0u8; 16] {
            return Err(IdentityError::ZeroKey);
        }
        if !validate_name(name) {
            return Err(IdentityError::InvalidName(name.to_string()));
        }

        let existing = self.find_by_key(&key).map(|i| (i.index, i.is_online, i.name.clone()));
        if let Some((_, true, current)) = &existing {
            return Err(IdentityError::AlreadyOnline(current.clone()));
        }

        let own_index = existing.as_ref().map(|(index, _, _)| *index);
        if self
            .identities
            .values()
            .any(|i| Some(i.index) != own_index && i.name == name)
        {
            return Err(IdentityError::NameTaken(name.to_string()));
        }

        if let Some(index) = own_index {
            if let Some(identity) = self.identities.get_mut(&index) {
                identity.name = name.to_string();
                identity.is_online = true;
                identity.is_ready = false;
            }
            return Ok(Admission { index, is_new: false });
        }

        if self.next_index > MAX_PLAYER_INDEX {
            return Err(IdentityError::Full);
        }
        let index = self.next_index;
        self.next_index += 1;
        let is_host = self.host.is_none();
        if is_host {
            self.host = Some(index);
        }
        self.identities.insert(
            index,
            PlayerIdentity {
                key,
                name: name.to_string(),
                index,
                is_host,
                is_online: true,
                is_ready: false,
            },
        );
        Ok(Admission { index, is_new: true })
    }

    /// Re-create an offline identity from saved state.
    ///
    /// The lowest restored index becomes host if no host exists.
    pub fn restore(&mut self, key: IdentityKey, name: &str, index: u8) {
        self.identities.insert(
            index,
            PlayerIdentity {
                key,
                name: name.to_string(),
                index,
                is_host: false,
                is_online: false,
                is_ready: false,
            },
        );
        self.next_index = self.next_index.max(index.saturating_add(1));
        let host = match self.host {
            Some(h) if h <= index => h,
            _ => index,
        };
        self.host = Some(host);
        for identity in self.identities.values_mut() {
            identity.is_host = identity.index == host;
        }
    }

    /// Look up by index.
    pub fn get(&self, index: u8) -> Option<&PlayerIdentity> {
        self.identities.get(&index)
    }

    /// Look up by key.
    pub fn find_by_key(&self, key: &IdentityKey) -> Option<&PlayerIdentity> {
        self.identities.values().find(|i| &i.key == key)
    }

    /// Index of the host, if any identity exists.
    pub fn host(&self) -> Option<u8> {
        self.host
    }

    /// Mark an identity offline. Readiness is cleared.
    pub fn set_offline(&mut self, index: u8) {
        if let Some(identity) = self.identities.get_mut(&index) {
            identity.is_online = false;
            identity.is_ready = false;
        }
    }

    /// Update the ready flag.
    pub fn set_ready(&mut self, index: u8, ready: bool) {
        if let Some(identity) = self.identities.get_mut(&index) {
            identity.is_ready = ready;
        }
    }

    /// All identities in index order.
    pub fn iter(&self) -> impl Iterator<Item = &PlayerIdentity> {
        self.identities.values()
    }

    /// Number of known identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Whether no identity is known.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Names of online identities that are not ready.
    pub fn not_ready(&self) -> Vec<String> {
        self.identities
            .values()
            .filter(|i| i.is_online && !i.is_ready)
            .map(|i| i.name.clone())
            .collect()
    }

    /// At least one identity online and every online identity ready.
    pub fn all_online_ready(&self) -> bool {
        self.identities.values().any(|i| i.is_online) && self.not_ready().is_empty()
    }

    /// PeerList entries in index order.
    pub fn peer_entries(&self) -> Vec<PeerEntry> {
        self.identities
            .values()
            .map(|i| PeerEntry {
                name: i.name.clone(),
                flags: i.flags(),
                index: i.index,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_pattern() {
        assert!(validate_name("alice"));
        assert!(validate_name("Robo Crafter-2_x"));
        assert!(!validate_name(""));
        assert!(!validate_name(" alice"));
        assert!(!validate_name("alice "));
        assert!(!validate_name("al!ce"));
        assert!(!validate_name(&"a".repeat(25)));
        assert!(validate_name(&"a".repeat(24)));
    }

    #[test]
    fn test_first_identity_is_host() {
        let mut registry = IdentityRegistry::new();
        let a = registry.admit([1; 16], "alice").unwrap();
        let b = registry.admit([2; 16], "bob").unwrap();
        assert_eq!(a, Admission { index: 0, is_new: true });
        assert_eq!(b, Admission { index: 1, is_new: true });
        assert!(registry.get(0).unwrap().is_host);
        assert!(!registry.get(1).unwrap().is_host);
        assert_eq!(registry.host(), Some(0));
    }

    #[test]
    fn test_online_key_rejected() {
        let mut registry = IdentityRegistry::new();
        registry.admit([1; 16], "alice").unwrap();
        assert_eq!(
            registry.admit([1; 16], "alice2"),
            Err(IdentityError::AlreadyOnline("alice".into()))
        );
        assert_eq!(registry.get(0).unwrap().name, "alice");
        assert!(registry.get(0).unwrap().is_online);
    }

    #[test]
    fn test_reattach_keeps_index_and_host() {
        let mut registry = IdentityRegistry::new();
        registry.admit([1; 16], "alice").unwrap();
        registry.admit([2; 16], "bob").unwrap();
        registry.set_offline(0);

        let again = registry.admit([1; 16], "alice").unwrap();
        assert_eq!(again, Admission { index: 0, is_new: false });
        assert!(registry.get(0).unwrap().is_host);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_indices_never_reused() {
        let mut registry = IdentityRegistry::new();
        registry.admit([1; 16], "alice").unwrap();
        registry.set_offline(0);
        let b = registry.admit([2; 16], "bob").unwrap();
        assert_eq!(b.index, 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = IdentityRegistry::new();
        registry.admit([1; 16], "alice").unwrap();
        registry.set_offline(0);
        assert_eq!(registry.admit([2; 16], "alice"), Err(IdentityError::NameTaken("alice".into())));
    }

    #[test]
    fn test_zero_key_rejected() {
        let mut registry = IdentityRegistry::new();
        assert_eq!(registry.admit([0; 16], "alice"), Err(IdentityError::ZeroKey));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ready_requires_someone_online() {
        let mut registry = IdentityRegistry::new();
        assert!(!registry.all_online_ready());
        registry.admit([1; 16], "alice").unwrap();
        registry.admit([2; 16], "bob").unwrap();
        registry.set_ready(0, true);
        assert_eq!(registry.not_ready(), vec!["bob".to_string()]);
        registry.set_offline(1);
        assert!(registry.all_online_ready());
    }

    #[test]
    fn test_restore_sets_host_to_lowest() {
        let mut registry = IdentityRegistry::new();
        registry.restore([2; 16], "bob", 3);
        registry.restore([1; 16], "alice", 1);
        assert_eq!(registry.host(), Some(1));
        assert!(registry.get(1).unwrap().is_host);
        assert!(!registry.get(3).unwrap().is_host);
        assert!(!registry.get(3).unwrap().is_online);

        let carol = registry.admit([3; 16], "carol").unwrap();
        assert_eq!(carol.index, 4);
    }

    #[test]
    fn test_peer_flags() {
        let mut registry = IdentityRegistry::new();
        registry.admit([1; 16], "alice").unwrap();
        registry.set_ready(0, true);
        let entries = registry.peer_entries();
        assert_eq!(entries[0].flags, peer_flags::HOST | peer_flags::ONLINE | peer_flags::READY);
    }
}
