// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Content-derived identifiers
//!
//! ```text
//! eventId       = SHA256(kind | sessionId | iso-to-the-second | content)
//! contentHash   = SHA256(content)
//! sourceIdsHash = SHA256(id_1 \n id_2 \n ... id_n)
//! ```
//!
//! All digests are lowercase hex (64 chars). `eventId` deliberately truncates
//! the timestamp to whole seconds, so identical content from the same session
//! within one second maps to one id and is dropped by the dedup window.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `input`
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Deterministic event identifier
pub fn event_id(kind: &str, session_id: &str, iso_second: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"|");
    hasher.update(session_id.as_bytes());
    hasher.update(b"|");
    hasher.update(iso_second.as_bytes());
    hasher.update(b"|");
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash of an ordered list of source event ids
pub fn source_ids_hash<S: AsRef<str>>(ids: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(id.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_is_pure() {
        let a = event_id("archive", "s1", "2026-10-19T10:00:00+02:00", "hello");
        let b = event_id("archive", "s1", "2026-10-19T10:00:00+02:00", "hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_event_id_inputs_matter() {
        let base = event_id("archive", "s1", "2026-10-19T10:00:00+02:00", "hello");
        assert_ne!(base, event_id("archive", "s2", "2026-10-19T10:00:00+02:00", "hello"));
        assert_ne!(base, event_id("archive", "s1", "2026-10-19T10:00:01+02:00", "hello"));
        assert_ne!(base, event_id("archive", "s1", "2026-10-19T10:00:00+02:00", "hello!"));
    }

    #[test]
    fn test_source_ids_hash_order_sensitive() {
        let ab = source_ids_hash(&["a", "b"]);
        let ba = source_ids_hash(&["b", "a"]);
        assert_ne!(ab, ba);
        assert_eq!(ab, source_ids_hash(&["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
