//! Content fingerprints for save deduplication.
//!
//! A new work note is created only when the fingerprint of the current save
//! differs from the one stored on the entity. The stored value is updated
//! together with note creation, never before it.

use sha2::{Digest, Sha256};

use crate::types::WorkAttributes;

/// Compute a dedup fingerprint from key components.
///
/// A separator byte between parts keeps adjacent fields from colliding
/// (`["ab", "c"]` vs `["a", "bc"]`).
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of a save's full tracked payload, in fixed field order:
/// title, body, requester, worker, status, work date.
pub fn note_fingerprint(title: &str, body: &str, attrs: &WorkAttributes) -> String {
    fingerprint(&[
        title,
        body,
        attrs.requester.as_deref().unwrap_or(""),
        attrs.worker.as_deref().unwrap_or(""),
        attrs.status.as_deref().unwrap_or(""),
        attrs.work_date.as_deref().unwrap_or(""),
    ])
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint(&["post", "42", "依頼"]);
        let b = fingerprint(&["post", "42", "依頼"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64, "hex-encoded SHA-256");
    }

    #[test]
    fn test_fingerprint_is_order_sensitive() {
        assert_ne!(fingerprint(&["a", "b"]), fingerprint(&["b", "a"]));
    }

    #[test]
    fn test_fingerprint_separator_prevents_collisions() {
        assert_ne!(fingerprint(&["ab", "c"]), fingerprint(&["a", "bc"]));
    }

    #[test]
    fn test_note_fingerprint_tracks_every_field() {
        let attrs = WorkAttributes {
            requester: Some("A".to_string()),
            status: Some("依頼".to_string()),
            ..Default::default()
        };
        let base = note_fingerprint("t", "b", &attrs);

        let mut changed = attrs.clone();
        changed.status = Some("完了".to_string());
        assert_ne!(base, note_fingerprint("t", "b", &changed));

        assert_ne!(base, note_fingerprint("t2", "b", &attrs));
        assert_ne!(base, note_fingerprint("t", "b2", &attrs));
    }

    #[test]
    fn test_note_fingerprint_missing_equals_blank() {
        // Option::None and Some("") hash identically; emptiness is what matters.
        let none = WorkAttributes::default();
        let blank = WorkAttributes {
            requester: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(
            note_fingerprint("", "", &none),
            note_fingerprint("", "", &blank)
        );
    }
}
