use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 fingerprint of (sanitized text, context label).
///
/// Both parts are length-prefixed so that no two distinct pairs hash the
/// same input bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(text: &str, context: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((context.len() as u64).to_le_bytes());
        hasher.update(context.as_bytes());
        hasher.update((text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());

        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Fingerprint(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> String {
        self.to_string()[..12].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// Hex SHA-256 of text alone, used for audit records.
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(
            Fingerprint::of("hello", "SOC Analysis"),
            Fingerprint::of("hello", "SOC Analysis")
        );
    }

    #[test]
    fn test_context_changes_fingerprint() {
        assert_ne!(
            Fingerprint::of("hello", "SOC Analysis"),
            Fingerprint::of("hello", "Log Review")
        );
    }

    #[test]
    fn test_boundary_shift_does_not_collide() {
        assert_ne!(Fingerprint::of("bc", "a"), Fingerprint::of("c", "ab"));
    }

    #[test]
    fn test_hex_rendering() {
        let fp = Fingerprint::of("x", "y");
        let hex = fp.to_string();

        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.short(), &hex[..12]);
    }

    #[test]
    fn test_content_hash_known_value() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
