//! Session Code Generation and Parsing
//!
//! Short human-friendly codes the host reads out so clients join the same
//! gossip topic.

use std::fmt;

/// Characters used in session codes (unambiguous, uppercase)
/// Excludes: 0/O, 1/I/L, 5/S, 2/Z to avoid confusion
const ALPHABET: &[u8] = b"346789ABCDEFGHJKMNPQRTUVWXY";

/// Session code length (6 chars = ~387 million combinations)
const CODE_LENGTH: usize = 6;

/// A code that can be shared to join a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionCode(String);

impl SessionCode {
    /// Generate a random session code
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        let code = (0..CODE_LENGTH)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        SessionCode(code)
    }

    /// Get the session code as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a session code from user input
    ///
    /// Normalizes to uppercase and ignores separators.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized: String = input
            .chars()
            .filter(|c| c.is_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.len() != CODE_LENGTH {
            return None;
        }

        if normalized.bytes().all(|b| ALPHABET.contains(&b)) {
            Some(SessionCode(normalized))
        } else {
            None
        }
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // XXX-XXX for readability
        write!(f, "{}-{}", &self.0[..3], &self.0[3..])
    }
}
