//! Session identifier generation (spec.md §3 "short mnemonic string,
//! random if not supplied").

use rand::seq::SliceRandom;

const ADJECTIVES: &[&str] = &["blorp", "frulf", "glork", "zantic", "quombo", "snarp", "vexil", "drome"];
const NOUNS: &[&str] = &["glork", "frulf", "nexus", "parsec", "widget", "static", "cipher", "thrum"];

/// A short mnemonic identifier in the style spec.md's scenarios use
/// (`"blorp-glork"`), drawn from two small word lists rather than hex or
/// a UUID, so it stays human-readable on a passcode-entry screen.
pub fn random_identifier() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).expect("ADJECTIVES is non-empty");
    let noun = NOUNS.choose(&mut rng).expect("NOUNS is non-empty");
    format!("{adjective}-{noun}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_a_hyphenated_two_word_identifier() {
        let id = random_identifier();
        assert_eq!(id.split('-').count(), 2);
    }
}
