//! Opaque token generation

use mailfeed_common::types::TOKEN_ALPHABET;
use rand::Rng;

/// Draw `length` characters from `alphabet` using the thread-local CSPRNG.
///
/// `alphabet` must be ASCII. Uniqueness is not guaranteed; stores report
/// collisions and callers regenerate.
pub fn generate(length: usize, alphabet: &[u8]) -> String {
    if alphabet.is_empty() {
        return String::new();
    }
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// Source of fresh inbox and entry tokens
pub trait TokenSource: Send + Sync {
    fn next_token(&self) -> String;
}

/// Random lowercase alphanumeric tokens of a fixed length
#[derive(Debug, Clone)]
pub struct RandomTokens {
    length: usize,
}

impl RandomTokens {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl TokenSource for RandomTokens {
    fn next_token(&self) -> String {
        generate(self.length, TOKEN_ALPHABET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailfeed_common::types::is_token_like;
    use std::collections::HashSet;

    #[test]
    fn test_generate_length_and_alphabet() {
        let token = generate(20, TOKEN_ALPHABET);
        assert_eq!(token.len(), 20);
        assert!(is_token_like(&token));

        assert_eq!(generate(5, b"x"), "xxxxx");
        assert_eq!(generate(5, b""), "");
    }

    #[test]
    fn test_random_tokens_differ() {
        let tokens = RandomTokens::new(16);
        let generated: HashSet<String> = (0..1000).map(|_| tokens.next_token()).collect();
        assert_eq!(generated.len(), 1000);
    }
}
