// In-memory state of the companion backend.

use std::collections::BTreeSet;
use std::sync::RwLock;

use rust_stemmers::{Algorithm, Stemmer};

use crate::models::StoredMessage;

const TRIM_CHARS: &[char] = &['.', ',', '!', '?', ';', ':', '"', '\''];

lazy_static::lazy_static! {
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
}

/// Lowercased, punctuation-trimmed stem, so "Running!" and "runs" both become "run".
fn normalize(word: &str) -> String {
    let word = word.trim().trim_matches(TRIM_CHARS).to_lowercase();
    if word.is_empty() {
        return word;
    }
    STEMMER.stem(&word).into_owned()
}

#[derive(Debug, Default)]
pub struct MessageStore {
    messages: RwLock<Vec<StoredMessage>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, message: StoredMessage) {
        let mut messages = self.messages.write().unwrap_or_else(|e| e.into_inner());
        messages.push(message);
    }

    pub fn all(&self) -> Vec<StoredMessage> {
        self.messages.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn by_user(&self, user_id: &str) -> Vec<StoredMessage> {
        self.messages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn by_id(&self, message_id: &str) -> Option<StoredMessage> {
        self.messages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|m| m.message_id == message_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.messages.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Forbidden words, stored and matched by stem.
#[derive(Debug, Default)]
pub struct KeywordSet {
    words: RwLock<BTreeSet<String>>,
}

impl KeywordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_words<I, S>(&self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = self.words.write().unwrap_or_else(|e| e.into_inner());
        for word in words {
            let word = normalize(word.as_ref());
            if !word.is_empty() {
                set.insert(word);
            }
        }
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&normalize(word))
    }

    /// Sorted list of all keywords.
    pub fn all(&self) -> Vec<String> {
        self.words
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Every keyword occurrence in `text`, in order of appearance.
    pub fn find_in(&self, text: &str) -> Vec<String> {
        let set = self.words.read().unwrap_or_else(|e| e.into_inner());
        text.split_whitespace()
            .map(normalize)
            .filter(|word| set.contains(word))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: &str, user: &str) -> StoredMessage {
        StoredMessage {
            message_id: id.to_string(),
            user_id: user.to_string(),
            flagged: false,
            message_content: format!("content of {}", id),
        }
    }

    #[test]
    fn test_store_lookups() {
        let store = MessageStore::new();
        assert!(store.is_empty());
        store.add(stored("m1", "alice"));
        store.add(stored("m2", "bob"));
        store.add(stored("m3", "alice"));

        assert_eq!(store.len(), 3);
        let ids: Vec<String> = store.by_user("alice").into_iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec!["m1", "m3"]);
        assert_eq!(store.by_id("m2").map(|m| m.user_id), Some("bob".to_string()));
        assert!(store.by_id("missing").is_none());
    }

    #[test]
    fn test_keywords_ignore_case_and_punctuation() {
        let keywords = KeywordSet::new();
        keywords.add_words(["Secret", "  ", "password!"]);
        assert_eq!(keywords.all(), vec!["password", "secret"]);
        assert!(keywords.contains("SECRET"));

        let found = keywords.find_in("My Password, is not a secret.");
        assert_eq!(found, vec!["password", "secret"]);
        assert!(keywords.find_in("nothing to see").is_empty());
    }

    #[test]
    fn test_word_forms_collapse_to_one_keyword() {
        let keywords = KeywordSet::new();
        keywords.add_words(Vec::<String>::new());
        assert!(keywords.all().is_empty());

        keywords.add_words(["run", "running", "runs"]);
        assert_eq!(keywords.all(), vec!["run"]);
    }

    #[test]
    fn test_contains_matches_other_forms() {
        let keywords = KeywordSet::new();
        keywords.add_words(["running", "cats"]);

        for word in ["run", "running", "runs", "RUNNING", "cat", "cats"] {
            assert!(keywords.contains(word), "{} should match", word);
        }
        for word in ["swimming", "jump", "", "walk"] {
            assert!(!keywords.contains(word), "{} should not match", word);
        }
    }

    #[test]
    fn test_find_in_reports_stems() {
        let keywords = KeywordSet::new();
        keywords.add_words(["running", "cats", "swimming"]);

        let found = keywords.find_in("I love running! My cats are swimming, and dogs are barking.");
        assert_eq!(found, vec!["run", "cat", "swim"]);

        keywords.add_words(["running", "swimming"]);
        assert!(keywords.find_in("The quick brown fox jumps over the lazy dog.").is_empty());
        assert!(keywords.find_in("").is_empty());
    }
}
