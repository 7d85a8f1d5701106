//! Parsing of ICY metadata text (`Key='value';Key='value';...`).

use crate::protocol_constants::STREAM_TITLE_KEY;
use crate::utils::percent_decode_or_literal;

const KEY_END: &str = "='";
const VALUE_END: &str = "';";

/// One parsed metadata block.
///
/// Keys and values are form-decoded (`%XX` escapes, `+` as space). A key that was never sent is
/// distinct from a key sent with an empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IcyMetadata {
    /// Entries in first-seen order. A repeated key keeps its first position
    /// and takes the later value.
    entries: Vec<(String, String)>,
}

impl IcyMetadata {
    /// Parses raw metadata text.
    ///
    /// Parsing never fails. It stops at the first point where `='` or `';`
    /// cannot be found, or at an empty key, keeping the pairs read so far.
    /// Escapes that do not decode are kept as literal text.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut metadata = Self::default();
        let mut start = 0;

        while let Some(offset) = raw[start..].find(KEY_END) {
            let key_end = start + offset;
            if key_end == start {
                break;
            }

            let value_start = key_end + KEY_END.len();
            if value_start >= raw.len() {
                break;
            }
            let Some(offset) = raw[value_start..].find(VALUE_END) else {
                break;
            };
            let value_end = value_start + offset;

            metadata.insert(
                percent_decode_or_literal(&raw[start..key_end]),
                percent_decode_or_literal(&raw[value_start..value_end]),
            );
            start = value_end + VALUE_END.len();
        }

        metadata
    }

    fn insert(&mut self, key: String, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Returns the value for `key`, or `None` if it was not present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the stream title, or `""` if absent.
    #[must_use]
    pub fn stream_title(&self) -> &str {
        self.get(STREAM_TITLE_KEY).unwrap_or("")
    }

    /// Splits the stream title into `(artist, title)`.
    ///
    /// Stations conventionally send `"Artist - Title"`. Without a separator
    /// the whole text is the title. Both parts are trimmed; empty parts
    /// become `None`.
    #[must_use]
    pub fn artist_and_title(&self) -> (Option<&str>, Option<&str>) {
        let full = self.stream_title().trim();
        if full.is_empty() {
            return (None, None);
        }

        match full.split_once(" - ") {
            Some((artist, title)) => (non_empty(artist), non_empty(title)),
            None => (None, Some(full)),
        }
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(key, value)` pairs in the order they were first seen.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}
