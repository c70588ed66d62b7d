//! Text rules for free-text fields: checkbox codes, fault shares, lists and
//! driver statements.
//!
//! Every rule here scans only the text it is given and ignores surrounding
//! prose, so model chatter around a value does not change the result.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Marker opening driver A's statement.
pub const DRIVER_A_MARKER: &str = "Driver A:";
/// Marker opening driver B's statement.
pub const DRIVER_B_MARKER: &str = "Driver B:";

/// Phrase → code pairs for the accident-circumstance section of the form.
const DEFAULT_ENTRIES: &[(&str, u32)] = &[
    ("park halinde", 1),
    ("park yerinden çıkarken", 2),
    ("park ederken", 3),
    ("geri manevra", 4),
    ("geri giderken", 4),
    ("arkadan çarpma", 5),
    ("şerit değiştirirken", 6),
    ("karşı şeride geçme", 7),
    ("sağa dönerken", 8),
    ("sola dönerken", 9),
    ("geçiş önceliği ihlali", 10),
    ("kırmızı ışık ihlali", 11),
    ("red light violation", 11),
    ("hatalı sollama", 12),
    ("aşırı hız", 13),
    ("hız ihlali", 13),
    ("takip mesafesi", 14),
    ("dönel kavşak", 15),
    ("yaya geçidi", 16),
    ("u dönüşü", 17),
];

/// Dictionary mapping traffic-violation phrases to checkbox codes.
///
/// Built once at startup and shared read-only by every run.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    /// (folded phrase, code), in dictionary order.
    entries: Vec<(String, u32)>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::from_entries(DEFAULT_ENTRIES.iter().map(|(p, c)| (*p, *c)))
    }
}

impl Vocabulary {
    /// Build a vocabulary from phrase/code pairs. Blank phrases are ignored.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|(phrase, code)| (fold(phrase.as_ref().trim()), code))
            .filter(|(phrase, _)| !phrase.is_empty())
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Codes whose phrase occurs in `text`, ordered by first occurrence.
    pub fn codes_for(&self, text: &str) -> Vec<u32> {
        let haystack = fold(text);
        let mut hits: Vec<(usize, u32)> = self
            .entries
            .iter()
            .filter_map(|(phrase, code)| haystack.find(phrase.as_str()).map(|pos| (pos, *code)))
            .collect();
        hits.sort_by_key(|(pos, _)| *pos);

        let mut codes = Vec::new();
        for (_, code) in hits {
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
        codes
    }
}

/// Case-fold for matching. Dotted and dotless `i` compare equal so that
/// `KIRMIZI` and `kırmızı` match.
fn fold(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| *c != '\u{0307}')
        .map(|c| if c == 'ı' { 'i' } else { c })
        .collect()
}

/// Integers in `text`, in order of appearance. Values that overflow `u32`
/// are skipped.
fn integers(text: &str) -> Vec<u32> {
    RE_INTEGER
        .find_iter(text)
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// Checkbox codes from a form-section field.
///
/// Digits win: if the text holds any integer, those integers (deduplicated,
/// in order) are the answer and the vocabulary is not consulted.
pub fn extract_codes(text: &str, vocabulary: &Vocabulary) -> Vec<u32> {
    let numbers = integers(text);
    if numbers.is_empty() {
        return vocabulary.codes_for(text);
    }
    let mut codes = Vec::with_capacity(numbers.len());
    for n in numbers {
        if !codes.contains(&n) {
            codes.push(n);
        }
    }
    codes
}

/// Fault shares for party A and party B.
///
/// The first two integers in the sentence, in order. Fewer than two, or a
/// value above 100, leaves both unset.
pub fn fault_percentages(text: &str) -> (Option<u8>, Option<u8>) {
    let numbers = integers(text);
    match numbers.as_slice() {
        [a, b, ..] if *a <= 100 && *b <= 100 => (Some(*a as u8), Some(*b as u8)),
        _ => (None, None),
    }
}

/// Comma-separated text → trimmed, non-empty segments in order.
pub fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a statements field into one entry per driver.
///
/// With both markers present the text is cut at whichever marker comes
/// second; each part keeps its label. Otherwise non-empty text is one
/// unlabeled statement.
pub fn driver_statements(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if let (Some(a), Some(b)) = (text.find(DRIVER_A_MARKER), text.find(DRIVER_B_MARKER)) {
        let cut = a.max(b);
        let (first, second) = text.split_at(cut);
        return [first, second]
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    vec![text.to_string()]
}
