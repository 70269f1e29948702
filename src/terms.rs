use std::collections::BTreeSet;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::error::{Result, WarehouseError};

/// Domain vocabulary matched case-insensitively as substrings
pub const PRODUCT_TERMS: &[&str] = &[
    // Medicines
    "paracetamol",
    "aspirin",
    "ibuprofen",
    "amoxicillin",
    "vitamin",
    "antibiotic",
    "painkiller",
    "antacid",
    "syrup",
    "tablet",
    "capsule",
    "ointment",
    "cream",
    "lotion",
    "drops",
    "injection",
    // Supplies
    "mask",
    "gloves",
    "thermometer",
    "bandage",
    "gauze",
    "syringe",
    "cotton",
    "alcohol",
    "sanitizer",
    "disinfectant",
    // Amharic
    "ቫይታሚን",
    "መድሃኒት",
    "ፓራሲታሞል",
    "አስፕሪን",
];

/// Capitalized tokens must be longer than this to count
const MIN_CAPITALIZED_LEN: usize = 3;

/// Extracts product terms from message text
pub struct TermExtractor {
    vocabulary: Vec<String>,
    capitalized_regex: Regex,
}

impl TermExtractor {
    /// Create an extractor over the built-in vocabulary
    pub fn new() -> Result<Self> {
        Self::with_vocabulary(PRODUCT_TERMS.iter().copied())
    }

    /// Create an extractor over a custom vocabulary
    pub fn with_vocabulary<'a>(terms: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let capitalized_regex = Regex::new(r"\b[A-Z][a-z]+\b")
            .map_err(|e| WarehouseError::InvalidConfig(format!("Failed to compile token regex: {e}")))?;
        let vocabulary = terms
            .into_iter()
            .map(|t| t.nfc().collect::<String>().to_lowercase())
            .collect();

        Ok(Self {
            vocabulary,
            capitalized_regex,
        })
    }

    /// Distinct terms found in one message.
    ///
    /// Vocabulary hits and capitalized tokens longer than three letters are
    /// unioned, lowercased, so each term counts at most once per message.
    #[must_use]
    pub fn terms_in(&self, text: &str) -> BTreeSet<String> {
        let normalized: String = text.nfc().collect();
        let lowered = normalized.to_lowercase();

        let mut found: BTreeSet<String> = self
            .vocabulary
            .iter()
            .filter(|term| lowered.contains(term.as_str()))
            .cloned()
            .collect();

        found.extend(
            self.capitalized_regex
                .find_iter(&normalized)
                .map(|m| m.as_str())
                .filter(|w| w.chars().count() > MIN_CAPITALIZED_LEN)
                .map(str::to_lowercase),
        );

        found
    }
}
