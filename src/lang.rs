//! Language identification for the input prompt.
//!
//! Wraps a [`lingua`] detector restricted to the languages it can actually
//! report, mapped to lowercase ISO 639-1 codes.  The pipeline only accepts
//! `zh` and `en`; everything else is rejected with the detected code so the
//! caller sees *what* was detected, not just that it failed.

use lingua::{Language, LanguageDetector, LanguageDetectorBuilder};
use once_cell::sync::Lazy;

/// Languages the pipeline has base-speaker checkpoints for.
pub const SUPPORTED_LANGUAGES: [&str; 2] = ["zh", "en"];

/// Code reported when the detector cannot classify the text at all
/// (e.g. an empty string or pure punctuation).
pub const UNKNOWN_CODE: &str = "unknown";

/// A language the pipeline can synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    Zh,
    En,
}

impl Lang {
    /// ISO 639-1 code, as used in error messages and checkpoint paths.
    pub fn code(self) -> &'static str {
        match self {
            Lang::Zh => "zh",
            Lang::En => "en",
        }
    }

    /// Human-readable name, matching the `language` field of the
    /// base-speaker checkpoint configs.
    pub fn name(self) -> &'static str {
        match self {
            Lang::Zh => "Chinese",
            Lang::En => "English",
        }
    }

    /// Map a detected ISO 639-1 code to a supported language.
    pub fn from_code(code: &str) -> Option<Lang> {
        match code {
            "zh" => Some(Lang::Zh),
            "en" => Some(Lang::En),
            _ => None,
        }
    }
}

// The detector is built once per process.  Restricting the language set
// keeps startup cheap while still letting near-miss languages (Japanese,
// Korean, the big European ones) be reported by name instead of being
// misclassified as zh/en.
static DETECTOR: Lazy<LanguageDetector> = Lazy::new(|| {
    LanguageDetectorBuilder::from_languages(&[
        Language::Chinese,
        Language::English,
        Language::Japanese,
        Language::Korean,
        Language::Spanish,
        Language::French,
        Language::German,
        Language::Russian,
    ])
    .with_preloaded_language_models()
    .build()
});

/// Best-guess ISO 639-1 code for `text`, or [`UNKNOWN_CODE`] when the
/// detector has no opinion.
pub fn classify(text: &str) -> String {
    match DETECTOR.detect_language_of(text) {
        Some(language) => language.iso_code_639_1().to_string().to_lowercase(),
        None => UNKNOWN_CODE.to_string(),
    }
}
