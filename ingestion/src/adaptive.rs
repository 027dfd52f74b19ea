use regex::Regex;
use std::sync::OnceLock;

/// Document classes with tuned chunking windows. Values are in tokens and
/// convert at the global chars-per-token ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentProfile {
    TechnicalManual,
    Faq,
    Legal,
    Product,
    Email,
    Financial,
    MeetingNotes,
    Generic,
}

impl DocumentProfile {
    /// `(chunk_tokens, overlap_tokens)`; `None` keeps the configured
    /// defaults (the generic class has no opinion).
    pub fn window(&self) -> Option<(usize, usize)> {
        match self {
            DocumentProfile::TechnicalManual => Some((1200, 300)),
            DocumentProfile::Faq => Some((600, 100)),
            DocumentProfile::Legal => Some((1500, 400)),
            DocumentProfile::Product => Some((800, 200)),
            DocumentProfile::Email => Some((700, 150)),
            DocumentProfile::Financial => Some((1000, 250)),
            DocumentProfile::MeetingNotes => Some((900, 200)),
            DocumentProfile::Generic => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DocumentProfile::TechnicalManual => "technical_manual",
            DocumentProfile::Faq => "faq",
            DocumentProfile::Legal => "legal",
            DocumentProfile::Product => "product",
            DocumentProfile::Email => "email",
            DocumentProfile::Financial => "financial",
            DocumentProfile::MeetingNotes => "meeting_notes",
            DocumentProfile::Generic => "generic",
        }
    }
}

struct ProfileSignals {
    profile: DocumentProfile,
    keywords: &'static [&'static str],
    patterns: &'static [&'static str],
}

const SIGNALS: &[ProfileSignals] = &[
    ProfileSignals {
        profile: DocumentProfile::TechnicalManual,
        keywords: &["manual", "guide", "instruction", "procedure", "step", "configure", "install", "setup"],
        patterns: &[r"(?mi)^(step\s+\d+|chapter\s+\d+|section\s+\d+)"],
    },
    ProfileSignals {
        profile: DocumentProfile::Faq,
        keywords: &["faq", "question", "answer", "frequently", "asked"],
        patterns: &[r"(?mi)^(q|a)\s*[:.]", r"\?\s*$"],
    },
    ProfileSignals {
        profile: DocumentProfile::Legal,
        keywords: &["article", "clause", "whereas", "hereby", "agreement", "contract", "terms", "conditions", "legal"],
        patterns: &[r"(?mi)^article\s+\d+", r"(?mi)^\d+\.\d+\s"],
    },
    ProfileSignals {
        profile: DocumentProfile::Product,
        keywords: &["product", "feature", "specification", "price", "benefit", "description", "model"],
        patterns: &[],
    },
    ProfileSignals {
        profile: DocumentProfile::Email,
        keywords: &["reply", "forward", "sent", "received", "regards", "dear"],
        patterns: &[r"(?mi)^(from|to|subject|cc)\s*:"],
    },
    ProfileSignals {
        profile: DocumentProfile::Financial,
        keywords: &["revenue", "profit", "loss", "quarter", "financial", "report", "earnings", "budget"],
        patterns: &[r"(?i)q[1-4]\s+\d{4}", r"[$€£]\s?\d"],
    },
    ProfileSignals {
        profile: DocumentProfile::MeetingNotes,
        keywords: &["meeting", "agenda", "minutes", "attendees", "action", "discussed", "decisions"],
        patterns: &[r"(?mi)^action\s+items?"],
    },
];

const KEYWORD_WEIGHT: f32 = 1.0;
const PATTERN_WEIGHT: f32 = 2.0;
/// Scores below this stay generic: a stray "price" must not retune chunking.
const MIN_CONFIDENCE: f32 = 3.0;

fn compiled_patterns() -> &'static Vec<(DocumentProfile, Vec<Regex>)> {
    static PATTERNS: OnceLock<Vec<(DocumentProfile, Vec<Regex>)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        SIGNALS
            .iter()
            .map(|s| {
                let regexes = s
                    .patterns
                    .iter()
                    .filter_map(|p| Regex::new(p).ok())
                    .collect();
                (s.profile, regexes)
            })
            .collect()
    })
}

/// Classify a whole document by weighted keyword and pattern hits.
/// Ties and weak signals fall back to [`DocumentProfile::Generic`].
pub fn classify(text: &str) -> DocumentProfile {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut best = DocumentProfile::Generic;
    let mut best_score = 0.0_f32;

    for (signals, (_, regexes)) in SIGNALS.iter().zip(compiled_patterns()) {
        let keyword_hits: usize = signals
            .keywords
            .iter()
            .map(|k| words.iter().filter(|w| *w == k).count())
            .sum();
        let pattern_hits: usize = regexes.iter().map(|r| r.find_iter(text).count()).sum();

        let score = keyword_hits as f32 * KEYWORD_WEIGHT + pattern_hits as f32 * PATTERN_WEIGHT;
        if score > best_score {
            best_score = score;
            best = signals.profile;
        }
    }

    if best_score < MIN_CONFIDENCE {
        return DocumentProfile::Generic;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_text_classifies_as_legal() {
        let text = "Article 1. This agreement is entered into hereby.\n\
                    Article 2. Whereas the contract terms and conditions apply.\n\
                    Article 3. Each clause binds both parties.";
        assert_eq!(classify(text), DocumentProfile::Legal);
    }

    #[test]
    fn faq_text_classifies_as_faq() {
        let text = "Frequently asked questions\n\
                    Q: How do I reset my password?\n\
                    A: Use the reset link.\n\
                    Q: Where is my invoice?\n\
                    A: Under billing.";
        assert_eq!(classify(text), DocumentProfile::Faq);
    }

    #[test]
    fn plain_prose_stays_generic() {
        let text = "The weather was mild and the harvest came early that year.";
        assert_eq!(classify(text), DocumentProfile::Generic);
    }

    #[test]
    fn single_stray_keyword_is_not_enough() {
        let text = "The price of apples went up.";
        assert_eq!(classify(text), DocumentProfile::Generic);
    }

    #[test]
    fn every_profile_window_is_sane() {
        for profile in [
            DocumentProfile::TechnicalManual,
            DocumentProfile::Faq,
            DocumentProfile::Legal,
            DocumentProfile::Product,
            DocumentProfile::Email,
            DocumentProfile::Financial,
            DocumentProfile::MeetingNotes,
        ] {
            let (size, overlap) = profile.window().unwrap();
            assert!(overlap < size);
        }
    }
}
