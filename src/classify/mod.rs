//! Deterministic keyword classifier for call transcripts.
//!
//! Rules are evaluated in a fixed order and the first match wins; the
//! ordering is part of the contract so regression tests stay stable. Every
//! non-normal category flags the record.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallCategory {
    Unknown,
    Normal,
    News,
    Sports,
    Automated,
    Inappropriate,
}

impl CallCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallCategory::Unknown => "unknown",
            CallCategory::Normal => "normal",
            CallCategory::News => "news",
            CallCategory::Sports => "sports",
            CallCategory::Automated => "automated",
            CallCategory::Inappropriate => "inappropriate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: CallCategory,
    pub confidence: f32,
    pub flagged: bool,
}

struct Rule {
    category: CallCategory,
    confidence: f32,
    keywords: &'static [&'static str],
}

/// Ordered rule list: news, then sports, then automated menus, then
/// inappropriate/billing content. Keyword sets cover English and Hebrew.
const RULES: [Rule; 4] = [
    Rule {
        category: CallCategory::News,
        confidence: 0.87,
        keywords: &["news", "report", "headlines", "חדשות", "מנוי", "עיתון"],
    },
    Rule {
        category: CallCategory::Sports,
        confidence: 0.92,
        keywords: &["sports", "game", "score", "ספורט", "משחק", "שער"],
    },
    Rule {
        category: CallCategory::Automated,
        confidence: 0.95,
        keywords: &["press 1", "automated", "menu", "הקש", "אוטומטי", "מערכת"],
    },
    Rule {
        category: CallCategory::Inappropriate,
        confidence: 0.89,
        keywords: &["adult", "premium", "charge", "פרימיום", "חיוב", "תשלום"],
    },
];

const NORMAL_CONFIDENCE: f32 = 0.78;

/// Maps transcript text to a category. Pure: identical input always yields
/// identical output.
pub fn classify(text: &str) -> Classification {
    let lowered = text.to_lowercase();
    for rule in &RULES {
        if rule
            .keywords
            .iter()
            .any(|keyword| lowered.contains(keyword))
        {
            return Classification {
                category: rule.category,
                confidence: rule.confidence,
                flagged: true,
            };
        }
    }

    Classification {
        category: CallCategory::Normal,
        confidence: NORMAL_CONFIDENCE,
        flagged: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_each_category_in_english() {
        assert_eq!(
            classify("calling about your subscription to our news service").category,
            CallCategory::News
        );
        assert_eq!(
            classify("did you see that last-minute goal? the game was wild").category,
            CallCategory::Sports
        );
        assert_eq!(
            classify("Press 1 for sales, press 2 for support").category,
            CallCategory::Automated
        );
        assert_eq!(
            classify("our premium content service has a monthly charge").category,
            CallCategory::Inappropriate
        );
    }

    #[test]
    fn matches_each_category_in_hebrew() {
        assert_eq!(
            classify("אני מתקשר בנוגע למנוי שלך לשירות החדשות").category,
            CallCategory::News
        );
        assert_eq!(
            classify("המשחק אתמול היה מדהים! ראית את השער?").category,
            CallCategory::Sports
        );
        assert_eq!(
            classify("הקש 1 למכירות, הקש 2 לתמיכה").category,
            CallCategory::Automated
        );
        assert_eq!(
            classify("שירות פרימיום עם חיוב חודשי").category,
            CallCategory::Inappropriate
        );
    }

    #[test]
    fn unmatched_text_is_normal_and_unflagged() {
        let result = classify("this is a routine follow-up call to confirm your appointment");
        assert_eq!(result.category, CallCategory::Normal);
        assert!(!result.flagged);
    }

    #[test]
    fn every_non_normal_category_is_flagged() {
        for text in [
            "breaking news headlines",
            "final score tonight",
            "automated menu",
            "premium charge",
        ] {
            assert!(classify(text).flagged, "expected {text:?} to flag");
        }
    }

    #[test]
    fn rule_order_breaks_ties() {
        // Contains both a news and a sports keyword; news is evaluated first.
        let result = classify("the news covered the game extensively");
        assert_eq!(result.category, CallCategory::News);

        // Sports keyword beats the later automated rule.
        let result = classify("the game menu was confusing");
        assert_eq!(result.category, CallCategory::Sports);
    }

    #[test]
    fn classification_is_deterministic() {
        let text = "Thank you for calling our automated system.";
        let first = classify(text);
        for _ in 0..10 {
            assert_eq!(classify(text), first);
        }
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(classify("BREAKING NEWS").category, CallCategory::News);
    }
}
