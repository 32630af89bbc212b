//! Lightweight number, ordinal and yes/no recognition used by the
//! built-in prompts.

use once_cell::sync::Lazy;
use regex::{Match, Regex};

use crate::prompts::culture::PromptCultureModels;

/// One recognized span. `start`/`end` are inclusive character offsets and
/// `value` is the normalized resolution (`"end"` stands for "last").
#[derive(Debug, Clone, PartialEq)]
pub struct TextMatch {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub value: String,
}

impl TextMatch {
    fn from_match(utterance: &str, found: Match<'_>, value: String) -> Self {
        let start = utterance[..found.start()].chars().count();
        let length = found.as_str().chars().count();
        Self {
            start,
            end: start + length.saturating_sub(1),
            text: found.as_str().to_string(),
            value,
        }
    }
}

const UNITS: &[&str] = &[
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen",
];
const TENS: &[&str] = &[
    "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];
const ORDINALS: &[&str] = &[
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth",
];

static DOT_DECIMAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-?\d{1,3}(?:,\d{3})+(?:\.\d+)?|-?\d+(?:\.\d+)?")
        .expect("number pattern must compile")
});
static COMMA_DECIMAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-?\d{1,3}(?:\.\d{3})+(?:,\d+)?|-?\d+(?:,\d+)?")
        .expect("number pattern must compile")
});
static NUMBER_WORDS: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(
        r"(?i)\b(?:({tens})(?:[\s-]({ones}))?|({units}|dozen))\b",
        tens = TENS.join("|"),
        ones = UNITS[1..10].join("|"),
        units = UNITS.join("|"),
    );
    Regex::new(&pattern).expect("number word pattern must compile")
});
static ORDINAL_WORDS: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(r"(?i)\b({}|last)\b", ORDINALS.join("|"));
    Regex::new(&pattern).expect("ordinal pattern must compile")
});
static ORDINAL_DIGITS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+)(?:st|nd|rd|th)\b").expect("ordinal pattern must compile")
});
static YES_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:yes|yeah|yep|yup|yea|sure|ok|okay|y|true|correct|of course|absolutely)\b")
        .expect("boolean pattern must compile")
});
static NO_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:no|nope|nah|n|false|not|never|negative)\b")
        .expect("boolean pattern must compile")
});

fn uses_comma_decimal(culture: &str) -> bool {
    !matches!(
        culture.split('-').next().unwrap_or_default(),
        "en" | "zh" | "ja" | "ko" | "hi"
    )
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn word_value(word: &str) -> Option<u32> {
    let word = word.to_lowercase();
    if word == "dozen" {
        return Some(12);
    }
    if let Some(index) = UNITS.iter().position(|unit| *unit == word) {
        return u32::try_from(index).ok();
    }
    TENS.iter()
        .position(|ten| *ten == word)
        .and_then(|index| u32::try_from(index).ok())
        .map(|index| (index + 2) * 10)
}

/// Cardinal numbers written as digits (culture-aware separators) or as
/// English words up to ninety-nine.
pub fn recognize_numbers(utterance: &str, culture: &str) -> Vec<TextMatch> {
    let comma_decimal = uses_comma_decimal(culture);
    let digits = if comma_decimal {
        &*COMMA_DECIMAL
    } else {
        &*DOT_DECIMAL
    };

    let mut found: Vec<TextMatch> = digits
        .find_iter(utterance)
        .filter_map(|m| {
            let normalized = if comma_decimal {
                m.as_str().replace('.', "").replace(',', ".")
            } else {
                m.as_str().replace(',', "")
            };
            let value: f64 = normalized.parse().ok()?;
            Some(TextMatch::from_match(utterance, m, format_number(value)))
        })
        .collect();

    for captures in NUMBER_WORDS.captures_iter(utterance) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let value = match (captures.get(1), captures.get(2), captures.get(3)) {
            (Some(tens), unit, _) => {
                word_value(tens.as_str()).unwrap_or(0)
                    + unit.and_then(|u| word_value(u.as_str())).unwrap_or(0)
            }
            (None, _, Some(unit)) => match word_value(unit.as_str()) {
                Some(value) => value,
                None => continue,
            },
            _ => continue,
        };
        found.push(TextMatch::from_match(utterance, whole, value.to_string()));
    }
    found.sort_by_key(|m| m.start);
    found
}

/// Ordinals such as "second", "3rd" or "last".
pub fn recognize_ordinals(utterance: &str, _culture: &str) -> Vec<TextMatch> {
    let mut found: Vec<TextMatch> = ORDINAL_WORDS
        .find_iter(utterance)
        .map(|m| {
            let word = m.as_str().to_lowercase();
            let value = match ORDINALS.iter().position(|ordinal| *ordinal == word) {
                Some(index) => (index + 1).to_string(),
                None => "end".to_string(),
            };
            TextMatch::from_match(utterance, m, value)
        })
        .collect();
    found.extend(ORDINAL_DIGITS.captures_iter(utterance).filter_map(|captures| {
        let whole = captures.get(0)?;
        let digits = captures.get(1)?;
        Some(TextMatch::from_match(
            utterance,
            whole,
            digits.as_str().to_string(),
        ))
    }));
    found.sort_by_key(|m| m.start);
    found
}

fn culture_word(word: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word))).ok()
}

/// Earliest yes/no expression in `utterance`, using English synonyms plus
/// the culture's own words for yes and no.
pub fn recognize_boolean(utterance: &str, culture: &str) -> Option<TextMatch> {
    let model = PromptCultureModels::get(culture);
    let mut candidates: Vec<(Match<'_>, bool)> = Vec::new();
    candidates.extend(YES_WORDS.find(utterance).map(|m| (m, true)));
    candidates.extend(NO_WORDS.find(utterance).map(|m| (m, false)));
    if let Some(model) = model {
        if let Some(found) = culture_word(model.yes_in_language).and_then(|re| re.find(utterance)) {
            candidates.push((found, true));
        }
        if let Some(found) = culture_word(model.no_in_language).and_then(|re| re.find(utterance)) {
            candidates.push((found, false));
        }
    }
    candidates
        .into_iter()
        .min_by_key(|(m, _)| m.start())
        .map(|(m, value)| TextMatch::from_match(utterance, m, value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(found: &[TextMatch]) -> Vec<&str> {
        found.iter().map(|m| m.value.as_str()).collect()
    }

    #[test]
    fn numbers_from_digits_and_words() {
        let found = recognize_numbers("I'd like 2 pizzas and twenty-one wings", "en-us");
        assert_eq!(values(&found), ["2", "21"]);
        assert_eq!((found[1].start, found[1].end), (22, 31));
        assert_eq!(values(&recognize_numbers("about 1,250.5 km", "en-us")), ["1250.5"]);
    }

    #[test]
    fn comma_decimal_cultures() {
        assert_eq!(values(&recognize_numbers("3,5", "de-de")), ["3.5"]);
        assert_eq!(values(&recognize_numbers("1.000", "fr-fr")), ["1000"]);
    }

    #[test]
    fn ordinals_map_last_to_end() {
        assert_eq!(values(&recognize_ordinals("the second one", "en-us")), ["2"]);
        assert_eq!(values(&recognize_ordinals("the last", "en-us")), ["end"]);
        assert_eq!(values(&recognize_ordinals("3rd please", "en-us")), ["3"]);
    }

    #[test]
    fn booleans_in_english_and_culture_words() {
        assert_eq!(recognize_boolean("yes please", "en-us").unwrap().value, "true");
        assert_eq!(recognize_boolean("nope", "en-us").unwrap().value, "false");
        assert_eq!(recognize_boolean("Nein danke", "de-de").unwrap().value, "false");
        assert_eq!(recognize_boolean("oui", "fr-fr").unwrap().value, "true");
        assert!(recognize_boolean("maybe later", "en-us").is_none());
    }
}
