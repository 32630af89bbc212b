use super::find::{FindChoicesOptions, find_choices};
use super::{Choice, FoundChoice, ModelResult};
use crate::prompts::culture::ENGLISH_CULTURE;
use crate::recognizers::{TextMatch, recognize_numbers, recognize_ordinals};

pub fn recognize_choices_from_strings<S: AsRef<str>>(
    utterance: &str,
    choices: &[S],
    options: Option<&FindChoicesOptions>,
) -> Vec<ModelResult<FoundChoice>> {
    let choices: Vec<Choice> = choices.iter().map(|c| Choice::new(c.as_ref())).collect();
    recognize_choices(utterance, &choices, options)
}

/// Fuzzy-matches `utterance` against `choices`, falling back to ordinals
/// ("the second one") and then plain numbers ("2") as 1-based indexes.
pub fn recognize_choices(
    utterance: &str,
    choices: &[Choice],
    options: Option<&FindChoicesOptions>,
) -> Vec<ModelResult<FoundChoice>> {
    let mut matched = find_choices(utterance, choices, options);
    if !matched.is_empty() {
        return matched;
    }

    let locale = options
        .and_then(|o| o.values.locale.as_deref())
        .unwrap_or(ENGLISH_CULTURE);
    let recognize_ordinals_enabled = options.is_none_or(|o| o.recognize_ordinals);
    let recognize_numbers_enabled = options.is_none_or(|o| o.recognize_numbers);

    let mut found = Vec::new();
    if recognize_ordinals_enabled {
        found = recognize_ordinals(utterance, locale);
    }
    if found.is_empty() && recognize_numbers_enabled {
        found = recognize_numbers(utterance, locale);
    }
    matched.extend(found.iter().filter_map(|m| match_choice_by_index(choices, m)));
    matched.sort_by_key(|m| m.start);
    matched
}

fn match_choice_by_index(choices: &[Choice], found: &TextMatch) -> Option<ModelResult<FoundChoice>> {
    let value = found.value.replace("end", &choices.len().to_string());
    let position: usize = value.parse().ok()?;
    let index = position.checked_sub(1)?;
    let choice = choices.get(index)?;
    Some(ModelResult {
        start: found.start,
        end: found.end,
        type_name: "choice".into(),
        text: found.text.clone(),
        resolution: FoundChoice {
            value: choice.value.clone(),
            index,
            score: 1.0,
            synonym: None,
        },
    })
}
