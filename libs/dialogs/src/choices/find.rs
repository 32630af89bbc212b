use std::collections::HashSet;

use super::tokenizer::{Token, TokenizerFn, default_tokenizer};
use super::{Choice, FoundChoice, FoundValue, ModelResult};

#[derive(Debug, Clone)]
pub struct FindValuesOptions {
    /// Accept values where only some of the tokens were found.
    pub allow_partial_matches: bool,
    pub locale: Option<String>,
    /// Maximum number of unmatched tokens allowed between two matched ones.
    pub max_token_distance: usize,
    pub tokenizer: Option<TokenizerFn>,
}

impl Default for FindValuesOptions {
    fn default() -> Self {
        Self {
            allow_partial_matches: false,
            locale: None,
            max_token_distance: 2,
            tokenizer: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FindChoicesOptions {
    pub values: FindValuesOptions,
    /// Skip matching against each choice's value.
    pub no_value: bool,
    /// Skip matching against each choice's action title.
    pub no_action: bool,
    pub recognize_numbers: bool,
    pub recognize_ordinals: bool,
}

impl Default for FindChoicesOptions {
    fn default() -> Self {
        Self {
            values: FindValuesOptions::default(),
            no_value: false,
            no_action: false,
            recognize_numbers: true,
            recognize_ordinals: true,
        }
    }
}

/// A searchable value and the index of the choice it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedValue {
    pub value: String,
    pub index: usize,
}

impl SortedValue {
    pub fn new(value: impl Into<String>, index: usize) -> Self {
        Self {
            value: value.into(),
            index,
        }
    }
}

pub fn find_choices_from_strings<S: AsRef<str>>(
    utterance: &str,
    choices: &[S],
    options: Option<&FindChoicesOptions>,
) -> Vec<ModelResult<FoundChoice>> {
    let choices: Vec<Choice> = choices.iter().map(|c| Choice::new(c.as_ref())).collect();
    find_choices(utterance, &choices, options)
}

/// Matches `utterance` against each choice's value, action title and
/// synonyms.
pub fn find_choices(
    utterance: &str,
    choices: &[Choice],
    options: Option<&FindChoicesOptions>,
) -> Vec<ModelResult<FoundChoice>> {
    let defaults = FindChoicesOptions::default();
    let opt = options.unwrap_or(&defaults);

    let mut synonyms = Vec::new();
    for (index, choice) in choices.iter().enumerate() {
        if !opt.no_value {
            synonyms.push(SortedValue::new(choice.value.clone(), index));
        }
        if let Some(title) = choice.action.as_ref().and_then(|a| a.title.as_ref())
            && !opt.no_action
        {
            synonyms.push(SortedValue::new(title.clone(), index));
        }
        synonyms.extend(
            choice
                .synonyms
                .iter()
                .map(|synonym| SortedValue::new(synonym.clone(), index)),
        );
    }

    find_values(utterance, &synonyms, Some(&opt.values))
        .into_iter()
        .map(|found| ModelResult {
            start: found.start,
            end: found.end,
            type_name: "choice".into(),
            text: found.text,
            resolution: FoundChoice {
                value: choices[found.resolution.index].value.clone(),
                index: found.resolution.index,
                score: found.resolution.score,
                synonym: Some(found.resolution.value),
            },
        })
        .collect()
}

/// Finds each value in `utterance`. Longer values are tried first, each
/// value and each utterance token is used at most once, and results come
/// back in utterance order.
pub fn find_values(
    utterance: &str,
    values: &[SortedValue],
    options: Option<&FindValuesOptions>,
) -> Vec<ModelResult<FoundValue>> {
    let defaults = FindValuesOptions::default();
    let opt = options.unwrap_or(&defaults);
    let tokenize = opt.tokenizer.unwrap_or(default_tokenizer);
    let locale = opt.locale.as_deref();

    let mut sorted: Vec<&SortedValue> = values.iter().collect();
    sorted.sort_by(|a, b| b.value.chars().count().cmp(&a.value.chars().count()));

    let tokens = tokenize(utterance, locale);
    let mut matches = Vec::new();
    for entry in sorted {
        let searched = tokenize(entry.value.trim(), locale);
        let mut start_pos = 0;
        while start_pos < tokens.len() {
            match match_value(&tokens, opt, entry, &searched, start_pos) {
                Some(found) => {
                    start_pos = found.end + 1;
                    matches.push(found);
                }
                None => break,
            }
        }
    }

    matches.sort_by(|a, b| b.resolution.score.total_cmp(&a.resolution.score));

    let chars: Vec<char> = utterance.chars().collect();
    let mut found_indexes = HashSet::new();
    let mut used_tokens = HashSet::new();
    let mut results = Vec::new();
    for mut found in matches {
        let span = found.start..=found.end;
        if found_indexes.contains(&found.resolution.index)
            || span.clone().any(|i| used_tokens.contains(&i))
        {
            continue;
        }
        found_indexes.insert(found.resolution.index);
        used_tokens.extend(span);

        found.start = tokens[found.start].start;
        found.end = tokens[found.end].end;
        found.text = chars[found.start..=found.end].iter().collect();
        results.push(found);
    }
    results.sort_by_key(|found| found.start);
    results
}

fn index_of_token(tokens: &[Token], token: &Token, start_pos: usize) -> Option<usize> {
    tokens
        .iter()
        .enumerate()
        .skip(start_pos)
        .find(|(_, candidate)| candidate.normalized == token.normalized)
        .map(|(index, _)| index)
}

/// Token-level match of one value. Start and end in the result are token
/// indexes; the caller maps them to character offsets.
fn match_value(
    source: &[Token],
    options: &FindValuesOptions,
    entry: &SortedValue,
    searched: &[Token],
    mut start_pos: usize,
) -> Option<ModelResult<FoundValue>> {
    let mut matched = 0usize;
    let mut total_deviation = 0usize;
    let mut start = None;
    let mut end = 0;

    for token in searched {
        let Some(pos) = index_of_token(source, token, start_pos) else {
            continue;
        };
        let distance = if matched > 0 { pos - start_pos } else { 0 };
        if distance <= options.max_token_distance {
            matched += 1;
            total_deviation += distance;
            start_pos = pos + 1;
            start.get_or_insert(pos);
            end = pos;
        }
    }

    let start = start?;
    if matched == 0 || (matched != searched.len() && !options.allow_partial_matches) {
        return None;
    }
    let completeness = matched as f32 / searched.len() as f32;
    let accuracy = matched as f32 / (matched + total_deviation) as f32;
    Some(ModelResult {
        start,
        end,
        type_name: "value".into(),
        text: String::new(),
        resolution: FoundValue {
            value: entry.value.clone(),
            index: entry.index,
            score: completeness * accuracy,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colors() -> Vec<SortedValue> {
        ["red", "green", "blue"]
            .iter()
            .enumerate()
            .map(|(i, v)| SortedValue::new(*v, i))
            .collect()
    }

    #[test]
    fn finds_a_simple_value() {
        let found = find_values("the red one please", &colors(), None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].resolution.value, "red");
        assert_eq!(found[0].resolution.index, 0);
        assert_eq!((found[0].start, found[0].end), (4, 6));
        assert_eq!(found[0].text, "red");
        assert!((found[0].resolution.score - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn results_come_back_in_utterance_order() {
        let found = find_values("blue or green", &colors(), None);
        let values: Vec<_> = found.iter().map(|f| f.resolution.value.as_str()).collect();
        assert_eq!(values, ["blue", "green"]);
    }

    #[test]
    fn longer_values_claim_tokens_first() {
        let values = vec![
            SortedValue::new("option A", 0),
            SortedValue::new("option B", 1),
            SortedValue::new("option", 2),
        ];
        let found = find_values("option B", &values, None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].resolution.index, 1);
        assert_eq!(found[0].text, "option B");
    }

    #[test]
    fn gaps_lower_the_score() {
        let values = vec![SortedValue::new("large pepperoni pizza", 0)];
        let found = find_values("large thin pepperoni pizza", &values, None);
        assert_eq!(found.len(), 1);
        assert!(found[0].resolution.score < 1.0);
        assert_eq!(found[0].text, "large thin pepperoni pizza");
    }

    #[test]
    fn partial_matches_need_opting_in() {
        let values = vec![SortedValue::new("bread pudding", 0)];
        assert!(find_values("just bread", &values, None).is_empty());

        let options = FindValuesOptions {
            allow_partial_matches: true,
            ..Default::default()
        };
        let found = find_values("just bread", &values, Some(&options));
        assert_eq!(found.len(), 1);
        assert!((found[0].resolution.score - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn choices_match_synonyms_and_action_titles() {
        let choices = vec![
            Choice::new("red").with_synonyms(["crimson"]),
            Choice::new("blue").with_action(bot_schema::CardAction {
                title: Some("azure".into()),
                ..bot_schema::CardAction::im_back("blue")
            }),
        ];
        let found = find_choices("crimson and azure", &choices, None);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].resolution.value, "red");
        assert_eq!(found[0].resolution.synonym.as_deref(), Some("crimson"));
        assert_eq!(found[1].resolution.value, "blue");
        assert_eq!(found[1].type_name, "choice");
    }
}
