use serde::{Deserialize, Serialize};

/// A run of non-breaking characters. `start` and `end` are inclusive
/// character offsets into the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub normalized: String,
}

/// Signature shared by [`default_tokenizer`] and custom tokenizers.
pub type TokenizerFn = fn(&str, Option<&str>) -> Vec<Token>;

const BREAKING_RANGES: &[(u32, u32)] = &[
    (0x0000, 0x002F),
    (0x003A, 0x0040),
    (0x005B, 0x0060),
    (0x007B, 0x00BF),
    (0x02B9, 0x036F),
    (0x2000, 0x2BFF),
    (0x2E00, 0x2E7F),
];

fn is_breaking_char(code_point: u32) -> bool {
    BREAKING_RANGES
        .iter()
        .any(|&(low, high)| (low..=high).contains(&code_point))
}

struct Pending {
    start: usize,
    text: String,
}

fn flush(tokens: &mut Vec<Token>, pending: Option<Pending>, end: usize) {
    if let Some(Pending { start, text }) = pending {
        tokens.push(Token {
            start,
            end,
            normalized: text.to_lowercase(),
            text,
        });
    }
}

/// Splits on punctuation, whitespace and symbol blocks. Characters outside
/// the basic multilingual plane (emoji) become single-character tokens.
pub fn default_tokenizer(text: &str, _locale: Option<&str>) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut pending: Option<Pending> = None;
    let mut length = 0;

    for (index, ch) in text.chars().enumerate() {
        length = index + 1;
        let code_point = u32::from(ch);
        if is_breaking_char(code_point) {
            flush(&mut tokens, pending.take(), index.saturating_sub(1));
        } else if code_point > 0xFFFF {
            flush(&mut tokens, pending.take(), index.saturating_sub(1));
            tokens.push(Token {
                start: index,
                end: index,
                text: ch.to_string(),
                normalized: ch.to_string(),
            });
        } else if let Some(current) = pending.as_mut() {
            current.text.push(ch);
        } else {
            pending = Some(Pending {
                start: index,
                text: ch.to_string(),
            });
        }
    }
    flush(&mut tokens, pending, length.saturating_sub(1));
    tokens
}
