//! Dotted-path access into JSON values.
//!
//! Paths look like `user.profile.name`, `turn.items[0]` or
//! `dialog['first name']`. Object keys match exactly first and then
//! case-insensitively.

use serde_json::{Map, Value};

use crate::error::DialogError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Splits `path` into segments.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, DialogError> {
    let invalid = || DialogError::InvalidPath(path.to_string());
    let mut segments = Vec::new();
    let mut chars = path.trim().chars().peekable();
    let mut current = String::new();
    let mut after_bracket = false;

    while let Some(ch) = chars.next() {
        match ch {
            '.' => {
                if current.is_empty() && !after_bracket {
                    return Err(invalid());
                }
                if !current.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current)));
                }
                after_bracket = false;
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current)));
                }
                let mut inner = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(next);
                }
                if !closed {
                    return Err(invalid());
                }
                let inner = inner.trim();
                let quoted = inner
                    .strip_prefix('\'')
                    .and_then(|rest| rest.strip_suffix('\''))
                    .or_else(|| inner.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')));
                match quoted {
                    Some(key) => segments.push(PathSegment::Key(key.to_string())),
                    None => {
                        let index = inner.parse::<usize>().map_err(|_| invalid())?;
                        segments.push(PathSegment::Index(index));
                    }
                }
                if chars.peek().is_some_and(|next| *next != '.' && *next != '[') {
                    return Err(invalid());
                }
                after_bracket = true;
            }
            ']' => return Err(invalid()),
            _ => {
                current.push(ch);
                after_bracket = false;
            }
        }
    }
    if !current.is_empty() {
        segments.push(PathSegment::Key(current));
    } else if path.trim().ends_with('.') {
        return Err(invalid());
    }
    Ok(segments)
}

fn find_key<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    if map.contains_key(key) {
        return map.get_key_value(key).map(|(found, _)| found.as_str());
    }
    map.keys()
        .find(|candidate| candidate.eq_ignore_ascii_case(key))
        .map(String::as_str)
}

fn step<'a>(value: &'a Value, segment: &PathSegment) -> Option<&'a Value> {
    match (value, segment) {
        (Value::Object(map), PathSegment::Key(key)) => find_key(map, key).and_then(|key| map.get(key)),
        (Value::Array(items), PathSegment::Index(index)) => items.get(*index),
        _ => None,
    }
}

fn step_mut<'a>(value: &'a mut Value, segment: &PathSegment) -> Option<&'a mut Value> {
    match (value, segment) {
        (Value::Object(map), PathSegment::Key(key)) => {
            let key = find_key(map, key)?.to_string();
            map.get_mut(&key)
        }
        (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index),
        _ => None,
    }
}

/// Value at `path`, or `None` when any segment is missing.
pub fn get_path_value<'a>(root: &'a Value, path: &str) -> Result<Option<&'a Value>, DialogError> {
    let segments = parse_path(path)?;
    Ok(segments
        .iter()
        .try_fold(root, |value, segment| step(value, segment)))
}

/// Writes `value` at `path`, creating intermediate objects and padding
/// arrays with nulls as needed.
pub fn set_path_value(root: &mut Value, path: &str, value: Value) -> Result<(), DialogError> {
    let segments = parse_path(path)?;
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut current = root;
    for (position, segment) in parents.iter().enumerate() {
        let next_is_index = matches!(segments.get(position + 1), Some(PathSegment::Index(_)));
        current = child_or_insert(current, segment, next_is_index, path)?;
    }

    match last {
        PathSegment::Key(key) => {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            if let Value::Object(map) = current {
                let key = find_key(map, key).unwrap_or(key).to_string();
                map.insert(key, value);
            }
        }
        PathSegment::Index(index) => {
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            if let Value::Array(items) = current {
                if items.len() <= *index {
                    items.resize(index + 1, Value::Null);
                }
                items[*index] = value;
            }
        }
    }
    Ok(())
}

fn child_or_insert<'a>(
    current: &'a mut Value,
    segment: &PathSegment,
    next_is_index: bool,
    path: &str,
) -> Result<&'a mut Value, DialogError> {
    let empty = || {
        if next_is_index {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        }
    };
    match segment {
        PathSegment::Key(key) => {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            let Value::Object(map) = current else {
                return Err(DialogError::InvalidPath(path.to_string()));
            };
            let key = find_key(map, key).unwrap_or(key).to_string();
            let child = map.entry(key).or_insert_with(empty);
            if child.is_null() {
                *child = empty();
            }
            Ok(child)
        }
        PathSegment::Index(index) => {
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            let Value::Array(items) = current else {
                return Err(DialogError::InvalidPath(path.to_string()));
            };
            if items.len() <= *index {
                items.resize(index + 1, Value::Null);
            }
            let child = &mut items[*index];
            if child.is_null() {
                *child = empty();
            }
            Ok(child)
        }
    }
}

/// Removes the value at `path`. Returns whether something was removed.
pub fn remove_path_value(root: &mut Value, path: &str) -> Result<bool, DialogError> {
    let segments = parse_path(path)?;
    let Some((last, parents)) = segments.split_last() else {
        return Ok(false);
    };
    let mut current = root;
    for segment in parents {
        match step_mut(current, segment) {
            Some(next) => current = next,
            None => return Ok(false),
        }
    }
    Ok(match (current, last) {
        (Value::Object(map), PathSegment::Key(key)) => match find_key(map, key).map(str::to_string) {
            Some(key) => map.remove(&key).is_some(),
            None => false,
        },
        (Value::Array(items), PathSegment::Index(index)) if *index < items.len() => {
            items.remove(*index);
            true
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_dots_indexes_and_quoted_keys() {
        assert_eq!(
            parse_path("a.b[2]['c d'].e").unwrap(),
            vec![
                PathSegment::Key("a".into()),
                PathSegment::Key("b".into()),
                PathSegment::Index(2),
                PathSegment::Key("c d".into()),
                PathSegment::Key("e".into()),
            ]
        );
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a[1").is_err());
        assert!(parse_path("a[x]").is_err());
        assert!(parse_path("a.").is_err());
    }

    #[test]
    fn get_falls_back_to_case_insensitive_keys() {
        let root = json!({"User": {"Name": "Ann", "tags": ["x", "y"]}});
        assert_eq!(get_path_value(&root, "user.name").unwrap(), Some(&json!("Ann")));
        assert_eq!(get_path_value(&root, "User.tags[1]").unwrap(), Some(&json!("y")));
        assert_eq!(get_path_value(&root, "User.missing").unwrap(), None);
    }

    #[test]
    fn set_creates_intermediate_containers() {
        let mut root = json!({});
        set_path_value(&mut root, "a.b[1].c", json!(5)).unwrap();
        assert_eq!(root, json!({"a": {"b": [null, {"c": 5}]}}));

        set_path_value(&mut root, "A.x", json!(true)).unwrap();
        assert_eq!(root["a"]["x"], json!(true));
    }

    #[test]
    fn remove_reports_whether_anything_went() {
        let mut root = json!({"a": {"b": 1, "list": [1, 2]}});
        assert!(remove_path_value(&mut root, "a.B").unwrap());
        assert!(remove_path_value(&mut root, "a.list[0]").unwrap());
        assert!(!remove_path_value(&mut root, "a.nothing.here").unwrap());
        assert_eq!(root, json!({"a": {"list": [2]}}));
    }
}
