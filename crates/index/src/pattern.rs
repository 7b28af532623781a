use granite_value::TypedValue;

use crate::range::{EndFlag, RangePoint, SelectableRange, StartFlag};

pub const DEFAULT_ESCAPE: char = '\\';

/// SQL LIKE match: `_` consumes exactly one character, `%` any run
/// (including the empty one), and `escape` makes the following wildcard or
/// escape character literal.
pub fn like_match(pattern: &str, escape: char, value: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();
    match_at(&pattern, &value, escape)
}

fn match_at(pattern: &[char], value: &[char], escape: char) -> bool {
    let Some(&p) = pattern.first() else {
        return value.is_empty();
    };

    if p == escape {
        // An escape at the very end of the pattern matches nothing.
        let Some(&literal) = pattern.get(1) else {
            return false;
        };
        return value.first() == Some(&literal) && match_at(&pattern[2..], &value[1..], escape);
    }

    match p {
        '%' => {
            // Try every suffix, shortest first.
            (0..=value.len()).any(|skip| match_at(&pattern[1..], &value[skip..], escape))
        }
        '_' => !value.is_empty() && match_at(&pattern[1..], &value[1..], escape),
        literal => value.first() == Some(&literal) && match_at(&pattern[1..], &value[1..], escape),
    }
}

/// The literal run before the first unescaped wildcard, with escapes
/// resolved.
pub fn pattern_prefix(pattern: &str, escape: char) -> String {
    let mut prefix = String::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == escape {
            match chars.next() {
                Some(literal) => prefix.push(literal),
                None => break,
            }
        } else if c == '_' || c == '%' {
            break;
        } else {
            prefix.push(c);
        }
    }
    prefix
}

/// The smallest string strictly greater than every string starting with
/// `prefix`, under lexicographic character order. `None` for the empty
/// prefix or a prefix ending in the maximum character.
pub fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(bumped) = char::from_u32(last as u32 + 1) {
            chars.push(bumped);
            return Some(chars.into_iter().collect());
        }
        // Cannot increment (surrogate gap or char::MAX); drop the character
        // and bump the one before it.
    }
    None
}

/// The collation range `[prefix, successor(prefix))` a LIKE pattern narrows
/// an index scan to. Only valid for lexicographic collations; the caller
/// checks the column's collation first.
///
/// A pattern with no literal prefix scans every non-null string; the
/// remaining wildcard tail is matched row by row.
pub fn range_for_pattern(pattern: &str, escape: char) -> SelectableRange {
    let prefix = pattern_prefix(pattern, escape);
    if prefix.is_empty() {
        return SelectableRange::new(
            StartFlag::AfterLastValue,
            RangePoint::Value(TypedValue::null()),
            EndFlag::LastValue,
            RangePoint::LastInSet,
        );
    }
    let start = RangePoint::Value(TypedValue::string(prefix.clone()));
    match prefix_successor(&prefix) {
        Some(next) => SelectableRange::new(
            StartFlag::FirstValue,
            start,
            EndFlag::BeforeFirstValue,
            RangePoint::Value(TypedValue::string(next)),
        ),
        None => SelectableRange::new(StartFlag::FirstValue, start, EndFlag::LastValue, RangePoint::LastInSet),
    }
}
