use granite_primitives::RowId;
use granite_value::TypedValue;

use crate::error::{Result, SchemeError};
use crate::scheme::SchemeSource;

/// Hook by which the engine evaluates regular-expression predicates.
///
/// The engine itself never interprets a pattern; embedders may install
/// their own bridge, and [`DefaultRegexBridge`] is used otherwise.
pub trait RegexBridge: Send + Sync {
    /// Whether `value` matches `pattern` compiled with `flags`.
    fn regex_match(&self, pattern: &str, flags: &str, value: &str) -> Result<bool>;
}

/// Split a `/pattern/flags` expression into its parts. An expression
/// without the delimiters is a bare pattern with no flags.
pub fn split_pattern_flags(spec: &str) -> (&str, &str) {
    if let Some(rest) = spec.strip_prefix('/') {
        if let Some(slash) = rest.rfind('/') {
            return (&rest[..slash], &rest[slash + 1..]);
        }
    }
    (spec, "")
}

/// Bridge backed by the `regex` crate. Perl-style flags are translated to
/// an inline `(?...)` group; unsupported flags are rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRegexBridge;

impl DefaultRegexBridge {
    fn compile(pattern: &str, flags: &str) -> Result<regex::Regex> {
        let bad_flag = flags.chars().find(|c| !matches!(c, 'i' | 'm' | 's' | 'x' | 'U'));
        if let Some(flag) = bad_flag {
            return Err(SchemeError::BadRegex {
                pattern: pattern.to_owned(),
                reason: format!("unsupported flag `{flag}`"),
            });
        }
        let full = if flags.is_empty() {
            pattern.to_owned()
        } else {
            format!("(?{flags}){pattern}")
        };
        regex::Regex::new(&full).map_err(|e| SchemeError::BadRegex {
            pattern: pattern.to_owned(),
            reason: e.to_string(),
        })
    }
}

impl RegexBridge for DefaultRegexBridge {
    fn regex_match(&self, pattern: &str, flags: &str, value: &str) -> Result<bool> {
        Ok(Self::compile(pattern, flags)?.is_match(value))
    }
}

/// Scan a column for rows whose string value matches `spec` (a
/// `/pattern/flags` expression or bare pattern). Null and non-string cells
/// never match. Results come back in row order.
pub fn regex_search<S: SchemeSource>(bridge: &dyn RegexBridge, source: &S, spec: &str) -> Result<Vec<RowId>> {
    let (pattern, flags) = split_pattern_flags(spec);
    let mut out = Vec::new();
    for row in source.scheme_rows()? {
        if let TypedValue::String(s) = source.scheme_cell(row)? {
            if bridge.regex_match(pattern, flags, &s.text)? {
                out.push(row);
            }
        }
    }
    out.sort_unstable();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::testing::VecSource;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_pattern_and_flags() {
        assert_eq!(split_pattern_flags("/ab.c/i"), ("ab.c", "i"));
        assert_eq!(split_pattern_flags("/a/b/im"), ("a/b", "im"));
        assert_eq!(split_pattern_flags("plain"), ("plain", ""));
    }

    #[test]
    fn case_insensitive_flag() {
        let bridge = DefaultRegexBridge;
        assert!(bridge.regex_match("^toby", "i", "Toby Downer").unwrap());
        assert!(!bridge.regex_match("^toby", "", "Toby Downer").unwrap());
    }

    #[test]
    fn bad_flag_is_reported() {
        let bridge = DefaultRegexBridge;
        assert!(matches!(
            bridge.regex_match("a", "q", "a"),
            Err(SchemeError::BadRegex { .. })
        ));
    }

    #[test]
    fn search_skips_nulls() {
        let source = VecSource::strings(["alpha", "beta", "alphabet"]).with_null(1);
        let rows = regex_search(&DefaultRegexBridge, &source, "/^alpha/").unwrap();
        assert_eq!(rows, vec![RowId(0), RowId(2)]);
    }
}
