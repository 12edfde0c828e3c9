//! Column name formats.
//!
//! A name format turns a mapping name plus positional counters into a column
//! name. All counts are 1-based.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Placeholders recognised in custom formats.
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{(name|count|parent|parentCount)\}").expect("Invalid placeholder regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NameFormat {
    /// `name`
    #[default]
    NoCounts,
    /// `name_N`
    WithCount,
    /// `name_P_N`
    WithCountAndParentCount,
    /// `name_P`
    WithParentCount,
    /// A template using `{name}`, `{count}`, `{parent}` and `{parentCount}`.
    Custom(String),
}

impl NameFormat {
    /// Look up a predefined format by its configuration token.
    ///
    /// Tokens match case-insensitively, ignoring `_` and `-`, so `WithCount`,
    /// `withCount` and `WITH_COUNT` are equivalent.
    pub fn predefined(token: &str) -> Option<Self> {
        let normalised: String = token
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalised.as_str() {
            "nocounts" => Some(NameFormat::NoCounts),
            "withcount" => Some(NameFormat::WithCount),
            "withcountandparentcount" => Some(NameFormat::WithCountAndParentCount),
            "withparentcount" => Some(NameFormat::WithParentCount),
            _ => None,
        }
    }

    /// Resolve the `nameFormat` / `customNameFormat` attribute pair.
    ///
    /// A custom format takes precedence; when neither is given `fallback`
    /// is used.
    pub fn parse(
        predefined: Option<&str>,
        custom: Option<&str>,
        fallback: &NameFormat,
    ) -> Result<Self, String> {
        if let Some(custom) = custom.filter(|c| !c.is_empty()) {
            return Ok(NameFormat::Custom(custom.to_string()));
        }
        match predefined {
            None => Ok(fallback.clone()),
            Some(token) => Self::predefined(token)
                .ok_or_else(|| format!("Unknown name format \"{}\"", token)),
        }
    }

    /// Format a column name.
    pub fn format(&self, name: &str, count: usize, parent_name: &str, parent_count: usize) -> String {
        match self {
            NameFormat::NoCounts => name.to_string(),
            NameFormat::WithCount => format!("{}_{}", name, count),
            NameFormat::WithCountAndParentCount => format!("{}_{}_{}", name, parent_count, count),
            NameFormat::WithParentCount => format!("{}_{}", name, parent_count),
            NameFormat::Custom(template) => PLACEHOLDER
                .replace_all(template, |caps: &Captures| match &caps[1] {
                    "name" => name.to_string(),
                    "count" => count.to_string(),
                    "parent" => parent_name.to_string(),
                    _ => parent_count.to_string(),
                })
                .into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_formats() {
        assert_eq!(NameFormat::NoCounts.format("id", 2, "order", 3), "id");
        assert_eq!(NameFormat::WithCount.format("id", 2, "order", 3), "id_2");
        assert_eq!(NameFormat::WithCountAndParentCount.format("id", 2, "order", 3), "id_3_2");
        assert_eq!(NameFormat::WithParentCount.format("id", 2, "order", 3), "id_3");
    }

    #[test]
    fn test_custom_format() {
        let format = NameFormat::Custom("{parent}.{name}[{count}] {unknown}".into());
        assert_eq!(format.format("sku", 1, "item", 4), "item.sku[1] {unknown}");
        let format = NameFormat::Custom("{name}-{parentCount}".into());
        assert_eq!(format.format("sku", 1, "item", 4), "sku-4");
    }

    #[test]
    fn test_parse_tokens() {
        let fallback = NameFormat::WithCount;
        assert_eq!(NameFormat::parse(None, None, &fallback).unwrap(), NameFormat::WithCount);
        assert_eq!(
            NameFormat::parse(Some("WITH_PARENT_COUNT"), None, &fallback).unwrap(),
            NameFormat::WithParentCount
        );
        assert_eq!(
            NameFormat::parse(Some("NoCounts"), Some("{name}!"), &fallback).unwrap(),
            NameFormat::Custom("{name}!".into())
        );
        assert!(NameFormat::parse(Some("Fancy"), None, &fallback).is_err());
    }
}
