use crate::error::{RecipeError, Result};
use crate::types::LookupKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A channel, locale or country: a code plus a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lookup {
    pub kind: LookupKind,
    pub code: String,
    pub name: String,
}

/// Known codes per kind, used to validate revision targeting.
#[derive(Debug, Clone, Default)]
pub struct LookupSet {
    codes: BTreeMap<LookupKind, Vec<String>>,
}

impl LookupSet {
    pub fn new(lookups: impl IntoIterator<Item = Lookup>) -> Self {
        let mut codes: BTreeMap<LookupKind, Vec<String>> = BTreeMap::new();
        for l in lookups {
            codes.entry(l.kind).or_default().push(l.code);
        }
        Self { codes }
    }

    pub fn contains(&self, kind: LookupKind, code: &str) -> bool {
        self.codes
            .get(&kind)
            .is_some_and(|c| c.iter().any(|x| x == code))
    }

    pub fn check(&self, kind: LookupKind, codes: &[String]) -> Result<()> {
        let unknown: Vec<&str> = codes
            .iter()
            .filter(|c| !self.contains(kind, c))
            .map(String::as_str)
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(RecipeError::validation(
                kind.field(),
                format!("unknown {kind} code(s): {}", unknown.join(", ")),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> LookupSet {
        LookupSet::new([
            Lookup {
                kind: LookupKind::Channel,
                code: "beta".into(),
                name: "Beta".into(),
            },
            Lookup {
                kind: LookupKind::Country,
                code: "US".into(),
                name: "United States".into(),
            },
        ])
    }

    #[test]
    fn known_codes_pass() {
        assert!(set().check(LookupKind::Channel, &["beta".into()]).is_ok());
        assert!(set().check(LookupKind::Locale, &[]).is_ok());
    }

    #[test]
    fn unknown_codes_name_the_field() {
        let err = set()
            .check(LookupKind::Country, &["US".into(), "FR".into()])
            .unwrap_err();
        match err {
            RecipeError::Validation { field, message } => {
                assert_eq!(field, "countries");
                assert!(message.contains("FR"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn codes_are_scoped_by_kind() {
        assert!(!set().contains(LookupKind::Locale, "beta"));
    }
}
