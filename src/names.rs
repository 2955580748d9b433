//! Random identifier generation.
//!
//! Names for branches, tables, columns, indexes, and constraints are random
//! lowercase identifiers, filtered through the configured
//! `Invalid_Name_Regexes` and checked for uniqueness within their scope.
//! Names that would shadow the database's own `dolt_` namespace are never
//! produced.

use regex::Regex;

use crate::config::NameFilters;
use crate::error::{FuzzerError, Result};
use crate::rng::RandomSource;

const NAME_MIN_LEN: u64 = 4;
const NAME_MAX_LEN: u64 = 12;
const FIRST_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const REST_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789_";

/// Attempts before giving up; exhausting this means the configured regexes
/// reject essentially everything.
const MAX_ATTEMPTS: u32 = 1000;

// ---------------------------------------------------------------------------
// NameKind / NameGenerator
// ---------------------------------------------------------------------------

/// What the name is for; selects the reject filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameKind {
    Branch,
    Table,
    Column,
    Index,
    Constraint,
}

/// Filtered random identifier source.
#[derive(Clone, Debug, Default)]
pub struct NameGenerator {
    filters: NameFilters,
}

impl NameGenerator {
    #[must_use]
    pub fn new(filters: NameFilters) -> Self {
        Self { filters }
    }

    /// Generate a fresh identifier not present in `taken`.
    pub fn generate(
        &self,
        rng: &RandomSource,
        kind: NameKind,
        taken: &[String],
    ) -> Result<String> {
        let filter = self.filter_for(kind);
        for _ in 0..MAX_ATTEMPTS {
            let name = random_identifier(rng);
            if name.starts_with("dolt_") {
                continue;
            }
            if taken.iter().any(|t| t == &name) {
                continue;
            }
            if let Some(re) = filter {
                if re.is_match(&name) {
                    continue;
                }
            }
            return Ok(name);
        }
        Err(FuzzerError::new(format!(
            "could not generate a {kind:?} name in {MAX_ATTEMPTS} attempts; \
             check Invalid_Name_Regexes"
        )))
    }

    fn filter_for(&self, kind: NameKind) -> Option<&Regex> {
        match kind {
            NameKind::Branch => self.filters.branches.as_ref(),
            NameKind::Table => self.filters.tables.as_ref(),
            NameKind::Column => self.filters.columns.as_ref(),
            NameKind::Index => self.filters.indexes.as_ref(),
            NameKind::Constraint => self.filters.constraints.as_ref(),
        }
    }
}

fn random_identifier(rng: &RandomSource) -> String {
    let len = rng.u64_range(NAME_MIN_LEN, NAME_MAX_LEN) as usize;
    let mut name = String::with_capacity(len);
    let first = FIRST_CHARS[rng.u64_below(FIRST_CHARS.len() as u64) as usize];
    name.push(char::from(first));
    for _ in 1..len {
        let c = REST_CHARS[rng.u64_below(REST_CHARS.len() as u64) as usize];
        name.push(char::from(c));
    }
    name
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NameRegexes;

    fn rng() -> RandomSource {
        RandomSource::from_seed([61; 32])
    }

    fn filters(tables: &str) -> NameFilters {
        NameRegexes {
            tables: tables.to_owned(),
            ..NameRegexes::default()
        }
        .compile()
        .unwrap()
    }

    #[test]
    fn names_are_valid_identifiers() {
        let rng = rng();
        let names = NameGenerator::default();
        for _ in 0..200 {
            let name = names.generate(&rng, NameKind::Table, &[]).unwrap();
            assert!((4..=12).contains(&name.len()));
            assert!(name.as_bytes()[0].is_ascii_lowercase());
            assert!(name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_'));
        }
    }

    #[test]
    fn taken_names_are_avoided() {
        let rng = rng();
        let names = NameGenerator::default();
        let first = names.generate(&rng, NameKind::Column, &[]).unwrap();
        for _ in 0..100 {
            let next = names
                .generate(&rng, NameKind::Column, std::slice::from_ref(&first))
                .unwrap();
            assert_ne!(next, first);
        }
    }

    #[test]
    fn filter_rejects_matches() {
        let rng = rng();
        let names = NameGenerator::new(filters("^[a-z]"));
        // Every identifier starts with a lowercase letter, so this filter
        // rejects everything.
        assert!(names.generate(&rng, NameKind::Table, &[]).is_err());
    }

    #[test]
    fn filter_only_applies_to_its_kind() {
        let rng = rng();
        let names = NameGenerator::new(filters("^[a-z]"));
        // Branch names are not covered by the Tables filter.
        assert!(names.generate(&rng, NameKind::Branch, &[]).is_ok());
    }

    #[test]
    fn dolt_namespace_is_never_produced() {
        let rng = rng();
        let names = NameGenerator::default();
        for _ in 0..500 {
            let name = names.generate(&rng, NameKind::Table, &[]).unwrap();
            assert!(!name.starts_with("dolt_"));
        }
    }
}
