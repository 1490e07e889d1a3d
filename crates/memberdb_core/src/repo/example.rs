//! Query by example.

use crate::model::entity::{Entity, FieldKind};
use crate::query::criteria::{Criteria, Predicate};
use crate::repo::error::RepoResult;
use rusqlite::types::Value;
use std::collections::BTreeSet;

/// Which probe attributes take part in matching.
///
/// Every non-null probe attribute is matched by equality unless ignored.
/// Versions and audit stamps never take part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExampleMatcher {
    ignored: BTreeSet<String>,
}

impl ExampleMatcher {
    pub fn matching() -> Self {
        Self::default()
    }

    pub fn with_ignore_paths(mut self, paths: &[&str]) -> Self {
        self.ignored
            .extend(paths.iter().map(|path| (*path).to_string()));
        self
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored.contains(path)
    }
}

/// A probe entity plus its matcher.
#[derive(Debug, Clone)]
pub struct Example<E> {
    probe: E,
    matcher: ExampleMatcher,
}

impl<E: Entity> Example<E> {
    pub fn of(probe: E) -> Self {
        Self::with_matcher(probe, ExampleMatcher::matching())
    }

    pub fn with_matcher(probe: E, matcher: ExampleMatcher) -> Self {
        Self { probe, matcher }
    }

    pub fn probe(&self) -> &E {
        &self.probe
    }

    pub fn matcher(&self) -> &ExampleMatcher {
        &self.matcher
    }

    pub(crate) fn to_criteria(&self) -> RepoResult<Criteria> {
        let meta = E::meta();
        for path in &self.matcher.ignored {
            meta.require_field(path, "example matcher")?;
        }

        let mut predicate = Predicate::All;
        if let Some(id) = self.probe.id() {
            if !self.matcher.is_ignored("id") {
                predicate = predicate.and(Predicate::eq("id", id));
            }
        }
        for (attribute, value) in self.probe.field_values() {
            let candidate = meta
                .field(attribute)
                .is_some_and(|field| field.is_probe_candidate() && field.kind != FieldKind::Id);
            if !candidate || value == Value::Null || self.matcher.is_ignored(attribute) {
                continue;
            }
            predicate = predicate.and(Predicate::eq(attribute, value));
        }
        Ok(Criteria::matching(predicate))
    }
}

#[cfg(test)]
mod tests {
    use super::{Example, ExampleMatcher};
    use crate::model::member::Member;
    use crate::query::criteria::Predicate;
    use crate::repo::error::RepoError;

    #[test]
    fn ignored_and_null_attributes_are_skipped() {
        let probe = Member::with_age("m1", 30);
        let example =
            Example::with_matcher(probe, ExampleMatcher::matching().with_ignore_paths(&["age"]));
        let criteria = example.to_criteria().unwrap();
        assert_eq!(criteria.predicate, Predicate::eq("name", "m1"));
    }

    #[test]
    fn unknown_ignore_path_is_rejected() {
        let example = Example::with_matcher(
            Member::new("m1"),
            ExampleMatcher::matching().with_ignore_paths(&["username"]),
        );
        assert!(matches!(
            example.to_criteria(),
            Err(RepoError::UnknownField { .. })
        ));
    }
}
