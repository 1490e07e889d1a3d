//! Method-name query derivation.
//!
//! Grammar:
//!
//! ```text
//! name      := prefix subject "By" predicate? ("OrderBy" order+)?
//! prefix    := "find" | "read" | "get" | "query"
//! subject   := free text, may contain ("Top" | "First") digits*
//! predicate := group ("Or" group)*
//! group     := part ("And" part)*
//! part      := Field Operator?
//! order     := Field ("Asc" | "Desc")?
//! ```
//!
//! Names are parsed once, when a repository is built; `bind` only checks
//! arity and assembles a [`Criteria`].
//!
//! # Invariants
//! - Field tokens are decapitalized and matched case-sensitively against
//!   entity attribute names. Unknown fields fail with `UnknownField`.
//! - `And`/`Or`/`Asc`/`Desc` only split when followed by an uppercase letter
//!   or the end of the name, so `Brand` or `Orders` stay intact.

use crate::model::entity::{EntityMeta, FieldMeta};
use crate::query::criteria::{Criteria, Operator, Predicate};
use crate::query::page::{Direction, Sort};
use crate::query::QueryValue;
use crate::repo::error::{RepoError, RepoResult};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;

static METHOD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:find|read|get|query)([A-Za-z0-9]*?)By([A-Za-z0-9]*)$")
        .expect("valid derived method regex")
});
static LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:Top|First)(\d*)").expect("valid derived limit regex"));

/// Longest suffix first, so `GreaterThanEqual` wins over `GreaterThan`.
const OPERATOR_SUFFIXES: &[(&str, PartKind)] = &[
    ("GreaterThanEqual", PartKind::Compare(Operator::Ge)),
    ("LessThanEqual", PartKind::Compare(Operator::Le)),
    ("GreaterThan", PartKind::Compare(Operator::Gt)),
    ("LessThan", PartKind::Compare(Operator::Lt)),
    ("StartingWith", PartKind::Pattern(LikeShape::Prefix)),
    ("EndingWith", PartKind::Pattern(LikeShape::Suffix)),
    ("Containing", PartKind::Pattern(LikeShape::Contains)),
    ("IsNotNull", PartKind::NotNull),
    ("NotNull", PartKind::NotNull),
    ("IsNull", PartKind::Null),
    ("Null", PartKind::Null),
    ("NotIn", PartKind::Compare(Operator::NotIn)),
    ("Like", PartKind::Pattern(LikeShape::Verbatim)),
    ("In", PartKind::Compare(Operator::In)),
    ("Not", PartKind::Compare(Operator::Ne)),
    ("Equals", PartKind::Compare(Operator::Eq)),
    ("Is", PartKind::Compare(Operator::Eq)),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeShape {
    Verbatim,
    Prefix,
    Suffix,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartKind {
    Compare(Operator),
    Pattern(LikeShape),
    Null,
    NotNull,
}

impl PartKind {
    fn arity(self) -> usize {
        match self {
            Self::Null | Self::NotNull => 0,
            Self::Compare(_) | Self::Pattern(_) => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Part {
    field: &'static FieldMeta,
    kind: PartKind,
}

/// A parsed derived-name query.
#[derive(Debug, Clone)]
pub struct DerivedQuery {
    method: String,
    entity: &'static str,
    /// Disjunction of conjunctions.
    groups: Vec<Vec<Part>>,
    sort: Sort,
    limit: Option<usize>,
}

impl DerivedQuery {
    pub fn parse(method: &str, meta: &'static EntityMeta) -> RepoResult<Self> {
        let captures = METHOD_RE.captures(method).ok_or_else(|| {
            RepoError::invalid_query(
                method,
                "expected `find|read|get|query<Subject>By<Predicate>`",
            )
        })?;
        let subject = captures.get(1).map_or("", |m| m.as_str());
        let rest = captures.get(2).map_or("", |m| m.as_str());

        let limit = parse_limit(method, subject)?;
        let (predicate, order) = match find_keyword(rest, "OrderBy") {
            Some(index) => (&rest[..index], Some(&rest[index + "OrderBy".len()..])),
            None => (rest, None),
        };
        let sort = match order {
            Some(order) => parse_order(method, order, meta)?,
            None => Sort::unsorted(),
        };

        let mut groups = Vec::new();
        if !predicate.is_empty() {
            for group in split_keyword(predicate, "Or") {
                let parts = split_keyword(group, "And")
                    .into_iter()
                    .map(|part| parse_part(method, part, meta))
                    .collect::<RepoResult<Vec<_>>>()?;
                groups.push(parts);
            }
        }

        Ok(Self {
            method: method.to_string(),
            entity: meta.name,
            groups,
            sort,
            limit,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// Number of positional arguments `bind` expects.
    pub fn arity(&self) -> usize {
        self.groups
            .iter()
            .flatten()
            .map(|part| part.kind.arity())
            .sum()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    pub fn bind(&self, args: &[QueryValue]) -> RepoResult<Criteria> {
        let expected = self.arity();
        if args.len() != expected {
            return Err(RepoError::binding(
                &self.method,
                format!("expected {expected} argument(s), got {}", args.len()),
            ));
        }

        let mut args = args.iter();
        let mut predicate: Option<Predicate> = None;
        for group in &self.groups {
            let mut conjunction = Predicate::All;
            for part in group {
                let term = match part.kind {
                    PartKind::Null => Predicate::is_null(part.field.attribute),
                    PartKind::NotNull => Predicate::is_not_null(part.field.attribute),
                    PartKind::Compare(op) => {
                        let value = next_arg(&mut args, &self.method)?;
                        if !op.takes_list() && matches!(value, QueryValue::List(_)) {
                            return Err(RepoError::binding(
                                &self.method,
                                format!(
                                    "`{}` expects a single value, got a list",
                                    part.field.attribute
                                ),
                            ));
                        }
                        Predicate::compare(part.field.attribute, op, value.clone())
                    }
                    PartKind::Pattern(shape) => {
                        let value = next_arg(&mut args, &self.method)?;
                        let QueryValue::Single(Value::Text(text)) = value else {
                            return Err(RepoError::binding(
                                &self.method,
                                format!("`{}` expects a text pattern", part.field.attribute),
                            ));
                        };
                        Predicate::like(part.field.attribute, like_pattern(shape, text))
                    }
                };
                conjunction = conjunction.and(term);
            }
            predicate = Some(match predicate {
                None => conjunction,
                Some(existing) => existing.or(conjunction),
            });
        }

        let mut criteria =
            Criteria::matching(predicate.unwrap_or(Predicate::All)).with_sort(self.sort.clone());
        criteria.limit = self.limit;
        Ok(criteria)
    }
}

fn next_arg<'a>(
    args: &mut impl Iterator<Item = &'a QueryValue>,
    method: &str,
) -> RepoResult<&'a QueryValue> {
    args.next()
        .ok_or_else(|| RepoError::binding(method, "missing argument"))
}

fn like_pattern(shape: LikeShape, text: &str) -> String {
    match shape {
        LikeShape::Verbatim => text.to_string(),
        LikeShape::Prefix => format!("{text}%"),
        LikeShape::Suffix => format!("%{text}"),
        LikeShape::Contains => format!("%{text}%"),
    }
}

fn parse_limit(method: &str, subject: &str) -> RepoResult<Option<usize>> {
    let Some(captures) = LIMIT_RE.captures(subject) else {
        return Ok(None);
    };
    let digits = captures.get(1).map_or("", |m| m.as_str());
    if digits.is_empty() {
        return Ok(Some(1));
    }
    match digits.parse::<usize>() {
        Ok(0) | Err(_) => Err(RepoError::invalid_query(
            method,
            format!("result limit `{digits}` must be a positive integer"),
        )),
        Ok(limit) => Ok(Some(limit)),
    }
}

fn parse_part(method: &str, token: &str, meta: &'static EntityMeta) -> RepoResult<Part> {
    for (suffix, kind) in OPERATOR_SUFFIXES {
        let Some(field_token) = token.strip_suffix(suffix) else {
            continue;
        };
        if field_token.is_empty() {
            continue;
        }
        if let Some(field) = meta.field(&decapitalize(field_token)) {
            return Ok(Part { field, kind: *kind });
        }
        // `loggedIn`, `status` etc.: the whole token may itself be a field.
        if meta.field(&decapitalize(token)).is_some() {
            break;
        }
    }
    let field = meta.require_field(&decapitalize(token), method)?;
    Ok(Part {
        field,
        kind: PartKind::Compare(Operator::Eq),
    })
}

fn parse_order(method: &str, text: &str, meta: &'static EntityMeta) -> RepoResult<Sort> {
    if text.is_empty() {
        return Err(RepoError::invalid_query(method, "`OrderBy` needs a property"));
    }
    let mut sort = Sort::unsorted();
    let mut rest = text;
    while !rest.is_empty() {
        let asc = find_keyword(rest, "Asc");
        let desc = find_keyword(rest, "Desc");
        let (property, direction, consumed) = match (asc, desc) {
            (Some(a), Some(d)) if d < a => (&rest[..d], Direction::Desc, d + "Desc".len()),
            (Some(a), _) => (&rest[..a], Direction::Asc, a + "Asc".len()),
            (None, Some(d)) => (&rest[..d], Direction::Desc, d + "Desc".len()),
            (None, None) => (rest, Direction::Asc, rest.len()),
        };
        let field = meta.require_field(&decapitalize(property), method)?;
        sort = sort.and(match direction {
            Direction::Asc => Sort::asc(field.attribute),
            Direction::Desc => Sort::desc(field.attribute),
        });
        rest = &rest[consumed..];
    }
    Ok(sort)
}

/// First index > 0 where `keyword` starts and is followed by an uppercase
/// letter or the end of `text`.
fn find_keyword(text: &str, keyword: &str) -> Option<usize> {
    text.match_indices(keyword)
        .map(|(index, _)| index)
        .find(|&index| {
            index > 0
                && text[index + keyword.len()..]
                    .chars()
                    .next()
                    .map_or(true, |next| next.is_ascii_uppercase())
        })
}

/// Splits on `keyword` where it is followed by an uppercase letter.
fn split_keyword<'a>(text: &'a str, keyword: &str) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, _) in text.match_indices(keyword) {
        let after = &text[index + keyword.len()..];
        let splits = index > start
            && after
                .chars()
                .next()
                .is_some_and(|next| next.is_ascii_uppercase());
        if splits {
            pieces.push(&text[start..index]);
            start = index + keyword.len();
        }
    }
    pieces.push(&text[start..]);
    pieces
}

fn decapitalize(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::DerivedQuery;
    use crate::model::member::MEMBER_META;
    use crate::query::criteria::{Operator, Predicate};
    use crate::query::page::Sort;
    use crate::query::QueryValue;
    use crate::repo::error::RepoError;

    #[test]
    fn parses_conjunction_with_operator() {
        let query = DerivedQuery::parse("findByNameAndAgeGreaterThan", &MEMBER_META).unwrap();
        assert_eq!(query.arity(), 2);
        let criteria = query
            .bind(&[QueryValue::from("hwang"), QueryValue::from(10)])
            .unwrap();
        assert_eq!(
            criteria.predicate,
            Predicate::eq("name", "hwang").and(Predicate::compare("age", Operator::Gt, 10))
        );
    }

    #[test]
    fn top_n_with_free_subject_and_empty_predicate() {
        let query = DerivedQuery::parse("findTop3ABy", &MEMBER_META).unwrap();
        assert_eq!(query.limit(), Some(3));
        assert_eq!(query.arity(), 0);
        assert_eq!(query.bind(&[]).unwrap().predicate, Predicate::All);
    }

    #[test]
    fn first_without_digits_limits_to_one() {
        let query = DerivedQuery::parse("findFirstByAge", &MEMBER_META).unwrap();
        assert_eq!(query.limit(), Some(1));
    }

    #[test]
    fn free_subject_text_is_ignored() {
        for method in ["findLockByName", "findReadOnlyByName", "findProjectionByName"] {
            let query = DerivedQuery::parse(method, &MEMBER_META).unwrap();
            assert_eq!(query.arity(), 1, "{method}");
        }
    }

    #[test]
    fn or_groups_and_order_by() {
        let query =
            DerivedQuery::parse("findByNameOrAgeLessThanEqualOrderByAgeDescName", &MEMBER_META)
                .unwrap();
        assert_eq!(query.sort(), &Sort::desc("age").and(Sort::asc("name")));
        let criteria = query
            .bind(&[QueryValue::from("a"), QueryValue::from(3)])
            .unwrap();
        assert_eq!(
            criteria.predicate,
            Predicate::eq("name", "a").or(Predicate::le("age", 3))
        );
    }

    #[test]
    fn null_operators_take_no_argument() {
        let query = DerivedQuery::parse("findByTeamIsNullAndName", &MEMBER_META).unwrap();
        assert_eq!(query.arity(), 1);
    }

    #[test]
    fn unknown_field_fails_at_parse() {
        let err = DerivedQuery::parse("findByUsername", &MEMBER_META).unwrap_err();
        assert!(
            matches!(err, RepoError::UnknownField { ref field, .. } if field == "username"),
            "{err}"
        );
    }

    #[test]
    fn field_tokens_are_case_sensitive() {
        let err = DerivedQuery::parse("findByNAME", &MEMBER_META).unwrap_err();
        assert!(matches!(err, RepoError::UnknownField { .. }));
    }

    #[test]
    fn arity_mismatch_is_a_binding_error() {
        let query = DerivedQuery::parse("findByName", &MEMBER_META).unwrap();
        let err = query.bind(&[]).unwrap_err();
        assert!(matches!(err, RepoError::ParameterBinding { .. }));
    }

    #[test]
    fn in_accepts_lists_and_equality_rejects_them() {
        let query = DerivedQuery::parse("findByNameIn", &MEMBER_META).unwrap();
        assert!(query.bind(&[QueryValue::list(["a", "b"])]).is_ok());

        let query = DerivedQuery::parse("findByName", &MEMBER_META).unwrap();
        let err = query.bind(&[QueryValue::list(["a", "b"])]).unwrap_err();
        assert!(matches!(err, RepoError::ParameterBinding { .. }));
    }

    #[test]
    fn containing_wraps_pattern() {
        let query = DerivedQuery::parse("findByNameContaining", &MEMBER_META).unwrap();
        let criteria = query.bind(&[QueryValue::from("wa")]).unwrap();
        assert_eq!(criteria.predicate, Predicate::like("name", "%wa%"));
    }

    #[test]
    fn rejects_names_without_by() {
        let err = DerivedQuery::parse("findEverything", &MEMBER_META).unwrap_err();
        assert!(matches!(err, RepoError::InvalidQuery { .. }));
    }
}
