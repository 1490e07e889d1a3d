//! Paging and sorting.
//!
//! # Invariants
//! - `PageRequest::size` is at least 1.
//! - Generated entity queries always end their ORDER BY with the id column,
//!   so page slices are stable across requests.
//! - Sort properties for template/raw queries must be plain identifiers;
//!   they are spliced into SQL text.

use crate::model::entity::EntityMeta;
use crate::repo::error::{RepoError, RepoResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static SORT_IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("valid sort identifier regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
}

/// Ordered list of sort keys. Empty means unsorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Sort {
    orders: Vec<Order>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    pub fn by(direction: Direction, properties: &[&str]) -> Self {
        Self {
            orders: properties
                .iter()
                .map(|property| Order {
                    property: (*property).to_string(),
                    direction,
                })
                .collect(),
        }
    }

    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            orders: vec![Order {
                property: property.into(),
                direction: Direction::Asc,
            }],
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            orders: vec![Order {
                property: property.into(),
                direction: Direction::Desc,
            }],
        }
    }

    pub fn and(mut self, other: Sort) -> Self {
        self.orders.extend(other.orders);
        self
    }

    pub fn is_sorted(&self) -> bool {
        !self.orders.is_empty()
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// ORDER BY clause over entity attributes, with an id tiebreak.
    pub(crate) fn to_entity_sql(&self, meta: &EntityMeta, context: &str) -> RepoResult<String> {
        let mut keys = Vec::with_capacity(self.orders.len() + 1);
        let mut has_id = false;
        for order in &self.orders {
            let field = meta.require_field(&order.property, context)?;
            has_id |= field.column == meta.id_column;
            keys.push(format!(
                "{} {}",
                meta.qualified(field.column),
                order.direction.sql()
            ));
        }
        if !has_id {
            keys.push(format!("{} ASC", meta.qualified(meta.id_column)));
        }
        Ok(format!("ORDER BY {}", keys.join(", ")))
    }

    /// ORDER BY clause over result column names; empty when unsorted.
    ///
    /// `rename` may map a property onto a column first (entity attributes
    /// selected by a template query).
    pub(crate) fn to_native_sql(
        &self,
        context: &str,
        rename: impl Fn(&str) -> Option<&'static str>,
    ) -> RepoResult<String> {
        if self.orders.is_empty() {
            return Ok(String::new());
        }
        let mut keys = Vec::with_capacity(self.orders.len());
        for order in &self.orders {
            let column = match rename(&order.property) {
                Some(column) => column.to_string(),
                None if SORT_IDENTIFIER_RE.is_match(&order.property) => order.property.clone(),
                None => {
                    return Err(RepoError::invalid_query(
                        context,
                        format!("sort property `{}` is not an identifier", order.property),
                    ))
                }
            };
            keys.push(format!("{column} {}", order.direction.sql()));
        }
        Ok(format!("ORDER BY {}", keys.join(", ")))
    }
}

/// Zero-based page coordinates plus sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    page: usize,
    size: usize,
    sort: Sort,
}

impl PageRequest {
    pub fn of(page: usize, size: usize) -> RepoResult<Self> {
        if size == 0 {
            return Err(RepoError::InvalidArgument(
                "page size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            page,
            size,
            sort: Sort::unsorted(),
        })
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            ..self.clone()
        }
    }
}

/// One slice of a larger result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    content: Vec<T>,
    number: usize,
    size: usize,
    total_elements: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_elements: u64) -> Self {
        Self {
            content,
            number: request.page,
            size: request.size,
            total_elements,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn total_elements(&self) -> u64 {
        self.total_elements
    }

    pub fn total_pages(&self) -> u64 {
        self.total_elements.div_ceil(self.size as u64)
    }

    pub fn has_next(&self) -> bool {
        (self.number as u64) + 1 < self.total_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }

    pub fn is_first(&self) -> bool {
        !self.has_previous()
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
        }
    }
}

impl<T> IntoIterator for Page<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.content.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Page<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.content.iter()
    }
}

/// Total element count for a fetched slice.
///
/// `count` runs only when the slice cannot tell the total by itself: a first
/// page that is not full, or a later non-empty page that is not full, already
/// determine it.
pub(crate) fn resolve_total(
    request: &PageRequest,
    content_len: usize,
    count: impl FnOnce() -> RepoResult<u64>,
) -> RepoResult<u64> {
    let offset = request.offset();
    if offset == 0 && request.size > content_len {
        return Ok(content_len as u64);
    }
    if offset > 0 && content_len != 0 && request.size > content_len {
        return Ok((offset + content_len) as u64);
    }
    count()
}

#[cfg(test)]
mod tests {
    use super::{resolve_total, Page, PageRequest, Sort};
    use crate::model::member::MEMBER_META;
    use crate::repo::error::RepoError;

    #[test]
    fn zero_size_is_rejected() {
        assert!(matches!(
            PageRequest::of(0, 0),
            Err(RepoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn page_flags_follow_total() {
        let first = Page::new(vec![1, 2], &PageRequest::of(0, 2).unwrap(), 3);
        assert_eq!(first.total_pages(), 2);
        assert!(first.has_next());
        assert!(first.is_first());

        let second = Page::new(vec![3], &PageRequest::of(1, 2).unwrap(), 3);
        assert!(!second.has_next());
        assert!(second.is_last());
    }

    #[test]
    fn short_first_page_skips_count() {
        let request = PageRequest::of(0, 10).unwrap();
        let total = resolve_total(&request, 3, || panic!("count must not run")).unwrap();
        assert_eq!(total, 3);
    }

    #[test]
    fn full_page_runs_count() {
        let request = PageRequest::of(0, 2).unwrap();
        assert_eq!(resolve_total(&request, 2, || Ok(7)).unwrap(), 7);
    }

    #[test]
    fn entity_sort_maps_attributes_and_appends_id() {
        let sql = Sort::desc("age")
            .to_entity_sql(&MEMBER_META, "test")
            .unwrap();
        assert_eq!(sql, "ORDER BY m.age DESC, m.member_id ASC");
    }

    #[test]
    fn native_sort_rejects_expressions() {
        let err = Sort::asc("name; DROP TABLE members")
            .to_native_sql("test", |_| None)
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidQuery { .. }));
    }

    #[test]
    fn map_keeps_coordinates() {
        let page = Page::new(vec![1, 2], &PageRequest::of(3, 2).unwrap(), 20).map(|n| n * 10);
        assert_eq!(page.content(), &[10, 20]);
        assert_eq!(page.number(), 3);
        assert_eq!(page.total_elements(), 20);
    }
}
