//! The predicate sequence: an ordered list of query operations.
//!
//! A [`QuerySequence`] records operations in the order the caller appended them; that order is
//! the order translators fold them in. Each [`QueryItem`] variant carries exactly the payload
//! its kind needs.

use std::fmt;

use crate::{
    error::{StoreError, StoreResult},
    query::{Expr, SortDirection, SortKey},
};

/// Discriminant of a [`QueryItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Where,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Take,
    Skip,
}

impl QueryKind {
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            QueryKind::OrderBy
                | QueryKind::OrderByDescending
                | QueryKind::ThenBy
                | QueryKind::ThenByDescending
        )
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueryKind::Where => "where",
            QueryKind::OrderBy => "order_by",
            QueryKind::OrderByDescending => "order_by_descending",
            QueryKind::ThenBy => "then_by",
            QueryKind::ThenByDescending => "then_by_descending",
            QueryKind::Take => "take",
            QueryKind::Skip => "skip",
        })
    }
}

/// One operation in a query pipeline.
#[derive(Debug, Clone)]
pub enum QueryItem {
    Where(Expr),
    OrderBy(String),
    OrderByDescending(String),
    ThenBy(String),
    ThenByDescending(String),
    Take(i64),
    Skip(i64),
}

impl QueryItem {
    pub fn kind(&self) -> QueryKind {
        match self {
            QueryItem::Where(_) => QueryKind::Where,
            QueryItem::OrderBy(_) => QueryKind::OrderBy,
            QueryItem::OrderByDescending(_) => QueryKind::OrderByDescending,
            QueryItem::ThenBy(_) => QueryKind::ThenBy,
            QueryItem::ThenByDescending(_) => QueryKind::ThenByDescending,
            QueryItem::Take(_) => QueryKind::Take,
            QueryItem::Skip(_) => QueryKind::Skip,
        }
    }

    /// Returns the ordering key for ordering kinds.
    pub fn sort_key(&self) -> Option<SortKey> {
        match self {
            QueryItem::OrderBy(field) | QueryItem::ThenBy(field) => {
                Some(SortKey::new(field.clone(), SortDirection::Asc))
            }
            QueryItem::OrderByDescending(field) | QueryItem::ThenByDescending(field) => {
                Some(SortKey::new(field.clone(), SortDirection::Desc))
            }
            _ => None,
        }
    }
}

/// An append-only, ordered list of [`QueryItem`]s.
#[derive(Debug, Clone, Default)]
pub struct QuerySequence {
    items: Vec<QueryItem>,
}

impl QuerySequence {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, item: QueryItem) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[QueryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns `true` when every operation is a filter, so the sequence reduces to one predicate.
    pub fn is_filter_only(&self) -> bool {
        self.items.iter().all(|item| item.kind() == QueryKind::Where)
    }

    /// The conjunction of all filters, in append order. Only meaningful when
    /// [`is_filter_only`](Self::is_filter_only) holds.
    pub fn combined_filter(&self) -> Option<Expr> {
        let mut filters = self.items.iter().filter_map(|item| match item {
            QueryItem::Where(expr) => Some(expr.clone()),
            _ => None,
        });

        let first = filters.next()?;
        Some(filters.fold(first, Expr::and))
    }
}

impl FromIterator<QueryItem> for QuerySequence {
    fn from_iter<I: IntoIterator<Item = QueryItem>>(iter: I) -> Self {
        Self { items: iter.into_iter().collect() }
    }
}

impl fmt::Display for QuerySequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds = self
            .items
            .iter()
            .map(|item| item.kind().to_string())
            .collect::<Vec<_>>();
        write!(f, "[{}]", kinds.join(", "))
    }
}

/// Tracks ordering state while a translator walks a sequence.
///
/// Every translator routes its ordering items through this type so that the `then_by`
/// precondition and the repeated-`order_by` capability are enforced identically.
#[derive(Debug)]
pub struct OrderTracker<'a> {
    backend: &'a str,
    allow_multiple: bool,
    group: Option<Vec<SortKey>>,
}

impl<'a> OrderTracker<'a> {
    pub fn new(backend: &'a str, allow_multiple: bool) -> Self {
        Self {
            backend,
            allow_multiple,
            group: None,
        }
    }

    /// Starts a new primary ordering, returning its key group.
    pub fn order_by(&mut self, key: SortKey) -> StoreResult<&[SortKey]> {
        if self.group.is_some() && !self.allow_multiple {
            return Err(StoreError::unsupported(
                self.backend,
                format!(
                    "order_by({}) called on an already ordered query; use then_by or then_by_descending to add a secondary ordering",
                    key.field
                ),
            ));
        }

        Ok(self.group.insert(vec![key]).as_slice())
    }

    /// Extends the most recent ordering group, returning the whole extended group.
    pub fn then_by(&mut self, key: SortKey) -> StoreResult<&[SortKey]> {
        match self.group.as_mut() {
            Some(group) => {
                group.push(key);
                Ok(group.as_slice())
            }
            None => Err(StoreError::invalid(
                self.backend,
                format!(
                    "then_by({}) requires a preceding order_by or order_by_descending; must call order_by first",
                    key.field
                ),
            )),
        }
    }

    /// Dispatches an ordering item to [`order_by`](Self::order_by) or [`then_by`](Self::then_by).
    pub fn apply(&mut self, item: &QueryItem) -> StoreResult<&[SortKey]> {
        let Some(key) = item.sort_key() else {
            return Err(StoreError::invalid(
                self.backend,
                format!("{} is not an ordering operation", item.kind()),
            ));
        };

        match item.kind() {
            QueryKind::OrderBy | QueryKind::OrderByDescending => self.order_by(key),
            _ => self.then_by(key),
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.group.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;

    #[test]
    fn items_report_their_kind_and_key() {
        let item = QueryItem::ThenByDescending("age".into());

        assert_eq!(item.kind(), QueryKind::ThenByDescending);
        assert_eq!(item.sort_key(), Some(SortKey::new("age", SortDirection::Desc)));
        assert_eq!(QueryItem::Take(3).sort_key(), None);
    }

    #[test]
    fn filter_only_sequences_combine_in_order() {
        let sequence: QuerySequence = [
            QueryItem::Where(Filter::gt("id", 1)),
            QueryItem::Where(Filter::lt("id", 9)),
        ]
        .into_iter()
        .collect();

        assert!(sequence.is_filter_only());
        let Some(Expr::And(parts)) = sequence.combined_filter() else {
            panic!("expected conjunction");
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(sequence.to_string(), "[where, where]");
    }

    #[test]
    fn then_by_without_order_by_is_invalid() {
        let mut tracker = OrderTracker::new("test", true);

        let err = tracker.apply(&QueryItem::ThenBy("name".into())).unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation { .. }));
        assert!(err.to_string().contains("must call order_by first"));
    }

    #[test]
    fn repeated_order_by_respects_capability() {
        let mut stacking = OrderTracker::new("stacking", true);
        stacking.apply(&QueryItem::OrderBy("a".into())).unwrap();
        let group = stacking.apply(&QueryItem::OrderBy("b".into())).unwrap();
        assert_eq!(group, [SortKey::new("b", SortDirection::Asc)]);

        let mut strict = OrderTracker::new("strict", false);
        strict.apply(&QueryItem::OrderBy("a".into())).unwrap();
        let err = strict.apply(&QueryItem::OrderBy("b".into())).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOperation { .. }));
        assert!(err.to_string().contains("use then_by"));
    }

    #[test]
    fn then_by_extends_the_latest_group() {
        let mut tracker = OrderTracker::new("test", true);
        tracker.apply(&QueryItem::OrderByDescending("a".into())).unwrap();
        let group = tracker.apply(&QueryItem::ThenBy("b".into())).unwrap();

        assert_eq!(
            group,
            [
                SortKey::new("a", SortDirection::Desc),
                SortKey::new("b", SortDirection::Asc),
            ]
        );
    }
}
