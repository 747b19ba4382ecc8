//! Comparison semantics for stored BSON values.
//!
//! In-process backends filter and order items by comparing BSON values. Integers and floats
//! compare by exact value, and orderings fall back to a fixed type rank so every pair of
//! values is ordered.

use bson::{Bson, datetime::DateTime};
use std::{cmp::Ordering, collections::HashMap};

/// Type-erased, comparable representation of BSON values.
#[derive(Debug)]
pub enum Comparable<'a> {
    Null,
    Bool(bool),
    /// Int32 and Int64 values, compared exactly.
    Int(i64),
    Float(f64),
    DateTime(DateTime),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Binary, object ids and other values compared by their debug rendering.
    Opaque(String),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Int(i64::from(*value)),
            Bson::Int64(value) => Comparable::Int(*value),
            Bson::Double(value) => Comparable::Float(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            other => Comparable::Opaque(format!("{other:?}")),
        }
    }
}

/// Orders an integer against a float without rounding the integer. `None` for NaN.
fn cmp_int_float(int: i64, float: f64) -> Option<Ordering> {
    // 2^63 is exact in f64; every finite float in [-2^63, 2^63) truncates into i64 range
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;

    if float.is_nan() {
        return None;
    }
    if float >= LIMIT {
        return Some(Ordering::Less);
    }
    if float < -LIMIT {
        return Some(Ordering::Greater);
    }

    let whole = float.trunc();
    Some(int.cmp(&(whole as i64)).then_with(|| {
        let fraction = float - whole;
        if fraction > 0.0 {
            Ordering::Less
        } else if fraction < 0.0 {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }))
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Float(a), Comparable::Float(b)) if a.is_nan() && b.is_nan() => true,
            (Comparable::Int(_) | Comparable::Float(_), Comparable::Int(_) | Comparable::Float(_)) => {
                self.partial_cmp(other) == Some(Ordering::Equal)
            }
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Opaque(a), Comparable::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    /// Ordering within one scalar type (integers and floats are one type); `None` across
    /// types, for containers and for NaN.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Int(a), Comparable::Int(b)) => Some(a.cmp(b)),
            (Comparable::Float(a), Comparable::Float(b)) => a.partial_cmp(b),
            (Comparable::Int(a), Comparable::Float(b)) => cmp_int_float(*a, *b),
            (Comparable::Float(a), Comparable::Int(b)) => cmp_int_float(*b, *a).map(Ordering::reverse),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::Opaque(a), Comparable::Opaque(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl Comparable<'_> {
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Bool(_) => 1,
            Comparable::Float(value) if value.is_nan() => 2,
            Comparable::Int(_) | Comparable::Float(_) => 3,
            Comparable::String(_) => 4,
            Comparable::DateTime(_) => 5,
            Comparable::Array(_) => 6,
            Comparable::Map(_) => 7,
            Comparable::Opaque(_) => 8,
        }
    }

    /// Total order used for sorting: missing and null values first, NaN before every other
    /// number, then by type rank.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        // same-kind containers land on equal ranks and stay in place
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

/// Looks up a possibly dotted field path in a stored document.
pub fn lookup<'a>(document: &'a Bson, path: &str) -> Option<&'a Bson> {
    let mut current = document;

    for segment in path.split('.') {
        current = match current {
            Bson::Document(doc) => doc.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Compares two stored documents by the value at `path`, treating a missing field as null.
pub fn compare_field(left: &Bson, right: &Bson, path: &str) -> Ordering {
    let left = lookup(left, path).map(Comparable::from).unwrap_or(Comparable::Null);
    let right = lookup(right, path).map(Comparable::from).unwrap_or(Comparable::Null);

    left.sort_cmp(&right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc};

    #[test]
    fn numbers_compare_across_widths() {
        let small = Bson::Int32(7);
        let wide = Bson::Int64(7);

        assert_eq!(Comparable::from(&small), Comparable::from(&wide));
        assert_eq!(
            Comparable::from(&Bson::Double(6.5)).sort_cmp(&Comparable::from(&wide)),
            Ordering::Less
        );
    }

    #[test]
    fn mixed_types_sort_by_rank() {
        let null = Bson::Null;
        let text = Bson::String("a".into());
        let number = Bson::Int32(100);

        assert_eq!(Comparable::from(&null).sort_cmp(&Comparable::from(&number)), Ordering::Less);
        assert_eq!(Comparable::from(&text).sort_cmp(&Comparable::from(&number)), Ordering::Greater);
    }

    #[test]
    fn dotted_paths_walk_nested_documents() {
        let document = bson!({ "address": { "city": "Oslo" }, "tags": ["a", "b"] });

        assert_eq!(lookup(&document, "address.city"), Some(&Bson::String("Oslo".into())));
        assert_eq!(lookup(&document, "tags.1"), Some(&Bson::String("b".into())));
        assert_eq!(lookup(&document, "address.zip"), None);
    }

    #[test]
    fn missing_fields_sort_first() {
        let with = Bson::Document(doc! { "rank": 1 });
        let without = Bson::Document(doc! {});

        assert_eq!(compare_field(&without, &with, "rank"), Ordering::Less);
    }

    #[test]
    fn wide_integers_compare_exactly() {
        let below = Bson::Int64(9_007_199_254_740_992);
        let above = Bson::Int64(9_007_199_254_740_993);

        assert_ne!(Comparable::from(&below), Comparable::from(&above));
        assert_eq!(Comparable::from(&below).sort_cmp(&Comparable::from(&above)), Ordering::Less);
        // the float rounds to 2^53, which only the lower integer equals
        let float = Bson::Double(9_007_199_254_740_993_i64 as f64);
        assert_eq!(Comparable::from(&below), Comparable::from(&float));
        assert_eq!(Comparable::from(&above).sort_cmp(&Comparable::from(&float)), Ordering::Greater);
        assert_eq!(
            Comparable::from(&Bson::Int64(i64::MAX)).sort_cmp(&Comparable::from(&Bson::Double(f64::INFINITY))),
            Ordering::Less
        );
        assert_eq!(
            Comparable::from(&Bson::Int32(-3)).sort_cmp(&Comparable::from(&Bson::Double(-2.5))),
            Ordering::Less
        );
    }

    #[test]
    fn nan_sorts_before_numbers_and_never_matches_a_range() {
        let nan = Bson::Double(f64::NAN);
        let one = Bson::Int32(1);

        assert_eq!(Comparable::from(&nan).sort_cmp(&Comparable::from(&one)), Ordering::Less);
        assert_eq!(Comparable::from(&one).sort_cmp(&Comparable::from(&nan)), Ordering::Greater);
        assert_eq!(Comparable::from(&nan).sort_cmp(&Comparable::from(&Bson::Null)), Ordering::Greater);
        assert_eq!(Comparable::from(&nan).partial_cmp(&Comparable::from(&one)), None);
        assert_eq!(Comparable::from(&nan), Comparable::from(&Bson::Double(f64::NAN)));
    }
}
