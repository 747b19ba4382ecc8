//! Compiles a [`QuerySequence`] into a MongoDB aggregation pipeline.
//!
//! Each operation becomes one stage, in append order: filters become `$match`, orderings
//! `$sort`, paging `$skip` and `$limit`. Running the stages in sequence reproduces the
//! left-to-right semantics of the query, including filters applied after paging.

use bson::{Bson, Document, doc};

use datalayer_core::{
    capability::Capabilities,
    error::StoreResult,
    query::{SortDirection, SortKey},
    sequence::{OrderTracker, QueryItem, QuerySequence},
};

use crate::{query, store::BACKEND};

/// Builds the aggregation stages for a sequence.
///
/// A second `order_by` starts a new `$sort` whose trailing keys are the ordering already in
/// effect, so earlier orderings break ties the way a stable sort would. Every `$sort` ends
/// with `_id`, making results and pagination deterministic.
pub fn compile(capabilities: Capabilities, sequence: &QuerySequence) -> StoreResult<Vec<Document>> {
    let mut tracker = OrderTracker::new(BACKEND, capabilities.multiple_order_by);
    let mut stages = Vec::new();
    // ordering the rows carried before the current group was started
    let mut inherited = Vec::<SortKey>::new();
    // ordering the rows currently carry
    let mut effective = Vec::<SortKey>::new();

    for item in sequence.items() {
        match item {
            QueryItem::Where(expr) => stages.push(doc! { "$match": query::compile(expr)? }),
            QueryItem::OrderBy(_) | QueryItem::OrderByDescending(_) => {
                let group = tracker.apply(item)?.to_vec();
                inherited = std::mem::take(&mut effective);
                effective = merge(&group, &inherited);

                stages.push(doc! { "$sort": sort_document(&effective) });
            }
            QueryItem::ThenBy(_) | QueryItem::ThenByDescending(_) => {
                let group = tracker.apply(item)?.to_vec();
                effective = merge(&group, &inherited);
                let sort = doc! { "$sort": sort_document(&effective) };

                match stages.last_mut() {
                    Some(last) if last.contains_key("$sort") => *last = sort,
                    _ => stages.push(sort),
                }
            }
            QueryItem::Skip(count) => stages.push(doc! { "$skip": *count }),
            // the server rejects `$limit: 0`
            QueryItem::Take(0) => stages.push(doc! { "$match": { "$expr": false } }),
            QueryItem::Take(count) => stages.push(doc! { "$limit": *count }),
        }
    }

    tracing::debug!(backend = BACKEND, operations = %sequence, stages = stages.len(), "compiled aggregation pipeline");

    Ok(stages)
}

fn merge(group: &[SortKey], inherited: &[SortKey]) -> Vec<SortKey> {
    let mut keys = group.to_vec();

    for key in inherited {
        if !keys.iter().any(|existing| existing.field == key.field) {
            keys.push(key.clone());
        }
    }

    keys
}

fn sort_document(keys: &[SortKey]) -> Document {
    let mut sort = keys
        .iter()
        .map(|key| {
            let direction = match key.direction {
                SortDirection::Asc => 1,
                SortDirection::Desc => -1,
            };
            (key.field.clone(), Bson::Int32(direction))
        })
        .collect::<Document>();

    if !sort.contains_key("_id") {
        sort.insert("_id", 1);
    }

    sort
}

#[cfg(test)]
mod tests {
    use super::*;
    use datalayer_core::{error::StoreError, query::Filter};

    fn stages(items: Vec<QueryItem>) -> StoreResult<Vec<Document>> {
        compile(Capabilities::default(), &items.into_iter().collect())
    }

    #[test]
    fn operations_map_to_stages_in_order() {
        let pipeline = stages(vec![
            QueryItem::Where(Filter::gt("id", 50)),
            QueryItem::OrderBy("id".into()),
            QueryItem::Skip(10),
            QueryItem::Take(5),
        ])
        .unwrap();

        assert_eq!(
            pipeline,
            vec![
                doc! { "$match": { "id": { "$gt": 50 } } },
                doc! { "$sort": { "id": 1, "_id": 1 } },
                doc! { "$skip": 10_i64 },
                doc! { "$limit": 5_i64 },
            ]
        );
    }

    #[test]
    fn then_by_refines_the_preceding_sort() {
        let pipeline = stages(vec![
            QueryItem::OrderByDescending("score".into()),
            QueryItem::ThenBy("name".into()),
        ])
        .unwrap();

        assert_eq!(pipeline, vec![doc! { "$sort": { "score": -1, "name": 1, "_id": 1 } }]);
    }

    #[test]
    fn repeated_order_by_keeps_earlier_keys_as_tie_breakers() {
        let pipeline = stages(vec![
            QueryItem::OrderBy("name".into()),
            QueryItem::Take(20),
            QueryItem::OrderByDescending("score".into()),
        ])
        .unwrap();

        assert_eq!(pipeline[2], doc! { "$sort": { "score": -1, "name": 1, "_id": 1 } });
    }

    #[test]
    fn paging_passes_through_unchanged() {
        let pipeline = stages(vec![QueryItem::Skip(-3), QueryItem::Take(0)]).unwrap();

        assert_eq!(
            pipeline,
            vec![doc! { "$skip": -3_i64 }, doc! { "$match": { "$expr": false } }]
        );
    }

    #[test]
    fn malformed_sequences_fail_before_io() {
        let err = stages(vec![QueryItem::ThenBy("name".into())]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation { .. }));

        let err = stages(vec![QueryItem::Where(Filter::predicate("any", |_| true))]).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOperation { .. }));
    }
}
