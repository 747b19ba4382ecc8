//! In-process translation and execution of a [`QuerySequence`].
//!
//! Backends with no native query language materialize candidate documents and run the
//! sequence over them here. The planner walks the sequence once, left to right, turning each
//! operation into a [`Stage`]; the executor applies stages in that order. Filters are compiled
//! to closures at plan time, so a malformed sequence fails before any document is read.

use bson::Bson;
use std::{cmp::Ordering, fmt};

use crate::{
    capability::{Capabilities, NegativePaging},
    error::{StoreError, StoreResult},
    evaluator::{CompiledFilter, compile},
    query::{SortDirection, SortKey},
    sequence::{OrderTracker, QueryItem, QueryKind, QuerySequence},
    value::compare_field,
};

/// One executable step of an in-process plan.
#[derive(Clone)]
pub enum Stage {
    Filter(CompiledFilter),
    /// Stable sort by the keys, most significant first.
    Sort(Vec<SortKey>),
    Skip(usize),
    Take(usize),
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Filter(_) => f.write_str("Filter"),
            Stage::Sort(keys) => f.debug_tuple("Sort").field(keys).finish(),
            Stage::Skip(n) => f.debug_tuple("Skip").field(n).finish(),
            Stage::Take(n) => f.debug_tuple("Take").field(n).finish(),
        }
    }
}

/// Accumulates stages while a sequence is walked.
///
/// Exposed separately from [`plan`] so that backends which push part of a sequence down to a
/// native store can hand just the remainder to the in-process executor.
#[derive(Debug)]
pub struct PlanBuilder<'a> {
    backend: &'a str,
    capabilities: Capabilities,
    tracker: OrderTracker<'a>,
    stages: Vec<Stage>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(backend: &'a str, capabilities: Capabilities) -> Self {
        Self {
            backend,
            capabilities,
            tracker: OrderTracker::new(backend, capabilities.multiple_order_by),
            stages: Vec::new(),
        }
    }

    /// Folds one operation into the plan.
    pub fn push(&mut self, item: &QueryItem) -> StoreResult<()> {
        match item {
            QueryItem::Where(expr) => {
                self.stages.push(Stage::Filter(compile(expr)?));
            }
            QueryItem::OrderBy(_) | QueryItem::OrderByDescending(_) => {
                let group = self.tracker.apply(item)?.to_vec();
                self.stages.push(Stage::Sort(group));
            }
            QueryItem::ThenBy(_) | QueryItem::ThenByDescending(_) => {
                let group = self.tracker.apply(item)?.to_vec();

                // directly after its ordering the group is refined in place; otherwise the
                // current rows are re-sorted by the whole extended group
                match self.stages.last_mut() {
                    Some(Stage::Sort(keys)) => *keys = group,
                    _ => self.stages.push(Stage::Sort(group)),
                }
            }
            QueryItem::Take(count) => {
                let count = self.page_count(QueryKind::Take, *count)?;
                self.stages.push(Stage::Take(count));
            }
            QueryItem::Skip(count) => {
                let count = self.page_count(QueryKind::Skip, *count)?;
                self.stages.push(Stage::Skip(count));
            }
        }

        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn build(self) -> InProcessPlan {
        InProcessPlan { stages: self.stages }
    }

    fn page_count(&self, kind: QueryKind, count: i64) -> StoreResult<usize> {
        match usize::try_from(count) {
            Ok(count) => Ok(count),
            Err(_) => match self.capabilities.negative_paging {
                NegativePaging::Clamp => Ok(0),
                NegativePaging::PassThrough => Err(StoreError::backend(
                    self.backend,
                    format!("{kind} count must be non-negative, got {count}"),
                )),
            },
        }
    }
}

/// Translates a whole sequence into an in-process plan.
pub fn plan(
    backend: &str,
    capabilities: Capabilities,
    sequence: &QuerySequence,
) -> StoreResult<InProcessPlan> {
    let mut builder = PlanBuilder::new(backend, capabilities);

    for item in sequence.items() {
        builder.push(item)?;
    }

    let plan = builder.build();
    tracing::debug!(backend, operations = %sequence, stages = ?plan.stages, "planned in-process query");

    Ok(plan)
}

/// A compiled sequence ready to run over materialized rows.
#[derive(Debug, Clone, Default)]
pub struct InProcessPlan {
    stages: Vec<Stage>,
}

impl InProcessPlan {
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Runs every stage over `rows` in order. `document` projects a row onto its stored form,
    /// which lets callers carry keys alongside documents.
    pub fn execute<T>(&self, mut rows: Vec<T>, document: impl Fn(&T) -> &Bson) -> Vec<T> {
        for stage in &self.stages {
            match stage {
                Stage::Filter(filter) => rows.retain(|row| filter(document(row))),
                Stage::Sort(keys) => {
                    rows.sort_by(|left, right| compare_by_keys(document(left), document(right), keys))
                }
                Stage::Skip(count) => {
                    let count = (*count).min(rows.len());
                    rows.drain(..count);
                }
                Stage::Take(count) => rows.truncate(*count),
            }
        }

        rows
    }
}

/// Compares two documents by an ordering group.
pub fn compare_by_keys(left: &Bson, right: &Bson, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ordering = match key.direction {
            SortDirection::Asc => compare_field(left, right, &key.field),
            SortDirection::Desc => compare_field(right, left, &key.field),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}
