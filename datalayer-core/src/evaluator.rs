//! Compiles filter expressions into closures for in-process evaluation.
//!
//! Backends without a native query language (the in-memory and embedded stores) compile each
//! `Where` expression once per query, then run the resulting closure against every candidate
//! document.

use bson::Bson;
use std::{cmp::Ordering, sync::Arc};

use crate::{
    error::{StoreError, StoreResult},
    query::{Expr, FieldOp, ItemPredicate, QueryVisitor},
    value::{Comparable, lookup},
};

/// A compiled, shareable predicate over a stored document.
pub type CompiledFilter = Arc<dyn Fn(&Bson) -> bool + Send + Sync>;

/// Compiles an expression into a [`CompiledFilter`].
pub fn compile(expr: &Expr) -> StoreResult<CompiledFilter> {
    FilterCompiler.visit_expr(expr)
}

/// Evaluates an expression against a single document without keeping the compiled form.
pub fn matches(expr: &Expr, document: &Bson) -> StoreResult<bool> {
    let filter = compile(expr)?;

    Ok(filter(document))
}

struct FilterCompiler;

impl QueryVisitor for FilterCompiler {
    type Output = CompiledFilter;
    type Error = StoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        let parts = exprs
            .iter()
            .map(|expr| self.visit_expr(expr))
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Arc::new(move |doc: &Bson| parts.iter().all(|part| part(doc))))
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        let parts = exprs
            .iter()
            .map(|expr| self.visit_expr(expr))
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Arc::new(move |doc: &Bson| parts.iter().any(|part| part(doc))))
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        let inner = self.visit_expr(expr)?;

        Ok(Arc::new(move |doc: &Bson| !inner(doc)))
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        let field = field.to_string();

        Ok(Arc::new(move |doc: &Bson| lookup(doc, &field).is_some() == should_exist))
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let field = field.to_string();
        let op = *op;
        let value = value.clone();

        Ok(Arc::new(move |doc: &Bson| match lookup(doc, &field) {
            Some(field_value) => compare(field_value, op, &value),
            // absent fields only satisfy the negative operators
            None => matches!(op, FieldOp::Ne | FieldOp::NotContains | FieldOp::NoneOf),
        }))
    }

    fn visit_predicate(&mut self, predicate: &ItemPredicate) -> Result<Self::Output, Self::Error> {
        let predicate = predicate.clone();

        Ok(Arc::new(move |doc: &Bson| predicate.matches(doc)))
    }
}

fn compare(field_value: &Bson, op: FieldOp, value: &Bson) -> bool {
    let left = Comparable::from(field_value);
    let right = Comparable::from(value);

    match op {
        FieldOp::Eq => left == right,
        FieldOp::Ne => left != right,
        FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => match left.partial_cmp(&right) {
            Some(ordering) => match op {
                FieldOp::Gt => ordering == Ordering::Greater,
                FieldOp::Gte => ordering != Ordering::Less,
                FieldOp::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            },
            None => false,
        },
        FieldOp::Contains => contains(&left, &right),
        FieldOp::NotContains => !contains(&left, &right),
        FieldOp::StartsWith => match (left, right) {
            (Comparable::String(left), Comparable::String(right)) => left.starts_with(right),
            _ => false,
        },
        FieldOp::EndsWith => match (left, right) {
            (Comparable::String(left), Comparable::String(right)) => left.ends_with(right),
            _ => false,
        },
        FieldOp::AnyOf => any_of(&left, &right),
        FieldOp::NoneOf => !any_of(&left, &right),
    }
}

fn contains(left: &Comparable<'_>, right: &Comparable<'_>) -> bool {
    match (left, right) {
        (Comparable::Array(items), value) => items.iter().any(|item| item == value),
        (Comparable::String(left), Comparable::String(right)) => left.contains(right),
        _ => false,
    }
}

fn any_of(left: &Comparable<'_>, right: &Comparable<'_>) -> bool {
    match (left, right) {
        (Comparable::Array(items), Comparable::Array(values)) => {
            values.iter().any(|value| items.contains(value))
        }
        (Comparable::Array(items), single) => items.contains(single),
        (single, Comparable::Array(values)) => values.contains(single),
        (left, right) => left == right,
    }
}
