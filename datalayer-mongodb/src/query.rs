//! Query translation from filter expressions to MongoDB query syntax.
//!
//! This module translates datalayer's abstract filter expressions into MongoDB BSON filter
//! documents, used as `$match` stages and `delete_many` filters.

use bson::{Bson, Document, doc};

use datalayer_core::{
    error::StoreError,
    query::{Expr, FieldOp, ItemPredicate, QueryVisitor},
};

use crate::store::BACKEND;

/// Compiles an expression into a MongoDB filter document.
pub fn compile(expr: &Expr) -> Result<Document, StoreError> {
    MongoQueryTranslator.visit_expr(expr)
}

/// Translates filter expressions into MongoDB query documents.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    fn operands(&mut self, exprs: &[Expr]) -> Result<Vec<Document>, StoreError> {
        exprs.iter().map(|expr| self.visit_expr(expr)).collect()
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = StoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(doc! {});
        }

        Ok(doc! { "$and": self.operands(exprs)? })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(doc! { "$expr": false });
        }

        Ok(doc! { "$or": self.operands(exprs)? })
    }

    // `$not` only applies to operator expressions, so whole filters are negated with `$nor`
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$nor": [self.visit_expr(expr)?] })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => doc! { "$regex": escape(s) },
                    Bson::Array(arr) => doc! { "$all": arr },
                    other => doc! { "$elemMatch": { "$eq": other } },
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": { "$regex": escape(s) } },
                    Bson::Array(arr) => doc! { "$nin": arr },
                    other => doc! { "$not": { "$elemMatch": { "$eq": other } } },
                },
                FieldOp::StartsWith => doc! { "$regex": format!("^{}", string_operand(field, op, value)?) },
                FieldOp::EndsWith => doc! { "$regex": format!("{}$", string_operand(field, op, value)?) },
                FieldOp::AnyOf => doc! { "$in": members(value) },
                FieldOp::NoneOf => doc! { "$nin": members(value) },
            }
        })
    }

    fn visit_predicate(&mut self, predicate: &ItemPredicate) -> Result<Self::Output, Self::Error> {
        Err(StoreError::unsupported(
            BACKEND,
            format!(
                "closure predicate {:?} cannot be sent to the server; express it with Filter field operators",
                predicate.label()
            ),
        ))
    }
}

fn string_operand(field: &str, op: &FieldOp, value: &Bson) -> Result<String, StoreError> {
    match value {
        Bson::String(s) => Ok(escape(s)),
        _ => Err(StoreError::unsupported(
            BACKEND,
            format!("{} on {field} requires a string value", op.as_str()),
        )),
    }
}

fn members(value: &Bson) -> Bson {
    match value {
        Bson::Array(_) => value.clone(),
        single => Bson::Array(vec![single.clone()]),
    }
}

/// Escapes regular expression metacharacters so the text matches literally.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());

    for c in text.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}
