//! Compiles filter expressions into table-service filter strings.
//!
//! Table services accept an OData-style `$filter` over top-level entity properties. The
//! grammar has comparisons, `and`, `or`, `not` and typed literals, but no substring
//! functions, existence checks or nested properties; those expressions are rejected before
//! any request is made.

use bson::{Bson, spec::BinarySubtype};

use datalayer_core::{
    error::StoreError,
    query::{Expr, FieldOp, ItemPredicate, QueryVisitor},
};

use crate::store::BACKEND;

/// Compiles an expression into a filter string.
pub fn compile(expr: &Expr) -> Result<String, StoreError> {
    ODataFilterCompiler.visit_expr(expr)
}

struct ODataFilterCompiler;

impl ODataFilterCompiler {
    fn join(&mut self, exprs: &[Expr], operator: &str, empty: &str) -> Result<String, StoreError> {
        match exprs {
            [] => Ok(empty.to_string()),
            [single] => self.visit_expr(single),
            _ => Ok(exprs
                .iter()
                .map(|expr| self.visit_expr(expr).map(|part| format!("({part})")))
                .collect::<Result<Vec<_>, _>>()?
                .join(&format!(" {operator} "))),
        }
    }
}

impl QueryVisitor for ODataFilterCompiler {
    type Output = String;
    type Error = StoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        self.join(exprs, "and", "true")
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        self.join(exprs, "or", "false")
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(format!("not ({})", self.visit_expr(expr)?))
    }

    fn visit_exists(&mut self, field: &str, _should_exist: bool) -> Result<Self::Output, Self::Error> {
        Err(StoreError::unsupported(
            BACKEND,
            format!("existence checks ({field}) cannot be expressed in a table filter"),
        ))
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let property = property(field)?;

        match op {
            FieldOp::Eq => comparison(property, "eq", value),
            FieldOp::Ne => comparison(property, "ne", value),
            FieldOp::Gt => comparison(property, "gt", value),
            FieldOp::Gte => comparison(property, "ge", value),
            FieldOp::Lt => comparison(property, "lt", value),
            FieldOp::Lte => comparison(property, "le", value),
            FieldOp::StartsWith => starts_with(property, value),
            FieldOp::AnyOf => membership(property, value, "eq", "or", "false"),
            FieldOp::NoneOf => membership(property, value, "ne", "and", "true"),
            FieldOp::Contains | FieldOp::NotContains | FieldOp::EndsWith => Err(StoreError::unsupported(
                BACKEND,
                format!("{} on {field} has no table filter equivalent", op.as_str()),
            )),
        }
    }

    fn visit_predicate(&mut self, predicate: &ItemPredicate) -> Result<Self::Output, Self::Error> {
        Err(StoreError::unsupported(
            BACKEND,
            format!(
                "closure predicate {:?} cannot be translated to a table filter; express it with Filter field operators",
                predicate.label()
            ),
        ))
    }
}

fn property(field: &str) -> Result<&str, StoreError> {
    let mut chars = field.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(field)
    } else if field.contains('.') {
        Err(StoreError::unsupported(
            BACKEND,
            format!("nested property {field} cannot be filtered; table entities are flat"),
        ))
    } else {
        Err(StoreError::unsupported(
            BACKEND,
            format!("{field:?} is not a valid table property name"),
        ))
    }
}

fn comparison(property: &str, operator: &str, value: &Bson) -> Result<String, StoreError> {
    Ok(format!("{property} {operator} {}", literal(value)?))
}

/// Prefix match as a half-open string range: `p ge 'abc' and p lt 'abd'`.
fn starts_with(property: &str, value: &Bson) -> Result<String, StoreError> {
    let Bson::String(prefix) = value else {
        return Err(StoreError::unsupported(
            BACKEND,
            format!("starts_with on {property} requires a string value"),
        ));
    };

    let mut chars = prefix.chars().collect::<Vec<_>>();
    let Some(last) = chars.pop() else {
        return Ok(format!("{property} ge ''"));
    };

    match char::from_u32(last as u32 + 1) {
        Some(next) => {
            chars.push(next);
            let upper = chars.into_iter().collect::<String>();

            Ok(format!(
                "({property} ge {}) and ({property} lt {})",
                quote(prefix),
                quote(&upper)
            ))
        }
        None => Err(StoreError::unsupported(
            BACKEND,
            format!("starts_with prefix {prefix:?} has no upper bound"),
        )),
    }
}

fn membership(
    property: &str,
    value: &Bson,
    operator: &str,
    joiner: &str,
    empty: &str,
) -> Result<String, StoreError> {
    let values = match value {
        Bson::Array(values) => values.as_slice(),
        single => std::slice::from_ref(single),
    };

    match values {
        [] => Ok(empty.to_string()),
        [single] => comparison(property, operator, single),
        _ => Ok(values
            .iter()
            .map(|value| comparison(property, operator, value).map(|part| format!("({part})")))
            .collect::<Result<Vec<_>, _>>()?
            .join(&format!(" {joiner} "))),
    }
}

/// Renders a literal in filter syntax.
pub(crate) fn literal(value: &Bson) -> Result<String, StoreError> {
    match value {
        Bson::String(text) => Ok(quote(text)),
        Bson::Int32(number) => Ok(number.to_string()),
        Bson::Int64(number) => Ok(format!("{number}L")),
        Bson::Double(number) if number.is_finite() => Ok(format!("{number:?}")),
        Bson::Boolean(flag) => Ok(flag.to_string()),
        Bson::DateTime(instant) => instant
            .try_to_rfc3339_string()
            .map(|text| format!("datetime'{text}'"))
            .map_err(|err| StoreError::unsupported(BACKEND, format!("datetime literal: {err}"))),
        Bson::Binary(binary) if binary.subtype == BinarySubtype::Uuid && binary.bytes.len() == 16 => {
            let text = binary
                .bytes
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect::<String>();

            Ok(format!(
                "guid'{}-{}-{}-{}-{}'",
                &text[0..8],
                &text[8..12],
                &text[12..16],
                &text[16..20],
                &text[20..32]
            ))
        }
        other => Err(StoreError::unsupported(
            BACKEND,
            format!("{:?} values cannot be used in a table filter", other.element_type()),
        )),
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use datalayer_core::query::Filter;

    #[test]
    fn comparisons_use_typed_literals() {
        assert_eq!(compile(&Filter::eq("name", "O'Brien")).unwrap(), "name eq 'O''Brien'");
        assert_eq!(compile(&Filter::gt("id", 50_i64)).unwrap(), "id gt 50L");
        assert_eq!(compile(&Filter::lte("age", 30)).unwrap(), "age le 30");
        assert_eq!(compile(&Filter::ne("score", 1.0)).unwrap(), "score ne 1.0");
        assert_eq!(compile(&Filter::eq("active", true)).unwrap(), "active eq true");
    }

    #[test]
    fn logical_operators_parenthesize_their_operands() {
        let expr = Filter::gte("age", 18).and(Filter::eq("city", "Oslo").or(Filter::eq("city", "Bergen")));

        assert_eq!(
            compile(&expr).unwrap(),
            "(age ge 18) and ((city eq 'Oslo') or (city eq 'Bergen'))"
        );
        assert_eq!(compile(&Filter::eq("a", 1).not()).unwrap(), "not (a eq 1)");
    }

    #[test]
    fn starts_with_becomes_a_range() {
        assert_eq!(
            compile(&Filter::starts_with("name", "Ad")).unwrap(),
            "(name ge 'Ad') and (name lt 'Ae')"
        );
    }

    #[test]
    fn membership_expands_to_chains() {
        assert_eq!(
            compile(&Filter::any_of("tier", vec!["gold", "silver"])).unwrap(),
            "(tier eq 'gold') or (tier eq 'silver')"
        );
        assert_eq!(
            compile(&Filter::none_of("tier", vec![1, 2])).unwrap(),
            "(tier ne 1) and (tier ne 2)"
        );
        assert_eq!(compile(&Filter::any_of("tier", Vec::<i32>::new())).unwrap(), "false");
    }

    #[test]
    fn untranslatable_shapes_are_rejected() {
        let rejected = [
            Filter::contains("name", "a"),
            Filter::ends_with("name", "a"),
            Filter::not_contains("name", "a"),
            Filter::exists("name"),
            Filter::eq("address.city", "Oslo"),
            Filter::predicate("always", |_| true),
        ];

        for expr in rejected {
            let err = compile(&expr).unwrap_err();
            assert!(matches!(err, StoreError::UnsupportedOperation { .. }), "{expr:?}");
        }
    }
}
