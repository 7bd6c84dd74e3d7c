//! Query Guards
//!
//! Shape validation for generated SQL before it reaches the store: a single
//! read-only query over known tables, honouring the caller's restriction.
//!
//! Location scoping is checked per SELECT. Each UNION branch, subquery and
//! CTE body must pin its own location-bearing tables in its own WHERE clause.

use crate::schema_context::SchemaContext;
use crate::security::scope::RestrictionDescriptor;
use sqlparser::ast::{
    BinaryOperator, Expr, ObjectName, Query, SetExpr, Statement, TableFactor, TableWithJoins, Value, Visit,
    Visitor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardRejection {
    #[error("query could not be parsed: {0}")]
    Unparseable(String),

    #[error("expected exactly one statement, found {0}")]
    StatementCount(usize),

    #[error("only read queries are allowed")]
    NotReadOnly,

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("common table expression '{0}' shadows a table of the same name")]
    ShadowedTable(String),

    #[error("unsupported row source '{0}'")]
    UnsupportedSource(String),

    #[error("table '{0}' is not available to this caller")]
    HiddenTable(String),

    #[error("table '{table}' must be filtered on location {location_id}")]
    MissingLocationFilter { table: String, location_id: i64 },
}

/// A query that passed every guard, re-rendered from its parsed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery(String);

impl ValidatedQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub struct QueryGuards<'a> {
    schema: &'a SchemaContext,
}

impl<'a> QueryGuards<'a> {
    pub fn new(schema: &'a SchemaContext) -> Self {
        Self { schema }
    }

    pub fn validate(
        &self,
        sql: &str,
        restriction: RestrictionDescriptor,
    ) -> Result<ValidatedQuery, GuardRejection> {
        let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
            .map_err(|e| GuardRejection::Unparseable(e.to_string()))?;

        if statements.len() != 1 {
            return Err(GuardRejection::StatementCount(statements.len()));
        }
        let statement = &statements[0];
        if !matches!(statement, Statement::Query(_)) {
            return Err(GuardRejection::NotReadOnly);
        }

        let mut shape = QueryShape::default();
        if let ControlFlow::Break(rejection) = statement.visit(&mut shape) {
            return Err(rejection);
        }

        // With no CTE named like a table, every catalogue name is the real table.
        if let Some(name) = shape.cte_names.iter().find(|name| self.schema.table(name).is_some()) {
            return Err(GuardRejection::ShadowedTable(name.clone()));
        }

        for relation in &shape.relations {
            match self.schema.table(relation) {
                Some(table) => {
                    if table.sensitive && matches!(restriction, RestrictionDescriptor::GenericRestricted) {
                        return Err(GuardRejection::HiddenTable(relation.clone()));
                    }
                }
                None if shape.cte_names.contains(relation) => {}
                None => return Err(GuardRejection::UnknownTable(relation.clone())),
            }
        }

        if let RestrictionDescriptor::ScopedToLocation(location_id) = restriction {
            for scope in &shape.scopes {
                scope.check_location(self.schema, location_id)?;
            }
        }

        Ok(ValidatedQuery(statement.to_string()))
    }
}

/// Facts collected from one pass over the statement AST.
#[derive(Default)]
struct QueryShape {
    relations: BTreeSet<String>,
    cte_names: BTreeSet<String>,
    scopes: Vec<SelectScope>,
}

impl QueryShape {
    /// Records every SELECT of a query body. Nested queries are visited on their own.
    fn collect_scopes(&mut self, body: &SetExpr) -> ControlFlow<GuardRejection> {
        match body {
            SetExpr::Select(select) => {
                if select.into.is_some() {
                    return ControlFlow::Break(GuardRejection::NotReadOnly);
                }
                let mut tables = Vec::new();
                for from in &select.from {
                    bind_joined(from, &mut tables)?;
                }
                self.scopes.push(SelectScope {
                    tables,
                    selection: select.selection.clone(),
                });
                ControlFlow::Continue(())
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_scopes(left)?;
                self.collect_scopes(right)
            }
            SetExpr::Query(_) | SetExpr::Values(_) => ControlFlow::Continue(()),
            SetExpr::Table(table) => ControlFlow::Break(GuardRejection::UnsupportedSource(table.to_string())),
            _ => ControlFlow::Break(GuardRejection::NotReadOnly),
        }
    }
}

impl Visitor for QueryShape {
    type Break = GuardRejection;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if !query.locks.is_empty() {
            return ControlFlow::Break(GuardRejection::NotReadOnly);
        }
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(cte.alias.name.value.to_lowercase());
            }
        }
        self.collect_scopes(&query.body)
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        if let Some(ident) = relation.0.last() {
            self.relations.insert(ident.value.to_lowercase());
        }
        ControlFlow::Continue(())
    }
}

/// A table read directly by a SELECT, and the name its columns are qualified with.
#[derive(Debug)]
struct TableBinding {
    table: String,
    binding: String,
}

fn bind_joined(from: &TableWithJoins, out: &mut Vec<TableBinding>) -> ControlFlow<GuardRejection> {
    bind_factor(&from.relation, out)?;
    for join in &from.joins {
        bind_factor(&join.relation, out)?;
    }
    ControlFlow::Continue(())
}

fn bind_factor(factor: &TableFactor, out: &mut Vec<TableBinding>) -> ControlFlow<GuardRejection> {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            if let Some(ident) = name.0.last() {
                let table = ident.value.to_lowercase();
                let binding = alias
                    .as_ref()
                    .map(|alias| alias.name.value.to_lowercase())
                    .unwrap_or_else(|| table.clone());
                out.push(TableBinding { table, binding });
            }
            ControlFlow::Continue(())
        }
        // Derived tables are queries of their own and get their own scope.
        TableFactor::Derived { .. } => ControlFlow::Continue(()),
        TableFactor::NestedJoin { table_with_joins, .. } => bind_joined(table_with_joins, out),
        other => ControlFlow::Break(GuardRejection::UnsupportedSource(other.to_string())),
    }
}

/// One SELECT: the tables in its FROM clause and its WHERE clause.
struct SelectScope {
    tables: Vec<TableBinding>,
    selection: Option<Expr>,
}

impl SelectScope {
    fn check_location(&self, schema: &SchemaContext, location_id: i64) -> Result<(), GuardRejection> {
        for bound in &self.tables {
            let Some(table) = schema.table(&bound.table) else {
                continue;
            };
            if table.location_columns.is_empty() {
                continue;
            }

            let pin = LocationPin {
                binding: &bound.binding,
                columns: &table.location_columns,
                location_id,
            };
            if !self.selection.as_ref().map_or(false, |selection| pin.holds(selection)) {
                return Err(GuardRejection::MissingLocationFilter {
                    table: bound.table.clone(),
                    location_id,
                });
            }
        }
        Ok(())
    }
}

/// Whether a predicate restricts one bound table to a single location.
struct LocationPin<'a> {
    binding: &'a str,
    columns: &'a [&'static str],
    location_id: i64,
}

impl LocationPin<'_> {
    fn holds(&self, expr: &Expr) -> bool {
        match expr {
            Expr::BinaryOp { left, op: BinaryOperator::And, right } => self.holds(left) || self.holds(right),
            Expr::BinaryOp { left, op: BinaryOperator::Or, right } => self.holds(left) && self.holds(right),
            Expr::BinaryOp { left, op: BinaryOperator::Eq, right } => {
                self.compares(left, right) || self.compares(right, left)
            }
            // Only a single-element list pins the scope to one location.
            Expr::InList { expr, list, negated: false } => match list.as_slice() {
                [only] => self.compares(expr, only),
                _ => false,
            },
            Expr::Nested(inner) => self.holds(inner),
            _ => false,
        }
    }

    fn compares(&self, column: &Expr, literal: &Expr) -> bool {
        let Some((qualifier, name)) = column_ref(column) else {
            return false;
        };
        let bound = qualifier.map_or(true, |q| q == self.binding);
        bound
            && self.columns.contains(&name.as_str())
            && literal_text(literal).map_or(false, |text| text.trim().parse::<i64>() == Ok(self.location_id))
    }
}

/// Column name and optional qualifier, both lowercased.
fn column_ref(expr: &Expr) -> Option<(Option<String>, String)> {
    match expr {
        Expr::Identifier(ident) => Some((None, ident.value.to_lowercase())),
        Expr::CompoundIdentifier(idents) => match idents.as_slice() {
            [.., qualifier, column] => Some((Some(qualifier.value.to_lowercase()), column.value.to_lowercase())),
            [column] => Some((None, column.value.to_lowercase())),
            [] => None,
        },
        Expr::Nested(inner) => column_ref(inner),
        _ => None,
    }
}

fn literal_text(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Value(Value::Number(n, _)) => Some(n.clone()),
        Expr::Value(Value::SingleQuotedString(s)) => Some(s.clone()),
        Expr::Nested(inner) => literal_text(inner),
        Expr::Cast { expr, .. } => literal_text(expr),
        _ => None,
    }
}
