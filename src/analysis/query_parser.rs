//! Extracts the columns a captured MySQL query filters, joins, sorts and
//! groups on, resolved to their tables.

use sqlparser::ast::{
    BinaryOperator, Expr, GroupByExpr, Join, JoinConstraint, JoinOperator, ObjectName,
    OrderByExpr, Query, Select, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::{Parser, ParserError};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableColumnUsage {
    pub filters: Vec<String>,
    pub joins: Vec<String>,
    pub orders: Vec<String>,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryColumnUsage {
    /// Tables in the order they appear in FROM/JOIN.
    pub tables: Vec<String>,
    pub usage_by_table: HashMap<String, TableColumnUsage>,
    pub has_join: bool,
    pub has_group_by: bool,
    pub has_order_by: bool,
}

impl QueryColumnUsage {
    pub fn usage(&self, table: &str) -> Option<&TableColumnUsage> {
        self.usage_by_table.get(table)
    }
}

#[derive(Debug, Clone, Copy)]
enum ColumnRole {
    Filter,
    Join,
    Order,
    Group,
}

#[derive(Debug)]
struct PendingColumn {
    relation: Option<String>,
    name: String,
    role: ColumnRole,
}

pub fn parse_query_columns(sql: &str) -> Result<QueryColumnUsage, ParserError> {
    let mut statements = Parser::parse_sql(&MySqlDialect {}, sql)?;
    let statement = statements
        .pop()
        .ok_or_else(|| ParserError::ParserError("empty query".into()))?;

    let mut collector = ColumnCollector::default();
    match statement {
        Statement::Query(query) => collector.collect_query(&query),
        _ => return Err(ParserError::ParserError("unsupported statement".into())),
    }
    Ok(collector.into_usage())
}

#[derive(Default)]
struct ColumnCollector {
    tables: Vec<String>,
    aliases: HashMap<String, String>,
    pending: Vec<PendingColumn>,
    has_join: bool,
    has_group_by: bool,
    has_order_by: bool,
}

impl ColumnCollector {
    fn collect_query(&mut self, query: &Query) {
        self.collect_set_expr(&query.body);
        for order in &query.order_by {
            self.has_order_by = true;
            self.collect_order_by(order);
        }
    }

    fn collect_set_expr(&mut self, set_expr: &SetExpr) {
        match set_expr {
            SetExpr::Select(select) => self.collect_select(select),
            SetExpr::Query(query) => self.collect_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_set_expr(left);
                self.collect_set_expr(right);
            }
            _ => {}
        }
    }

    fn collect_select(&mut self, select: &Select) {
        for table in &select.from {
            self.collect_table_with_joins(table);
        }
        if let Some(selection) = &select.selection {
            self.collect_predicate(selection, ColumnRole::Filter);
        }
        if let GroupByExpr::Expressions(exprs, ..) = &select.group_by {
            for expr in exprs {
                self.has_group_by = true;
                self.push_column(expr, ColumnRole::Group);
            }
        }
    }

    fn collect_table_with_joins(&mut self, table: &TableWithJoins) {
        let mut seen = Vec::new();
        if let Some(name) = self.collect_table_factor(&table.relation) {
            seen.push(name);
        }
        for join in &table.joins {
            self.has_join = true;
            if let Some(name) = self.collect_join(join, &seen) {
                seen.push(name);
            }
        }
    }

    fn collect_table_factor(&mut self, factor: &TableFactor) -> Option<String> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let table = object_base_name(name)?;
                self.tables.push(table.clone());
                self.aliases.insert(table.clone(), table.clone());
                if let Some(alias) = alias {
                    self.aliases.insert(alias.name.value.clone(), table.clone());
                }
                Some(table)
            }
            TableFactor::Derived { subquery, .. } => {
                self.collect_query(subquery);
                None
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.collect_table_with_joins(table_with_joins);
                None
            }
            _ => None,
        }
    }

    fn collect_join(&mut self, join: &Join, left_tables: &[String]) -> Option<String> {
        let right = self.collect_table_factor(&join.relation);
        let constraint = match &join.join_operator {
            JoinOperator::Inner(c)
            | JoinOperator::LeftOuter(c)
            | JoinOperator::RightOuter(c)
            | JoinOperator::FullOuter(c) => c,
            _ => return right,
        };

        match constraint {
            JoinConstraint::On(expr) => self.collect_predicate(expr, ColumnRole::Join),
            JoinConstraint::Using(columns) => {
                for column in columns {
                    for table in left_tables.iter().chain(right.iter()) {
                        self.pending.push(PendingColumn {
                            relation: Some(table.clone()),
                            name: column.value.clone(),
                            role: ColumnRole::Join,
                        });
                    }
                }
            }
            _ => {}
        }
        right
    }

    fn collect_predicate(&mut self, expr: &Expr, role: ColumnRole) {
        match expr {
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOperator::And | BinaryOperator::Or => {
                    self.collect_predicate(left, role);
                    self.collect_predicate(right, role);
                }
                BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq => {
                    self.push_column(left, role);
                    self.push_column(right, role);
                }
                _ => {}
            },
            Expr::InList { expr, .. }
            | Expr::Between { expr, .. }
            | Expr::Like { expr, .. }
            | Expr::IsNull(expr)
            | Expr::IsNotNull(expr) => self.push_column(expr, role),
            Expr::Nested(inner) => self.collect_predicate(inner, role),
            _ => {}
        }
    }

    fn collect_order_by(&mut self, order: &OrderByExpr) {
        self.push_column(&order.expr, ColumnRole::Order);
    }

    fn push_column(&mut self, expr: &Expr, role: ColumnRole) {
        let (relation, name) = match expr {
            Expr::Identifier(ident) => (None, ident.value.clone()),
            Expr::CompoundIdentifier(parts) if parts.len() >= 2 => (
                Some(parts[parts.len() - 2].value.clone()),
                parts[parts.len() - 1].value.clone(),
            ),
            Expr::Nested(inner) => return self.push_column(inner, role),
            _ => return,
        };
        self.pending.push(PendingColumn {
            relation,
            name,
            role,
        });
    }

    fn into_usage(self) -> QueryColumnUsage {
        // Unqualified columns are only attributable when one table is in play.
        let default_table = match self.tables.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };

        let mut usage_by_table: HashMap<String, TableColumnUsage> = HashMap::new();
        for pending in self.pending {
            let table = match &pending.relation {
                Some(relation) => self.aliases.get(relation).cloned(),
                None => default_table.clone(),
            };
            let Some(table) = table else { continue };
            let entry = usage_by_table.entry(table).or_default();
            let bucket = match pending.role {
                ColumnRole::Filter => &mut entry.filters,
                ColumnRole::Join => &mut entry.joins,
                ColumnRole::Order => &mut entry.orders,
                ColumnRole::Group => &mut entry.groups,
            };
            push_unique(bucket, &pending.name);
        }

        QueryColumnUsage {
            tables: self.tables,
            usage_by_table,
            has_join: self.has_join,
            has_group_by: self.has_group_by,
            has_order_by: self.has_order_by,
        }
    }
}

/// Last part of a possibly schema-qualified name.
fn object_base_name(name: &ObjectName) -> Option<String> {
    name.0.last().map(|ident| ident.value.clone())
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        values.push(value.to_string());
    }
}
