//! Query Profile - static characteristics of a variant's SQL
//!
//! Parses the variant text with sqlparser before anything reaches the server.
//! The profile is used to reject non-read-only or multi-statement variants and
//! to tell, ahead of execution, whether a correlated subquery is present.

use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, GroupByExpr, Query, Select, SelectItem, SetExpr,
    Statement, TableFactor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;

/// Query profile extracted from SQL AST
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryProfile {
    /// Output column names (aliases where given)
    pub output_columns: Vec<String>,

    /// GROUP BY expressions, rendered back to SQL
    pub group_by: Vec<String>,

    /// Tables read anywhere in the query
    pub tables: Vec<String>,

    /// Any scalar, IN or EXISTS subquery
    pub uses_subquery: bool,

    /// A subquery references a relation of an enclosing query
    pub uses_correlated_subquery: bool,
}

impl QueryProfile {
    /// Parse `sql` and profile it. Fails unless it is exactly one SELECT.
    pub fn from_sql(sql: &str) -> Result<Self> {
        let dialect = PostgreSqlDialect {};
        let ast = Parser::parse_sql(&dialect, sql)
            .map_err(|e| BenchError::Config(format!("SQL does not parse: {}", e)))?;

        let query = match ast.as_slice() {
            [Statement::Query(query)] => query,
            [_] => {
                return Err(BenchError::Config(
                    "only read-only SELECT statements are allowed".to_string(),
                ))
            }
            statements => {
                return Err(BenchError::Config(format!(
                    "expected exactly one statement, found {}",
                    statements.len()
                )))
            }
        };

        let mut profile = Self::default();
        let select = outer_select(query)?;

        for item in &select.projection {
            match item {
                SelectItem::ExprWithAlias { alias, .. } => {
                    profile.output_columns.push(alias.value.to_lowercase());
                }
                SelectItem::UnnamedExpr(expr) => profile.output_columns.push(output_name(expr)),
                _ => profile.output_columns.push("*".to_string()),
            }
        }

        if let GroupByExpr::Expressions(exprs) = &select.group_by {
            profile.group_by = exprs.iter().map(|e| e.to_string()).collect();
        }

        let mut walker = SubqueryWalker::default();
        walker.visit_query(query, &HashSet::new());
        profile.tables = walker.tables;
        profile.uses_subquery = walker.subqueries > 0;
        profile.uses_correlated_subquery = walker.correlated;

        Ok(profile)
    }
}

fn outer_select(query: &Query) -> Result<&Select> {
    match query.body.as_ref() {
        SetExpr::Select(select) => Ok(select),
        _ => Err(BenchError::Config(
            "variant must be a plain SELECT, not a set operation".to_string(),
        )),
    }
}

fn output_name(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(ident) => ident.value.to_lowercase(),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|p| p.value.to_lowercase())
            .unwrap_or_default(),
        other => other.to_string(),
    }
}

fn function_arg_expr(arg: &FunctionArg) -> Option<&Expr> {
    match arg {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))
        | FunctionArg::Named {
            arg: FunctionArgExpr::Expr(expr),
            ..
        } => Some(expr),
        _ => None,
    }
}

/// Walks a query tree tracking which relation names are in scope, so a
/// qualified column that resolves only to an enclosing scope marks the
/// subquery as correlated.
#[derive(Default)]
struct SubqueryWalker {
    tables: Vec<String>,
    subqueries: usize,
    correlated: bool,
}

impl SubqueryWalker {
    fn visit_query(&mut self, query: &Query, outer: &HashSet<String>) {
        if let SetExpr::Select(select) = query.body.as_ref() {
            self.visit_select(select, outer);
        }
    }

    fn visit_select(&mut self, select: &Select, outer: &HashSet<String>) {
        let mut local = HashSet::new();
        for table in &select.from {
            self.bind_relation(&table.relation, &mut local, outer);
            for join in &table.joins {
                self.bind_relation(&join.relation, &mut local, outer);
            }
        }

        let mut scope = outer.clone();
        scope.extend(local.iter().cloned());

        for item in &select.projection {
            if let SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } = item {
                self.visit_expr(expr, &local, &scope);
            }
        }
        if let Some(selection) = &select.selection {
            self.visit_expr(selection, &local, &scope);
        }
        if let Some(having) = &select.having {
            self.visit_expr(having, &local, &scope);
        }
    }

    fn bind_relation(
        &mut self,
        relation: &TableFactor,
        local: &mut HashSet<String>,
        outer: &HashSet<String>,
    ) {
        match relation {
            TableFactor::Table { name, alias, .. } => {
                let table = name
                    .0
                    .last()
                    .map(|i| i.value.to_lowercase())
                    .unwrap_or_default();
                if !self.tables.contains(&table) {
                    self.tables.push(table.clone());
                }
                match alias {
                    Some(alias) => local.insert(alias.name.value.to_lowercase()),
                    None => local.insert(table),
                };
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                self.visit_query(subquery, outer);
                if let Some(alias) = alias {
                    local.insert(alias.name.value.to_lowercase());
                }
            }
            _ => {}
        }
    }

    /// `local` holds relations of the current SELECT, `scope` adds every
    /// enclosing one.
    fn visit_expr(&mut self, expr: &Expr, local: &HashSet<String>, scope: &HashSet<String>) {
        match expr {
            Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
                let qualifier = parts[parts.len() - 2].value.to_lowercase();
                if !local.contains(&qualifier) && scope.contains(&qualifier) {
                    self.correlated = true;
                }
            }
            Expr::Subquery(query) => self.visit_subquery(query, scope),
            Expr::Exists { subquery, .. } => self.visit_subquery(subquery, scope),
            Expr::InSubquery { expr, subquery, .. } => {
                self.visit_expr(expr, local, scope);
                self.visit_subquery(subquery, scope);
            }
            Expr::Function(func) => {
                for arg in &func.args {
                    if let Some(inner) = function_arg_expr(arg) {
                        self.visit_expr(inner, local, scope);
                    }
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                self.visit_expr(left, local, scope);
                self.visit_expr(right, local, scope);
            }
            Expr::UnaryOp { expr, .. }
            | Expr::Nested(expr)
            | Expr::Cast { expr, .. }
            | Expr::IsNull(expr)
            | Expr::IsNotNull(expr)
            | Expr::Trim { expr, .. }
            | Expr::Substring { expr, .. } => self.visit_expr(expr, local, scope),
            Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
                self.visit_expr(expr, local, scope);
                self.visit_expr(pattern, local, scope);
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                self.visit_expr(expr, local, scope);
                self.visit_expr(low, local, scope);
                self.visit_expr(high, local, scope);
            }
            Expr::InList { expr, list, .. } => {
                self.visit_expr(expr, local, scope);
                for e in list {
                    self.visit_expr(e, local, scope);
                }
            }
            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                if let Some(op) = operand {
                    self.visit_expr(op, local, scope);
                }
                for e in conditions.iter().chain(results.iter()) {
                    self.visit_expr(e, local, scope);
                }
                if let Some(e) = else_result {
                    self.visit_expr(e, local, scope);
                }
            }
            _ => {}
        }
    }

    fn visit_subquery(&mut self, query: &Query, scope: &HashSet<String>) {
        self.subqueries += 1;
        self.visit_query(query, scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlated_scalar_subquery() {
        let sql = "SELECT f.department, SUM(f.light_total) AS total_light, \
                   (SELECT AVG(g.imd_heavy) FROM toll_flow g WHERE g.department = f.department) AS avg_heavy_imd \
                   FROM toll_flow f GROUP BY f.department";
        let profile = QueryProfile::from_sql(sql).unwrap();
        assert!(profile.uses_subquery);
        assert!(profile.uses_correlated_subquery);
        assert_eq!(profile.output_columns, vec!["department", "total_light", "avg_heavy_imd"]);
        assert_eq!(profile.group_by, vec!["f.department"]);
        assert_eq!(profile.tables, vec!["toll_flow"]);
    }

    #[test]
    fn test_uncorrelated_subquery() {
        let sql = "SELECT department FROM toll_flow \
                   WHERE cutoff_date = (SELECT MAX(cutoff_date) FROM toll_flow)";
        let profile = QueryProfile::from_sql(sql).unwrap();
        assert!(profile.uses_subquery);
        assert!(!profile.uses_correlated_subquery);
    }

    #[test]
    fn test_plain_aggregate() {
        let sql = "SELECT department, SUM(light_total) AS total_light, AVG(imd_heavy) AS avg_heavy_imd \
                   FROM toll_flow WHERE administrator = 'CONCESION' GROUP BY department";
        let profile = QueryProfile::from_sql(sql).unwrap();
        assert!(!profile.uses_subquery);
        assert!(!profile.uses_correlated_subquery);
        assert_eq!(profile.output_columns, vec!["department", "total_light", "avg_heavy_imd"]);
        assert_eq!(profile.group_by, vec!["department"]);
    }

    #[test]
    fn test_rejects_writes_and_multiple_statements() {
        assert!(QueryProfile::from_sql("DELETE FROM toll_flow").is_err());
        assert!(QueryProfile::from_sql("SELECT 1; SELECT 2").is_err());
        assert!(QueryProfile::from_sql("SELEC department FROM").is_err());
    }
}
