use std::collections::BTreeSet;
use std::sync::Arc;

use sqlparser::ast::{
    Assignment, AssignmentTarget, BinaryOperator, Delete, Expr, FromTable, Ident, ObjectName,
    Query, Select, SetExpr, Statement, TableFactor, TableWithJoins, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use uuid::Uuid;

use sacco_core::error::{SaccoError, SaccoResult};

use crate::registry::ProtectedTableRegistry;
use crate::value::SqlValue;

const TENANT_COLUMN: &str = "tenant_id";

// Placeholder injected into the AST. Rendered text is scanned for it to
// find the splice position, then it is replaced with a plain `?`. Must
// use a form the tokenizer lexes as a single placeholder token: `$name`
// qualifies, `:name` lexes as separate colon + word tokens.
const SENTINEL: &str = "$__tenant_scope";

/// What the rewriter did to a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteDecision {
    /// Statement does not touch tenant-scoped tables, or no tenant is
    /// bound; forwarded untouched.
    Passthrough,
    /// A tenant predicate was injected.
    Injected,
    /// The statement already carried a tenant predicate.
    AlreadyScoped,
}

/// A statement cleared for execution, with its final parameter list.
#[derive(Debug, Clone)]
pub struct GuardedQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub decision: RewriteDecision,
}

/// Last line of defense for tenant isolation. Every statement executed
/// through a tenant-bound connection passes through here; statements
/// against tenant-scoped tables get a `tenant_id = ?` predicate unless
/// they already carry one. Repository-layer scoping remains the first
/// line; this catches what slips past it.
///
/// Statements are rewritten on the AST, not with text matching, so the
/// injected predicate lands in the statement's top-level WHERE and the
/// tenant parameter is spliced at the correct ordinal among existing
/// placeholders. Shapes whose scoping cannot be proven are rejected
/// outright:
///
/// - unparseable or multi-statement input
/// - statements referencing two or more distinct tenant-scoped tables
/// - tenant-scoped tables reachable only through subqueries, CTEs,
///   derived tables, or set operations
/// - self-joins of a tenant-scoped table
/// - non-DML statements that mention a tenant-scoped table
/// - assignments to the tenant column
///
/// INSERT is never rewritten; assigning the tenant column on writes is
/// the data-access layer's job.
#[derive(Debug)]
pub struct QuerySafetyRewriter {
    registry: Arc<ProtectedTableRegistry>,
}

enum Action {
    Injected,
    AlreadyScoped,
}

impl QuerySafetyRewriter {
    pub fn new(registry: Arc<ProtectedTableRegistry>) -> Self {
        Self { registry }
    }

    /// Rewrite `sql` for the bound tenant, if any. `params` holds the
    /// caller's positional `?` values in order.
    pub fn rewrite(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        tenant_id: Option<Uuid>,
    ) -> SaccoResult<GuardedQuery> {
        let Some(tenant_id) = tenant_id else {
            return Ok(GuardedQuery {
                sql: sql.to_string(),
                params,
                decision: RewriteDecision::Passthrough,
            });
        };

        if sql.contains(SENTINEL) {
            return Err(unsafe_shape("statement contains the reserved scope marker"));
        }

        let protected = self.scan_tokens(sql)?;

        let mut statements = Parser::parse_sql(&GenericDialect {}, sql)
            .map_err(|e| unsafe_shape(format!("unparseable statement: {e}")))?;
        if statements.len() != 1 {
            return Err(unsafe_shape(format!(
                "expected exactly one statement, got {}",
                statements.len()
            )));
        }

        if protected.is_empty() {
            return Ok(GuardedQuery {
                sql: sql.to_string(),
                params,
                decision: RewriteDecision::Passthrough,
            });
        }
        if protected.len() > 1 {
            let names: Vec<&str> = protected.iter().map(String::as_str).collect();
            return Err(unsafe_shape(format!(
                "statement references multiple tenant-scoped tables: {}",
                names.join(", ")
            )));
        }
        let target = protected.into_iter().next().unwrap_or_default();

        let mut statement = statements.remove(0);
        let action = match &mut statement {
            // Tenant assignment on writes belongs to the data-access
            // layer; value-list injection is not safe to automate.
            Statement::Insert(_) => {
                return Ok(GuardedQuery {
                    sql: sql.to_string(),
                    params,
                    decision: RewriteDecision::Passthrough,
                })
            }
            Statement::Query(query) => inject_into_query(query, &target)?,
            Statement::Update {
                table,
                assignments,
                from,
                selection,
                ..
            } => inject_into_update(table, assignments, from.is_some(), selection, &target)?,
            Statement::Delete(delete) => inject_into_delete(delete, &target)?,
            _ => {
                return Err(unsafe_shape(format!(
                    "statement kind not allowed against tenant-scoped table '{target}'"
                )))
            }
        };

        match action {
            Action::AlreadyScoped => Ok(GuardedQuery {
                sql: sql.to_string(),
                params,
                decision: RewriteDecision::AlreadyScoped,
            }),
            Action::Injected => splice_tenant_param(statement.to_string(), params, tenant_id),
        }
    }

    /// Token-level scan of the original text: collects every
    /// tenant-scoped table name mentioned anywhere (including inside
    /// subqueries the AST walk below never descends into) and rejects
    /// placeholder styles other than `?`, which the positional splice
    /// cannot support.
    fn scan_tokens(&self, sql: &str) -> SaccoResult<BTreeSet<String>> {
        let tokens = Tokenizer::new(&GenericDialect {}, sql)
            .tokenize()
            .map_err(|e| unsafe_shape(format!("unreadable statement: {e}")))?;

        let mut protected = BTreeSet::new();
        for token in &tokens {
            match token {
                Token::Word(word) => {
                    let lowered = word.value.to_lowercase();
                    if self.registry.is_tenant_scoped(&lowered) {
                        protected.insert(lowered);
                    }
                }
                Token::Placeholder(p) if p != "?" => {
                    return Err(unsafe_shape(format!(
                        "only '?' placeholders are supported, found '{p}'"
                    )));
                }
                _ => {}
            }
        }
        Ok(protected)
    }
}

fn unsafe_shape(detail: impl Into<String>) -> SaccoError {
    SaccoError::UnsafeQueryShape(detail.into())
}

struct RelationRef {
    table: String,
    ident: String,
    alias: Option<String>,
}

impl RelationRef {
    fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.ident)
    }
}

fn object_name_tail(name: &ObjectName) -> Option<&Ident> {
    name.0.last()
}

fn push_factor(factor: &TableFactor, out: &mut Vec<RelationRef>) -> Option<()> {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let ident = object_name_tail(name)?.value.clone();
            out.push(RelationRef {
                table: ident.to_lowercase(),
                ident,
                alias: alias.as_ref().map(|a| a.name.value.clone()),
            });
            Some(())
        }
        _ => None,
    }
}

/// Flattens a FROM clause into plain table references. `None` when any
/// factor is not a plain table (derived table, nested join, function).
fn plain_relations(from: &[TableWithJoins]) -> Option<Vec<RelationRef>> {
    let mut out = Vec::new();
    for item in from {
        push_factor(&item.relation, &mut out)?;
        for join in &item.joins {
            push_factor(&join.relation, &mut out)?;
        }
    }
    Some(out)
}

fn inject_into_query(query: &mut Query, target: &str) -> SaccoResult<Action> {
    if query.with.is_some() {
        return Err(unsafe_shape(
            "WITH clauses over tenant-scoped tables are not rewritable",
        ));
    }
    let select = match query.body.as_mut() {
        SetExpr::Select(select) => select.as_mut(),
        _ => {
            return Err(unsafe_shape(
                "set operations over tenant-scoped tables are not rewritable",
            ))
        }
    };
    inject_into_select(select, target)
}

fn inject_into_select(select: &mut Select, target: &str) -> SaccoResult<Action> {
    let relations = plain_relations(&select.from).ok_or_else(|| {
        unsafe_shape("derived tables mixed with tenant-scoped tables are not rewritable")
    })?;

    let matching: Vec<&RelationRef> = relations.iter().filter(|r| r.table == target).collect();
    match matching.len() {
        0 => Err(unsafe_shape(format!(
            "tenant-scoped table '{target}' is only referenced inside a nested query"
        ))),
        1 => {
            let qualifier = if relations.len() > 1 {
                Some(matching[0].qualifier().to_string())
            } else {
                None
            };
            if selection_mentions_tenant(&select.selection) {
                return Ok(Action::AlreadyScoped);
            }
            let existing = select.selection.take();
            select.selection = Some(and_predicate(qualifier.as_deref(), existing));
            Ok(Action::Injected)
        }
        _ => Err(unsafe_shape(format!(
            "'{target}' appears more than once in the FROM clause"
        ))),
    }
}

fn inject_into_update(
    table: &mut TableWithJoins,
    assignments: &[Assignment],
    has_from: bool,
    selection: &mut Option<Expr>,
    target: &str,
) -> SaccoResult<Action> {
    for assignment in assignments {
        if assignment_targets_tenant(assignment) {
            return Err(unsafe_shape("statements may not assign the tenant column"));
        }
    }
    if !table.joins.is_empty() {
        return Err(unsafe_shape("UPDATE with joined tables is not rewritable"));
    }
    let mut relations = Vec::new();
    push_factor(&table.relation, &mut relations)
        .ok_or_else(|| unsafe_shape("UPDATE target is not a plain table"))?;
    let relation = &relations[0];
    if relation.table != target {
        return Err(unsafe_shape(format!(
            "tenant-scoped table '{target}' is only referenced outside the UPDATE target"
        )));
    }
    if selection_mentions_tenant(selection) {
        return Ok(Action::AlreadyScoped);
    }
    // UPDATE ... FROM can make a bare column ambiguous.
    let qualifier = has_from.then(|| relation.qualifier().to_string());
    let existing = selection.take();
    *selection = Some(and_predicate(qualifier.as_deref(), existing));
    Ok(Action::Injected)
}

fn inject_into_delete(delete: &mut Delete, target: &str) -> SaccoResult<Action> {
    if !delete.tables.is_empty() || delete.using.is_some() {
        return Err(unsafe_shape("multi-table DELETE is not rewritable"));
    }
    let from = match &mut delete.from {
        FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
    };
    if from.len() != 1 || !from[0].joins.is_empty() {
        return Err(unsafe_shape("DELETE must target a single table"));
    }
    let mut relations = Vec::new();
    push_factor(&from[0].relation, &mut relations)
        .ok_or_else(|| unsafe_shape("DELETE target is not a plain table"))?;
    if relations[0].table != target {
        return Err(unsafe_shape(format!(
            "tenant-scoped table '{target}' is only referenced outside the DELETE target"
        )));
    }
    if selection_mentions_tenant(&delete.selection) {
        return Ok(Action::AlreadyScoped);
    }
    let existing = delete.selection.take();
    delete.selection = Some(and_predicate(None, existing));
    Ok(Action::Injected)
}

fn assignment_targets_tenant(assignment: &Assignment) -> bool {
    let names: Vec<&ObjectName> = match &assignment.target {
        AssignmentTarget::ColumnName(name) => vec![name],
        AssignmentTarget::Tuple(names) => names.iter().collect(),
    };
    names.iter().any(|name| {
        object_name_tail(name)
            .map(|ident| ident.value.eq_ignore_ascii_case(TENANT_COLUMN))
            .unwrap_or(false)
    })
}

fn selection_mentions_tenant(selection: &Option<Expr>) -> bool {
    selection
        .as_ref()
        .map(mentions_tenant_column)
        .unwrap_or(false)
}

fn mentions_tenant_column(expr: &Expr) -> bool {
    match expr {
        Expr::Identifier(ident) => ident.value.eq_ignore_ascii_case(TENANT_COLUMN),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|ident| ident.value.eq_ignore_ascii_case(TENANT_COLUMN))
            .unwrap_or(false),
        Expr::BinaryOp { left, right, .. } => {
            mentions_tenant_column(left) || mentions_tenant_column(right)
        }
        Expr::UnaryOp { expr, .. } => mentions_tenant_column(expr),
        Expr::Nested(inner) => mentions_tenant_column(inner),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => mentions_tenant_column(inner),
        Expr::InList { expr, .. } => mentions_tenant_column(expr),
        Expr::InSubquery { expr, .. } => mentions_tenant_column(expr),
        Expr::Between { expr, .. } => mentions_tenant_column(expr),
        Expr::Like { expr, .. } | Expr::ILike { expr, .. } => mentions_tenant_column(expr),
        _ => false,
    }
}

fn and_predicate(qualifier: Option<&str>, existing: Option<Expr>) -> Expr {
    let column = match qualifier {
        Some(q) => Expr::CompoundIdentifier(vec![Ident::new(q), Ident::new(TENANT_COLUMN)]),
        None => Expr::Identifier(Ident::new(TENANT_COLUMN)),
    };
    let predicate = Expr::BinaryOp {
        left: Box::new(column),
        op: BinaryOperator::Eq,
        right: Box::new(Expr::Value(Value::Placeholder(SENTINEL.to_string()))),
    };
    match existing {
        None => predicate,
        Some(rest) => {
            // OR binds looser than AND; parenthesize so the injected
            // predicate covers the whole original condition.
            let rest = if matches!(
                rest,
                Expr::BinaryOp {
                    op: BinaryOperator::Or | BinaryOperator::Xor,
                    ..
                }
            ) {
                Expr::Nested(Box::new(rest))
            } else {
                rest
            };
            Expr::BinaryOp {
                left: Box::new(predicate),
                op: BinaryOperator::And,
                right: Box::new(rest),
            }
        }
    }
}

/// Renders the rewritten statement, locates the sentinel among its
/// placeholders, and splices the tenant id into the parameter list at
/// that ordinal so pre-existing `?` values keep their positions.
fn splice_tenant_param(
    rendered: String,
    params: Vec<SqlValue>,
    tenant_id: Uuid,
) -> SaccoResult<GuardedQuery> {
    let tokens = Tokenizer::new(&GenericDialect {}, &rendered)
        .tokenize()
        .map_err(|e| unsafe_shape(format!("rendered statement failed to tokenize: {e}")))?;

    let mut position = 0usize;
    let mut sentinel_at = None;
    for token in &tokens {
        if let Token::Placeholder(p) = token {
            if p == SENTINEL {
                sentinel_at = Some(position);
                break;
            }
            position += 1;
        }
    }
    let position =
        sentinel_at.ok_or_else(|| unsafe_shape("injected placeholder missing after rendering"))?;
    if position > params.len() {
        return Err(unsafe_shape(format!(
            "statement carries {position} placeholders before the tenant predicate but only {} parameters were supplied",
            params.len()
        )));
    }

    let mut params = params;
    params.insert(position, SqlValue::Text(tenant_id.to_string()));
    Ok(GuardedQuery {
        sql: rendered.replace(SENTINEL, "?"),
        params,
        decision: RewriteDecision::Injected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> QuerySafetyRewriter {
        QuerySafetyRewriter::new(Arc::new(ProtectedTableRegistry::standard()))
    }

    fn tenant() -> Uuid {
        Uuid::from_u128(5)
    }

    fn tenant_param() -> SqlValue {
        SqlValue::Text(tenant().to_string())
    }

    #[test]
    fn injects_predicate_in_front_of_existing_where() {
        let guarded = rewriter()
            .rewrite(
                "SELECT * FROM members WHERE status = 'active'",
                vec![],
                Some(tenant()),
            )
            .unwrap();
        assert_eq!(
            guarded.sql,
            "SELECT * FROM members WHERE tenant_id = ? AND status = 'active'"
        );
        assert_eq!(guarded.params, vec![tenant_param()]);
        assert_eq!(guarded.decision, RewriteDecision::Injected);
    }

    #[test]
    fn adds_where_clause_when_missing() {
        let guarded = rewriter()
            .rewrite("SELECT id, full_name FROM members", vec![], Some(tenant()))
            .unwrap();
        assert_eq!(
            guarded.sql,
            "SELECT id, full_name FROM members WHERE tenant_id = ?"
        );
        assert_eq!(guarded.params, vec![tenant_param()]);
    }

    #[test]
    fn rewriting_is_idempotent() {
        let r = rewriter();
        let first = r
            .rewrite(
                "SELECT * FROM members WHERE status = ?",
                vec![SqlValue::from("active")],
                Some(tenant()),
            )
            .unwrap();
        let second = r
            .rewrite(&first.sql, first.params.clone(), Some(tenant()))
            .unwrap();
        assert_eq!(second.decision, RewriteDecision::AlreadyScoped);
        assert_eq!(second.sql, first.sql);
        assert_eq!(second.params, first.params);
    }

    #[test]
    fn splices_tenant_param_between_existing_placeholders() {
        let guarded = rewriter()
            .rewrite(
                "UPDATE members SET phone = ? WHERE id = ?",
                vec![SqlValue::from("0712000000"), SqlValue::from("m-17")],
                Some(tenant()),
            )
            .unwrap();
        assert_eq!(
            guarded.sql,
            "UPDATE members SET phone = ? WHERE tenant_id = ? AND id = ?"
        );
        assert_eq!(
            guarded.params,
            vec![
                SqlValue::from("0712000000"),
                tenant_param(),
                SqlValue::from("m-17"),
            ]
        );
    }

    #[test]
    fn insert_passes_through_untouched() {
        let sql = "INSERT INTO members (id, tenant_id, full_name) VALUES (?, ?, ?)";
        let params = vec![
            SqlValue::from("m-1"),
            tenant_param(),
            SqlValue::from("Grace Wanjiru"),
        ];
        let guarded = rewriter()
            .rewrite(sql, params.clone(), Some(tenant()))
            .unwrap();
        assert_eq!(guarded.sql, sql);
        assert_eq!(guarded.params, params);
        assert_eq!(guarded.decision, RewriteDecision::Passthrough);
    }

    #[test]
    fn system_tables_pass_through_under_a_binding() {
        let guarded = rewriter()
            .rewrite(
                "SELECT COUNT(*) FROM tenants WHERE status = 'active'",
                vec![],
                Some(tenant()),
            )
            .unwrap();
        assert_eq!(guarded.decision, RewriteDecision::Passthrough);
    }

    #[test]
    fn unbound_statements_pass_through() {
        let guarded = rewriter()
            .rewrite("SELECT * FROM members", vec![], None)
            .unwrap();
        assert_eq!(guarded.decision, RewriteDecision::Passthrough);
        assert_eq!(guarded.sql, "SELECT * FROM members");
    }

    #[test]
    fn join_with_one_scoped_table_gets_qualified_predicate() {
        let guarded = rewriter()
            .rewrite(
                "SELECT m.full_name, b.name FROM members AS m JOIN branches AS b ON b.id = m.branch_id WHERE m.status = ?",
                vec![SqlValue::from("active")],
                Some(tenant()),
            )
            .unwrap();
        assert!(
            guarded
                .sql
                .contains("WHERE m.tenant_id = ? AND m.status = ?"),
            "unexpected sql: {}",
            guarded.sql
        );
        assert_eq!(
            guarded.params,
            vec![tenant_param(), SqlValue::from("active")]
        );
    }

    #[test]
    fn or_conditions_are_parenthesized() {
        let guarded = rewriter()
            .rewrite(
                "SELECT * FROM members WHERE status = 'active' OR status = 'pending'",
                vec![],
                Some(tenant()),
            )
            .unwrap();
        assert_eq!(
            guarded.sql,
            "SELECT * FROM members WHERE tenant_id = ? AND (status = 'active' OR status = 'pending')"
        );
    }

    #[test]
    fn delete_is_scoped() {
        let guarded = rewriter()
            .rewrite(
                "DELETE FROM savings_transactions WHERE posted_at < ?",
                vec![SqlValue::from("2026-01-01")],
                Some(tenant()),
            )
            .unwrap();
        assert_eq!(
            guarded.sql,
            "DELETE FROM savings_transactions WHERE tenant_id = ? AND posted_at < ?"
        );
        assert_eq!(
            guarded.params,
            vec![tenant_param(), SqlValue::from("2026-01-01")]
        );
    }

    #[test]
    fn rejects_statements_joining_two_scoped_tables() {
        let err = rewriter()
            .rewrite(
                "SELECT * FROM members JOIN loans ON loans.member_id = members.id",
                vec![],
                Some(tenant()),
            )
            .unwrap_err();
        assert!(matches!(err, SaccoError::UnsafeQueryShape(_)));
    }

    #[test]
    fn rejects_scoped_table_hidden_in_subquery() {
        let err = rewriter()
            .rewrite(
                "SELECT * FROM reports WHERE member_id IN (SELECT id FROM members)",
                vec![],
                Some(tenant()),
            )
            .unwrap_err();
        assert!(matches!(err, SaccoError::UnsafeQueryShape(_)));
    }

    #[test]
    fn rejects_unparseable_statements() {
        let err = rewriter()
            .rewrite("SELETC * FORM members", vec![], Some(tenant()))
            .unwrap_err();
        assert!(matches!(err, SaccoError::UnsafeQueryShape(_)));
    }

    #[test]
    fn rejects_multi_statement_input() {
        let err = rewriter()
            .rewrite(
                "SELECT * FROM members; DELETE FROM members",
                vec![],
                Some(tenant()),
            )
            .unwrap_err();
        assert!(matches!(err, SaccoError::UnsafeQueryShape(_)));
    }

    #[test]
    fn rejects_assigning_the_tenant_column() {
        let err = rewriter()
            .rewrite(
                "UPDATE members SET tenant_id = ? WHERE id = ?",
                vec![SqlValue::from("t-2"), SqlValue::from("m-1")],
                Some(tenant()),
            )
            .unwrap_err();
        assert!(matches!(err, SaccoError::UnsafeQueryShape(_)));
    }

    #[test]
    fn rejects_self_joins_of_scoped_tables() {
        let err = rewriter()
            .rewrite(
                "SELECT a.id FROM members AS a JOIN members AS b ON a.id = b.referrer_id",
                vec![],
                Some(tenant()),
            )
            .unwrap_err();
        assert!(matches!(err, SaccoError::UnsafeQueryShape(_)));
    }

    #[test]
    fn rejects_ddl_touching_scoped_tables() {
        let err = rewriter()
            .rewrite("DROP TABLE members", vec![], Some(tenant()))
            .unwrap_err();
        assert!(matches!(err, SaccoError::UnsafeQueryShape(_)));
    }

    #[test]
    fn rejects_foreign_placeholder_styles() {
        let err = rewriter()
            .rewrite(
                "SELECT * FROM members WHERE id = $1",
                vec![SqlValue::from("m-1")],
                Some(tenant()),
            )
            .unwrap_err();
        assert!(matches!(err, SaccoError::UnsafeQueryShape(_)));
    }
}
