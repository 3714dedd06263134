//! # Statistics Calculator
//!
//! Derives a [`PlanNodeStatsEstimate`] for a node from its sources' estimates and,
//! for scans, from catalog statistics. Derivation is bottom-up and composed from
//! per-operator [`StatsRule`]s.
//!
//! ## Rule Table
//!
//! [`ComposableStatsCalculator`] keeps one ordered list of rules per [`OperatorKind`].
//! The lookup is an exhaustive `match` over the kind, so a new operator kind cannot be
//! added without deciding where its rules live. Rules for a kind are tried in
//! registration order and the first one that returns an estimate wins. A node no rule
//! handles gets an unknown estimate.
//!
//! ## Unknowns
//!
//! A rule that needs a child's row count and finds it unknown returns an unknown
//! estimate. Defaults are never substituted for missing inputs.
//!
//! ## Caching
//!
//! [`CachingStatsProvider`] stores each group's estimate in the memo. The memo clears
//! it whenever the group or one of its descendants is rewritten.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::expr::{BinaryOp, Expr, ScalarValue};
use crate::memo::{Lookup, Memo};
use crate::plan::{JoinType, Operator, OperatorKind, PlanNode, Source};
use crate::selectivity::{estimate_selectivity, narrow_symbol_stats, DEFAULT_FILTER_SELECTIVITY};
use crate::session::Session;
use crate::stats::{Estimate, PlanNodeStatsEstimate, SymbolStatsEstimate};
use crate::symbol::{Symbol, TypeProvider};
use std::collections::BTreeMap;
use tracing::trace;

/// Read-only environment for statistics derivation.
#[derive(Clone, Copy)]
pub struct StatsContext<'a> {
    pub lookup: &'a dyn Lookup,
    pub session: &'a Session,
    pub types: &'a TypeProvider,
    pub catalog: &'a dyn Catalog,
}

/// Statistics of sources, as seen by rules and cost calculators.
pub trait StatsProvider {
    fn stats(&self, source: &Source) -> Result<PlanNodeStatsEstimate>;

    /// Statistics of `node` itself; its sources are resolved through [`Self::stats`].
    fn node_stats(&self, node: &PlanNode) -> Result<PlanNodeStatsEstimate>;
}

/// Derivation rule for one operator kind.
pub trait StatsRule: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> OperatorKind;

    /// `None` when this rule cannot handle `node`; the next rule is tried.
    fn calculate(
        &self,
        node: &PlanNode,
        sources: &dyn StatsProvider,
        ctx: &StatsContext,
    ) -> Result<Option<PlanNodeStatsEstimate>>;
}

pub trait StatsCalculator: Send + Sync {
    fn calculate_stats(
        &self,
        node: &PlanNode,
        sources: &dyn StatsProvider,
        ctx: &StatsContext,
    ) -> Result<PlanNodeStatsEstimate>;
}

#[derive(Default)]
struct RuleTable {
    table_scan: Vec<Box<dyn StatsRule>>,
    values: Vec<Box<dyn StatsRule>>,
    filter: Vec<Box<dyn StatsRule>>,
    project: Vec<Box<dyn StatsRule>>,
    join: Vec<Box<dyn StatsRule>>,
    aggregate: Vec<Box<dyn StatsRule>>,
    sort: Vec<Box<dyn StatsRule>>,
    limit: Vec<Box<dyn StatsRule>>,
    exchange: Vec<Box<dyn StatsRule>>,
}

impl RuleTable {
    fn slot(&mut self, kind: OperatorKind) -> &mut Vec<Box<dyn StatsRule>> {
        match kind {
            OperatorKind::TableScan => &mut self.table_scan,
            OperatorKind::Values => &mut self.values,
            OperatorKind::Filter => &mut self.filter,
            OperatorKind::Project => &mut self.project,
            OperatorKind::Join => &mut self.join,
            OperatorKind::Aggregate => &mut self.aggregate,
            OperatorKind::Sort => &mut self.sort,
            OperatorKind::Limit => &mut self.limit,
            OperatorKind::Exchange => &mut self.exchange,
        }
    }

    fn rules(&self, kind: OperatorKind) -> &[Box<dyn StatsRule>] {
        match kind {
            OperatorKind::TableScan => &self.table_scan,
            OperatorKind::Values => &self.values,
            OperatorKind::Filter => &self.filter,
            OperatorKind::Project => &self.project,
            OperatorKind::Join => &self.join,
            OperatorKind::Aggregate => &self.aggregate,
            OperatorKind::Sort => &self.sort,
            OperatorKind::Limit => &self.limit,
            OperatorKind::Exchange => &self.exchange,
        }
    }
}

/// Per-kind registry of [`StatsRule`]s.
#[derive(Default)]
pub struct ComposableStatsCalculator {
    rules: RuleTable,
}

impl ComposableStatsCalculator {
    /// A calculator without rules. Every estimate is unknown.
    pub fn new() -> Self {
        Self::default()
    }

    /// A calculator with the built-in rule for every operator kind.
    pub fn with_default_rules() -> Self {
        Self::new()
            .with_rule(Box::new(TableScanStatsRule))
            .with_rule(Box::new(ValuesStatsRule))
            .with_rule(Box::new(FilterStatsRule))
            .with_rule(Box::new(ProjectStatsRule))
            .with_rule(Box::new(JoinStatsRule))
            .with_rule(Box::new(AggregationStatsRule))
            .with_rule(Box::new(PassThroughStatsRule(OperatorKind::Sort)))
            .with_rule(Box::new(LimitStatsRule))
            .with_rule(Box::new(PassThroughStatsRule(OperatorKind::Exchange)))
    }

    /// Append `rule` after the rules already registered for its kind.
    pub fn with_rule(mut self, rule: Box<dyn StatsRule>) -> Self {
        self.rules.slot(rule.kind()).push(rule);
        self
    }
}

impl StatsCalculator for ComposableStatsCalculator {
    fn calculate_stats(
        &self,
        node: &PlanNode,
        sources: &dyn StatsProvider,
        ctx: &StatsContext,
    ) -> Result<PlanNodeStatsEstimate> {
        for rule in self.rules.rules(node.kind()) {
            if let Some(stats) = rule.calculate(node, sources, ctx)? {
                trace!(rule = rule.name(), node = %node.id, rows = ?stats.output_row_count, "derived stats");
                return Ok(stats);
            }
        }
        Ok(PlanNodeStatsEstimate::unknown())
    }
}

/// Memo-backed provider that caches per group.
pub struct CachingStatsProvider<'a> {
    calculator: &'a dyn StatsCalculator,
    memo: &'a Memo,
    session: &'a Session,
    types: &'a TypeProvider,
    catalog: &'a dyn Catalog,
}

impl<'a> CachingStatsProvider<'a> {
    pub fn new(
        calculator: &'a dyn StatsCalculator,
        memo: &'a Memo,
        session: &'a Session,
        types: &'a TypeProvider,
        catalog: &'a dyn Catalog,
    ) -> Self {
        Self {
            calculator,
            memo,
            session,
            types,
            catalog,
        }
    }
}

impl StatsProvider for CachingStatsProvider<'_> {
    fn stats(&self, source: &Source) -> Result<PlanNodeStatsEstimate> {
        match source {
            Source::Group(group) => {
                if let Some(cached) = self.memo.cached_stats(*group) {
                    return Ok(cached);
                }
                let stats = self.node_stats(self.memo.resolve_group(*group))?;
                self.memo.store_stats(*group, stats.clone());
                Ok(stats)
            }
            Source::Node(node) => self.node_stats(node),
        }
    }

    fn node_stats(&self, node: &PlanNode) -> Result<PlanNodeStatsEstimate> {
        let ctx = StatsContext {
            lookup: self.memo,
            session: self.session,
            types: self.types,
            catalog: self.catalog,
        };
        self.calculator.calculate_stats(node, self, &ctx)
    }
}

fn source_stats(
    node: &PlanNode,
    index: usize,
    sources: &dyn StatsProvider,
) -> Result<PlanNodeStatsEstimate> {
    match node.sources.get(index) {
        Some(source) => sources.stats(source),
        None => Ok(PlanNodeStatsEstimate::unknown()),
    }
}

/// Apply `predicate` to `input`: scale rows by selectivity, narrow symbols constrained
/// by literal comparisons and cap distinct counts at the new row count.
pub fn filter_stats(input: &PlanNodeStatsEstimate, predicate: &Expr) -> PlanNodeStatsEstimate {
    let selectivity = estimate_selectivity(predicate, input);
    let rows = input.output_row_count * selectivity;
    let mut symbol_statistics = input.symbol_statistics.clone();
    for conjunct in predicate.conjuncts() {
        if let Expr::BinaryOp { op, left, right } = conjunct {
            if let (Expr::Symbol(symbol), Expr::Literal(value)) = (left.as_ref(), right.as_ref()) {
                let narrowed = narrow_symbol_stats(input.symbol_stats(symbol), *op, value);
                symbol_statistics.insert(symbol.clone(), narrowed);
            }
        }
    }
    for stats in symbol_statistics.values_mut() {
        *stats = stats.capped_at(rows);
    }
    PlanNodeStatsEstimate {
        output_row_count: rows,
        symbol_statistics,
    }
}

pub struct TableScanStatsRule;

impl StatsRule for TableScanStatsRule {
    fn name(&self) -> &str {
        "table_scan"
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::TableScan
    }

    fn calculate(
        &self,
        node: &PlanNode,
        _sources: &dyn StatsProvider,
        ctx: &StatsContext,
    ) -> Result<Option<PlanNodeStatsEstimate>> {
        let Operator::TableScan {
            table,
            assignments,
            predicate,
        } = &node.op
        else {
            return Ok(None);
        };
        let table_stats = ctx.catalog.table_statistics(table);
        let symbol_statistics = assignments
            .iter()
            .filter_map(|a| {
                table_stats
                    .columns
                    .get(&a.column)
                    .map(|c| (a.symbol.clone(), c.to_symbol_stats()))
            })
            .collect();
        let stats = PlanNodeStatsEstimate {
            output_row_count: table_stats.row_count,
            symbol_statistics,
        };
        Ok(Some(match predicate {
            Some(p) => filter_stats(&stats, p),
            None => stats,
        }))
    }
}

/// Exact row count; no symbol statistics.
pub struct ValuesStatsRule;

impl StatsRule for ValuesStatsRule {
    fn name(&self) -> &str {
        "values"
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::Values
    }

    fn calculate(
        &self,
        node: &PlanNode,
        _sources: &dyn StatsProvider,
        _ctx: &StatsContext,
    ) -> Result<Option<PlanNodeStatsEstimate>> {
        let Operator::Values { rows, .. } = &node.op else {
            return Ok(None);
        };
        Ok(Some(PlanNodeStatsEstimate::with_row_count(rows.len() as f64)))
    }
}

pub struct FilterStatsRule;

impl StatsRule for FilterStatsRule {
    fn name(&self) -> &str {
        "filter"
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::Filter
    }

    fn calculate(
        &self,
        node: &PlanNode,
        sources: &dyn StatsProvider,
        _ctx: &StatsContext,
    ) -> Result<Option<PlanNodeStatsEstimate>> {
        let Operator::Filter { predicate } = &node.op else {
            return Ok(None);
        };
        let input = source_stats(node, 0, sources)?;
        Ok(Some(filter_stats(&input, predicate)))
    }
}

/// Symbol references keep their statistics; literals get exact ones.
pub struct ProjectStatsRule;

impl StatsRule for ProjectStatsRule {
    fn name(&self) -> &str {
        "project"
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::Project
    }

    fn calculate(
        &self,
        node: &PlanNode,
        sources: &dyn StatsProvider,
        _ctx: &StatsContext,
    ) -> Result<Option<PlanNodeStatsEstimate>> {
        let Operator::Project { assignments } = &node.op else {
            return Ok(None);
        };
        let input = source_stats(node, 0, sources)?;
        let mut symbol_statistics = BTreeMap::new();
        for assignment in assignments {
            let stats = match &assignment.expr {
                Expr::Symbol(s) => input.symbol_statistics.get(s).copied(),
                Expr::Literal(value) => Some(literal_stats(value)),
                _ => None,
            };
            if let Some(stats) = stats {
                symbol_statistics.insert(assignment.symbol.clone(), stats);
            }
        }
        Ok(Some(PlanNodeStatsEstimate {
            output_row_count: input.output_row_count,
            symbol_statistics,
        }))
    }
}

fn literal_stats(value: &ScalarValue) -> SymbolStatsEstimate {
    if value.is_null() {
        return SymbolStatsEstimate::unknown()
            .with_nulls_fraction(1.0)
            .with_distinct_values(0.0);
    }
    let stats = SymbolStatsEstimate::unknown()
        .with_nulls_fraction(0.0)
        .with_distinct_values(1.0);
    match value.as_f64() {
        Some(v) => stats.with_range(v, v),
        None => stats,
    }
}

/// Equi-join cardinality under the containment assumption:
///
/// ```text
/// |L JOIN R| = |L| * |R| / Π max(NDV(l_i), NDV(r_i))
/// ```
///
/// Remaining non-equi conjuncts are applied as a filter. Outer joins never produce
/// fewer rows than their preserved side(s); semi joins never more than the left side.
pub struct JoinStatsRule;

impl JoinStatsRule {
    fn inner_estimate(
        condition: &Expr,
        left: &PlanNodeStatsEstimate,
        right: &PlanNodeStatsEstimate,
        left_symbols: &[Symbol],
        right_symbols: &[Symbol],
    ) -> PlanNodeStatsEstimate {
        let mut combined = left.clone();
        combined
            .symbol_statistics
            .extend(right.symbol_statistics.iter().map(|(s, st)| (s.clone(), *st)));

        let mut rows = left.output_row_count * right.output_row_count;
        let mut residual = Vec::new();
        for conjunct in condition.conjuncts() {
            match equi_clause(conjunct, left_symbols, right_symbols) {
                Some((l, r)) => {
                    let ndv_l = left.symbol_stats(l).distinct_values_count;
                    let ndv_r = right.symbol_stats(r).distinct_values_count;
                    rows = rows / ndv_l.max(ndv_r).max(Estimate::known(1.0));
                }
                None => residual.push(conjunct.clone()),
            }
        }
        combined.output_row_count = rows;
        let residual = Expr::and_all(residual);
        if residual.is_true() {
            for stats in combined.symbol_statistics.values_mut() {
                *stats = stats.capped_at(rows);
            }
            combined
        } else {
            filter_stats(&combined, &residual)
        }
    }
}

/// `(left symbol, right symbol)` of an `l = r` conjunct across the join sides.
fn equi_clause<'e>(
    conjunct: &'e Expr,
    left_symbols: &[Symbol],
    right_symbols: &[Symbol],
) -> Option<(&'e Symbol, &'e Symbol)> {
    let Expr::BinaryOp {
        op: BinaryOp::Eq,
        left,
        right,
    } = conjunct
    else {
        return None;
    };
    let (a, b) = (left.as_symbol()?, right.as_symbol()?);
    if left_symbols.contains(a) && right_symbols.contains(b) {
        Some((a, b))
    } else if left_symbols.contains(b) && right_symbols.contains(a) {
        Some((b, a))
    } else {
        None
    }
}

impl StatsRule for JoinStatsRule {
    fn name(&self) -> &str {
        "join"
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::Join
    }

    fn calculate(
        &self,
        node: &PlanNode,
        sources: &dyn StatsProvider,
        ctx: &StatsContext,
    ) -> Result<Option<PlanNodeStatsEstimate>> {
        let Operator::Join {
            join_type,
            condition,
        } = &node.op
        else {
            return Ok(None);
        };
        let left = source_stats(node, 0, sources)?;
        let right = source_stats(node, 1, sources)?;
        if left.is_output_row_count_unknown() || right.is_output_row_count_unknown() {
            return Ok(Some(PlanNodeStatsEstimate::unknown()));
        }
        let left_symbols = node.sources[0].output_symbols(ctx.lookup);
        let right_symbols = node.sources[1].output_symbols(ctx.lookup);
        let inner = Self::inner_estimate(condition, &left, &right, &left_symbols, &right_symbols);
        let (l, r) = (left.output_row_count, right.output_row_count);

        let mut stats = match join_type {
            JoinType::Inner | JoinType::Cross => inner,
            JoinType::Left => PlanNodeStatsEstimate {
                output_row_count: inner.output_row_count.max(l),
                ..inner
            },
            JoinType::Right => PlanNodeStatsEstimate {
                output_row_count: inner.output_row_count.max(r),
                ..inner
            },
            JoinType::Full => PlanNodeStatsEstimate {
                output_row_count: inner.output_row_count.max(l).max(r),
                ..inner
            },
            JoinType::Semi => PlanNodeStatsEstimate {
                output_row_count: inner.output_row_count.min(l),
                ..inner.restricted_to(&left_symbols)
            },
            JoinType::Anti => {
                let matched = inner.output_row_count.min(l);
                // Containment makes "every row matches" common; never estimate an
                // anti join below the default filter fraction of its input.
                let rows = (l - matched).max(l * DEFAULT_FILTER_SELECTIVITY);
                PlanNodeStatsEstimate {
                    output_row_count: rows,
                    ..left.restricted_to(&left_symbols)
                }
            }
        };
        let rows = stats.output_row_count;
        for symbol_stats in stats.symbol_statistics.values_mut() {
            *symbol_stats = symbol_stats.capped_at(rows);
        }
        Ok(Some(stats))
    }
}

/// Product of group-key NDVs capped at input rows; a global aggregation is one row.
pub struct AggregationStatsRule;

impl StatsRule for AggregationStatsRule {
    fn name(&self) -> &str {
        "aggregation"
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::Aggregate
    }

    fn calculate(
        &self,
        node: &PlanNode,
        sources: &dyn StatsProvider,
        _ctx: &StatsContext,
    ) -> Result<Option<PlanNodeStatsEstimate>> {
        let Operator::Aggregate { group_by, .. } = &node.op else {
            return Ok(None);
        };
        if group_by.is_empty() {
            return Ok(Some(PlanNodeStatsEstimate::with_row_count(1.0)));
        }
        let input = source_stats(node, 0, sources)?;
        let mut groups = Estimate::known(1.0);
        for key in group_by {
            let stats = input.symbol_stats(key);
            // NULL forms its own group.
            let null_group = match stats.nulls_fraction.value() {
                Some(f) if f > 0.0 => 1.0,
                _ => 0.0,
            };
            groups = groups * stats.distinct_values_count.map(|ndv| ndv + null_group);
        }
        let rows = groups.min(input.output_row_count);
        let symbol_statistics = group_by
            .iter()
            .filter_map(|key| {
                input
                    .symbol_statistics
                    .get(key)
                    .map(|s| (key.clone(), s.capped_at(rows)))
            })
            .collect();
        Ok(Some(PlanNodeStatsEstimate {
            output_row_count: rows,
            symbol_statistics,
        }))
    }
}

/// `min(count, rows - offset)`.
pub struct LimitStatsRule;

impl StatsRule for LimitStatsRule {
    fn name(&self) -> &str {
        "limit"
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::Limit
    }

    fn calculate(
        &self,
        node: &PlanNode,
        sources: &dyn StatsProvider,
        _ctx: &StatsContext,
    ) -> Result<Option<PlanNodeStatsEstimate>> {
        let Operator::Limit { offset, count } = &node.op else {
            return Ok(None);
        };
        let input = source_stats(node, 0, sources)?;
        let remaining = (input.output_row_count - Estimate::known(*offset as f64))
            .max(Estimate::ZERO);
        let rows = remaining.min(Estimate::known(*count as f64));
        let mut stats = input;
        stats.output_row_count = rows;
        for symbol_stats in stats.symbol_statistics.values_mut() {
            *symbol_stats = symbol_stats.capped_at(rows);
        }
        Ok(Some(stats))
    }
}

/// Operators that neither add nor remove rows.
pub struct PassThroughStatsRule(pub OperatorKind);

impl StatsRule for PassThroughStatsRule {
    fn name(&self) -> &str {
        "pass_through"
    }

    fn kind(&self) -> OperatorKind {
        self.0
    }

    fn calculate(
        &self,
        node: &PlanNode,
        sources: &dyn StatsProvider,
        _ctx: &StatsContext,
    ) -> Result<Option<PlanNodeStatsEstimate>> {
        if node.sources.len() != 1 {
            return Ok(None);
        }
        source_stats(node, 0, sources).map(Some)
    }
}
