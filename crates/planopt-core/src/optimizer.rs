//! # Iterative Optimizer
//!
//! Fixed-point driver that applies the rule registry to a memoized plan until no rule
//! changes anything or the session's time budget runs out.
//!
//! ## How It Works
//!
//! 1. The input plan is checked and inserted into a fresh [`Memo`].
//! 2. Each **pass** walks the memo from the root in post-order: a group's sources are
//!    visited before the group itself, so a parent sees its children's latest shape.
//!    Every group is visited at most once per pass.
//! 3. At each group the driver is `Exploring`: it walks the active rule partitions in
//!    order and applies the (single) matching rule of each until one fires. At most one
//!    rule fires per group per pass.
//! 4. A fired rule moves the driver to `Rewriting`: the replacement is recorded in the
//!    memo, which invalidates cached statistics and cost for the group and its
//!    ancestors.
//! 5. A pass without replacements means a fixed point: the driver is `Converged`. A
//!    rule that rewrites a group back to an expression it already held is not a
//!    replacement, so rules that undo each other converge too.
//!
//! ## Termination
//!
//! The deadline is checked before every rule application. When it passes, the driver
//! stops issuing rule applications and finishes normally in `TimedOut` with the plan
//! recorded so far. Cancellation is observed only between passes, since a replacement
//! is always applied atomically. Errors move the driver to `Failed` and are returned
//! to the caller without a plan.
//!
//! ## Extraction
//!
//! Each group keeps every expression it ever accepted. Extraction works bottom-up: an
//! alternative's cumulative cost is its local cost plus the cost of the alternatives
//! chosen for its sources. A group keeps its current expression unless another one is
//! strictly cheaper; when costs are incomparable (unknown), the current one is kept.

use crate::catalog::Catalog;
use crate::cost::{
    CachingCostProvider, CostCalculator, CostComparator, CostProvider, PlanNodeCostEstimate,
};
use crate::error::{OptimizerError, Result};
use crate::memo::{GroupId, Lookup, Memo, NoLookup};
use crate::plan::{PlanNode, Source};
use crate::rule::{OptContext, RuleRegistry};
use crate::sanity::{ensure_concrete, validate_plan};
use crate::session::Session;
use crate::stats_calculator::{CachingStatsProvider, StatsCalculator};
use crate::symbol::TypeProvider;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    Exploring,
    Rewriting,
    Converged,
    TimedOut,
    Failed,
}

/// Shared flag a caller sets to abandon an optimization.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizerOutcome {
    pub plan: PlanNode,
    /// `Converged` or `TimedOut`.
    pub state: DriverState,
    pub passes: usize,
    pub rule_applications: usize,
    /// Cumulative cost of `plan`.
    pub cost: PlanNodeCostEstimate,
}

/// The optimizer. Immutable and shareable; each call to [`optimize`](Self::optimize)
/// owns a private memo.
pub struct IterativeOptimizer {
    rules: Arc<RuleRegistry>,
    stats_calculator: Arc<dyn StatsCalculator>,
    cost_calculator: Arc<dyn CostCalculator>,
    catalog: Arc<dyn Catalog>,
}

impl IterativeOptimizer {
    pub fn new(
        rules: Arc<RuleRegistry>,
        stats_calculator: Arc<dyn StatsCalculator>,
        cost_calculator: Arc<dyn CostCalculator>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            rules,
            stats_calculator,
            cost_calculator,
            catalog,
        }
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Optimize `plan` to a fixed point or until the session's timeout.
    pub fn optimize(
        &self,
        plan: PlanNode,
        types: &TypeProvider,
        session: &Session,
        cancel: &CancellationFlag,
    ) -> Result<OptimizerOutcome> {
        let mut driver = Driver {
            optimizer: self,
            types,
            session,
            deadline: Instant::now() + session.optimizer_timeout(),
            state: DriverState::Exploring,
            passes: 0,
            rule_applications: 0,
        };
        let result = driver.run(plan, cancel);
        if let Err(err) = &result {
            driver.transition(DriverState::Failed);
            debug!(error = %err, passes = driver.passes, "optimization failed");
        }
        result
    }
}

/// State of one optimization session.
struct Driver<'a> {
    optimizer: &'a IterativeOptimizer,
    types: &'a TypeProvider,
    session: &'a Session,
    deadline: Instant,
    state: DriverState,
    passes: usize,
    rule_applications: usize,
}

/// Outcome of a single pass.
#[derive(Default)]
struct Pass {
    visited: HashSet<GroupId>,
    replacements: usize,
    timed_out: bool,
}

impl Driver<'_> {
    fn transition(&mut self, state: DriverState) {
        if self.state != state {
            trace!(from = ?self.state, to = ?state, "driver state");
            self.state = state;
        }
    }

    fn run(&mut self, plan: PlanNode, cancel: &CancellationFlag) -> Result<OptimizerOutcome> {
        ensure_concrete(&plan)?;
        validate_plan(&plan, self.types, &NoLookup)?;

        let mut memo = Memo::new();
        let root = memo.insert(plan)?;
        debug!(
            groups = memo.num_groups(),
            partitions = self.optimizer.rules.partitions().len(),
            rules = self.optimizer.rules.num_rules(),
            "starting iterative optimization"
        );

        loop {
            if cancel.is_cancelled() {
                return Err(OptimizerError::Cancelled);
            }
            if Instant::now() >= self.deadline {
                self.transition(DriverState::TimedOut);
                break;
            }
            self.passes += 1;
            let mut pass = Pass::default();
            self.explore_group(&mut memo, root, &mut pass)?;
            debug!(
                pass = self.passes,
                replacements = pass.replacements,
                groups = memo.num_groups(),
                "finished pass"
            );
            if pass.timed_out {
                self.transition(DriverState::TimedOut);
                break;
            }
            if pass.replacements == 0 {
                self.transition(DriverState::Converged);
                break;
            }
        }

        let (plan, cost) = self.extract(&memo, root)?;
        validate_plan(&plan, self.types, &NoLookup)?;
        debug!(
            state = ?self.state,
            passes = self.passes,
            rule_applications = self.rule_applications,
            groups = memo.num_groups(),
            expressions = memo.num_expressions(),
            "optimization complete"
        );
        Ok(OptimizerOutcome {
            plan,
            state: self.state,
            passes: self.passes,
            rule_applications: self.rule_applications,
            cost,
        })
    }

    /// Post-order visit of `group` and everything below it.
    fn explore_group(&mut self, memo: &mut Memo, group: GroupId, pass: &mut Pass) -> Result<()> {
        if !pass.visited.insert(group) {
            return Ok(());
        }
        let children: Vec<GroupId> = memo
            .resolve_group(group)
            .sources
            .iter()
            .filter_map(Source::as_group)
            .collect();
        for child in children {
            self.explore_group(memo, child, pass)?;
            if pass.timed_out {
                return Ok(());
            }
        }
        if Instant::now() >= self.deadline {
            pass.timed_out = true;
            return Ok(());
        }
        self.transition(DriverState::Exploring);
        if self.apply_rules(memo, group)? {
            pass.replacements += 1;
        }
        Ok(())
    }

    /// Fire at most one rule on the current expression of `group`.
    fn apply_rules(&mut self, memo: &mut Memo, group: GroupId) -> Result<bool> {
        let fired = {
            let memo: &Memo = memo;
            let stats = self.stats_provider(memo);
            let cost = CachingCostProvider::new(
                self.optimizer.cost_calculator.as_ref(),
                &stats,
                memo,
                self.session,
                self.types,
            );
            let ctx = OptContext {
                lookup: memo,
                session: self.session,
                types: self.types,
                stats: &stats,
                cost: &cost,
            };
            let node = memo.resolve_group(group);
            let mut fired = None;
            for partition in self.optimizer.rules.active_partitions(self.session) {
                let Some(rule) = partition.matching_rule(node, group, memo)? else {
                    continue;
                };
                if let Some(replacement) = rule.apply(node, &ctx)? {
                    fired = Some((rule.name().to_string(), partition.name().to_string(), replacement));
                    break;
                }
            }
            fired
        };

        let Some((rule, partition, replacement)) = fired else {
            return Ok(false);
        };
        self.transition(DriverState::Rewriting);
        if !memo.replace(group, replacement)? {
            trace!(rule = rule.as_str(), group = group.0, "rule revisited a known expression");
            return Ok(false);
        }
        self.rule_applications += 1;
        trace!(rule = rule.as_str(), partition = partition.as_str(), group = group.0, "applied rule");
        Ok(true)
    }

    fn stats_provider<'m>(&'m self, memo: &'m Memo) -> CachingStatsProvider<'m> {
        CachingStatsProvider::new(
            self.optimizer.stats_calculator.as_ref(),
            memo,
            self.session,
            self.types,
            self.optimizer.catalog.as_ref(),
        )
    }

    /// Build the final tree, preferring strictly cheaper alternatives to current ones.
    fn extract(&self, memo: &Memo, root: GroupId) -> Result<(PlanNode, PlanNodeCostEstimate)> {
        let stats = self.stats_provider(memo);
        let cost = CachingCostProvider::new(
            self.optimizer.cost_calculator.as_ref(),
            &stats,
            memo,
            self.session,
            self.types,
        );
        let comparator = CostComparator::from_session(self.session);
        let mut chooser = AlternativeChooser {
            memo,
            cost: &cost,
            comparator: &comparator,
            chosen: HashMap::new(),
        };
        let (_, total) = chooser.choose(root)?;
        let chosen = chooser.chosen;
        let plan = memo.extract_with(root, &mut |memo, group| {
            chosen
                .get(&group)
                .map_or_else(|| memo.group(group).current_index(), |(index, _)| *index)
        });
        Ok((plan, total))
    }
}

/// Picks one expression per group, costing every alternative against the alternatives
/// chosen for its sources.
struct AlternativeChooser<'a> {
    memo: &'a Memo,
    cost: &'a CachingCostProvider<'a>,
    comparator: &'a CostComparator,
    chosen: HashMap<GroupId, (usize, PlanNodeCostEstimate)>,
}

impl AlternativeChooser<'_> {
    fn choose(&mut self, group: GroupId) -> Result<(usize, PlanNodeCostEstimate)> {
        if let Some(&choice) = self.chosen.get(&group) {
            return Ok(choice);
        }
        let memo = self.memo;
        let entry = memo.group(group);
        let current = entry.current_index();
        let mut best = (current, self.path_cost(&entry.expressions()[current])?);
        for (index, expr) in entry.expressions().iter().enumerate() {
            if index == current {
                continue;
            }
            let candidate = self.path_cost(expr)?;
            if self.comparator.compare(&candidate, &best.1) == Some(CmpOrdering::Less) {
                best = (index, candidate);
            }
        }
        if best.0 != current {
            trace!(group = group.0, choice = best.0, current, "kept cheaper alternative");
        }
        self.chosen.insert(group, best);
        Ok(best)
    }

    fn path_cost(&mut self, expr: &PlanNode) -> Result<PlanNodeCostEstimate> {
        let mut total = self.cost.local_cost(expr)?;
        for source in &expr.sources {
            let source_cost = match source {
                Source::Group(g) => self.choose(*g)?.1,
                Source::Node(_) => self.cost.cumulative_cost(source)?,
            };
            total = total + source_cost;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, StaticClusterTopology};
    use crate::cost_calculator::{CostCalculatorUsingExchanges, CostCalculatorWithEstimatedExchanges};
    use crate::expr::{BinaryOp, Expr};
    use crate::pattern::Pattern;
    use crate::plan::Operator;
    use crate::rule::{Rule, RulePartition};
    use crate::session::ITERATIVE_OPTIMIZER_TIMEOUT_MS;
    use crate::stats_calculator::{ComposableStatsCalculator, StatsProvider};
    use crate::symbol::{DataType, Symbol};

    /// Drops `Filter(true)`.
    struct DropTrueFilter;

    impl Rule for DropTrueFilter {
        fn name(&self) -> &str {
            "drop_true_filter"
        }

        fn pattern(&self) -> Pattern {
            Pattern::filter().matching("predicate is true", |op| {
                matches!(op, crate::plan::Operator::Filter { predicate } if predicate.is_true())
            })
        }

        fn apply(&self, node: &PlanNode, _ctx: &OptContext) -> Result<Option<Source>> {
            Ok(Some(node.sources[0].clone()))
        }
    }

    /// Matches every filter and never fires.
    struct Inert(&'static str);

    impl Rule for Inert {
        fn name(&self) -> &str {
            self.0
        }

        fn pattern(&self) -> Pattern {
            Pattern::filter()
        }

        fn apply(&self, _node: &PlanNode, _ctx: &OptContext) -> Result<Option<Source>> {
            Ok(None)
        }
    }

    /// Rewrites `Limit from` to `Limit to`.
    struct RewriteLimit {
        from: u64,
        to: u64,
    }

    impl Rule for RewriteLimit {
        fn name(&self) -> &str {
            "rewrite_limit"
        }

        fn pattern(&self) -> Pattern {
            let from = self.from;
            Pattern::limit().matching("count", move |op| {
                matches!(op, Operator::Limit { count, .. } if *count == from)
            })
        }

        fn apply(&self, node: &PlanNode, _ctx: &OptContext) -> Result<Option<Source>> {
            let Operator::Limit { offset, .. } = node.op else {
                return Ok(None);
            };
            let limit = PlanNode::new(Operator::Limit { offset, count: self.to }, node.sources.clone());
            Ok(Some(limit.into()))
        }
    }

    /// Charges a limit its row count in CPU; everything else is free.
    struct LimitCountCost;

    impl CostCalculator for LimitCountCost {
        fn calculate_cost(
            &self,
            node: &PlanNode,
            _stats: &dyn StatsProvider,
            _lookup: &dyn Lookup,
            _session: &Session,
            _types: &TypeProvider,
        ) -> Result<PlanNodeCostEstimate> {
            match node.op {
                Operator::Limit { count, .. } => PlanNodeCostEstimate::cpu_cost(count as f64),
                _ => Ok(PlanNodeCostEstimate::ZERO_COST),
            }
        }
    }

    fn optimizer(registry: RuleRegistry) -> IterativeOptimizer {
        IterativeOptimizer::new(
            Arc::new(registry),
            Arc::new(ComposableStatsCalculator::with_default_rules()),
            Arc::new(CostCalculatorUsingExchanges::new(&StaticClusterTopology(1))),
            Arc::new(InMemoryCatalog::new()),
        )
    }

    fn types() -> TypeProvider {
        TypeProvider::new().with("a", DataType::Bigint)
    }

    fn values() -> PlanNode {
        PlanNode::values(vec![Symbol::new("a")], vec![vec![Expr::int(1)], vec![Expr::int(2)]])
    }

    fn nested_true_filters(depth: usize) -> PlanNode {
        (0..depth).fold(values(), |plan, _| PlanNode::filter(Expr::TRUE, plan))
    }

    #[test]
    fn test_converges_and_removes_filters() {
        let registry = RuleRegistry::new()
            .with_partition(RulePartition::new("drop").with_rule(Box::new(DropTrueFilter)));
        let outcome = optimizer(registry)
            .optimize(nested_true_filters(3), &types(), &Session::new(), &CancellationFlag::new())
            .unwrap();
        assert_eq!(outcome.state, DriverState::Converged);
        assert_eq!(outcome.plan.kind(), crate::plan::OperatorKind::Values);
        assert_eq!(outcome.rule_applications, 3);
        // Post-order sees each filter after its source was rewritten, so one pass
        // removes all of them and a second one finds nothing to do.
        let rewriting_passes = 1;
        let convergence_check = 1;
        assert_eq!(outcome.passes, rewriting_passes + convergence_check);
        assert_eq!(outcome.cost, PlanNodeCostEstimate::ZERO_COST);
    }

    #[test]
    fn test_inverse_rules_converge() {
        let registry = RuleRegistry::new()
            .with_partition(
                RulePartition::new("grow").with_rule(Box::new(RewriteLimit { from: 5, to: 6 })),
            )
            .with_partition(
                RulePartition::new("shrink").with_rule(Box::new(RewriteLimit { from: 6, to: 5 })),
            );
        let outcome = optimizer(registry)
            .optimize(PlanNode::limit(5, values()), &types(), &Session::new(), &CancellationFlag::new())
            .unwrap();
        assert_eq!(outcome.state, DriverState::Converged);
        // 5 -> 6 is new; 6 -> 5 returns to a known expression.
        assert_eq!(outcome.rule_applications, 1);
        assert_eq!(outcome.passes, 2);
        assert_eq!(outcome.plan.op, Operator::Limit { offset: 0, count: 5 });
    }

    #[test]
    fn test_alternatives_are_costed_along_chosen_sources() {
        let mut memo = Memo::new();
        let leaf = memo.insert(values()).unwrap();
        let a = memo.insert(PlanNode::limit(1, leaf)).unwrap();
        memo.replace(a, PlanNode::limit(100, leaf).into()).unwrap();
        let b = memo.insert(PlanNode::limit(50, leaf)).unwrap();
        let root = memo.insert(PlanNode::limit(7, a)).unwrap();
        memo.replace(root, PlanNode::limit(7, b).into()).unwrap();

        let session = Session::new();
        let types = types();
        let catalog = InMemoryCatalog::new();
        let stats_calculator = ComposableStatsCalculator::with_default_rules();
        let stats = CachingStatsProvider::new(&stats_calculator, &memo, &session, &types, &catalog);
        let cost = CachingCostProvider::new(&LimitCountCost, &stats, &memo, &session, &types);
        let comparator = CostComparator::from_session(&session);

        // Over the current expression of `a` the first root costs 107 and loses to 57.
        let first_root = &memo.group(root).expressions()[0];
        assert_eq!(cost.node_cost(first_root).unwrap().cpu().value(), Some(107.0));

        let mut chooser = AlternativeChooser {
            memo: &memo,
            cost: &cost,
            comparator: &comparator,
            chosen: HashMap::new(),
        };
        let (choice, total) = chooser.choose(root).unwrap();
        assert_eq!(choice, 0);
        assert_eq!(chooser.chosen[&a].0, 0);
        assert_eq!(total.cpu().value(), Some(8.0));
    }

    #[test]
    fn test_conflict_is_reported() {
        let registry = RuleRegistry::new().with_partition(
            RulePartition::new("dup")
                .with_rule(Box::new(Inert("first")))
                .with_rule(Box::new(Inert("second"))),
        );
        let err = optimizer(registry)
            .optimize(nested_true_filters(1), &types(), &Session::new(), &CancellationFlag::new())
            .unwrap_err();
        assert!(matches!(err, OptimizerError::RuleConflict { .. }));
    }

    #[test]
    fn test_earlier_partition_shadows_later() {
        // The inert partition matches but never fires, so the next one still runs.
        let registry = RuleRegistry::new()
            .with_partition(RulePartition::new("inert").with_rule(Box::new(Inert("inert"))))
            .with_partition(RulePartition::new("drop").with_rule(Box::new(DropTrueFilter)));
        let outcome = optimizer(registry)
            .optimize(nested_true_filters(1), &types(), &Session::new(), &CancellationFlag::new())
            .unwrap();
        assert_eq!(outcome.rule_applications, 1);
    }

    #[test]
    fn test_timeout_returns_input_plan() {
        let registry = RuleRegistry::new()
            .with_partition(RulePartition::new("drop").with_rule(Box::new(DropTrueFilter)));
        let session = Session::new().with(ITERATIVE_OPTIMIZER_TIMEOUT_MS, 0);
        let outcome = optimizer(registry)
            .optimize(nested_true_filters(2), &types(), &session, &CancellationFlag::new())
            .unwrap();
        assert_eq!(outcome.state, DriverState::TimedOut);
        assert_eq!(outcome.rule_applications, 0);
        assert_eq!(outcome.plan.kind(), crate::plan::OperatorKind::Filter);
    }

    #[test]
    fn test_cancelled_before_first_pass() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let err = optimizer(RuleRegistry::new())
            .optimize(values(), &types(), &Session::new(), &cancel)
            .unwrap_err();
        assert_eq!(err, OptimizerError::Cancelled);
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        let pred = Expr::binary(BinaryOp::Gt, Expr::symbol("nope"), Expr::int(1));
        let err = optimizer(RuleRegistry::new())
            .optimize(PlanNode::filter(pred, values()), &types(), &Session::new(), &CancellationFlag::new())
            .unwrap_err();
        assert!(matches!(err, OptimizerError::InvalidPlan(_)));
    }

    #[test]
    fn test_unknown_costs_keep_current_expression() {
        let registry = RuleRegistry::new()
            .with_partition(RulePartition::new("drop").with_rule(Box::new(DropTrueFilter)));
        let optimizer = IterativeOptimizer::new(
            Arc::new(registry),
            Arc::new(ComposableStatsCalculator::with_default_rules()),
            Arc::new(CostCalculatorWithEstimatedExchanges::new(&StaticClusterTopology(3))),
            Arc::new(InMemoryCatalog::new()),
        );
        let outcome = optimizer
            .optimize(nested_true_filters(1), &types(), &Session::new(), &CancellationFlag::new())
            .unwrap();
        assert_eq!(outcome.plan.kind(), crate::plan::OperatorKind::Values);
        assert!(outcome.cost.is_unknown());
    }
}
