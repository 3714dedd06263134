//! End-to-end tests of the iterative optimizer with the default rule registry.
//!
//! Plans are built by hand over a small in-memory catalog:
//!
//! - `tpch.nation`: 25 rows, `n_nationkey` with 25 distinct values
//! - `tpch.orders`: 15000 rows, `o_custkey` with 1000 distinct values
//! - `tpch.customer`: 1500 rows, `c_custkey` with 1500 distinct values
//!
//! ## What These Tests Verify
//! - Each built-in rule family fires through the driver and the driver converges
//! - Cost-based join flipping keeps the output column order
//! - Unknown statistics propagate to unknown costs instead of failing
//! - Cumulative cost is the sum of local costs
//! - Timeout, cancellation and rule conflicts end the session as documented
//! - One optimizer instance serves concurrent sessions

use planopt_core::catalog::{InMemoryCatalog, StaticClusterTopology};
use planopt_core::cost::{
    CachingCostProvider, CostCalculator, PlanNodeCostEstimate,
};
use planopt_core::cost_calculator::{CostCalculatorUsingExchanges, CostCalculatorWithEstimatedExchanges};
use planopt_core::error::{OptimizerError, Result};
use planopt_core::expr::{BinaryOp, Expr};
use planopt_core::memo::{Memo, NoLookup};
use planopt_core::optimizer::{CancellationFlag, DriverState, IterativeOptimizer};
use planopt_core::pattern::Pattern;
use planopt_core::plan::{
    Assignment, JoinType, Operator, OperatorKind, PlanNode, Source, TableRef,
};
use planopt_core::rule::{OptContext, Rule, RulePartition, RuleRegistry};
use planopt_core::session::{Session, ITERATIVE_OPTIMIZER_TIMEOUT_MS};
use planopt_core::stats::{ColumnStatistics, TableStatistics};
use planopt_core::stats_calculator::{CachingStatsProvider, ComposableStatsCalculator, StatsProvider};
use planopt_core::symbol::{DataType, Symbol, TypeProvider};
use planopt_rules::canonicalize_expressions::CanonicalizeFilterExpressions;
use planopt_rules::default_rule_registry;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_table(
            TableRef::new("tpch", "nation"),
            TableStatistics::new(25.0)
                .with_column("n_nationkey", ColumnStatistics::new(25.0, 0.0).with_range(0.0, 24.0)),
        )
        .with_table(
            TableRef::new("tpch", "orders"),
            TableStatistics::new(15000.0)
                .with_column("o_custkey", ColumnStatistics::new(1000.0, 0.0).with_range(1.0, 1500.0)),
        )
        .with_table(
            TableRef::new("tpch", "customer"),
            TableStatistics::new(1500.0)
                .with_column("c_custkey", ColumnStatistics::new(1500.0, 0.0).with_range(1.0, 1500.0)),
        )
}

fn types() -> TypeProvider {
    ["n", "o", "c", "x", "y"]
        .into_iter()
        .fold(TypeProvider::new(), |t, s| t.with(s, DataType::Bigint))
}

fn optimizer_with(registry: RuleRegistry, cost: Arc<dyn CostCalculator>) -> IterativeOptimizer {
    IterativeOptimizer::new(
        Arc::new(registry),
        Arc::new(ComposableStatsCalculator::with_default_rules()),
        cost,
        Arc::new(catalog()),
    )
}

fn optimizer() -> IterativeOptimizer {
    optimizer_with(
        default_rule_registry(),
        Arc::new(CostCalculatorUsingExchanges::new(&StaticClusterTopology(4))),
    )
}

fn nation() -> PlanNode {
    PlanNode::table_scan(TableRef::new("tpch", "nation"), &[("n", "n_nationkey")])
}

fn orders() -> PlanNode {
    PlanNode::table_scan(TableRef::new("tpch", "orders"), &[("o", "o_custkey")])
}

fn customer() -> PlanNode {
    PlanNode::table_scan(TableRef::new("tpch", "customer"), &[("c", "c_custkey")])
}

fn missing() -> PlanNode {
    PlanNode::table_scan(TableRef::new("tpch", "missing"), &[("x", "k")])
}

fn gt(symbol: &str, value: i64) -> Expr {
    Expr::binary(BinaryOp::Gt, Expr::symbol(symbol), Expr::int(value))
}

fn eq(left: &str, right: &str) -> Expr {
    Expr::binary(BinaryOp::Eq, Expr::symbol(left), Expr::symbol(right))
}

fn tautology() -> Expr {
    Expr::binary(BinaryOp::Eq, Expr::int(1), Expr::int(1))
}

fn child(node: &PlanNode, index: usize) -> &PlanNode {
    match &node.sources[index] {
        Source::Node(n) => n,
        Source::Group(g) => panic!("extracted plan still refers to {g}"),
    }
}

fn run(plan: PlanNode, session: &Session) -> planopt_core::OptimizerOutcome {
    optimizer()
        .optimize(plan, &types(), session, &CancellationFlag::new())
        .unwrap()
}

// ---------------------------------------------------------------------------
// Rule families through the driver
// ---------------------------------------------------------------------------

#[test]
fn test_filter_is_canonicalized() {
    let plan = PlanNode::filter(Expr::and_all(vec![tautology(), gt("n", 5)]), nation());
    let outcome = run(plan, &Session::new());
    assert_eq!(outcome.state, DriverState::Converged);
    assert_eq!(outcome.plan.op, Operator::Filter { predicate: gt("n", 5) });
    assert_eq!(child(&outcome.plan, 0).kind(), OperatorKind::TableScan);
}

#[test]
fn test_canonicalization_is_stable() {
    let mut memo = Memo::new();
    let scan = memo.insert(nation()).unwrap();
    let filter = PlanNode::filter(Expr::and_all(vec![tautology(), gt("n", 5)]), scan);

    let session = Session::new();
    let types = types();
    let catalog = catalog();
    let stats_calculator = ComposableStatsCalculator::with_default_rules();
    let cost_calculator = CostCalculatorUsingExchanges::new(&StaticClusterTopology(1));
    let stats = CachingStatsProvider::new(&stats_calculator, &memo, &session, &types, &catalog);
    let cost = CachingCostProvider::new(&cost_calculator, &stats, &memo, &session, &types);
    let ctx = OptContext {
        lookup: &memo,
        session: &session,
        types: &types,
        stats: &stats,
        cost: &cost,
    };

    let Some(Source::Node(first)) = CanonicalizeFilterExpressions.apply(&filter, &ctx).unwrap() else {
        panic!("first application must rewrite the predicate");
    };
    assert_eq!(first.op, Operator::Filter { predicate: gt("n", 5) });
    assert_eq!(CanonicalizeFilterExpressions.apply(&first, &ctx).unwrap(), None);
}

#[test]
fn test_stacked_filters_converge_to_one() {
    let plan = (1..=3).fold(orders(), |plan, i| {
        PlanNode::filter(Expr::and_all(vec![tautology(), gt("o", i)]), plan)
    });
    let outcome = run(plan, &Session::new());
    assert_eq!(outcome.state, DriverState::Converged);
    assert!(outcome.passes <= 6, "took {} passes", outcome.passes);

    let Operator::Filter { predicate } = &outcome.plan.op else {
        panic!("expected a filter, got {}", outcome.plan.op);
    };
    assert_eq!(predicate.conjuncts().len(), 3);
    assert_eq!(child(&outcome.plan, 0).kind(), OperatorKind::TableScan);
}

#[test]
fn test_trivial_filters_and_zero_limit() {
    let outcome = run(PlanNode::filter(Expr::TRUE, nation()), &Session::new());
    assert_eq!(outcome.plan.kind(), OperatorKind::TableScan);

    let outcome = run(PlanNode::filter(Expr::FALSE, nation()), &Session::new());
    assert_eq!(
        outcome.plan.op,
        Operator::Values {
            outputs: vec![Symbol::new("n")],
            rows: vec![],
        }
    );
    assert_eq!(outcome.cost, PlanNodeCostEstimate::ZERO_COST);

    let outcome = run(PlanNode::limit(0, PlanNode::limit(5, orders())), &Session::new());
    assert_eq!(outcome.plan.kind(), OperatorKind::Values);
}

#[test]
fn test_limits_merge_below_projection() {
    let project = PlanNode::project(vec![Assignment::new("y", Expr::symbol("o"))], orders());
    let plan = PlanNode::limit(10, PlanNode::limit(5, project));
    let outcome = run(plan, &Session::new());

    assert_eq!(outcome.plan.kind(), OperatorKind::Project);
    let limit = child(&outcome.plan, 0);
    assert_eq!(limit.op, Operator::Limit { offset: 0, count: 5 });
    assert_eq!(child(limit, 0).kind(), OperatorKind::TableScan);
}

#[test]
fn test_predicate_pushdown() {
    let join = PlanNode::join(JoinType::Cross, Expr::TRUE, orders(), customer());
    let plan = PlanNode::filter(Expr::and_all(vec![gt("o", 100), eq("o", "c")]), join);
    let outcome = run(plan, &Session::new());

    // Orders is larger than customer, so the sides stay as written.
    let Operator::Join { join_type, condition } = &outcome.plan.op else {
        panic!("expected a join, got {}", outcome.plan.op);
    };
    assert_eq!(*join_type, JoinType::Inner);
    assert_eq!(condition.referenced_symbols().len(), 2);
    assert_eq!(child(&outcome.plan, 0).op, Operator::Filter { predicate: gt("o", 100) });
    assert_eq!(child(&outcome.plan, 1).kind(), OperatorKind::TableScan);
}

#[test]
fn test_disabled_family_is_skipped() {
    let join = PlanNode::join(JoinType::Cross, Expr::TRUE, orders(), customer());
    let plan = PlanNode::filter(gt("o", 100), join);
    let session = Session::new().with("predicate_pushdown_enabled", false);
    let outcome = run(plan, &session);
    assert_eq!(outcome.plan.kind(), OperatorKind::Filter);
}

#[test]
fn test_join_sides_flip_and_keep_column_order() {
    let plan = PlanNode::join(JoinType::Inner, eq("c", "o"), customer(), orders());
    let outcome = run(plan, &Session::new());
    assert_eq!(outcome.state, DriverState::Converged);

    let Operator::Project { assignments } = &outcome.plan.op else {
        panic!("expected an identity projection, got {}", outcome.plan.op);
    };
    let columns: Vec<&str> = assignments.iter().map(|a| a.symbol.name()).collect();
    assert_eq!(columns, vec!["c", "o"]);

    let join = child(&outcome.plan, 0);
    assert_eq!(join.kind(), OperatorKind::Join);
    assert_eq!(child(join, 0).output_symbols(&NoLookup), vec![Symbol::new("o")]);
    assert_eq!(child(join, 1).output_symbols(&NoLookup), vec![Symbol::new("c")]);
}

#[test]
fn test_filter_reaches_flipped_join() {
    // The join flips first (post-order), leaving an identity projection between the
    // filter and the join.
    let join = PlanNode::join(JoinType::Inner, eq("c", "o"), customer(), orders());
    let outcome = run(PlanNode::filter(gt("o", 100), join), &Session::new());
    assert_eq!(outcome.state, DriverState::Converged);

    let Operator::Project { assignments } = &outcome.plan.op else {
        panic!("expected an identity projection, got {}", outcome.plan.op);
    };
    let columns: Vec<&str> = assignments.iter().map(|a| a.symbol.name()).collect();
    assert_eq!(columns, vec!["c", "o"]);

    let join = child(&outcome.plan, 0);
    assert_eq!(join.kind(), OperatorKind::Join);
    let probe = child(join, 0);
    assert_eq!(probe.op, Operator::Filter { predicate: gt("o", 100) });
    assert_eq!(child(probe, 0).output_symbols(&NoLookup), vec![Symbol::new("o")]);
    assert_eq!(child(join, 1).output_symbols(&NoLookup), vec![Symbol::new("c")]);
}

// ---------------------------------------------------------------------------
// Statistics and cost
// ---------------------------------------------------------------------------

#[test]
fn test_values_row_count_is_exact() {
    let memo = Memo::new();
    let session = Session::new();
    let types = types();
    let catalog = catalog();
    let calculator = ComposableStatsCalculator::with_default_rules();
    let stats = CachingStatsProvider::new(&calculator, &memo, &session, &types, &catalog);

    let values = PlanNode::values(
        vec![Symbol::new("x")],
        vec![vec![Expr::int(1)], vec![Expr::int(2)], vec![Expr::int(3)]],
    );
    let estimate = stats.node_stats(&values).unwrap();
    assert_eq!(estimate.output_row_count.value(), Some(3.0));
}

#[test]
fn test_negative_cost_is_rejected() {
    let err = PlanNodeCostEstimate::builder()
        .set_cpu_cost(-1.0)
        .build()
        .unwrap_err();
    assert!(matches!(err, OptimizerError::InvalidCost { component: "cpu", .. }));
}

#[test]
fn test_unknown_statistics_give_unknown_cost() {
    let plan = PlanNode::join(JoinType::Inner, eq("x", "c"), missing(), customer());
    let outcome = run(plan, &Session::new());
    assert_eq!(outcome.state, DriverState::Converged);
    // Unknown sizes never flip a join.
    assert_eq!(outcome.plan.kind(), OperatorKind::Join);
    assert!(outcome.cost.cpu().is_unknown());
}

#[test]
fn test_estimated_exchanges_report_unknown_cost() {
    let optimizer = optimizer_with(
        default_rule_registry(),
        Arc::new(CostCalculatorWithEstimatedExchanges::new(&StaticClusterTopology(4))),
    );
    let plan = PlanNode::join(JoinType::Inner, eq("c", "o"), customer(), orders());
    let outcome = optimizer
        .optimize(plan, &types(), &Session::new(), &CancellationFlag::new())
        .unwrap();
    assert!(outcome.cost.is_unknown());
}

/// Sum of local costs, added in the same order as the cumulative provider.
fn summed_local_costs(
    node: &PlanNode,
    calculator: &dyn CostCalculator,
    stats: &dyn StatsProvider,
    session: &Session,
    types: &TypeProvider,
) -> Result<PlanNodeCostEstimate> {
    let mut total = calculator.calculate_cost(node, stats, &NoLookup, session, types)?;
    for source in &node.sources {
        let Source::Node(child) = source else {
            unreachable!("concrete plan");
        };
        total = total + summed_local_costs(child, calculator, stats, session, types)?;
    }
    Ok(total)
}

#[test]
fn test_cumulative_cost_is_sum_of_local_costs() {
    let plan = PlanNode::filter(
        gt("o", 100),
        PlanNode::join(JoinType::Inner, eq("o", "c"), orders(), customer()),
    );
    let outcome = run(plan, &Session::new());

    let memo = Memo::new();
    let session = Session::new();
    let types = types();
    let catalog = catalog();
    let stats_calculator = ComposableStatsCalculator::with_default_rules();
    let stats = CachingStatsProvider::new(&stats_calculator, &memo, &session, &types, &catalog);
    let calculator = CostCalculatorUsingExchanges::new(&StaticClusterTopology(4));
    let expected = summed_local_costs(&outcome.plan, &calculator, &stats, &session, &types).unwrap();
    assert_eq!(outcome.cost, expected);
    assert!(!outcome.cost.has_unknown_components());
}

// ---------------------------------------------------------------------------
// Driver termination
// ---------------------------------------------------------------------------

#[test]
fn test_timeout_returns_plan_so_far() {
    let plan = PlanNode::filter(Expr::and_all(vec![tautology(), gt("n", 5)]), nation());
    let session = Session::new().with(ITERATIVE_OPTIMIZER_TIMEOUT_MS, 0);
    let outcome = run(plan.clone(), &session);
    assert_eq!(outcome.state, DriverState::TimedOut);
    assert_eq!(outcome.rule_applications, 0);
    assert_eq!(outcome.plan.op, plan.op);
}

#[test]
fn test_cancelled_session_fails() {
    let cancel = CancellationFlag::new();
    cancel.cancel();
    let err = optimizer()
        .optimize(nation(), &types(), &Session::new(), &cancel)
        .unwrap_err();
    assert_eq!(err, OptimizerError::Cancelled);
}

/// Matches every filter unconditionally.
struct AnyFilter(&'static str);

impl Rule for AnyFilter {
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

#[test]
fn test_overlapping_rules_conflict() {
    let mut registry = default_rule_registry();
    registry.add_partition(
        RulePartition::new("overlapping")
            .with_rule(Box::new(AnyFilter("first")))
            .with_rule(Box::new(AnyFilter("second"))),
    );
    let optimizer = optimizer_with(
        registry,
        Arc::new(CostCalculatorUsingExchanges::new(&StaticClusterTopology(1))),
    );
    let err = optimizer
        .optimize(
            PlanNode::filter(gt("n", 5), nation()),
            &types(),
            &Session::new(),
            &CancellationFlag::new(),
        )
        .unwrap_err();
    let OptimizerError::RuleConflict { rules, .. } = err else {
        panic!("expected a rule conflict, got {err}");
    };
    assert_eq!(rules, vec!["first".to_string(), "second".to_string()]);
}

#[test]
fn test_concurrent_sessions_share_one_optimizer() {
    let optimizer = optimizer();
    let types = types();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let (optimizer, types) = (&optimizer, &types);
                scope.spawn(move || {
                    let plan = PlanNode::filter(
                        Expr::and_all(vec![tautology(), gt("o", i)]),
                        PlanNode::join(JoinType::Inner, eq("c", "o"), customer(), orders()),
                    );
                    optimizer
                        .optimize(plan, types, &Session::new(), &CancellationFlag::new())
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            let outcome = handle.join().unwrap();
            assert_eq!(outcome.state, DriverState::Converged);
            assert!(!outcome.cost.has_unknown_components());
            // Flipped join under its identity projection, filter pushed to orders.
            let join = child(&outcome.plan, 0);
            assert_eq!(join.kind(), OperatorKind::Join);
            assert_eq!(child(join, 0).kind(), OperatorKind::Filter);
        }
    });
}
