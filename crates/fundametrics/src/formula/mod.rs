//! Formula registry and dependency-ordered evaluation.
//!
//! Derived metrics are declared as expression strings over base metric codes
//! and other derived metrics, scoped to one entity type. The registry parses
//! and compiles every formula at load time, orders them topologically, and
//! evaluates them column-wise over the entity's wide statement frame. All
//! structural problems (syntax, unknown functions, cycles, duplicate names)
//! are load-time errors; at evaluation time failures only ever surface as
//! nulls in the affected rows.

mod graph;
mod parser;

pub use parser::{Ast, BinOp, parse};

use crate::{EngineError, EntityType, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::warn;

/// One declarative formula: a named derived metric for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaSpec {
    /// Derived metric name (snake_case, unique within the entity type)
    pub name: String,
    /// Arithmetic expression over metric codes and derived names
    pub expr: String,
    /// Unit of the result, e.g. `%` or `x`
    #[serde(default)]
    pub unit: String,
}

impl FormulaSpec {
    fn new(name: &str, expr: &str, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            expr: expr.to_string(),
            unit: unit.to_string(),
        }
    }
}

/// Introspection record for one registered formula.
#[derive(Debug, Clone)]
pub struct FormulaInfo {
    /// Derived metric name
    pub name: String,
    /// Source expression
    pub expr: String,
    /// Unit of the result
    pub unit: String,
    /// Referenced metric codes and derived names
    pub inputs: Vec<String>,
}

#[derive(Debug, Clone)]
struct FormulaEntry {
    spec: FormulaSpec,
    compiled: Expr,
    inputs: BTreeSet<String>,
}

/// Validated, dependency-ordered formula registry for one entity type.
#[derive(Debug, Clone)]
pub struct FormulaRegistry {
    entity: EntityType,
    entries: Vec<FormulaEntry>,
    order: Vec<usize>,
}

impl FormulaRegistry {
    /// Build a registry from specs, parsing and ordering every formula.
    ///
    /// Fails on malformed expressions, duplicate or vocabulary-shadowing
    /// names, and dependency cycles — all before any row is processed.
    pub fn from_specs(entity: EntityType, specs: Vec<FormulaSpec>) -> Result<Self> {
        let mut entries = Vec::with_capacity(specs.len());
        let mut seen = BTreeSet::new();

        for spec in specs {
            if !seen.insert(spec.name.clone()) {
                return Err(EngineError::InvalidConfig(format!(
                    "duplicate derived metric '{}' for {entity}",
                    spec.name
                )));
            }
            if entity.vocabulary().contains(&spec.name.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "derived metric '{}' shadows a base metric of {entity}",
                    spec.name
                )));
            }
            let ast = parse(&spec.expr).map_err(|reason| EngineError::Parse {
                name: spec.name.clone(),
                reason,
            })?;
            let compiled = compile(&ast).map_err(|reason| EngineError::Parse {
                name: spec.name.clone(),
                reason,
            })?;
            let mut inputs = BTreeSet::new();
            ast.references(&mut inputs);
            entries.push(FormulaEntry {
                compiled: compiled.alias(spec.name.as_str()),
                spec,
                inputs,
            });
        }

        let graph_input: Vec<(String, BTreeSet<String>)> = entries
            .iter()
            .map(|e| (e.spec.name.clone(), e.inputs.clone()))
            .collect();
        let order = graph::topological_order(&graph_input).map_err(|cycle| {
            EngineError::ConfigCycle {
                cycle: cycle.join(" -> "),
            }
        })?;

        Ok(Self { entity, entries, order })
    }

    /// Built-in default registry for an entity type.
    pub fn with_defaults(entity: EntityType) -> Result<Self> {
        let specs = default_specs(entity)
            .iter()
            .map(|(name, expr, unit)| FormulaSpec::new(name, expr, unit))
            .collect();
        Self::from_specs(entity, specs)
    }

    /// Load a registry from a JSON array of [`FormulaSpec`]s.
    pub fn from_json_file(entity: EntityType, path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let specs: Vec<FormulaSpec> = serde_json::from_reader(std::io::BufReader::new(file))?;
        Self::from_specs(entity, specs)
    }

    /// Entity type this registry is scoped to.
    pub const fn entity(&self) -> EntityType {
        self.entity
    }

    /// Number of registered formulas.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no formulas.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Introspection records in evaluation order.
    pub fn all_info(&self) -> Vec<FormulaInfo> {
        self.order
            .iter()
            .map(|&i| {
                let entry = &self.entries[i];
                FormulaInfo {
                    name: entry.spec.name.clone(),
                    expr: entry.spec.expr.clone(),
                    unit: entry.spec.unit.clone(),
                    inputs: entry.inputs.iter().cloned().collect(),
                }
            })
            .collect()
    }

    /// Derived metric names in evaluation order.
    pub fn names(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.entries[i].spec.name.as_str())
            .collect()
    }

    /// Evaluate every derived metric over a wide statement frame.
    ///
    /// The frame must be sorted by (symbol, report_date) ascending — the
    /// `growth()` builtin shifts within each symbol. Base metric columns the
    /// registry references but the frame lacks are injected as nulls with a
    /// schema-drift warning, so only dependent metrics go null; independent
    /// metrics and all other rows are unaffected.
    pub fn evaluate(&self, wide: DataFrame) -> Result<DataFrame> {
        let present: BTreeSet<String> = wide
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        let derived: BTreeSet<&str> =
            self.entries.iter().map(|e| e.spec.name.as_str()).collect();

        let mut missing = BTreeSet::new();
        for entry in &self.entries {
            for input in &entry.inputs {
                if !present.contains(input) && !derived.contains(input.as_str()) {
                    missing.insert(input.clone());
                }
            }
        }

        let mut frame = wide.lazy();
        for input in &missing {
            warn!(
                entity = self.entity.as_str(),
                metric = input.as_str(),
                "schema drift: formula input absent entity-wide; dependents will be null"
            );
            frame = frame.with_column(lit(NULL).cast(DataType::Float64).alias(input.as_str()));
        }

        for &i in &self.order {
            frame = frame.with_column(self.entries[i].compiled.clone());
        }

        Ok(frame.collect()?)
    }
}

/// Compile a parsed expression into a polars expression with safe
/// arithmetic: any division yields null unless the denominator is strictly
/// positive, and `growth(x, n)` yields null unless the prior value is
/// strictly positive.
fn compile(ast: &Ast) -> std::result::Result<Expr, String> {
    match ast {
        Ast::Number(value) => Ok(lit(*value)),
        Ast::Ident(name) => Ok(col(name.as_str())),
        Ast::Neg(inner) => Ok(lit(-1.0) * compile(inner)?),
        Ast::Binary { op, lhs, rhs } => {
            let lhs = compile(lhs)?;
            let rhs = compile(rhs)?;
            Ok(match op {
                BinOp::Add => lhs + rhs,
                BinOp::Sub => lhs - rhs,
                BinOp::Mul => lhs * rhs,
                BinOp::Div => when(rhs.clone().gt(lit(0.0)))
                    .then(lhs / rhs)
                    .otherwise(lit(NULL)),
            })
        }
        Ast::Call { name, args } => match name.as_str() {
            "growth" => {
                let periods = match args.as_slice() {
                    [_] => 1i64,
                    [_, Ast::Number(n)] if *n >= 1.0 && n.fract() == 0.0 => *n as i64,
                    [_, _] => {
                        return Err(
                            "growth() periods must be a positive integer literal".to_string()
                        );
                    }
                    _ => return Err("growth() takes 1 or 2 arguments".to_string()),
                };
                let base = compile(&args[0])?;
                let prior = base
                    .clone()
                    .shift(lit(periods))
                    .over([col("symbol")]);
                Ok(when(prior.clone().gt(lit(0.0)))
                    .then((base - prior.clone()) / prior * lit(100.0))
                    .otherwise(lit(NULL)))
            }
            other => Err(format!("unknown function '{other}'")),
        },
    }
}

/// Built-in derived metrics per entity type: (name, expression, unit).
const fn default_specs(entity: EntityType) -> &'static [(&'static str, &'static str, &'static str)] {
    match entity {
        EntityType::Company => &[
            ("roe", "net_profit / total_equity * 100", "%"),
            ("roa", "net_profit / total_assets * 100", "%"),
            ("gross_margin", "gross_profit / revenue * 100", "%"),
            ("operating_margin", "operating_profit / revenue * 100", "%"),
            ("net_margin", "net_profit / revenue * 100", "%"),
            ("debt_ratio", "total_debt / total_assets * 100", "%"),
            ("equity_multiplier", "total_assets / total_equity", "x"),
            ("revenue_growth", "growth(revenue)", "%"),
            ("net_profit_growth", "growth(net_profit)", "%"),
            ("net_margin_growth", "growth(net_margin)", "%"),
        ],
        EntityType::Bank => &[
            ("roe", "net_profit / total_equity * 100", "%"),
            ("roa", "net_profit / total_assets * 100", "%"),
            ("net_interest_margin", "net_interest_income / total_assets * 100", "%"),
            ("fee_income_ratio", "fee_income / operating_income * 100", "%"),
            ("loan_deposit_ratio", "customer_loans / customer_deposits * 100", "%"),
            ("operating_income_growth", "growth(operating_income)", "%"),
        ],
        EntityType::Insurance => &[
            ("roe", "net_profit / total_equity * 100", "%"),
            ("roa", "net_profit / total_assets * 100", "%"),
            ("investment_yield", "investment_income / total_assets * 100", "%"),
            ("premium_growth", "growth(premium_income)", "%"),
        ],
        EntityType::Security => &[
            ("roe", "net_profit / total_equity * 100", "%"),
            ("roa", "net_profit / total_assets * 100", "%"),
            ("brokerage_mix", "brokerage_income / operating_income * 100", "%"),
            ("profit_growth", "growth(net_profit)", "%"),
        ],
    }
}
