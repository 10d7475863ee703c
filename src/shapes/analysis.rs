//! The assembly entry point: from an ordered list of shape declarations to
//! the analytic and numeric solver outputs.
//!
//! A declaration carries one expression string `"<lhs> = <rhs>"`. The number
//! of prime markers on the left-hand side selects the construction path: no
//! primes means the right-hand side is an explicit function of time (the
//! minimal ODE is inferred), one or more primes mean an explicit ODE with one
//! initial value per derivative order.
//!
//! Parsing runs in two passes: the first pass only collects every declared
//! state-variable name (including the derivative levels inferred for
//! function-form shapes), the second parses the ODE right-hand sides against
//! the full known-symbol set so that cross-shape linear coupling is
//! detected. The assembled system is classified, the linear
//! constant-coefficient subset (pruned to its homogeneous part) receives a
//! propagator solver, and everything else is exported for numeric
//! integration.

use crate::shapes::errors::{ShapeError, SystemError};
use crate::shapes::shape::{internal_to_primed, Shape};
use crate::shapes::system_of_shapes::SystemOfShapes;
use crate::symbolic::symbolic_engine::Expr;
use crate::symbolic::parse_expr::parse_expression_func;
use log::{debug, info, warn};
use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode};
use std::collections::{HashMap, HashSet};

/// One shape declaration as handed over by the input layer.
#[derive(Clone, Debug, Default)]
pub struct ShapeDecl {
    /// `"<lhs> = <rhs>"`, e.g. `"V' = -V/tau + I/C_m"` or
    /// `"I = t*exp(-t/tau_syn)"`
    pub expression: String,
    /// convenience surface for first-order equations; mutually exclusive
    /// with `initial_values`
    pub initial_value: Option<String>,
    /// initial values keyed by prime-marked name, e.g. `"I'"`
    pub initial_values: HashMap<String, String>,
    /// informational lower bound on admissible values
    pub lower_bound: Option<String>,
    /// informational upper bound on admissible values
    pub upper_bound: Option<String>,
}

impl ShapeDecl {
    pub fn new(expression: &str) -> ShapeDecl {
        ShapeDecl {
            expression: expression.to_string(),
            ..ShapeDecl::default()
        }
    }

    pub fn with_initial_value(mut self, value: &str) -> ShapeDecl {
        self.initial_value = Some(value.to_string());
        self
    }

    pub fn with_initial_values(mut self, pairs: &[(&str, &str)]) -> ShapeDecl {
        self.initial_values = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }
}

/// Explicit configuration of the analysis; replaces mutable module-level
/// defaults with a value the caller owns.
#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    /// the variable standing for the current time in function-form shapes
    pub input_time_symbol: String,
    /// the symbol the generated update rules use for the integration step
    pub output_timestep_symbol: String,
    /// bound of the ODE order search in function-form shapes
    pub max_order: usize,
    /// bound of the integer sample time scan during order inference
    pub max_sample_time: usize,
    /// force every shape onto the numeric path
    pub disable_analytic_solver: bool,
    /// "off"/"none" disables logger setup; otherwise a simplelog TermLogger
    /// is initialized at the named level
    pub loglevel: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            input_time_symbol: "t".to_string(),
            output_timestep_symbol: "__h".to_string(),
            max_order: 4,
            max_sample_time: 100,
            disable_analytic_solver: false,
            loglevel: None,
        }
    }
}

/// Exact update rules for the analytically solvable subsystem.
#[derive(Clone, Debug)]
pub struct AnalyticSolver {
    pub state_variables: Vec<String>,
    /// minted placeholder symbol -> propagator matrix entry
    pub propagators: HashMap<String, Expr>,
    /// state variable -> update rule over placeholders
    pub update_expressions: HashMap<String, Expr>,
    /// state variable -> value at t = 0
    pub initial_values: HashMap<String, Expr>,
}

/// The subsystem handed to the numeric integration collaborator. The
/// embedded system exposes `A`, `C` and `jacobian()`; nothing here is meant
/// to be mutated by the consumer.
#[derive(Clone, Debug)]
pub struct NumericSolver {
    pub system: SystemOfShapes,
    /// state variable -> full reconstituted right-hand side
    pub update_expressions: HashMap<String, Expr>,
    /// state variable -> value at t = 0
    pub initial_values: HashMap<String, Expr>,
}

/// Result of the analysis: either part may be absent (no analytically
/// solvable symbols, or nothing left for the numeric path).
#[derive(Clone, Debug, Default)]
pub struct AnalysisOutcome {
    pub analytic: Option<AnalyticSolver>,
    pub numeric: Option<NumericSolver>,
}

/// The main entry point of the analysis; wraps the actual work in the
/// logging setup selected by `config.loglevel`.
pub fn analysis(
    decls: &[ShapeDecl],
    config: &AnalysisConfig,
) -> Result<AnalysisOutcome, ShapeError> {
    let is_logging_disabled = config
        .loglevel
        .as_ref()
        .map(|level| level == "off" || level == "none")
        .unwrap_or(false);
    if is_logging_disabled {
        return analysis_(decls, config);
    }
    let log_option = match config.loglevel.as_deref() {
        Some("debug") => LevelFilter::Debug,
        Some("warn") => LevelFilter::Warn,
        Some("error") => LevelFilter::Error,
        _ => LevelFilter::Info,
    };
    // a failed init just means a logger is already installed; proceed either way
    let _ = CombinedLogger::init(vec![TermLogger::new(
        log_option,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
    analysis_(decls, config)
}

fn analysis_(
    decls: &[ShapeDecl],
    config: &AnalysisConfig,
) -> Result<AnalysisOutcome, ShapeError> {
    if decls.is_empty() {
        warn!("empty input (no dynamical equations found); returning empty output");
        return Ok(AnalysisOutcome::default());
    }

    info!("processing {} input shapes", decls.len());
    let shapes = shapes_from_declarations(decls, config)?;
    let system = SystemOfShapes::from_shapes(shapes);

    info!("dependency analysis");
    let edges = system.get_dependency_edges();
    debug!("dependency edges: {:?}", edges);
    let mut node_is_lin = system.get_lin_cc_symbols();

    // a lin-cc shape with a nonzero residual row (constant or parameter
    // forcing) has no exact propagator; take it off the analytic subset
    // before propagation so its dependents follow it onto the numeric path
    let index: HashMap<&str, usize> = system
        .state_variables
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    for shape in &system.shapes {
        let syms = shape.all_variable_symbols();
        if !syms.iter().all(|s| node_is_lin[s]) {
            continue;
        }
        let top = index[shape.state_variables[0].as_str()];
        if !system.C[top].is_identically_zero() {
            warn!(
                "shape \"{}\" is linear but not homogeneous; moving it to the \
                 numeric solver",
                shape.symbol
            );
            for sym in syms {
                node_is_lin.insert(sym, false);
            }
        }
    }

    let node_is_lin = system.propagate_lin_cc_judgements(&node_is_lin, &edges);

    let mut analytic_syms: HashSet<String> = if config.disable_analytic_solver {
        HashSet::new()
    } else {
        node_is_lin
            .iter()
            .filter(|(_, is_lin)| **is_lin)
            .map(|(sym, _)| sym.clone())
            .collect()
    };

    let mut outcome = AnalysisOutcome::default();
    if !analytic_syms.is_empty() {
        let mut names: Vec<&String> = analytic_syms.iter().collect();
        names.sort();
        info!(
            "generating propagators for the following symbols: {:?}",
            names
        );
        let sub_system = system.get_sub_system(&analytic_syms);
        match sub_system.compute_propagator(&config.output_timestep_symbol) {
            Ok(solver) => {
                let initial_values = initial_values_for(
                    &sub_system.shapes,
                    &sub_system.state_variables,
                );
                outcome.analytic = Some(AnalyticSolver {
                    state_variables: solver.state_variables,
                    propagators: solver.propagators,
                    update_expressions: solver.update_expressions,
                    initial_values,
                });
            }
            Err(err @ SystemError::PropagatorSynthesis(_))
            | Err(err @ SystemError::NonHomogeneousSubsystem { .. }) => {
                warn!(
                    "{}; falling back to numeric integration for the whole \
                     system",
                    err
                );
                analytic_syms.clear();
            }
        }
    }

    let numeric_syms: HashSet<String> = system
        .state_variables
        .iter()
        .filter(|sym| !analytic_syms.contains(*sym))
        .cloned()
        .collect();
    if !numeric_syms.is_empty() {
        let mut names: Vec<&String> = numeric_syms.iter().collect();
        names.sort();
        info!(
            "generating numeric solver for the following symbols: {:?}",
            names
        );
        let sub_system = system.get_sub_system(&numeric_syms);
        let rhs = sub_system.reconstituted_rhs();
        let update_expressions: HashMap<String, Expr> = sub_system
            .state_variables
            .iter()
            .enumerate()
            .map(|(i, sym)| (sym.clone(), rhs[i].clone()))
            .collect();
        let initial_values =
            initial_values_for(&sub_system.shapes, &sub_system.state_variables);
        outcome.numeric = Some(NumericSolver {
            system: sub_system,
            update_expressions,
            initial_values,
        });
    }

    Ok(outcome)
}

/// two-pass declaration parsing: collect every state-variable name first,
/// then parse the ODE right-hand sides against the full set
fn shapes_from_declarations(
    decls: &[ShapeDecl],
    config: &AnalysisConfig,
) -> Result<Vec<Shape>, ShapeError> {
    let mut first_pass: Vec<(Shape, bool)> = Vec::new();
    for decl in decls {
        first_pass.push(parse_shape_declaration(decl, &[], config)?);
    }
    let all_variable_symbols: Vec<String> = first_pass
        .iter()
        .flat_map(|(shape, _)| shape.all_variable_symbols_primed())
        .collect();
    debug!("all variable symbols: {:?}", all_variable_symbols);

    let mut shapes = Vec::new();
    for (decl, (shape, is_ode)) in decls.iter().zip(first_pass) {
        if is_ode {
            // only ODE-form shapes see cross-shape coupling; the inferred
            // function-form shapes are complete after the first pass
            let (shape, _) =
                parse_shape_declaration(decl, &all_variable_symbols, config)?;
            shapes.push(shape);
        } else {
            shapes.push(shape);
        }
    }
    Ok(shapes)
}

/// parses one declaration; the bool is true for the ODE form
fn parse_shape_declaration(
    decl: &ShapeDecl,
    all_variable_symbols: &[String],
    config: &AnalysisConfig,
) -> Result<(Shape, bool), ShapeError> {
    let Some((lhs, rhs)) = decl.expression.split_once('=') else {
        return Err(ShapeError::MalformedInput(format!(
            "no \"=\" found in expression \"{}\"",
            decl.expression
        )));
    };
    let lhs_pattern = regex::Regex::new(r"^\s*([a-zA-Z_][a-zA-Z0-9_]*)('*)\s*$")
        .expect("static pattern");
    let Some(cap) = lhs_pattern.captures(lhs) else {
        return Err(ShapeError::MalformedInput(format!(
            "cannot parse variable symbol from \"{}\"",
            lhs
        )));
    };
    let symbol = cap[1].to_string();
    let order = cap[2].len();

    if decl.initial_value.is_some() && !decl.initial_values.is_empty() {
        return Err(ShapeError::MalformedInput(format!(
            "initial_value and initial_values cannot be specified \
             simultaneously for equation with variable symbol \"{}\"",
            symbol
        )));
    }
    if order > 0 && decl.initial_value.is_none() && decl.initial_values.is_empty() {
        return Err(ShapeError::MalformedInput(format!(
            "no initial values specified for order {} equation with variable \
             symbol \"{}\"",
            order, symbol
        )));
    }

    let shape = if order == 0 {
        Shape::from_function(
            &symbol,
            rhs,
            &config.input_time_symbol,
            config.max_sample_time,
            config.max_order,
        )?
    } else {
        let initial_values: HashMap<String, String> = match &decl.initial_value {
            Some(value) => {
                if order != 1 {
                    return Err(ShapeError::MalformedInput(format!(
                        "single initial value specified for equation that is \
                         not first order, for variable symbol \"{}\"",
                        symbol
                    )));
                }
                HashMap::from([(symbol.clone(), value.clone())])
            }
            None => decl.initial_values.clone(),
        };
        Shape::from_ode(&symbol, rhs, &initial_values, all_variable_symbols)?
    };

    let parse_bound = |bound: &Option<String>| -> Result<Option<Expr>, ShapeError> {
        match bound {
            Some(text) => parse_expression_func(text).map(Some).map_err(|e| {
                ShapeError::MalformedInput(format!(
                    "bound for \"{}\": {}",
                    symbol, e
                ))
            }),
            None => Ok(None),
        }
    };
    let lower = parse_bound(&decl.lower_bound)?;
    let upper = parse_bound(&decl.upper_bound)?;
    Ok((shape.with_bounds(lower, upper), order > 0))
}

/// initial values keyed by internal state-variable name, looked up from the
/// owning shapes
fn initial_values_for(
    shapes: &[Shape],
    state_variables: &[String],
) -> HashMap<String, Expr> {
    let mut out = HashMap::new();
    for sym in state_variables {
        for shape in shapes {
            if shape.all_variable_symbols().contains(sym) {
                if let Some(iv) = shape.get_initial_value(&internal_to_primed(sym)) {
                    out.insert(sym.clone(), iv.clone());
                }
                break;
            }
        }
    }
    out
}
