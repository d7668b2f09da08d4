use std::f64::consts::FRAC_PI_2;

use clap::{Parser, ValueEnum};
use nalgebra::{DMatrix, DVector, Vector3, dmatrix};
use nlp_adapter::core::variable::VariableGroupOptions;
use nlp_adapter::evaluators::{Cost, LinearConstraint, PlanarArm, QuadraticCost, TipPoseErrorCost};
use nlp_adapter::solver::{
    AdapterConfig, AugmentedLagrangian, AugmentedLagrangianConfig, DerivativeStrategy,
    NameEncoding, SolverAdapter,
};
use nlp_adapter::{NlpResult, NonlinearProgram, init_logger_with_level};
use tracing::{Level, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Derivatives {
    /// Analytic derivatives only; evaluators without them are rejected
    Analytic,
    /// Analytic derivatives with finite differences where unavailable
    Fallback,
    /// No derivatives from the adapter; the solver differentiates
    Disabled,
}

impl Derivatives {
    fn strategy(self) -> DerivativeStrategy {
        match self {
            Derivatives::Analytic => DerivativeStrategy::Analytic,
            Derivatives::Fallback => DerivativeStrategy::default(),
            Derivatives::Disabled => DerivativeStrategy::Disabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Quadratic cost on y with a two-sided linear constraint on [x; y]
    Quadratic,
    /// Planar three-link arm reaching for a tip pose inside joint limits
    Arm,
}

#[derive(Parser)]
#[command(name = "solve_example")]
#[command(about = "Solve a small nonlinear program with the reference augmented Lagrangian solver")]
struct Args {
    /// Problem to solve
    #[arg(short, long, value_enum, default_value = "quadratic")]
    scenario: Scenario,

    /// Maximum number of outer (multiplier update) iterations
    #[arg(short, long, default_value = "50")]
    max_iterations: usize,

    /// Where derivatives come from
    #[arg(short, long, value_enum, default_value = "fallback")]
    derivatives: Derivatives,

    /// Lower bound of the first linear constraint row (quadratic scenario)
    #[arg(short, long, default_value = "0.5")]
    lower_bound: f64,

    /// Enable debug output
    #[arg(short, long)]
    verbose: bool,
}

fn quadratic_scenario(args: &Args) -> NlpResult<()> {
    let mut program = NonlinearProgram::new();
    let x = program.new_variable_group("x", &[2], VariableGroupOptions::new())?;
    let y = program.new_variable_group(
        "y",
        &[4],
        VariableGroupOptions::new().with_initial_guess(DVector::from_element(4, 1.0)),
    )?;

    let l = dmatrix![
        0.8, 0.1, 0.4, 0.3;
        0.2, 0.9, 0.1, 0.5;
        0.6, 0.3, 0.7, 0.2;
        0.1, 0.4, 0.2, 0.6
    ];
    let q = l.transpose() * &l + DMatrix::identity(4, 4) * 1e-2;
    let cost = QuadraticCost::new(q)?;
    let a = dmatrix![
        0.9, 0.2, 0.3, 0.1, 0.5, 0.4;
        0.1, 0.8, 0.6, 0.2, 0.3, 0.7
    ];
    let lower = DVector::from_vec(vec![args.lower_bound, args.lower_bound + 0.2]);
    let upper = lower.add_scalar(2.0);

    program.add_cost("my_cost", [&y], Box::new(cost.clone()))?;
    program.add_constraint(
        "my_constraint",
        [nlp_adapter::VariableRef::concat([&x, &y])],
        Box::new(LinearConstraint::with_bounds(a.clone(), lower.clone(), upper.clone())?),
    )?;

    let config = AdapterConfig::new()
        .with_derivatives(args.derivatives.strategy())
        .with_problem_name("quadratic");
    let mut solver = AugmentedLagrangian::with_config(
        AugmentedLagrangianConfig::new().with_max_outer_iterations(args.max_iterations),
    );
    let mut adapter = SolverAdapter::build(&program, config)?;
    let result = adapter.solve(&mut solver)?.ensure_success()?;

    let x_val = program.gather(&x, &result.x)?;
    let y_val = program.gather(&y, &result.x)?;
    info!("x = {:?}", x_val.as_slice());
    info!("y = {:?}", y_val.as_slice());

    let cost_val = cost.eval(&[y_val.clone()])?;
    info!(
        "objective {:.6e}, cost at y {:.6e}",
        result.objective, cost_val
    );

    let xy = DVector::from_iterator(6, x_val.iter().chain(y_val.iter()).copied());
    let con_val = &a * xy;
    let eps = 1e-6;
    for i in 0..con_val.len() {
        if con_val[i] < lower[i] - eps || con_val[i] > upper[i] + eps {
            warn!(
                "constraint row {} = {:.6} outside [{}, {}]",
                i, con_val[i], lower[i], upper[i]
            );
        }
    }
    if let Some(summary) = solver.last_summary() {
        info!("\n{}", summary);
    }
    Ok(())
}

fn arm_scenario(args: &Args) -> NlpResult<()> {
    let mut program = NonlinearProgram::new();
    let q = program.new_variable_group(
        "q",
        &[3],
        VariableGroupOptions::new()
            .with_initial_guess(DVector::from_element(3, 0.1))
            .with_lower_bound(DVector::from_element(3, -FRAC_PI_2))
            .with_upper_bound(DVector::from_element(3, FRAC_PI_2)),
    )?;

    let arm = PlanarArm::new(vec![1.0, 0.8, 0.5])?;
    let target = Vector3::new(1.2, 0.9, 1.0);
    program.add_cost(
        "tip",
        [&q],
        Box::new(TipPoseErrorCost::new(1.0, Box::new(arm), target)),
    )?;

    let config = AdapterConfig::new()
        .with_derivatives(args.derivatives.strategy())
        .with_names(NameEncoding::plain())
        .with_problem_name("arm");
    let mut solver = AugmentedLagrangian::with_config(
        AugmentedLagrangianConfig::new().with_max_outer_iterations(args.max_iterations),
    );
    let result = nlp_adapter::solve(&program, &mut solver, config)?;

    info!("status: {}", result.status);
    info!("joints = {:?}", program.gather(&q, &result.x)?.as_slice());
    info!("remaining tip error {:.6e}", result.objective);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logger_with_level(if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    });

    info!("NLP ADAPTER EXAMPLE ({:?})", args.scenario);

    let outcome = match args.scenario {
        Scenario::Quadratic => quadratic_scenario(&args),
        Scenario::Arm => arm_scenario(&args),
    };
    if let Err(e) = &outcome {
        warn!("Solve failed ({:?})", e.kind());
        warn!("Full error chain:\n{}", e.chain());
    }
    Ok(outcome?)
}
