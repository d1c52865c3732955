use std::path::PathBuf;
use std::str::FromStr;

use bertrand::config::{Config, LearnerConfig};
use bertrand::simulation::Experiment;
use log::info;
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, EnumString, Display)]
#[strum(serialize_all = "kebab-case")]
enum Algorithm {
    Ucb,
    Linear,
    Neural,
    QFull,
    QReduced,
}

#[derive(Debug, Clone)]
struct Args {
    algo: Algorithm,
    agents: usize,
    periods: u32,
    replicates: u32,
    seed: u64,
    json_out: Option<PathBuf>,
    quiet: bool,
}

impl Args {
    fn usage() -> &'static str {
        "\
bertrand: Monte Carlo pricing-game experiment runner

USAGE:
  cargo run -- [FLAGS]

FLAGS:
  --algo NAME          ucb | linear | neural | q-full | q-reduced (default: ucb)
  --agents N           Number of firms, 2 or 3 (default: 2)
  --periods N          Periods per replicate (default: 10000)
  --replicates N       Monte Carlo replicates (default: 10)
  --seed U64           Base seed; replicate i uses seed + i (default: 1)
  --json PATH          Write the full result as JSON to PATH
  --quiet              Suppress the per-agent summary
  --help               Show this help
"
    }

    fn parse_or_exit() -> Self {
        match Self::parse() {
            Ok(args) => args,
            Err(e) => {
                eprintln!("{e}\n\n{}", Self::usage());
                std::process::exit(2);
            }
        }
    }

    fn parse() -> Result<Self, String> {
        let mut out = Args {
            algo: Algorithm::Ucb,
            agents: 2,
            periods: 10_000,
            replicates: 10,
            seed: 1,
            json_out: None,
            quiet: false,
        };
        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--help" | "-h" => {
                    println!("{}", Self::usage());
                    std::process::exit(0);
                }
                "--quiet" => out.quiet = true,
                "--algo" => {
                    let v = it.next().ok_or("--algo needs a value")?;
                    out.algo = Algorithm::from_str(&v).map_err(|_| format!("unknown algorithm: {v}"))?;
                }
                "--agents" => out.agents = parse_next(&mut it, "--agents")?,
                "--periods" => out.periods = parse_next(&mut it, "--periods")?,
                "--replicates" => out.replicates = parse_next(&mut it, "--replicates")?,
                "--seed" => out.seed = parse_next(&mut it, "--seed")?,
                "--json" => {
                    let v = it.next().ok_or("--json needs a path")?;
                    out.json_out = Some(PathBuf::from(v));
                }
                other => return Err(format!("unknown flag: {other}")),
            }
        }
        Ok(out)
    }
}

fn parse_next<T: FromStr>(
    it: &mut impl Iterator<Item = String>,
    flag: &str,
) -> Result<T, String> {
    let v = it.next().ok_or_else(|| format!("{flag} needs a value"))?;
    v.parse().map_err(|_| format!("invalid value for {flag}: {v}"))
}

fn main() {
    env_logger::init();
    let args = Args::parse_or_exit();

    let (learner, grid) = match args.algo {
        Algorithm::Ucb => (LearnerConfig::ucb(), vec![0.3, 0.4, 0.5]),
        Algorithm::Linear => (LearnerConfig::linear(), vec![0.3, 0.4, 0.5]),
        Algorithm::Neural => (LearnerConfig::neural(), vec![0.3, 0.4, 0.5]),
        Algorithm::QFull => (LearnerConfig::q_full(), vec![0.3, 0.4, 0.5]),
        // Reduced state space: same update rule on a coarser grid.
        Algorithm::QReduced => (LearnerConfig::q_reduced(), vec![0.3, 0.5]),
    };
    let config = Config {
        grid,
        n_agents: args.agents,
        periods: args.periods,
        replicates: args.replicates,
        seed: args.seed,
        learner,
        ..Config::default()
    };

    let experiment = match Experiment::new(config) {
        Ok(experiment) => experiment,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    info!(
        "running {} for {} periods x {} replicates, {} agents",
        args.algo, args.periods, args.replicates, args.agents
    );
    let result = experiment.run();

    if !args.quiet {
        let window = (args.periods as usize / 10).max(1);
        for agent in 0..args.agents {
            let price = result.mean_price_tail(agent, window);
            let profit = result.mean_profit_tail(agent, window);
            info!(
                "agent {agent}: tail mean price {:?}, tail mean profit {:?} (final {window} periods)",
                price, profit
            );
        }
        for c in result.best_response_correlations() {
            info!(
                "replicate {} agents {:?}: best-response correlation {:?}",
                c.replicate, c.agents, c.correlation
            );
        }
        if !result.failures.is_empty() {
            info!("{} of {} replicates aborted", result.failures.len(), args.replicates);
        }
    }

    if let Some(path) = &args.json_out {
        let payload = serde_json::to_string(&result).unwrap();
        if let Err(e) = std::fs::write(path, payload) {
            eprintln!("failed to write {}: {e}", path.display());
            std::process::exit(1);
        }
        info!("result written to {}", path.display());
    }
}
