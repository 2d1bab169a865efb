use anyhow::Context;
use barrage::prelude::*;
use barrage_core::EXIT_CONFIG_ERROR;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_PLAN: &str = include_str!("../plans/api-health.yaml");

/// Runs a scenario document against `BASE_URL`.
#[derive(Parser, Debug)]
#[command(version = "0.1")]
struct Args {
    /// YAML or JSON plan; defaults to the bundled `plans/api-health.yaml`
    path: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    FmtSubscriber::builder()
        .with_env_filter("barrage=info,barrage_core=info")
        .init();

    let args = Args::parse();

    let text = match read_plan(args.path.as_deref()) {
        Ok(text) => text,
        Err(err) => {
            error!("{err:#}");
            std::process::exit(EXIT_CONFIG_ERROR.into());
        }
    };

    let code = match run(&text, args.json).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            err.exit_code()
        }
    };
    std::process::exit(code.into());
}

fn read_plan(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read plan {}", path.display())),
        None => Ok(DEFAULT_PLAN.to_string()),
    }
}

async fn run(text: &str, json: bool) -> Result<u8, RunError> {
    let spec = load_scenario(text)?;
    let thresholds = spec.thresholds.clone();

    let controller = RunController::new(spec)?;
    let abort = controller.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, draining");
            abort.abort();
        }
    });

    let result = controller.run().await?;
    let report = Report::new(&result, &thresholds);

    if json {
        match report.to_json() {
            Ok(text) => println!("{text}"),
            Err(err) => error!("Unable to serialize report: {err}"),
        }
    } else {
        println!("{report}");
    }

    Ok(result.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_args() {
        let args = Args::try_parse_from(["demos", "plans/smoke.json", "--json"]).unwrap();
        assert_eq!(args.path, Some(PathBuf::from("plans/smoke.json")));
        assert!(args.json);

        let args = Args::try_parse_from(["demos"]).unwrap();
        assert_eq!(args.path, None);
        assert!(!args.json);
    }

    #[test]
    fn bundled_plans_resolve() {
        let spec = ScenarioDocument::parse(DEFAULT_PLAN)
            .unwrap()
            .resolve(None)
            .unwrap();
        assert_eq!(spec.name, "api-health");
        assert_eq!(spec.workloads.len(), 2);

        let smoke = ScenarioDocument::parse(include_str!("../plans/smoke.json"))
            .unwrap()
            .resolve(None)
            .unwrap();
        assert_eq!(smoke.workloads.len(), 1);
    }
}
