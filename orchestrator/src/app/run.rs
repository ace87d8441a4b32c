//! Command dispatch

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use colored::Colorize;
use serde::Serialize;
use tracing::info;

use crate::app::state::AppState;
use crate::deploy::engine::{EnvironmentStatus, PortStatus, PromoteOptions, TeardownReport};
use crate::deploy::rollback::RollbackRequest;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::deployment::{DeployRequest, DeploymentResult, StepStatus, StrategyKind};
use crate::models::project::{Environment, ProjectConfig};
use crate::models::rollout::PreviewMetadata;

/// A parsed CLI command
#[derive(Debug, Clone)]
pub enum Command {
    Deploy(DeployRequest),
    Promote {
        project: String,
        environment: Environment,
        options: PromoteOptions,
    },
    Rollback(RollbackRequest),
    Status {
        project: String,
        environment: Environment,
    },
    Ports {
        project: Option<String>,
    },
    Register {
        file: PathBuf,
    },
    Teardown {
        project: String,
        pr_number: String,
    },
    Previews {
        project: Option<String>,
    },
    SweepPreviews,
}

fn required<'a>(args: &'a HashMap<String, String>, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing --{}", key))
}

fn flag(args: &HashMap<String, String>, key: &str) -> bool {
    args.get(key).is_some_and(|v| v != "false")
}

fn environment(args: &HashMap<String, String>) -> Result<Environment, String> {
    required(args, "env")?.parse()
}

impl Command {
    /// Build a command from its name and `--key=value` arguments
    pub fn parse(name: &str, args: &HashMap<String, String>) -> Result<Self, String> {
        match name {
            "deploy" => {
                let strategy: StrategyKind = args
                    .get("strategy")
                    .map(|s| s.parse())
                    .transpose()?
                    .unwrap_or(StrategyKind::Rolling);
                let environment = match (args.get("env"), strategy) {
                    (None, StrategyKind::Preview) => Environment::Preview,
                    _ => environment(args)?,
                };
                let mut request = DeployRequest::new(
                    required(args, "project")?,
                    environment,
                    required(args, "version")?,
                    strategy,
                );
                request.image = args.get("image").cloned();
                request.pr_number = args.get("pr").cloned();
                request.canary_weight = args
                    .get("weight")
                    .map(|w| w.parse::<u32>().map_err(|e| format!("--weight: {}", e)))
                    .transpose()?;
                request.skip_healthcheck = flag(args, "skip-healthcheck");
                request.force = flag(args, "force");
                Ok(Command::Deploy(request))
            }
            "promote" => Ok(Command::Promote {
                project: required(args, "project")?.to_string(),
                environment: environment(args)?,
                options: PromoteOptions {
                    skip_healthcheck: flag(args, "skip-healthcheck"),
                    force: flag(args, "force"),
                },
            }),
            "rollback" => Ok(Command::Rollback(RollbackRequest {
                project: required(args, "project")?.to_string(),
                environment: environment(args)?,
                version: args.get("version").cloned(),
                dry_run: flag(args, "dry-run"),
                skip_healthcheck: flag(args, "skip-healthcheck"),
            })),
            "status" => Ok(Command::Status {
                project: required(args, "project")?.to_string(),
                environment: environment(args)?,
            }),
            "ports" => Ok(Command::Ports {
                project: args.get("project").cloned(),
            }),
            "register" => Ok(Command::Register {
                file: PathBuf::from(required(args, "file")?),
            }),
            "teardown" => Ok(Command::Teardown {
                project: required(args, "project")?.to_string(),
                pr_number: required(args, "pr")?.to_string(),
            }),
            "previews" => Ok(Command::Previews {
                project: args.get("project").cloned(),
            }),
            "sweep-previews" => Ok(Command::SweepPreviews),
            other => Err(format!("unknown command `{}`", other)),
        }
    }
}

/// What a command produced
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Deployment(DeploymentResult),
    Status(EnvironmentStatus),
    Ports(PortStatus),
    Registered(ProjectConfig),
    Previews(Vec<PreviewMetadata>),
    Teardown(Vec<TeardownReport>),
}

impl Outcome {
    /// Whether the command should exit with 0
    pub fn success(&self) -> bool {
        match self {
            Outcome::Deployment(result) => result.success,
            Outcome::Teardown(reports) => reports.iter().all(TeardownReport::success),
            Outcome::Status(_)
            | Outcome::Ports(_)
            | Outcome::Registered(_)
            | Outcome::Previews(_) => true,
        }
    }
}

/// Run one command
pub async fn run(state: &AppState, command: Command) -> Result<Outcome, DeployError> {
    let engine = &state.engine;
    info!("Running command: {:?}", command);

    match command {
        Command::Deploy(request) => Ok(Outcome::Deployment(engine.deploy(request).await?)),
        Command::Promote {
            project,
            environment,
            options,
        } => Ok(Outcome::Deployment(
            engine.promote(&project, environment, options).await?,
        )),
        Command::Rollback(request) => Ok(Outcome::Deployment(
            engine.rollbacks().rollback(request).await?,
        )),
        Command::Status {
            project,
            environment,
        } => Ok(Outcome::Status(engine.status(&project, environment).await?)),
        Command::Ports { project } => Ok(Outcome::Ports(
            engine.port_status(project.as_deref()).await?,
        )),
        Command::Register { file } => {
            let config: ProjectConfig = File::new(file).read_json().await?;
            engine.register_project(&config).await?;
            Ok(Outcome::Registered(config))
        }
        Command::Teardown { project, pr_number } => Ok(Outcome::Teardown(vec![
            engine.teardown_preview(&project, &pr_number).await?,
        ])),
        Command::Previews { project } => Ok(Outcome::Previews(
            engine.previews(project.as_deref()).await?,
        )),
        Command::SweepPreviews => Ok(Outcome::Teardown(engine.sweep_previews(Utc::now()).await?)),
    }
}

/// Human-readable rendering of an outcome
pub fn render(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Deployment(result) => render_deployment(result),
        Outcome::Teardown(reports) if reports.is_empty() => "no previews to tear down".to_string(),
        Outcome::Teardown(reports) => reports
            .iter()
            .map(|r| {
                let mark = if r.success() { "✓".green() } else { "✗".red() };
                let mut line = format!("{} {} pr-{}", mark, r.project, r.pr_number);
                for error in &r.errors {
                    line.push_str(&format!("\n    {}", error.red()));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

fn render_deployment(result: &DeploymentResult) -> String {
    let mut lines = vec![format!(
        "{} {} {} -> {} ({} ms)",
        result.strategy.to_string().bold(),
        result.project,
        result.version,
        result.environment,
        result.duration_ms
    )];
    for step in &result.steps {
        let mark = match step.status {
            StepStatus::Success => "✓".green(),
            StepStatus::Failed => "✗".red(),
            StepStatus::Skipped => "-".yellow(),
            StepStatus::Pending | StepStatus::Running => "·".normal(),
        };
        let mut line = format!("  {} {:<26} {:>6} ms", mark, step.name, step.duration_ms);
        if let Some(output) = &step.output {
            line.push_str(&format!("  {}", output.dimmed()));
        }
        if let Some(error) = &step.error {
            line.push_str(&format!("  {}", error.red()));
        }
        lines.push(line);
    }
    let verdict = if result.success {
        "succeeded".green().bold()
    } else {
        "failed".red().bold()
    };
    lines.push(format!("{} (port validation: {:?})", verdict, result.port_validation));
    lines.join("\n")
}
