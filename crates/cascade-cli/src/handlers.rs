//! Command handlers.

use crate::commands::ExtractArgs;
use crate::config::CliConfig;
use anyhow::{Context, Result};
use cascade_core::flow::FlowDefinition;
use cascade_core::manifest::Manifest;
use cascade_core::ports::{CheckoutTarget, RepoStateManager};
use cascade_repo::{RepoExtractor, SystemGit};
use cascade_scheduler::DependencyGraph;
use chrono::{DateTime, NaiveDateTime, Utc};
use console::style;
use std::path::Path;
use std::sync::Arc;

const COMMIT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn load_graph(path: &Path) -> Result<(FlowDefinition, DependencyGraph)> {
    let flow = FlowDefinition::from_file(path)
        .with_context(|| format!("loading flow {}", path.display()))?;
    let graph = DependencyGraph::from_flow(&flow)?;
    Ok((flow, graph))
}

/// Validate a flow file.
pub fn validate_graph(path: &Path) -> Result<()> {
    let (_, graph) = load_graph(path)?;

    println!(
        "{} Flow {} is valid",
        style("✓").green(),
        style(path.display()).bold()
    );
    println!("  Root: {}", graph.name(graph.root()));
    println!("  Join step: {}", graph.join_step());
    println!("  Builders:");
    for id in graph.topological_order()? {
        let spec = graph.spec(id);
        println!("    - {} ({} triggers)", spec.name, spec.triggers.len());
    }
    Ok(())
}

/// Print the builders `builder` takes part in triggering.
pub fn downstream(path: &Path, builder: &str) -> Result<()> {
    let (_, graph) = load_graph(path)?;
    let id = graph
        .resolve(builder)
        .with_context(|| format!("unknown builder {builder}"))?;

    let edges = graph.downstream_of(id);
    if edges.is_empty() {
        println!("{} {} triggers nothing", style("i").blue(), builder);
        return Ok(());
    }
    for (target, trigger) in edges {
        let required: Vec<String> = trigger
            .required
            .iter()
            .map(|&r| graph.name(r).to_string())
            .collect();
        let required = if required.is_empty() {
            graph.name(graph.root()).to_string()
        } else {
            required.join(" + ")
        };
        println!(
            "{} {} {}",
            style(graph.name(target)).bold(),
            style("<-").dim(),
            required
        );
    }
    Ok(())
}

/// Print the flow file schema.
pub fn schema() -> Result<()> {
    let schema = schemars::schema_for!(FlowDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Check out a repository and print the resolved commit.
pub async fn extract(config: &CliConfig, args: ExtractArgs) -> Result<()> {
    let target = match (args.commit_id, args.commit_time) {
        (Some(commit), _) => CheckoutTarget::Commit(commit),
        (None, Some(time)) => CheckoutTarget::Time(parse_commit_time(&time)?),
        (None, None) => CheckoutTarget::Head,
    };

    let extractor = RepoExtractor::new(
        config.repositories.clone(),
        Arc::new(SystemGit),
        config.retry.clone(),
    )
    .with_default_branch(&config.default_branch);

    let sha = extractor
        .extract(&args.repo_name, &args.branch, target, &args.root_dir)
        .await?;

    println!(
        "{} {} at {}",
        style("✓").green(),
        style(&args.repo_name).bold(),
        sha
    );
    Ok(())
}

fn parse_commit_time(value: &str) -> Result<DateTime<Utc>> {
    let time = NaiveDateTime::parse_from_str(value, COMMIT_TIME_FORMAT)
        .with_context(|| format!("commit time {value:?} does not match {COMMIT_TIME_FORMAT}"))?;
    Ok(time.and_utc())
}

/// Show a manifest.
pub fn show_manifest(path: &Path) -> Result<()> {
    let manifest = Manifest::load(path)?;

    println!(
        "Event: {} / {}",
        style(&manifest.event.component).bold(),
        manifest.event.repository
    );
    for (name, component) in &manifest.components {
        println!(
            "  {} {} ({}, {})",
            style(name).bold(),
            component.version,
            component.build_info.build_type,
            component.build_info.build_event
        );
        for repo in component.repository.values() {
            let marker = if repo.name == component.build_info.trigger {
                style("*").yellow().to_string()
            } else {
                " ".to_string()
            };
            println!(
                "    {marker} {} {}@{}",
                repo.name,
                repo.branch,
                style(&repo.revision).dim()
            );
        }
    }
    Ok(())
}
