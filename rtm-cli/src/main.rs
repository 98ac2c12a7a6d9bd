mod cli;
mod prompts;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rtm_core::{
    export_json, export_workbook, list_sprints, render_markdown, render_workbook_csv,
    resolve_sprint, AppConfig, AzureSourceFactory, Connection, ConnectionRegistry,
    ConnectionUpdate, CoverageStatus, EngineConfig, Execution, NewConnection, RegistryError,
    ReportDocument, RtmEngine, SourceFactory, TimeFrame, WorkItemSource,
};

use crate::cli::{Cli, Command, ConnectionCommand, OutputFormat};

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let log_json = log_json
        || std::env::var("RTM_LOG_JSON")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
            .unwrap_or(false);

    // Logs go to stderr so matrix output on stdout stays clean
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = AppConfig::load_or_default(cli.config.as_deref())?;
    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => config.database_path()?,
    };
    let registry = ConnectionRegistry::open(&db_path).with_context(|| {
        format!("Failed to open connection registry at {}", db_path.display())
    })?;

    match &cli.command {
        Command::Connection(cmd) => {
            handle_connection_command(cmd, &registry).await?;
        }
        Command::Sprints => {
            list_sprints_command(&registry, cli.connection.as_deref()).await?;
        }
        Command::Generate {
            ids,
            sprint,
            format,
            output,
            concurrency,
        } => {
            let mut engine_config = config.engine.clone();
            if let Some(limit) = concurrency {
                engine_config.concurrency = *limit;
            }
            generate_command(
                &registry,
                cli.connection.as_deref(),
                engine_config,
                ids,
                sprint.as_deref(),
                *format,
                output.as_deref(),
            )
            .await?;
        }
    }

    Ok(())
}

/// Looks up a connection and opens a backend source for it
fn connect(
    registry: &ConnectionRegistry,
    name: Option<&str>,
) -> Result<(Connection, Arc<dyn WorkItemSource>)> {
    let connection = registry.resolve(name).map_err(|e| match e {
        RegistryError::NotFound(_) if name.is_none() => anyhow!(
            "No connection given and no default connection set. \
             Pass --connection or run `rtm connection default <name>`"
        ),
        other => other.into(),
    })?;

    let source = AzureSourceFactory::default()
        .connect(&connection)
        .with_context(|| format!("Invalid settings for connection '{}'", connection.name))?;
    Ok((connection, source))
}

async fn handle_connection_command(cmd: &ConnectionCommand, registry: &ConnectionRegistry) -> Result<()> {
    match cmd {
        ConnectionCommand::Add {
            name,
            org_url,
            project,
            token,
            default,
            interactive,
        } => {
            let new_connection = prompts::prompt_new_connection(
                name.clone(),
                org_url.clone(),
                project.clone(),
                token.clone(),
            )?;
            add_connection(registry, new_connection, *default, *interactive)?;
        }
        ConnectionCommand::List => list_connections(registry)?,
        ConnectionCommand::Show { name } => show_connection(registry, name)?,
        ConnectionCommand::Update {
            name,
            org_url,
            project,
            token,
        } => {
            registry.update(
                name,
                ConnectionUpdate {
                    org_url: org_url.clone(),
                    project: project.clone(),
                    token: token.clone(),
                },
            )?;
            println!("{} Updated connection '{}'", "✓".green(), name);
        }
        ConnectionCommand::Remove { name, yes } => {
            if !*yes && !prompts::confirm_removal(name)? {
                println!("{}", "Cancelled.".yellow());
                return Ok(());
            }
            registry.delete(name)?;
            println!("{} Removed connection '{}'", "✓".green(), name);
        }
        ConnectionCommand::Default { name } => {
            registry.set_default(name)?;
            println!("{} '{}' is now the default connection", "✓".green(), name);
        }
        ConnectionCommand::Test { name } => {
            let (connection, source) = connect(registry, name.as_deref())?;
            let project = source
                .test_connection()
                .await
                .with_context(|| format!("Connection '{}' failed", connection.name))?;
            println!(
                "{} Connected to project '{}' ({}) at {}",
                "✓".green(),
                project.name,
                project.id,
                connection.org_url
            );
        }
    }

    Ok(())
}

fn add_connection(
    registry: &ConnectionRegistry,
    new_connection: NewConnection,
    default: bool,
    interactive: bool,
) -> Result<()> {
    let first = registry.list()?.is_empty();
    let connection = registry.add(new_connection)?;

    let make_default = default || first || (interactive && prompts::prompt_make_default()?);
    if make_default {
        registry.set_default(&connection.name)?;
    }

    println!(
        "{} Added connection '{}'{}",
        "✓".green(),
        connection.name,
        if make_default { " (default)" } else { "" }
    );
    Ok(())
}

fn list_connections(registry: &ConnectionRegistry) -> Result<()> {
    let summaries = registry.summaries()?;
    if summaries.is_empty() {
        println!("{}", "No connections configured. Add one with `rtm connection add`.".yellow());
        return Ok(());
    }

    println!(
        "{:<2} {:<20} | {:<40} | {:<20} | {:<12}",
        "", "Name", "Organization", "Project", "Token"
    );
    println!("{}", "-".repeat(104));
    for summary in summaries {
        let marker = if summary.is_default { "*".green() } else { " ".normal() };
        println!(
            "{:<2} {:<20} | {:<40} | {:<20} | {:<12}",
            marker, summary.name, summary.org_url, summary.project, summary.token
        );
    }
    Ok(())
}

fn show_connection(registry: &ConnectionRegistry, name: &str) -> Result<()> {
    let connection = registry.get(name)?;
    let is_default = registry
        .default_connection()?
        .is_some_and(|c| c.name == connection.name);
    let summary = connection.summary(is_default);

    println!("{}", summary.name.bold());
    println!("  Organization: {}", summary.org_url);
    println!("  Project:      {}", summary.project);
    println!("  Token:        {}", summary.token);
    println!("  Default:      {}", if summary.is_default { "yes" } else { "no" });
    println!("  Created:      {}", summary.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Modified:     {}", summary.modified_at.format("%Y-%m-%d %H:%M:%S UTC"));
    Ok(())
}

async fn list_sprints_command(registry: &ConnectionRegistry, name: Option<&str>) -> Result<()> {
    let (connection, source) = connect(registry, name)?;
    let sprints = list_sprints(source.as_ref())
        .await
        .with_context(|| format!("Failed to list sprints for '{}'", connection.name))?;

    if sprints.is_empty() {
        println!("{}", "No sprints found.".yellow());
        return Ok(());
    }

    println!("{:<24} | {:<40} | {:<10} | {:<10}", "Name", "Path", "Start", "Finish");
    println!("{}", "-".repeat(92));
    for sprint in sprints {
        let name = match sprint.time_frame {
            TimeFrame::Current => sprint.name.green().bold(),
            _ => sprint.name.normal(),
        };
        println!(
            "{:<24} | {:<40} | {:<10} | {:<10}",
            name,
            sprint.path,
            format_date(sprint.start_date),
            format_date(sprint.finish_date)
        );
    }
    Ok(())
}

fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

#[allow(clippy::too_many_arguments)]
async fn generate_command(
    registry: &ConnectionRegistry,
    name: Option<&str>,
    engine_config: EngineConfig,
    ids: &[u64],
    sprint: Option<&str>,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    if format == OutputFormat::Table && output.is_some() {
        anyhow::bail!("Table output cannot be written to a file. Use --format csv, json or markdown");
    }

    let (connection, source) = connect(registry, name)?;

    let ids = match sprint {
        Some(sprint) => {
            let ids = resolve_sprint(source.as_ref(), sprint, &engine_config)
                .await
                .with_context(|| format!("Failed to resolve sprint '{}'", sprint))?;
            if ids.is_empty() {
                println!("{}", format!("No requirements found in sprint '{}'.", sprint).yellow());
                return Ok(());
            }
            ids
        }
        None => ids.to_vec(),
    };

    let engine = RtmEngine::new(source, engine_config);
    let report = engine
        .generate_matrix(&ids)
        .await
        .with_context(|| format!("Failed to generate matrix using connection '{}'", connection.name))?;
    let document = ReportDocument::new(report);

    for diagnostic in &document.diagnostics {
        eprintln!("{} {}", "warning:".yellow().bold(), diagnostic);
    }

    match (format, output) {
        (OutputFormat::Table, _) => print_table(&document),
        (OutputFormat::Json, Some(path)) => export_json(&document, path)?,
        (OutputFormat::Json, None) => println!("{}", serde_json::to_string_pretty(&document)?),
        (OutputFormat::Csv, Some(path)) => {
            export_workbook(&document.matrix, &document.statistics, path)?
        }
        (OutputFormat::Csv, None) => {
            print!("{}", render_workbook_csv(&document.matrix, &document.statistics))
        }
        (OutputFormat::Markdown, Some(path)) => {
            std::fs::write(path, render_markdown(&document.matrix, &document.statistics))
                .with_context(|| format!("Failed to write {}", path.display()))?
        }
        (OutputFormat::Markdown, None) => {
            print!("{}", render_markdown(&document.matrix, &document.statistics))
        }
    }

    if let Some(path) = output {
        println!("{} Wrote {}", "✓".green(), path.display());
    }
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}

fn print_table(document: &ReportDocument) {
    if document.matrix.is_empty() {
        println!("{}", "No matrix rows generated.".yellow());
    } else {
        println!(
            "{:<8} | {:<16} | {:<12} | {:<40} | {:<8} | {:<8} | {:<8} | {:<6}",
            "Story", "Feature", "Scenario", "Description", "Test", "Status", "Priority", "Exec"
        );
        println!("{}", "-".repeat(126));

        for row in &document.matrix {
            let status = match row.status {
                CoverageStatus::Covered => "Covered".green(),
                CoverageStatus::Missing => "Missing".red(),
            };
            let execution = match row.execution {
                Execution::Pass => "Pass".green(),
                Execution::Fail => "Fail".red(),
                Execution::Blank => "".normal(),
            };
            println!(
                "{:<8} | {:<16} | {:<12} | {:<40} | {:<8} | {:<8} | {:<8} | {:<6}",
                row.user_story_id,
                truncate(&row.feature, 16),
                truncate(row.scenario_type.label(), 12),
                truncate(&row.description, 40),
                row.test_case_id.map(|id| id.to_string()).unwrap_or_default(),
                status,
                row.priority.to_string(),
                execution
            );
        }
    }

    println!();
    println!("{}", "Coverage summary".bold());
    for kpi in document.statistics.kpis() {
        println!("  {:<24} {}", kpi.label, kpi.value);
    }

    let risks = &document.statistics.summary.risk_areas;
    if !risks.is_empty() {
        println!();
        println!("{}", "Risk areas".bold().red());
        for risk in risks {
            println!(
                "  {:<24} {:>3}% covered, {} uncovered",
                risk.feature, risk.coverage_percentage, risk.gap
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer description", 10), "a much ...");
        assert_eq!(truncate("ünïcödé text", 8), "ünïcö...");
    }
}
