use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{
    Brand, EngineState, FlowEvent, PortRecord, ProjectRecord, RunMode, StepEvent, StepRecord, TemplateIdentity,
};
use flowruntime::{FlowHost, HostConfig, Materializer, PluginRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a project file
    Run {
        /// Path to project JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Keep iterating until interrupted
        #[arg(short, long)]
        continuous: bool,

        /// Stop after this many iterations (implies continuous)
        #[arg(short = 'n', long)]
        iterations: Option<u64>,

        /// Host configuration JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Materialize a project file and report skipped entries
    Validate {
        /// Path to project JSON file
        file: PathBuf,
    },

    /// List available step and device-provider templates
    Templates,

    /// Create a new example project
    Init {
        /// Output file path
        #[arg(short, long, default_value = "project.json")]
        output: PathBuf,
    },
}

fn standard_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    flownodes::register_all(&mut registry);
    registry
}

fn load_project(file: &Path) -> Result<ProjectRecord> {
    let json = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", file.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            continuous,
            iterations,
            config,
            verbose,
        } => {
            let default_level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
                .init();

            let config = match config {
                Some(path) => HostConfig::from_file(&path)?,
                None => HostConfig::default(),
            };
            let mode = if continuous || iterations.is_some() {
                RunMode::Continuous
            } else {
                RunMode::SinglePass
            };
            run_project(file, mode, iterations, config).await?;
        }

        Commands::Validate { file } => {
            validate_project(&file)?;
        }

        Commands::Templates => {
            list_templates();
        }

        Commands::Init { output } => {
            create_example_project(&output)?;
        }
    }

    Ok(())
}

async fn run_project(file: PathBuf, mode: RunMode, iterations: Option<u64>, config: HostConfig) -> Result<()> {
    println!("Loading project from: {}", file.display());
    let record = load_project(&file)?;

    let host = FlowHost::new(Arc::new(standard_registry()), config);
    let report = host.activate_project(&record).await?;

    println!("Project: {}", record.name);
    if let Some(project) = host.project().await {
        println!("   Steps: {}", project.steps);
        println!("   Links: {}", project.links);
    }
    if !report.is_clean() {
        println!("   Skipped during load: {} steps, {} links", report.skipped_steps.len(), report.skipped_links.len());
    }
    println!();

    let mut events = host.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                FlowEvent::RunStatusChanged { status } => {
                    println!("Run {} is {}", status.run_id, status.state);
                }
                FlowEvent::IterationFinished { notice } => {
                    println!("  Iteration {} finished ({})", notice.index, notice.iteration_id);
                }
                FlowEvent::StepLog { step_id, event, .. } => match event {
                    StepEvent::Info { message } => println!("     [{}] {}", step_id, message),
                    StepEvent::Warning { message } => println!("     [{}] warning: {}", step_id, message),
                    StepEvent::Progress { percent, message } => match message {
                        Some(msg) => println!("     [{}] {}% - {}", step_id, percent, msg),
                        None => println!("     [{}] {}%", step_id, percent),
                    },
                },
                _ => {}
            }
        }
    });

    host.start_run(mode).await?;

    if mode == RunMode::Continuous {
        wait_for_stop_condition(&host, iterations).await;
        if let Err(e) = host.stop_run().await {
            tracing::debug!("Stop request ignored: {}", e);
        }
    }
    host.wait_for_run().await;

    // Let the event task drain what is already queued
    tokio::time::sleep(Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("Run Summary:");
    if let Some(status) = host.get_status().await {
        println!("   Run ID: {}", status.run_id);
        println!("   State: {}", status.state);
        println!("   Iterations: {}", status.iterations);
        if let Some(error) = &status.last_error {
            println!("   Error: {}", error);
        }
    }

    let inspector = host.inspector().await?;
    println!();
    println!("Outputs:");
    for step in inspector.list_steps().await {
        let outputs: Vec<_> = step
            .ports
            .iter()
            .filter(|p| p.direction == flowcore::Direction::Output)
            .collect();
        if outputs.is_empty() {
            continue;
        }
        println!("   {} ({} ms):", step.name, step.last_duration_ms.unwrap_or(0));
        for port in outputs {
            println!("     {}: {}", port.name, port.value);
        }
    }

    host.deactivate_project().await?;
    Ok(())
}

/// Returns once `iterations` have completed, the run ended, or Ctrl-C was pressed
async fn wait_for_stop_condition(host: &FlowHost, iterations: Option<u64>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(20));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted, stopping run");
                return;
            }
            _ = ticker.tick() => {
                let Some(status) = host.get_status().await else { return };
                if status.state.is_terminal() || status.state == EngineState::Aborting {
                    return;
                }
                if iterations.is_some_and(|n| status.iterations >= n) {
                    return;
                }
            }
        }
    }
}

fn validate_project(file: &Path) -> Result<()> {
    println!("Validating project: {}", file.display());

    let record = load_project(file)?;
    let registry = standard_registry();
    let (graph, report) = Materializer::new(&registry).materialize(&record);

    println!("   Name: {}", record.name);
    println!("   Steps: {}/{}", graph.step_count(), record.steps.len());
    println!("   Links: {}/{}", graph.link_count(), record.links.len());

    if report.is_clean() {
        println!("Project is valid");
        return Ok(());
    }

    for (id, reason) in &report.skipped_steps {
        println!("   skipped step {}: {}", id, reason);
    }
    for (id, reason) in &report.skipped_links {
        println!("   skipped link {}: {}", id, reason);
    }
    for (id, reason) in &report.rejected_values {
        println!("   kept default for port {}: {}", id, reason);
    }
    anyhow::bail!("project loaded partially")
}

fn list_templates() {
    let registry = standard_registry();

    println!("Step templates:");
    println!();
    for template in registry.list_templates() {
        println!("  • {} ({})", template.identity, template.metadata.category);
        println!("    {}", template.metadata.description);
    }

    println!();
    println!("Device providers:");
    for provider in registry.list_device_providers() {
        println!("  • {}", provider.identity);
        println!("    {}", provider.metadata.description);
    }
}

fn create_example_project(output: &Path) -> Result<()> {
    let origin = flownodes::ORIGIN;
    let mut project = ProjectRecord::new("Example Project");
    project.description = Some("Adds two numbers and thresholds a synthetic frame".to_string());

    let a_out = PortRecord::output("value", Brand::Numeric);
    let b_out = PortRecord::output("value", Brand::Numeric);
    let sum_a = PortRecord::input("a", Brand::Numeric, serde_json::Value::Null);
    let sum_b = PortRecord::input("b", Brand::Numeric, serde_json::Value::Null);
    let sum_out = PortRecord::output("sum", Brand::Numeric);
    let message = PortRecord::input("message", Brand::String, serde_json::Value::Null);
    let frame = PortRecord::output("image", Brand::Image);
    let frame_in = PortRecord::input("image", Brand::Image, serde_json::Value::Null);

    let links = [
        (a_out.id, sum_a.id),
        (b_out.id, sum_b.id),
        (sum_out.id, message.id),
        (frame.id, frame_in.id),
    ];

    project.add_step(
        StepRecord::new(TemplateIdentity::new("math.constant", origin))
            .with_name("A")
            .with_position(100.0, 100.0)
            .with_port(PortRecord::input("value", Brand::Numeric, serde_json::json!(2)))
            .with_port(a_out),
    );
    project.add_step(
        StepRecord::new(TemplateIdentity::new("math.constant", origin))
            .with_name("B")
            .with_position(100.0, 200.0)
            .with_port(PortRecord::input("value", Brand::Numeric, serde_json::json!(40)))
            .with_port(b_out),
    );
    project.add_step(
        StepRecord::new(TemplateIdentity::new("math.add", origin))
            .with_name("Sum")
            .with_position(300.0, 150.0)
            .with_port(sum_a)
            .with_port(sum_b)
            .with_port(sum_out),
    );
    project.add_step(
        StepRecord::new(TemplateIdentity::new("debug.log", origin))
            .with_name("Log Sum")
            .with_position(500.0, 150.0)
            .with_port(message),
    );
    project.add_step(
        StepRecord::new(TemplateIdentity::new("image.acquire", origin))
            .with_name("Camera")
            .with_position(100.0, 350.0)
            .with_port(frame),
    );
    project.add_step(
        StepRecord::new(TemplateIdentity::new("image.threshold", origin))
            .with_name("Threshold")
            .with_position(300.0, 350.0)
            .with_port(frame_in)
            .with_port(PortRecord::input("level", Brand::Numeric, serde_json::json!(100))),
    );

    for (source, target) in links {
        project.link(source, target);
    }

    let json = serde_json::to_string_pretty(&project)?;
    std::fs::write(output, json)?;

    println!("Created example project: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  flow run --file {}", output.display());
    println!("  flow run --file {} --iterations 5", output.display());

    Ok(())
}
