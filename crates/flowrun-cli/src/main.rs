//! FlowRun CLI - Command line interface for the FlowRun control plane.

mod client;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use flowrun_core::TaskState;

use client::{HttpClient, Identity};

/// FlowRun CLI - submit and follow generation batches
#[derive(Parser)]
#[command(name = "flowrun")]
#[command(about = "CLI for the FlowRun control plane", long_about = None)]
struct Cli {
    /// Control plane HTTP address
    #[arg(short, long, env = "FLOWRUN_URL", default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// User to act as
    #[arg(short, long, env = "FLOWRUN_USER")]
    user: String,

    /// Team of the user
    #[arg(short, long, env = "FLOWRUN_TEAM", default_value = "")]
    team: String,

    /// Act with elevated access
    #[arg(long)]
    elevated: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new batch
    Submit {
        /// Task kind: P2V or I2V
        #[arg(short, long, default_value = "P2V")]
        kind: String,

        /// Resolution: 720p or 1080p
        #[arg(short, long, default_value = "720p")]
        resolution: String,

        /// Prompt for one item (repeatable)
        #[arg(short, long)]
        prompt: Vec<String>,

        /// File with one prompt per line
        #[arg(long)]
        prompts_file: Option<PathBuf>,

        /// Image item as IMAGE=PROMPT (repeatable)
        #[arg(short, long)]
        image: Vec<String>,
    },

    /// Get task status
    Get {
        /// Task ID
        id: String,
    },

    /// List tasks
    List {
        /// Every task, not only mine (requires --elevated)
        #[arg(long)]
        all: bool,
    },

    /// Cancel a task
    Cancel {
        /// Task ID to cancel
        id: String,
    },

    /// Show my task history
    History,

    /// Check control plane health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let client = HttpClient::new(
        &cli.addr,
        Identity {
            user: cli.user,
            team: cli.team,
            elevated: cli.elevated,
        },
    );

    match cli.command {
        Commands::Submit {
            kind,
            resolution,
            prompt,
            prompts_file,
            image,
        } => {
            let mut prompts = prompt;
            if let Some(path) = prompts_file {
                let text = tokio::fs::read_to_string(&path).await?;
                prompts.extend(text.lines().map(str::to_string));
            }
            let tasks = image
                .iter()
                .map(|pair| parse_image_pair(pair))
                .collect::<Result<Vec<_>, _>>()?;

            let body = json!({
                "kind": kind,
                "resolution": resolution,
                "prompts": prompts,
                "tasks": tasks,
            });
            let id = client.submit(&body).await?;
            println!("Task submitted: {}", id);
        }
        Commands::Get { id } => {
            let task = client.get(&id).await?;
            print_task(&task);
        }
        Commands::List { all } => {
            let tasks = client.list(all).await?;
            print_task_list(&tasks);
        }
        Commands::Cancel { id } => {
            client.cancel(&id).await?;
            println!("Cancel requested for {}", id);
        }
        Commands::History => {
            let history = client.history().await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        Commands::Health => {
            let healthy = client.health().await?;
            println!("{}", if healthy { "ok" } else { "unhealthy" });
        }
    }

    Ok(())
}

/// Split `IMAGE=PROMPT` into an image task.
fn parse_image_pair(pair: &str) -> Result<Value, String> {
    match pair.split_once('=') {
        Some((image, prompt)) if !image.trim().is_empty() => {
            Ok(json!({ "image": image.trim(), "prompt": prompt.trim() }))
        }
        _ => Err(format!("expected IMAGE=PROMPT, got '{}'", pair)),
    }
}

fn print_task_list(tasks: &[Value]) {
    println!("Tasks ({}):", tasks.len());
    println!(
        "{:<36}  {:<16}  {:<4}  {:<6}  {:<9}  {}",
        "ID", "STATUS", "KIND", "RES", "PROGRESS", "CREATED"
    );
    println!("{}", "-".repeat(96));

    for task in tasks {
        let progress = format!(
            "{}/{} {}%",
            task["completed"], task["total_items"], task["progress"]
        );
        println!(
            "{:<36}  {:<16}  {:<4}  {:<6}  {:<9}  {}",
            task["task_id"].as_str().unwrap_or("-"),
            task["status"].as_str().unwrap_or("-"),
            task["kind"].as_str().unwrap_or("-"),
            task["resolution"].as_str().unwrap_or("-"),
            progress,
            format_timestamp(task["created_at"].as_str().unwrap_or_default()),
        );
    }
}

fn print_task(task: &TaskState) {
    println!("  ID:         {}", task.id);
    println!("  Owner:      {}", task.owner);
    println!("  Kind:       {} ({})", task.kind, task.resolution);
    println!("  Status:     {}", task.status);
    println!(
        "  Progress:   {}% ({} finished, {} failed, {} total)",
        task.progress,
        task.completed,
        task.errors,
        task.total()
    );
    if task.cancel_requested {
        println!("  Cancel:     requested");
    }
    println!(
        "  Created:    {}",
        task.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if !task.items.is_empty() {
        println!("  Items:");
        for (index, item) in task.items.iter().enumerate() {
            println!("    {:>3}. [{}] {}", index + 1, item.status(), item.input.prompt());
            if !item.output_artifact_name().is_empty() {
                println!("         -> {}", item.output_artifact_name());
            }
        }
    }

    if !task.log.is_empty() {
        println!("  Log:");
        for entry in &task.log {
            println!("    {}", entry);
        }
    }
}

fn format_timestamp(rfc3339: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| rfc3339.to_string())
}
