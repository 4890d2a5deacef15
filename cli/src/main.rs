//! Operator CLI for the Foreman coordination server

mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use client::ForemanClient;

#[derive(Parser)]
#[command(name = "foreman-cli", about = "Operator CLI for the Foreman coordination server")]
struct Cli {
    /// Base URL of the Foreman server
    #[arg(long, default_value = "http://localhost:3000", env = "FOREMAN_URL")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a task
    Create {
        title: String,
        /// Agent eligible to claim the task (repeatable)
        #[arg(long = "assignee")]
        assignees: Vec<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = "operator")]
        creator: String,
    },
    /// Show a single task
    Show { task_id: Uuid },
    /// Show all tasks grouped by status
    Board,
    /// Show the claimable queue for an agent
    Queue { agent_id: String },
    /// List dead-lettered tasks
    DeadLetters,
    /// Return a dead-lettered task to the queue
    Requeue {
        task_id: Uuid,
        /// Zero the retry counter as well
        #[arg(long)]
        reset_retries: bool,
    },
    /// Approve a pending approval
    Approve {
        task_id: Uuid,
        #[arg(long, default_value = "operator")]
        by: String,
    },
    /// Reject a pending approval (archives the task)
    Reject {
        task_id: Uuid,
        #[arg(long, default_value = "operator")]
        by: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// List registered agents
    Agents,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ForemanClient::new(cli.server);

    match cli.command {
        Command::Create {
            title,
            assignees,
            priority,
            description,
            creator,
        } => {
            let task = client
                .create_task(
                    &title,
                    description.as_deref(),
                    &assignees,
                    priority.as_deref(),
                    &creator,
                )
                .await?;
            println!("Created {}", task_line(&task));
        }
        Command::Show { task_id } => {
            let task = client.task(task_id).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        Command::Board => {
            let board = client.board().await?;
            if let Some(groups) = board.as_object() {
                for (status, tasks) in groups {
                    println!("{}:", status);
                    for task in tasks.as_array().into_iter().flatten() {
                        println!("  {}", task_line(task));
                    }
                }
            }
        }
        Command::Queue { agent_id } => {
            let queue = client.queue(&agent_id).await?;
            print_tasks(&queue, "queue is empty");
        }
        Command::DeadLetters => {
            let parked = client.dead_letters().await?;
            print_tasks(&parked, "dead-letter queue is empty");
        }
        Command::Requeue {
            task_id,
            reset_retries,
        } => {
            let task = client.requeue(task_id, reset_retries).await?;
            println!("Requeued {}", task_line(&task));
        }
        Command::Approve { task_id, by } => {
            let task = client
                .respond_to_approval(task_id, "approved", &by, None)
                .await?;
            println!("Approved {}", task_line(&task));
        }
        Command::Reject {
            task_id,
            by,
            reason,
        } => {
            let task = client
                .respond_to_approval(task_id, "rejected", &by, reason.as_deref())
                .await?;
            println!("Rejected {}", task_line(&task));
        }
        Command::Agents => {
            let agents = client.agents().await?;
            for agent in agents.as_array().into_iter().flatten() {
                println!(
                    "{} [{}] {} (last heartbeat: {})",
                    agent["name"].as_str().unwrap_or("?"),
                    agent["status"].as_str().unwrap_or("?"),
                    agent["role"].as_str().unwrap_or("?"),
                    agent["heartbeat_at"].as_str().unwrap_or("never"),
                );
            }
        }
    }

    Ok(())
}

fn task_line(task: &Value) -> String {
    let mut line = format!(
        "{} [{}] {}",
        task["id"].as_str().unwrap_or("?"),
        task["status"].as_str().unwrap_or("?"),
        task["title"].as_str().unwrap_or("?"),
    );
    if let Some(priority) = task["priority"].as_str() {
        line.push_str(&format!(" ({})", priority));
    }
    let retries = task["retry_count"].as_u64().unwrap_or(0);
    if retries > 0 {
        line.push_str(&format!(" retries={}", retries));
    }
    if task["dead_lettered"].as_bool().unwrap_or(false) {
        line.push_str(" DEAD-LETTERED");
    }
    line
}

fn print_tasks(tasks: &Value, empty_message: &str) {
    let items: Vec<&Value> = tasks.as_array().into_iter().flatten().collect();
    if items.is_empty() {
        println!("{}", empty_message);
        return;
    }
    for task in items {
        println!("{}", task_line(task));
    }
}
