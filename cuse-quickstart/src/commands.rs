//! Command handlers behind the CLI

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cuse_quickstart_sdk::{
    AuthFieldKind, CredentialStore, ExecutionMessage, NewWorkflow, Role, ToolInvocation, Workflow, WorkflowStep,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::AnthropicSession;
use crate::cli::{Args, Command, KeychainCommand, KeychainSetArgs, WorkflowCommand};
use crate::config::QuickstartConfig;
use crate::database::Database;
use crate::desktop::HttpDesktop;
use crate::executor::{CredentialRequest, ExecutionEvent, ExecutionOutcome, WorkflowExecutor};
use crate::store::WorkflowStore;

const MASK: &str = "********";
const SUMMARY_LIMIT: usize = 120;

pub async fn run(args: Args) -> Result<()> {
    let config = QuickstartConfig::load(args.config.as_deref())?;

    let database = if args.ephemeral {
        Database::open_in_memory()?
    } else {
        let path = config.database_path()?;
        info!(path = %path.display(), "Opening database");
        Database::open(&path)
            .with_context(|| format!("Failed to open database {}", path.display()))?
    };
    let database = Arc::new(database);
    let store = WorkflowStore::new(database.clone(), database);

    match args.command {
        Command::Workflow(command) => workflow_command(&store, command).await,
        Command::Keychain(command) => keychain_command(&store, command).await,
        Command::Execute { id } => execute(&config, &store, id).await,
    }
}

async fn workflow_command(store: &WorkflowStore, command: WorkflowCommand) -> Result<()> {
    match command {
        WorkflowCommand::Create { path } => {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let draft: NewWorkflow =
                serde_yaml::from_str(&content).context("Failed to parse workflow draft")?;
            let workflow = store.save_workflow(draft).await?;
            println!("Created workflow {} ({})", workflow.name, workflow.id);
        }
        WorkflowCommand::List => {
            let workflows = store.list_workflows()?;
            if workflows.is_empty() {
                println!("No workflows yet. Create one with `workflow create <draft.yaml>`.");
            }
            for workflow in workflows {
                println!(
                    "{}  {}  ({} steps, created {})",
                    workflow.id,
                    workflow.name,
                    workflow.steps.len(),
                    workflow.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        WorkflowCommand::Show { id } => {
            let workflow = store.require_workflow(&id)?;
            print_workflow(&workflow);
        }
        WorkflowCommand::Delete { id } => {
            if !store.delete_workflow(&id)? {
                bail!("Workflow {} not found", id);
            }
            println!("Deleted workflow {}", id);
        }
    }
    Ok(())
}

fn print_workflow(workflow: &Workflow) {
    println!("{} ({})", workflow.name, workflow.id);
    println!("Updated {}", workflow.updated_at.to_rfc3339());
    for (i, step) in workflow.steps.iter().enumerate() {
        println!("  {}. [{}] {}", i + 1, step.id, step.description);
    }
    if !workflow.keychain_items.is_empty() {
        let services: Vec<_> = workflow
            .keychain_items
            .iter()
            .map(|item| item.service.as_str())
            .collect();
        println!("Keychain: {}", services.join(", "));
    }
}

async fn keychain_command(store: &WorkflowStore, command: KeychainCommand) -> Result<()> {
    let credentials = store.credentials();
    match command {
        KeychainCommand::Set(KeychainSetArgs { service, fields }) => {
            let fields = fields
                .into_iter()
                .map(|(kind, value)| (kind.as_str().to_string(), value))
                .collect();
            credentials.set(&service, fields).await?;
            println!("Stored credentials for {}", service);
        }
        KeychainCommand::Show { service } => match credentials.get(&service).await? {
            Some(fields) => {
                println!("{}", service);
                for (key, value) in fields {
                    println!("  {}: {}", key, masked(&key, &value));
                }
            }
            None => bail!("No credentials stored for {}", service),
        },
    }
    Ok(())
}

fn masked<'a>(key: &str, value: &'a str) -> &'a str {
    let secret = serde_json::from_value::<AuthFieldKind>(Value::String(key.to_string()))
        .map(|kind| kind.is_secret())
        .unwrap_or(true);
    if secret {
        MASK
    } else {
        value
    }
}

async fn execute(config: &QuickstartConfig, store: &WorkflowStore, id: Uuid) -> Result<()> {
    let workflow = store.require_workflow(&id)?;
    let session = AnthropicSession::new(config.anthropic_options()?)?;
    let desktop = Arc::new(HttpDesktop::new(&config.computer.url, config.computer.timeout())?);
    let executor = Arc::new(
        WorkflowExecutor::new(session, store.credentials(), desktop)
            .with_options(config.executor_options()),
    );

    print_workflow(&workflow);
    println!();

    let frontend = tokio::spawn(follow_run(executor.subscribe(), workflow.steps.clone()));
    let stopper = {
        let executor = executor.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nStopping...");
                executor.stop();
            }
        })
    };

    let outcome = executor.execute(&workflow).await;
    stopper.abort();
    if outcome.is_ok() {
        if let Err(e) = frontend.await {
            warn!(error = %e, "Output task failed");
        }
    } else {
        frontend.abort();
    }

    let step = executor
        .current_step_index()
        .map(|i| format!("{}/{}", i + 1, workflow.steps.len()))
        .unwrap_or_else(|| "none".to_string());
    match outcome? {
        ExecutionOutcome::Finished { transcript } => {
            println!("\nWorkflow finished ({} messages, last step {})", transcript.len(), step);
        }
        ExecutionOutcome::Stopped { transcript } => {
            println!("\nWorkflow stopped ({} messages, last step {})", transcript.len(), step);
        }
    }
    Ok(())
}

/// Print run progress and answer credential requests until the run ends
async fn follow_run(mut events: broadcast::Receiver<ExecutionEvent>, steps: Vec<WorkflowStep>) {
    let mut printer = TranscriptPrinter::default();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Output fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            ExecutionEvent::Started { .. } => {}
            ExecutionEvent::Message(message) => {
                print!("{}", printer.render(&message));
                let _ = std::io::stdout().flush();
            }
            ExecutionEvent::StepChanged { index, .. } => {
                if let Some(step) = steps.get(index) {
                    println!("\n==> Step {}/{}: {}", index + 1, steps.len(), step.description);
                }
            }
            ExecutionEvent::CredentialsRequested(request) => {
                prompt_credentials(&request, &mut stdin).await;
            }
            ExecutionEvent::Finished | ExecutionEvent::Stopped => break,
            ExecutionEvent::Failed { error } => {
                eprintln!("\nExecution failed: {}", error);
                break;
            }
        }
    }
}

async fn prompt_credentials(request: &CredentialRequest, stdin: &mut Lines<BufReader<Stdin>>) {
    println!(
        "\nThe agent needs credentials for '{}'. Leave all fields empty to skip.",
        request.service()
    );
    loop {
        let mut values = Vec::new();
        for kind in request.field_kinds() {
            print!("  {}: ", kind);
            let _ = std::io::stdout().flush();
            match stdin.next_line().await {
                Ok(Some(line)) => values.push((kind, line.trim().to_string())),
                _ => return,
            }
        }
        if values.iter().all(|(_, value)| value.is_empty()) {
            println!("Skipped credentials for {}", request.service());
            return;
        }
        match request.submit(values).await {
            Ok(()) => {
                println!("Saved credentials for {}", request.service());
                return;
            }
            Err(e) => {
                eprintln!("Could not save credentials: {}", e);
                if request.is_submitted() {
                    return;
                }
            }
        }
    }
}

/// Turns repeated snapshots of growing messages into incremental output
#[derive(Default)]
struct TranscriptPrinter {
    /// Message id -> (content bytes printed, tool results printed)
    progress: HashMap<String, (usize, usize)>,
}

impl TranscriptPrinter {
    fn render(&mut self, message: &ExecutionMessage) -> String {
        let (printed, tools_shown) = self.progress.entry(message.id.clone()).or_default();
        let mut out = String::new();

        if let Some(new_text) = message.content.get(*printed..) {
            if !new_text.is_empty() {
                if *printed == 0 && message.role == Role::User {
                    out.push_str("\n> ");
                }
                out.push_str(new_text);
                *printed = message.content.len();
            }
        }

        while let Some(tool) = message.tool_invocations.get(*tools_shown) {
            if !tool.is_resolved() {
                break;
            }
            out.push_str(&format!("\n  [{}] {}", tool.tool_name, summarize_tool(tool)));
            *tools_shown += 1;
        }
        if !out.is_empty() && message.role == Role::User {
            out.push('\n');
        }
        out
    }
}

fn summarize_tool(tool: &ToolInvocation) -> String {
    let args = truncate(&tool.args.to_string());
    let result = match &tool.result {
        Some(Value::String(text)) => truncate(text),
        Some(Value::Object(map)) if map.contains_key("base64_image") => "[screenshot]".to_string(),
        Some(other) => truncate(&other.to_string()),
        None => String::new(),
    };
    format!("{} => {}", args, result)
}

fn truncate(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(SUMMARY_LIMIT).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
