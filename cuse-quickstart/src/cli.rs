//! CLI argument definitions

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use cuse_quickstart_sdk::AuthFieldKind;
use uuid::Uuid;

/// Run natural-language workflows on a remote desktop with a computer-use agent
///
/// Workflows are ordered lists of steps. `execute` hands them to the agent,
/// follows its progress step by step and asks on the terminal for credentials
/// the keychain does not know yet.
#[derive(Parser, Debug, Clone)]
#[command(name = "cuse-quickstart")]
#[command(version)]
pub struct Args {
    /// Path to the config file
    ///
    /// Defaults to ~/.cuse-quickstart/config.yaml when it exists.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Use an in-memory database instead of the persistent one
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create, inspect and delete workflows
    #[command(subcommand)]
    Workflow(WorkflowCommand),

    /// Manage stored service credentials
    #[command(subcommand)]
    Keychain(KeychainCommand),

    /// Execute a stored workflow
    Execute {
        /// Workflow id
        id: Uuid,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum WorkflowCommand {
    /// Create a workflow from a YAML draft
    ///
    /// The draft has a `name`, a list of `steps` (each with a `description`
    /// and an optional `id`) and optional `keychainItems`.
    Create {
        #[arg(value_name = "DRAFT")]
        path: PathBuf,
    },

    /// List all workflows
    List,

    /// Show a workflow's steps
    Show { id: Uuid },

    /// Delete a workflow
    Delete { id: Uuid },
}

#[derive(Subcommand, Debug, Clone)]
pub enum KeychainCommand {
    /// Store credentials for a service, replacing existing ones
    Set(KeychainSetArgs),

    /// Show the stored fields of a service (secrets masked)
    Show { service: String },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct KeychainSetArgs {
    pub service: String,

    /// Credential field as KIND=VALUE, e.g. --field email=me@example.com
    #[arg(long = "field", value_name = "KIND=VALUE", value_parser = parse_field, required = true)]
    pub fields: Vec<(AuthFieldKind, String)>,
}

/// Parse a `KIND=VALUE` pair
pub fn parse_field(raw: &str) -> Result<(AuthFieldKind, String), String> {
    let (kind, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KIND=VALUE, got '{}'", raw))?;
    let kind: AuthFieldKind = serde_json::from_value(serde_json::Value::String(
        kind.trim().to_lowercase(),
    ))
    .map_err(|_| {
        format!(
            "unknown field kind '{}' (expected password, email, username, token, phone or otp)",
            kind
        )
    })?;
    if value.is_empty() {
        return Err(format!("empty value for {}", kind));
    }
    Ok((kind, value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_field_pairs() {
        assert_eq!(
            parse_field("Email=a=b@c").unwrap(),
            (AuthFieldKind::Email, "a=b@c".to_string())
        );
        assert!(parse_field("email").is_err());
        assert!(parse_field("pin=1234").is_err());
        assert!(parse_field("password=").is_err());
    }

    #[test]
    fn test_parses_commands() {
        let args = Args::parse_from([
            "cuse-quickstart",
            "--ephemeral",
            "keychain",
            "set",
            "hubspot",
            "--field",
            "email=a@b.c",
            "--field",
            "password=pw",
        ]);
        assert!(args.ephemeral);
        match args.command {
            Command::Keychain(KeychainCommand::Set(set)) => {
                assert_eq!(set.service, "hubspot");
                assert_eq!(set.fields.len(), 2);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let id = Uuid::new_v4();
        let args = Args::parse_from(["cuse-quickstart", "execute", id.to_string().as_str()]);
        assert!(matches!(args.command, Command::Execute { id: parsed } if parsed == id));
    }
}
