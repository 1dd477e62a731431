//! azurerm-call - invoke Azure Resource Manager compute functions from
//! the command line.
//!
//! Calls look like a remote-execution invocation: a function name,
//! positional resource names, and `key=value` keyword arguments. The
//! result is printed as pretty JSON; a `false` result or an `error` key
//! exits nonzero.

use anyhow::{Context, Result};
use azurerm_compute::modules::{self, ModuleParams};
use clap::{Parser, ValueEnum};
use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "azurerm-call",
    version,
    about = "Call Azure Resource Manager compute module functions",
    after_help = "Run with an unknown function name to list the available functions."
)]
struct Cli {
    /// Function to call, e.g. virtual_machine_get
    function: String,

    /// Positional arguments followed by key=value keyword arguments,
    /// e.g. `testvm testgroup expand=instanceView`
    args: Vec<String>,

    /// Azure subscription id
    #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
    subscription_id: Option<String>,

    /// Service principal application id
    #[arg(long, env = "AZURE_CLIENT_ID")]
    client_id: Option<String>,

    /// Service principal secret
    #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Azure AD tenant id
    #[arg(long, env = "AZURE_TENANT_ID")]
    tenant: Option<String>,

    /// User name, for password authentication
    #[arg(long, env = "AZURE_USERNAME")]
    username: Option<String>,

    /// Password, for password authentication
    #[arg(long, env = "AZURE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Cloud environment name or ARM metadata endpoint URL
    #[arg(long, env = "AZURE_CLOUD_ENVIRONMENT")]
    cloud_environment: Option<String>,

    /// Result rendering: pretty-printed or compact JSON
    #[arg(long, value_enum, default_value = "pretty")]
    output: OutputFormat,

    /// Increase output verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Pretty,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (positional, mut kwargs) = split_args(&cli.args);
    merge_credentials(&cli, &mut kwargs);

    let result = modules::run(&cli.function, &positional, &kwargs)
        .await
        .with_context(|| format!("{} failed", cli.function))?;

    let rendered = match cli.output {
        OutputFormat::Pretty => serde_json::to_string_pretty(&result),
        OutputFormat::Json => serde_json::to_string(&result),
    }
    .context("result could not be rendered")?;
    println!("{rendered}");

    if result == Value::Bool(false) || result.get("error").is_some() {
        std::process::exit(1);
    }
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbosity >= 3))
        .with(env_filter)
        .init();
}

/// Split the trailing arguments into positionals and `key=value` keyword
/// arguments. Values parse as JSON when they can, so `overwrite=true` is
/// a boolean and `platform_fault_domain_count=2` is a number.
fn split_args(args: &[String]) -> (Vec<String>, ModuleParams) {
    let mut positional = Vec::new();
    let mut kwargs = ModuleParams::new();
    for arg in args {
        match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() && !key.contains(char::is_whitespace) => {
                kwargs.insert(key.to_string(), parse_value(value));
            }
            _ => positional.push(arg.clone()),
        }
    }
    (positional, kwargs)
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Fold credential flags into the keyword bundle, the way module callers
/// pass them. Explicit keyword arguments win over flags.
fn merge_credentials(cli: &Cli, kwargs: &mut ModuleParams) {
    let flags = [
        ("subscription_id", &cli.subscription_id),
        ("client_id", &cli.client_id),
        ("secret", &cli.secret),
        ("tenant", &cli.tenant),
        ("username", &cli.username),
        ("password", &cli.password),
        ("cloud_environment", &cli.cloud_environment),
    ];
    for (key, value) in flags {
        if let Some(value) = value {
            kwargs
                .entry(key.to_string())
                .or_insert_with(|| Value::String(value.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_split_args() {
        let args: Vec<String> = ["testvm", "testgroup", "expand=instanceView", "overwrite=true"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (positional, kwargs) = split_args(&args);
        assert_eq!(positional, vec!["testvm", "testgroup"]);
        assert_eq!(kwargs["expand"], json!("instanceView"));
        assert_eq!(kwargs["overwrite"], json!(true));
    }

    #[test]
    fn test_value_parsing() {
        assert_eq!(parse_value("2"), json!(2));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("[\"vm1\",\"vm2\"]"), json!(["vm1", "vm2"]));
        assert_eq!(parse_value("eastus"), json!("eastus"));
    }

    #[test]
    fn test_explicit_kwargs_beat_flags() {
        let cli = Cli::parse_from(["azurerm-call", "virtual_machine_get", "--tenant", "flagtenant"]);
        let mut kwargs = ModuleParams::new();
        kwargs.insert("tenant".to_string(), json!("kwargtenant"));
        merge_credentials(&cli, &mut kwargs);
        assert_eq!(kwargs["tenant"], json!("kwargtenant"));
    }
}
