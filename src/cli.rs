//! CLI argument parsing via clap.

use admin_gateway::build_info;
use admin_gateway::gateway::Method;
use clap::{Parser, Subcommand};

/// Authenticated request gateway for the admin console backend.
#[derive(Debug, Parser)]
#[command(
    name = "admin-gateway",
    version,
    after_help = build_info::HELP_BUILD_METADATA
)]
pub struct Args {
    /// Path to config file (default: ./admin-gateway.toml or ~/.config/admin-gateway/admin-gateway.toml).
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<String>,

    /// Override the backend base URL.
    #[arg(long = "base-url", global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write the default config file.
    Init {
        /// Back up and overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
    /// Sign in with email and password.
    Login {
        #[arg(long)]
        email: String,
        /// Keep the session across restarts and refresh it automatically.
        #[arg(long)]
        remember: bool,
    },
    /// Sign out and clear the stored session.
    Logout,
    /// Show the current session.
    Status,
    /// Send one authenticated request and print the JSON response.
    Request {
        #[arg(value_parser = parse_method)]
        method: Method,
        path: String,
        /// JSON request body.
        #[arg(long)]
        body: Option<String>,
    },
    /// Interactive shell sharing one session across requests.
    Shell {
        /// Sign in before entering the shell.
        #[arg(long)]
        email: Option<String>,
        #[arg(long, requires = "email")]
        remember: bool,
    },
}

fn parse_method(raw: &str) -> Result<Method, String> {
    raw.parse()
}
