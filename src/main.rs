//! CLI entry point for admin-gateway.

mod cli;

use admin_gateway::build_info;
use admin_gateway::config::{initialize_default_config, load_config, ConfigInitResult};
use admin_gateway::gateway::{ApiRequest, Gateway, LogoutReason, Method, Navigator};
use admin_gateway::identity::{Credentials, TokenClaims};
use clap::Parser;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Non-interactive password source for scripted logins.
const PASSWORD_ENV: &str = "ADMIN_GATEWAY_PASSWORD";

const SHELL_HELP: &str = "commands:
  <METHOD> <PATH> [JSON]       send a request (GET, POST, PUT, PATCH, DELETE)
  login <EMAIL> [--remember]   sign in
  logout                       sign out
  status                       show the current session
  help                         show this help
  exit                         leave the shell";

#[tokio::main]
async fn main() {
    init_tracing();
    let args = cli::Args::parse();
    if let Err(msg) = run(args).await {
        eprintln!("error: {msg}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("admin_gateway=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(args: cli::Args) -> Result<(), String> {
    if let cli::Command::Init { force } = args.command {
        return run_init(force);
    }

    let mut config = load_config(args.config.as_deref()).map_err(|e| e.to_string())?;
    if let Some(url) = &args.base_url {
        config.backend.base_url = url.trim().trim_end_matches('/').to_string();
    }

    let navigator = Arc::new(TerminalNavigator::default());
    let gateway = Gateway::from_config(&config, navigator.clone())
        .map_err(|e| format!("failed to initialize gateway: {e}"))?;

    match args.command {
        cli::Command::Init { .. } => Ok(()),
        cli::Command::Login { email, remember } => {
            run_login(&gateway, &email, remember).await?;
            if !remember {
                eprintln!(
                    "note: the session was not remembered and ends with this process; use --remember or `admin-gateway shell`"
                );
            }
            Ok(())
        }
        cli::Command::Logout => {
            gateway.logout().await;
            Ok(())
        }
        cli::Command::Status => {
            print_status(&gateway);
            Ok(())
        }
        cli::Command::Request { method, path, body } => {
            let request = build_request(method, path, body.as_deref())?;
            let response = gateway.send(&request).await.map_err(|e| e.to_string())?;
            print_json(&response);
            Ok(())
        }
        cli::Command::Shell { email, remember } => {
            if let Some(email) = email {
                run_login(&gateway, &email, remember).await?;
            }
            run_shell(&gateway, &navigator).await
        }
    }
}

fn run_init(force: bool) -> Result<(), String> {
    match initialize_default_config(force).map_err(|e| e.to_string())? {
        ConfigInitResult::Created { path } => {
            println!("created {}", path.display());
        }
        ConfigInitResult::AlreadyInitialized { path } => {
            println!(
                "{} already exists (use --force to overwrite)",
                path.display()
            );
        }
        ConfigInitResult::Overwritten { path, backup_path } => {
            println!(
                "overwrote {} (previous file saved as {})",
                path.display(),
                backup_path.display()
            );
        }
    }
    Ok(())
}

async fn run_login(gateway: &Gateway, email: &str, remember: bool) -> Result<(), String> {
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(value) if !value.is_empty() => value,
        _ => rpassword::prompt_password(format!("password for {email}: "))
            .map_err(|e| format!("failed to read password: {e}"))?,
    };
    let session = gateway
        .sign_in(&Credentials::new(email, password), remember)
        .await
        .map_err(|e| format!("sign-in failed: {e}"))?;
    println!(
        "signed in as {} ({}{})",
        session.user_id,
        session.role.as_str(),
        if session.remember { ", remembered" } else { "" }
    );
    Ok(())
}

fn print_status(gateway: &Gateway) {
    let Some(session) = gateway.session() else {
        println!("not signed in");
        return;
    };
    println!("user:     {}", session.user_id);
    println!("role:     {}", session.role.as_str());
    println!("remember: {}", session.remember);
    println!("state:    {}", gateway.state());
    match TokenClaims::decode(&session.identity_token) {
        Ok(claims) => println!("expires:  unix {}", claims.expires_at_unix),
        Err(err) => println!("expires:  unknown ({err})"),
    }
}

async fn run_shell(gateway: &Gateway, navigator: &TerminalNavigator) -> Result<(), String> {
    eprintln!("{}", build_info::startup_metadata_line());
    eprintln!("type `help` for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| format!("failed to read input: {e}"))?
        else {
            return Ok(());
        };

        let action = match parse_shell_line(&line) {
            Ok(action) => action,
            Err(msg) => {
                eprintln!("error: {msg}");
                continue;
            }
        };
        match action {
            ShellAction::Empty => {}
            ShellAction::Exit => return Ok(()),
            ShellAction::Help => eprintln!("{SHELL_HELP}"),
            ShellAction::Status => print_status(gateway),
            ShellAction::Logout => gateway.logout().await,
            ShellAction::Login { email, remember } => {
                navigator.rearm();
                if let Err(msg) = run_login(gateway, &email, remember).await {
                    eprintln!("error: {msg}");
                }
            }
            ShellAction::Request(request) => match gateway.send(&request).await {
                Ok(response) => print_json(&response),
                Err(err) => eprintln!("error: {err}"),
            },
        }
    }
}

#[derive(Debug, PartialEq)]
enum ShellAction {
    Empty,
    Exit,
    Help,
    Status,
    Logout,
    Login { email: String, remember: bool },
    Request(ApiRequest),
}

fn parse_shell_line(line: &str) -> Result<ShellAction, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ShellAction::Empty);
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    match head.to_ascii_lowercase().as_str() {
        "exit" | "quit" => Ok(ShellAction::Exit),
        "help" | "?" => Ok(ShellAction::Help),
        "status" => Ok(ShellAction::Status),
        "logout" => Ok(ShellAction::Logout),
        "login" => {
            let mut email = None;
            let mut remember = false;
            for word in rest.split_whitespace() {
                match word {
                    "--remember" => remember = true,
                    other if email.is_none() => email = Some(other.to_string()),
                    other => return Err(format!("unexpected argument `{other}`")),
                }
            }
            let email = email.ok_or_else(|| "usage: login <EMAIL> [--remember]".to_string())?;
            Ok(ShellAction::Login { email, remember })
        }
        _ => {
            let method: Method = head.parse()?;
            let (path, body) = match rest.split_once(char::is_whitespace) {
                Some((path, body)) => (path, Some(body.trim())),
                None => (rest, None),
            };
            if path.is_empty() {
                return Err(format!("usage: {method} <PATH> [JSON]"));
            }
            build_request(method, path.to_string(), body).map(ShellAction::Request)
        }
    }
}

fn build_request(method: Method, path: String, body: Option<&str>) -> Result<ApiRequest, String> {
    let request = ApiRequest::new(method, path);
    match body.filter(|raw| !raw.trim().is_empty()) {
        None => Ok(request),
        Some(raw) => serde_json::from_str::<Value>(raw)
            .map(|body| request.with_body(body))
            .map_err(|e| format!("request body is not valid JSON: {e}")),
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

/// Prints one sign-in notice per session loss.
#[derive(Debug, Default)]
struct TerminalNavigator {
    notified: AtomicBool,
}

impl TerminalNavigator {
    fn rearm(&self) {
        self.notified.store(false, Ordering::SeqCst);
    }
}

impl Navigator for TerminalNavigator {
    fn to_sign_in(&self, reason: &LogoutReason) {
        if self.notified.swap(true, Ordering::SeqCst) {
            return;
        }
        match reason {
            LogoutReason::Requested => eprintln!("signed out"),
            other => eprintln!("{other}; run `admin-gateway login` to sign in again"),
        }
    }
}
