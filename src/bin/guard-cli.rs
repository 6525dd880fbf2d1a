use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use natacare_guard::config::{load_config, GuardConfig};
use natacare_guard::security::{PasswordContext, SanitizeKind, Sanitizer};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for NataCare Guard", long_about = None)]
struct Cli {
    /// Admin API base URL.
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,

    /// Admin API key.
    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show service status and rate limit totals
    Status,
    /// List tracked rate limit entries
    RateLimits {
        /// Only show blocked entries
        #[arg(long)]
        blocked: bool,
    },
    /// Clear one rate limit entry
    Reset {
        /// Action type (login, two_factor, password_reset, api, registration, email)
        action: String,
        /// Identifier the entry is keyed on, e.g. an email address
        identifier: String,
    },
    /// Sweep expired rate limit entries now
    Cleanup,
    /// Check a password against the policy (offline)
    Password {
        password: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        name: Option<String>,
        /// Config file whose password policy applies
        #[arg(long)]
        config: Option<std::path::PathBuf>,
    },
    /// Sanitize a value (offline)
    Sanitize {
        /// html, basic, plain_text, url, filename, csv_cell, email or search
        kind: String,
        input: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Password { password, email, name, config } => {
            let config = match config {
                Some(path) => load_config(&path)?,
                None => GuardConfig::default(),
            };
            let report = config
                .password
                .validate(&password, &PasswordContext { email, name });
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.valid {
                std::process::exit(1);
            }
            return Ok(());
        }
        Commands::Sanitize { kind, input } => {
            let kind: SanitizeKind = kind.parse()?;
            let output = Sanitizer::default().sanitize(kind, &input)?;
            println!("{output}");
            return Ok(());
        }
        _ => {}
    }

    let client = reqwest::Client::new();
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)),
        Commands::RateLimits { blocked } => client
            .get(format!("{}/admin/rate-limits", cli.url))
            .query(&[("blocked", blocked)]),
        Commands::Reset { action, identifier } => {
            client.delete(format!("{}/admin/rate-limits/{action}/{identifier}", cli.url))
        }
        Commands::Cleanup => client.post(format!("{}/admin/rate-limits/cleanup", cli.url)),
        Commands::Password { .. } | Commands::Sanitize { .. } => unreachable!("handled offline"),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    if status == reqwest::StatusCode::NO_CONTENT {
        println!("OK");
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
