use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "container-cli")]
#[command(about = "Management CLI for the application container", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version, uptime and deployment counters
    Status,
    /// List deployed applications with their handlers and sessions
    Contexts,
    /// Show worker pool utilisation
    Pool,
    /// List the sessions of one application
    Sessions {
        /// Application (directory) name
        name: String,
    },
    /// Remove expired sessions of one application now
    Sweep {
        /// Application (directory) name
        name: String,
    },
    /// Rescan the deployment root now
    Reconcile,
}

impl Commands {
    fn request(&self) -> (Method, String) {
        match self {
            Commands::Status => (Method::GET, "/admin/status".to_string()),
            Commands::Contexts => (Method::GET, "/admin/contexts".to_string()),
            Commands::Pool => (Method::GET, "/admin/pool".to_string()),
            Commands::Sessions { name } => (Method::GET, format!("/admin/contexts/{}/sessions", name)),
            Commands::Sweep { name } => (
                Method::POST,
                format!("/admin/contexts/{}/sessions/cleanup", name),
            ),
            Commands::Reconcile => (Method::POST, "/admin/reconcile".to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path) = cli.command.request();
    let res = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
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

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
