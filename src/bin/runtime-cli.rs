use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "runtime-cli")]
#[command(about = "Probe CLI for services built on the runtime", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show readiness and per-component status
    Status,
    /// Check liveness
    Live,
    /// Query /healthz (same readiness snapshot as status)
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let path = match cli.command {
        Commands::Status => "/readyz",
        Commands::Live => "/livez",
        Commands::Health => "/healthz",
    };
    let res = client.get(format!("{}{}", cli.url, path)).send().await?;
    let ok = print_response(res).await?;

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Print the probe body. Probes answer 503 with a JSON body, so that is
/// printed too; the return value reports whether the probe passed.
async fn print_response(res: reqwest::Response) -> Result<bool, Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    if !status.is_success() {
        eprintln!("Error: probe returned status {}", status);
    }
    Ok(status.is_success())
}
