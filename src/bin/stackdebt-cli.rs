use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "stackdebt-cli")]
#[command(about = "Management CLI for the StackDebt analysis gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8000")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Liveness and subsystem summary
    Health,
    /// Cache statistics
    CacheStats,
    /// Drop every cached result
    CacheClear,
    /// Inspect the cache entry for a target
    CacheInfo {
        url: String,
        /// website or repository; inferred from the url when omitted
        #[arg(short = 't', long)]
        analysis_type: Option<String>,
    },
    /// Circuit breaker status for all services, or one
    Services { name: Option<String> },
    /// Force a service's circuit breaker closed
    Reset { name: String },
    /// Performance and compliance summary
    Performance,
    /// Clear performance metrics for one operation, or all
    ClearMetrics { operation: Option<String> },
    /// Run an analysis
    Analyze {
        url: String,
        #[arg(short = 't', long)]
        analysis_type: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Health => client.get(format!("{base}/health")),
        Commands::CacheStats => client.get(format!("{base}/admin/cache/stats")),
        Commands::CacheClear => client.post(format!("{base}/admin/cache/clear")),
        Commands::CacheInfo { url, analysis_type } => {
            let mut query = vec![("url", url)];
            if let Some(t) = analysis_type {
                query.push(("analysis_type", t));
            }
            client.get(format!("{base}/admin/cache/info")).query(&query)
        }
        Commands::Services { name: None } => client.get(format!("{base}/admin/services")),
        Commands::Services { name: Some(name) } => {
            client.get(format!("{base}/admin/services/{name}"))
        }
        Commands::Reset { name } => client.post(format!("{base}/admin/services/{name}/reset")),
        Commands::Performance => client.get(format!("{base}/admin/performance")),
        Commands::ClearMetrics { operation } => {
            let query: Vec<(&str, String)> = operation.into_iter().map(|op| ("operation", op)).collect();
            client
                .post(format!("{base}/admin/performance/clear"))
                .query(&query)
        }
        Commands::Analyze { url, analysis_type } => client
            .post(format!("{base}/api/analyze"))
            .json(&serde_json::json!({ "url": url, "analysis_type": analysis_type })),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if !text.is_empty() => println!("{}", text),
        Err(_) => {}
    }
    Ok(())
}
