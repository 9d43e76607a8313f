use anyhow::Context;
use clap::{Parser, Subcommand};
use modebench_core::Mode;
use modebench_server::{run_server, AppConfig, ServerConfig};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "modebench")]
#[command(version)]
#[command(about = "modebench - Benchmark inference optimization modes", long_about = None)]
struct Cli {
    /// Base URL of a running modebench server
    #[arg(long, global = true, env = "MODEBENCH_URL", default_value = "http://localhost:8000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the benchmarking server
    Serve {
        #[arg(short, long, env = "MODEBENCH_PORT", default_value_t = 8000)]
        port: u16,

        /// Keep history in memory only
        #[arg(long)]
        ephemeral: bool,

        /// JSON-lines store location
        #[arg(long, env = "MODEBENCH_STORE_PATH")]
        store_path: Option<PathBuf>,

        /// Count-triggered flush threshold for the batched mode
        #[arg(long)]
        max_batch_size: Option<usize>,

        /// Time-triggered flush bound for the batched mode
        #[arg(long)]
        max_wait_ms: Option<u64>,

        #[arg(long)]
        no_banner: bool,
    },

    /// Run the same workload against every mode
    Sweep {
        #[arg(short, long, default_value_t = 10)]
        num_requests: u32,

        #[arg(short, long, default_value = "The future of artificial intelligence is")]
        text: String,

        #[arg(short, long, default_value_t = 50)]
        max_new_tokens: u32,

        /// Output file for results (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show aggregate metrics and the baseline comparison
    Report,

    /// Show persisted observations, newest first
    History {
        /// Only this mode
        #[arg(short, long)]
        mode: Option<Mode>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show backend inventory
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, ephemeral, store_path, max_batch_size, max_wait_ms, no_banner } => {
            init_logging();

            let mut app = AppConfig::from_env();
            app.port = port;
            if ephemeral {
                app.store_path = None;
            } else if let Some(path) = store_path {
                app.store_path = Some(path);
            }
            if let Some(size) = max_batch_size {
                app.batcher.max_batch_size = size;
            }
            if let Some(ms) = max_wait_ms {
                app.batcher.max_wait_time = Duration::from_millis(ms);
            }

            run_server(ServerConfig { app, print_banner: !no_banner }).await?;
        }

        Commands::Sweep { num_requests, text, max_new_tokens, output } => {
            let client = Client::new(&cli.url)?;
            println!("Running sweep: {} requests per mode\n", num_requests);

            let body = json!({
                "num_requests": num_requests,
                "text": text,
                "max_new_tokens": max_new_tokens,
            });
            let report = client.post("/api/benchmark", &body).await?;

            for mode in Mode::SWEEP_ORDER {
                let records = report["results"][mode.as_str()]
                    .as_array()
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let failed = records.iter().filter(|r| r.get("error").is_some()).count();
                println!(
                    "  {:<12} {} ok, {} failed",
                    mode.as_str(),
                    records.len() - failed,
                    failed
                );
            }
            println!();
            print_comparison(&report["summaries"], &report["comparison"]);

            if let Some(path) = output {
                let json = serde_json::to_string_pretty(&report)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("\nResults saved to: {}", path.display());
            }
        }

        Commands::Report => {
            let client = Client::new(&cli.url)?;
            let metrics = client.get("/api/metrics").await?;
            println!("Observations held: {}\n", metrics["total_inferences"]);
            print_comparison(&metrics["summaries"], &metrics["comparison"]);
        }

        Commands::History { mode, limit } => {
            let client = Client::new(&cli.url)?;
            let mut path = format!("/api/metrics/history?limit={}", limit);
            if let Some(mode) = mode {
                path.push_str(&format!("&mode={}", mode));
            }
            let history = client.get(&path).await?;

            println!("Stored observations: {}\n", history["total_stored"]);
            println!("{:>6}  {:<12} {:>12} {:>12} {:>10}", "id", "mode", "latency_ms", "tokens/s", "memory_mb");
            for row in history["history"].as_array().map(Vec::as_slice).unwrap_or_default() {
                println!(
                    "{:>6}  {:<12} {:>12.2} {:>12.2} {:>10.1}",
                    row["id"],
                    row["mode"].as_str().unwrap_or("?"),
                    row["latency_ms"].as_f64().unwrap_or(0.0),
                    row["tokens_per_sec"].as_f64().unwrap_or(0.0),
                    row["memory_mb"].as_f64().unwrap_or(0.0),
                );
            }
        }

        Commands::Models => {
            let client = Client::new(&cli.url)?;
            let models = client.get("/api/models").await?;
            println!("{}", serde_json::to_string_pretty(&models)?);
        }
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("modebench_server=info,modebench_core=info,tower_http=info")
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

/// Thin JSON client for a running server
struct Client {
    base: String,
    http: reqwest::Client,
}

impl Client {
    fn new(base: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { base: base.trim_end_matches('/').to_string(), http })
    }

    async fn get(&self, path: &str) -> anyhow::Result<Value> {
        let response = self
            .http
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .with_context(|| format!("Is the server running at {}?", self.base))?;
        Self::json(response).await
    }

    async fn post(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        let response = self
            .http
            .post(format!("{}{}", self.base, path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Is the server running at {}?", self.base))?;
        Self::json(response).await
    }

    async fn json(response: reqwest::Response) -> anyhow::Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.context("Invalid JSON response")?;
        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("unknown error");
            anyhow::bail!("Server returned {}: {}", status, message);
        }
        Ok(body)
    }
}

fn print_comparison(summaries: &Value, comparison: &Value) {
    if let Some(error) = comparison.get("error").and_then(Value::as_str) {
        println!("Comparison unavailable: {}\n", error);
    }

    println!(
        "{:<12} {:>6} {:>10} {:>10} {:>10} {:>8} {:>12}",
        "mode", "count", "mean_ms", "p95_ms", "tokens/s", "speedup", "$/1M tok"
    );
    for row in comparison_rows(summaries, comparison) {
        println!("{}", row);
    }
}

fn comparison_rows(summaries: &Value, comparison: &Value) -> Vec<String> {
    let Some(modes) = summaries.as_object() else {
        return Vec::new();
    };

    modes
        .iter()
        .map(|(mode, summary)| {
            let entry = &comparison[mode];
            format!(
                "{:<12} {:>6} {:>10.2} {:>10.2} {:>10.2} {:>8} {:>12}",
                mode,
                summary["count"].as_u64().unwrap_or(0),
                summary["latency"]["mean"].as_f64().unwrap_or(0.0),
                summary["latency"]["p95"].as_f64().unwrap_or(0.0),
                summary["throughput"]["mean_tokens_per_sec"].as_f64().unwrap_or(0.0),
                entry["speedup"]
                    .as_f64()
                    .map(|s| format!("{:.2}x", s))
                    .unwrap_or_else(|| "-".to_string()),
                format_cost(&entry["estimated_cost_per_1m_tokens"]),
            )
        })
        .collect()
}

/// Cost cell; `null` means zero throughput
fn format_cost(cost: &Value) -> String {
    match cost.as_f64() {
        Some(cost) => format!("${:.4}", cost),
        None if cost.is_null() => "inf".to_string(),
        None => "-".to_string(),
    }
}
