use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tokio::sync::Semaphore;

use kitchen_telemetry::trace::propagation::{encode, TRACEPARENT_HEADER};
use kitchen_telemetry::trace::TraceContext;

#[derive(Parser)]
#[command(name = "store-cli")]
#[command(about = "Poke and load-test the kitchen-store services", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Per-request timeout in seconds
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List products
    Products,
    /// List employees
    Employees,
    /// Dump the Prometheus metrics of a service
    Metrics,
    /// Dump the current folded-stack profile of a service
    Profile,
    /// Send a batch of concurrent requests and tally the status codes
    Load {
        #[arg(short, long, default_value_t = 100)]
        count: usize,

        #[arg(short = 'j', long, default_value_t = 10)]
        concurrency: usize,

        #[arg(short, long, default_value = "/")]
        path: String,

        /// Start every request inside one sampled trace
        #[arg(long)]
        traceparent: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cli.timeout))
        .build()?;
    let base = cli.url.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Products => {
            let res = client.get(format!("{base}/products")).send().await?;
            print_json(res).await?;
        }
        Commands::Employees => {
            let res = client.get(format!("{base}/employees")).send().await?;
            print_json(res).await?;
        }
        Commands::Metrics => {
            let res = client.get(format!("{base}/metrics")).send().await?;
            print_text(res).await?;
        }
        Commands::Profile => {
            let res = client.get(format!("{base}/debug/pprof/profile")).send().await?;
            print_text(res).await?;
        }
        Commands::Load {
            count,
            concurrency,
            path,
            traceparent,
        } => {
            let mut headers = HeaderMap::new();
            if traceparent {
                let root = TraceContext::new_root(true);
                headers.insert(TRACEPARENT_HEADER, HeaderValue::from_str(&encode(&root))?);
                println!("trace_id: {}", root.trace_id);
            }
            run_load(client, format!("{base}{path}"), headers, count, concurrency).await?;
        }
    }

    Ok(())
}

async fn run_load(
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    count: usize,
    concurrency: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let started = Instant::now();
    let mut tasks = Vec::with_capacity(count);

    for _ in 0..count {
        let permit = Arc::clone(&permits).acquire_owned().await?;
        let request = client.get(&url).headers(headers.clone());
        tasks.push(tokio::spawn(async move {
            let outcome = match request.send().await {
                Ok(res) => res.status().as_u16().to_string(),
                Err(e) if e.is_timeout() => "timeout".to_string(),
                Err(_) => "error".to_string(),
            };
            drop(permit);
            outcome
        }));
    }

    let mut tally: BTreeMap<String, usize> = BTreeMap::new();
    for task in tasks {
        *tally.entry(task.await?).or_default() += 1;
    }

    let elapsed = started.elapsed();
    println!("{count} requests to {url} in {:.2}s", elapsed.as_secs_f64());
    for (outcome, n) in &tally {
        println!("  {outcome}: {n}");
    }
    Ok(())
}

async fn print_json(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: service returned status {status}");
        if let Ok(text) = res.text().await {
            eprintln!("Response: {text}");
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

async fn print_text(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if status.is_success() {
        print!("{text}");
    } else {
        eprintln!("Error: service returned status {status}");
        eprintln!("Response: {text}");
    }
    Ok(())
}
