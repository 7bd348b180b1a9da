use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use reap_aggregate::{Aggregator, PipelineConfig};
use reap_core::{Property, PropertyType, SearchCriteria};
use reap_valuation::{ValuationRequest, ValuationService};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "reap")]
#[command(about = "Real estate discovery and valuation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Search every configured source and print the merged listings as JSON.
    Search(SearchArgs),
    /// Value one property and print the report as JSON.
    Value(ValueArgs),
    /// Start the HTTP API.
    Serve,
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(long)]
    city: Option<String>,
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    zip: Option<String>,
    #[arg(long)]
    min_price: Option<f64>,
    #[arg(long)]
    max_price: Option<f64>,
    #[arg(long)]
    min_beds: Option<u32>,
    #[arg(long)]
    property_type: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
    /// Skip paid sources and the placeholder fallback.
    #[arg(long)]
    free_only: bool,
    /// Print per-source counts and duplicate review items alongside the listings.
    #[arg(long)]
    report: bool,
}

#[derive(Debug, Args)]
struct ValueArgs {
    #[arg(long)]
    address: String,
    #[arg(long)]
    city: String,
    #[arg(long)]
    state: String,
    #[arg(long)]
    zip: String,
    #[arg(long)]
    beds: Option<u32>,
    #[arg(long)]
    baths: Option<f64>,
    #[arg(long)]
    sqft: Option<u32>,
    #[arg(long)]
    year_built: Option<u32>,
    #[arg(long)]
    property_type: Option<String>,
    #[arg(long)]
    price: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,
    /// JSON array of comparable listings; searched from free sources when omitted.
    #[arg(long)]
    comparables: Option<PathBuf>,
}

impl SearchArgs {
    fn criteria(&self) -> SearchCriteria {
        SearchCriteria {
            city: self.city.clone(),
            state: self.state.clone(),
            zip_code: self.zip.clone(),
            min_price: self.min_price,
            max_price: self.max_price,
            min_beds: self.min_beds,
            property_type: self.property_type.as_deref().map(PropertyType::from_vendor),
            limit: self.limit,
        }
    }
}

impl ValueArgs {
    fn subject(&self) -> Property {
        Property {
            address: self.address.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            zip_code: self.zip.clone(),
            latitude: self.lat,
            longitude: self.lon,
            bedrooms: self.beds,
            bathrooms: self.baths,
            square_feet: self.sqft,
            year_built: self.year_built,
            property_type: self
                .property_type
                .as_deref()
                .map(PropertyType::from_vendor)
                .unwrap_or_default(),
            price: self.price,
            source: "cli".to_string(),
            ..Default::default()
        }
    }
}

fn init_tracing() {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let json_logging = std::env::var("REAP_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    match cli.command {
        Commands::Search(args) => {
            let aggregator = Aggregator::from_config(&config)?;
            let criteria = args.criteria();
            match (args.report, args.free_only) {
                (true, true) => print_json(&aggregator.search_free_with_report(&criteria).await?)?,
                (true, false) => print_json(&aggregator.search_all_with_report(&criteria).await?)?,
                (false, true) => print_json(&aggregator.search_free(&criteria).await?)?,
                (false, false) => print_json(&aggregator.search_all(&criteria).await?)?,
            }
        }
        Commands::Value(args) => {
            let service = ValuationService::from_config(&config)?;
            let mut request = ValuationRequest {
                subject: args.subject(),
                ..Default::default()
            };
            let report = match &args.comparables {
                Some(path) => {
                    let raw = std::fs::read_to_string(path)
                        .with_context(|| format!("reading comparables from {}", path.display()))?;
                    request.comparables =
                        serde_json::from_str(&raw).context("comparables file must be a JSON array of listings")?;
                    info!(count = request.comparables.len(), "loaded comparables");
                    service.value(&request).await?
                }
                None => {
                    let aggregator = Aggregator::from_config(&config)?;
                    service.value_from_market(&aggregator, request).await?
                }
            };
            print_json(&report)?;
        }
        Commands::Serve => reap_web::serve_from_env().await?,
    }

    Ok(())
}
