//! sealgate - gated report distribution demo
//!
//! ```bash
//! # すべて in-memory で一連の流れを実行
//! sealgate demo
//!
//! # レポート生成 API と Walrus だけ本物を使う
//! sealgate demo --config sealgate.json --http-report --http-walrus
//!
//! # アップロード先の publisher を選ぶ
//! sealgate demo --http-walrus --publisher staketab.org
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sealgate_core::app::{Collaborators, Pipeline, PipelineConfig};
use sealgate_core::domain::{ErrorKind, FlowEvent, PipelineError};
use sealgate_core::impls::{
    DevWallet, HttpBlobStore, HttpReportGenerator, InMemoryBlobStore, InMemoryKeyServers,
    InMemoryLedger, StaticReportGenerator,
};
use sealgate_core::ports::{
    BlobStore, EventSink, ReportGenerator, SystemClock, TokioSleeper, Wallet,
};

const KEY_SERVERS: usize = 3;

#[derive(Parser)]
#[command(name = "sealgate", about = "Gated report distribution", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole flow: generate, encrypt, upload, pay, verify, download
    Demo {
        /// JSON config file (defaults and SEALGATE_* env vars apply otherwise)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Size of the generated report in bytes
        #[arg(short, long, default_value_t = 1000)]
        size: usize,

        /// Package the report is about
        #[arg(
            short,
            long,
            default_value = "0x2c8d603bc51326b8c13cef9dd07031a408a48dddb541963357661df5d3204809"
        )]
        package: String,

        /// Use the HTTP report API instead of a static report
        #[arg(long)]
        http_report: bool,

        /// Use the configured Walrus publisher/aggregators instead of an in-memory store
        #[arg(long)]
        http_walrus: bool,

        /// Name of the Walrus service to upload through (defaults to the first one)
        #[arg(long)]
        publisher: Option<String>,
    },
}

/// Prints every transition as it happens.
struct PrintingSink;

impl EventSink for PrintingSink {
    fn emit(&self, event: FlowEvent) {
        println!(
            "[{}] {} {} -> {}",
            event.at.format("%H:%M:%S%.3f"),
            event.flow_id,
            event.from,
            event.to
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sealgate=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Demo {
            config,
            size,
            package,
            http_report,
            http_walrus,
            publisher,
        } => {
            let config = PipelineConfig::load(config.as_deref()).context("loading config")?;
            let options = DemoOptions {
                size,
                http_report,
                http_walrus,
                publisher,
            };
            demo(config, &package, options).await
        }
    }
}

struct DemoOptions {
    size: usize,
    http_report: bool,
    http_walrus: bool,
    publisher: Option<String>,
}

async fn demo(config: PipelineConfig, package: &str, options: DemoOptions) -> Result<()> {
    let DemoOptions {
        size,
        http_report,
        http_walrus,
        publisher,
    } = options;
    let clock = Arc::new(SystemClock);
    let ledger = Arc::new(InMemoryLedger::new(
        config.package_id,
        config.coin_type.clone(),
        config.price,
        config.capability_ttl(),
        clock.clone(),
    ));
    let wallet = Arc::new(DevWallet::new(ledger.clone()));
    let payer = wallet.address()?;
    // two coins that only cover the price together
    ledger.mint(payer, config.price / 10 * 6);
    ledger.mint(payer, config.price / 10 * 5);
    if let Some(service) = config.service_id {
        tracing::warn!(%service, "configured service is unknown to the in-memory ledger");
    }

    let key_servers = KEY_SERVERS.max(usize::from(config.threshold));
    let threshold = Arc::new(InMemoryKeyServers::new(ledger.clone(), clock.clone(), key_servers));
    let blob_store: Arc<dyn BlobStore> = if http_walrus {
        Arc::new(HttpBlobStore::new())
    } else {
        Arc::new(InMemoryBlobStore::new())
    };
    let reports: Arc<dyn ReportGenerator> = if http_report {
        Arc::new(HttpReportGenerator::new(config.report_api_base_url.clone())?)
    } else {
        Arc::new(StaticReportGenerator::new(size))
    };

    let deps = Collaborators {
        ledger: ledger.clone(),
        wallet: wallet.clone(),
        threshold: threshold.clone(),
        blob_store,
        reports,
        clock,
        sleeper: Arc::new(TokioSleeper),
        events: Arc::new(PrintingSink),
    };
    let mut pipeline = Pipeline::new(config, deps).with_account_changes(wallet.subscribe());
    if let Some(name) = publisher.as_deref() {
        pipeline.select_publisher(name).map_err(explain)?;
    }

    println!(
        "payer {payer}, balance {}, {} key servers",
        ledger.balance_of(&payer),
        threshold.server_count()
    );
    let flow = match pipeline.create_report(package).await {
        Ok(flow) => flow,
        Err(e) if e.kind() == ErrorKind::CapabilityUnresolved => {
            println!("{}", e.kind().user_message());
            pipeline.retry().await.map_err(explain)?
        }
        Err(e) => return Err(explain(e)),
    };
    println!("blob      {} ({:?}, until epoch {})", flow.blob.blob_id, flow.blob.status, flow.blob.end_epoch);
    println!("download  {}", flow.blob.download_url);
    println!("explorer  {}", flow.blob.explorer_url);
    println!("capability {} (expires {})", flow.capability.id, flow.capability.expires_at());

    let report = pipeline.download().await.map_err(explain)?;
    println!(
        "decrypted {} bytes as {} ({})",
        report.bytes.len(),
        report.file_name,
        report.media_type
    );

    // second download reuses the session key
    pipeline.download().await.map_err(explain)?;
    println!(
        "downloaded again with {} signature prompt(s), balance left {}",
        wallet.message_prompts(),
        ledger.balance_of(&payer)
    );
    Ok(())
}

fn explain(error: PipelineError) -> anyhow::Error {
    anyhow::anyhow!("{}\n  caused by: {error}", error.kind().user_message())
}
