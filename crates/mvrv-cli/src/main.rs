use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use indicatif::{ProgressBar, ProgressStyle};
use mvrv_analysis::chart::{format_usd_compact, render_mvrv_chart, render_realized_cap_chart};
use mvrv_analysis::mvrv::{compute_mvrv, compute_stats, daily_prices, fetch_window, MvrvStats};
use mvrv_analysis::realized::{price_window, realized_cap_by_day};
use mvrv_data::extract::{extract_utxos, ExtractConfig, ExtractSummary};
use mvrv_data::files::{
    load_mvrv, load_realized_caps, load_utxos, save_mvrv, save_realized_caps, UtxoCsvWriter,
};
use mvrv_data::node::{BitcoinCli, DEFAULT_PROGRAM};
use mvrv_data::prices::CoinGecko;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct AppContext {
    bitcoin_cli: String,
    rpc_args: Vec<String>,
    coingecko_url: Option<String>,
    coingecko_api_key: Option<String>,
}

impl AppContext {
    fn coingecko(&self) -> Result<CoinGecko> {
        CoinGecko::new(
            self.coingecko_url.as_deref(),
            self.coingecko_api_key.clone(),
        )
    }
}

#[derive(Parser, Debug)]
#[command(name = "mvrv")]
#[command(about = "Bitcoin realized cap and MVRV from a local node and CoinGecko prices")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// bitcoin-cli executable (defaults to $BITCOIN_CLI, then `bitcoin-cli`).
    #[arg(long, global = true)]
    bitcoin_cli: Option<String>,

    /// Option passed to bitcoin-cli before every call, e.g. `--rpc-arg=-testnet`.
    #[arg(long = "rpc-arg", global = true, allow_hyphen_values = true)]
    rpc_args: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan sampled blocks on the local node and write their unspent outputs.
    Extract(ExtractArgs),
    /// Price sampled UTXOs and sum them into a daily realized cap.
    RealizedCap(RealizedCapArgs),
    /// Compute the MVRV ratio from a realized-cap file and live market data.
    Mvrv(MvrvArgs),
    /// Render a chart from an existing realized-cap or MVRV file.
    Plot(PlotArgs),
}

#[derive(Args, Debug)]
struct ExtractArgs {
    #[arg(long, default_value_t = 895_500)]
    start_block: u64,

    #[arg(long, default_value_t = 895_795)]
    end_block: u64,

    /// Sample every N-th block.
    #[arg(long, default_value_t = 10)]
    step: u64,

    #[arg(long, default_value_t = 16)]
    workers: usize,

    /// Attempts per block before it is skipped.
    #[arg(long, default_value_t = 1)]
    attempts: u32,

    /// Timeout for each bitcoin-cli call.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[arg(long, default_value = "utxos.csv")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct RealizedCapArgs {
    #[arg(long, default_value = "utxos.csv")]
    utxos: PathBuf,

    #[arg(long, default_value = "realized_cap.csv")]
    output: PathBuf,

    /// Also render the realized cap trend to this SVG file.
    #[arg(long)]
    chart: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct MvrvArgs {
    #[arg(long, default_value = "realized_cap.csv")]
    realized_cap: PathBuf,

    #[arg(long, default_value = "mvrv.csv")]
    output: PathBuf,

    #[arg(long, default_value = "mvrv.svg")]
    chart: PathBuf,

    /// Skip chart rendering.
    #[arg(long)]
    no_chart: bool,
}

#[derive(Args, Debug)]
struct PlotArgs {
    /// CSV produced by `realized-cap` or `mvrv`.
    #[arg(long)]
    input: PathBuf,

    /// Series kind: realized or mvrv.
    #[arg(long, default_value = "mvrv")]
    kind: String,

    #[arg(long)]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    let ctx = AppContext {
        bitcoin_cli: cli
            .bitcoin_cli
            .or_else(|| std::env::var("BITCOIN_CLI").ok())
            .unwrap_or_else(|| DEFAULT_PROGRAM.to_string()),
        rpc_args: cli.rpc_args,
        coingecko_url: std::env::var("MVRV_COINGECKO_URL").ok(),
        coingecko_api_key: std::env::var("COINGECKO_API_KEY").ok(),
    };

    match cli.command {
        Commands::Extract(args) => handle_extract(&ctx, args).await,
        Commands::RealizedCap(args) => handle_realized_cap(&ctx, args).await,
        Commands::Mvrv(args) => handle_mvrv(&ctx, args).await,
        Commands::Plot(args) => handle_plot(args),
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .wrap_err("failed to create progress style")?,
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

async fn handle_extract(ctx: &AppContext, args: ExtractArgs) -> Result<()> {
    let config = ExtractConfig {
        start_block: args.start_block,
        end_block: args.end_block,
        step: args.step,
        workers: args.workers,
        max_attempts: args.attempts,
    };
    config.validate()?;

    let node = BitcoinCli::new(
        ctx.bitcoin_cli.clone(),
        ctx.rpc_args.clone(),
        Duration::from_secs(args.timeout_secs),
    );

    let tip = node
        .block_count()
        .await
        .wrap_err("bitcoind is not running; start your node")?;
    if config.end_block > tip {
        warn!(
            end_block = config.end_block,
            tip, "end-block is beyond the node's tip; missing heights will be skipped"
        );
    }

    let writer = UtxoCsvWriter::create(&args.output)?;
    let (summary, _file) = extract_utxos(Arc::new(node), &config, writer)
        .await
        .wrap_err("UTXO extraction failed")?;

    print_extract_summary(&summary, &args.output);
    info!(
        output = %args.output.display(),
        utxos = summary.utxos_written,
        "extract command completed"
    );

    Ok(())
}

fn print_extract_summary(summary: &ExtractSummary, output: &std::path::Path) {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["Blocks Sampled".to_string(), summary.blocks_sampled.to_string()]);
    table.add_row(vec!["Blocks Scanned".to_string(), summary.blocks_scanned.to_string()]);
    table.add_row(vec!["Blocks Skipped".to_string(), summary.blocks_skipped.to_string()]);
    table.add_row(vec!["UTXOs Written".to_string(), summary.utxos_written.to_string()]);
    table.add_row(vec![
        "Elapsed".to_string(),
        format!("{:.2} min", summary.elapsed.as_secs_f64() / 60.0),
    ]);
    table.add_row(vec!["Output".to_string(), output.display().to_string()]);

    println!("\n{}\n", table);
}

async fn handle_realized_cap(ctx: &AppContext, args: RealizedCapArgs) -> Result<()> {
    let utxos = load_utxos(&args.utxos)?;
    let (from_unix, to_unix) =
        price_window(&utxos).ok_or_else(|| eyre!("{} has no UTXOs", args.utxos.display()))?;

    info!(
        utxos = utxos.len(),
        from_unix, to_unix, "fetching BTC price history"
    );
    let pb = spinner("fetching BTC/USD prices from CoinGecko")?;
    let prices = ctx
        .coingecko()?
        .market_chart_range(from_unix, to_unix)
        .await
        .wrap_err("failed to fetch BTC price history")?;
    pb.finish_and_clear();

    let report = realized_cap_by_day(&utxos, &prices);
    if report.days.is_empty() {
        return Err(eyre!(
            "no UTXO could be priced; CoinGecko returned {} samples",
            prices.len()
        ));
    }

    save_realized_caps(&args.output, &report.days)?;
    if let Some(chart) = &args.chart {
        render_realized_cap_chart(&report.days, chart)?;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Date", "Realized Cap"]);
    for day in &report.days {
        table.add_row(vec![
            day.date.format("%Y-%m-%d").to_string(),
            format_usd_compact(day.realized_cap),
        ]);
    }
    println!("\n{}\n", table);
    println!(
        "Priced UTXOs: {} (unpriced: {}), total {}\n",
        report.priced,
        report.unpriced,
        format_usd_compact(report.total_usd())
    );

    info!(
        output = %args.output.display(),
        days = report.days.len(),
        "realized-cap command completed"
    );
    Ok(())
}

async fn handle_mvrv(ctx: &AppContext, args: MvrvArgs) -> Result<()> {
    let realized = load_realized_caps(&args.realized_cap)?;
    let (from_unix, to_unix) = fetch_window(&realized)
        .ok_or_else(|| eyre!("{} has no rows", args.realized_cap.display()))?;

    let first = realized.iter().map(|r| r.date).min();
    let last = realized.iter().map(|r| r.date).max();
    info!(?first, ?last, "realized cap loaded");

    let client = ctx.coingecko()?;
    let pb = spinner("fetching BTC price and circulating supply from CoinGecko")?;
    let prices = client
        .market_chart_range(from_unix, to_unix)
        .await
        .wrap_err("failed to fetch BTC price history")?;
    let supply = client
        .circulating_supply()
        .await
        .wrap_err("failed to fetch circulating supply")?;
    pb.finish_and_clear();

    println!("Circulating Supply: {:.0} BTC", supply);

    let records = compute_mvrv(&realized, &daily_prices(&prices), supply);
    if records.is_empty() {
        return Err(eyre!(
            "no day in {} has a matching CoinGecko price",
            args.realized_cap.display()
        ));
    }

    save_mvrv(&args.output, &records)?;
    if !args.no_chart {
        render_mvrv_chart(&records, &args.chart)?;
    }

    if let Some(stats) = compute_stats(&records) {
        print_mvrv_stats(&stats);
    }

    info!(
        output = %args.output.display(),
        days = records.len(),
        "mvrv command completed"
    );
    Ok(())
}

fn print_mvrv_stats(stats: &MvrvStats) {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["Days".to_string(), stats.day_count.to_string()]);
    table.add_row(vec![
        "Latest".to_string(),
        format!(
            "{}{:.3}{} ({})",
            color_ratio(stats.latest_ratio),
            stats.latest_ratio,
            COLOR_RESET,
            stats.latest_date.format("%Y-%m-%d")
        ),
    ]);
    table.add_row(vec!["Min".to_string(), format!("{:.3}", stats.min_ratio)]);
    table.add_row(vec!["Max".to_string(), format!("{:.3}", stats.max_ratio)]);
    table.add_row(vec!["Mean".to_string(), format!("{:.3}", stats.mean_ratio)]);
    table.add_row(vec![
        "Days Below 1.0".to_string(),
        stats.days_below_one.to_string(),
    ]);

    println!("\n{}\n", table);
}

fn color_ratio(ratio: f64) -> &'static str {
    if ratio < 1.0 {
        "\x1b[32m" // Green: market below realized value
    } else if ratio <= 3.0 {
        "\x1b[33m" // Yellow
    } else {
        "\x1b[31m" // Red: historically overheated
    }
}

const COLOR_RESET: &str = "\x1b[0m";

fn handle_plot(args: PlotArgs) -> Result<()> {
    match args.kind.to_lowercase().as_str() {
        "realized" | "realized-cap" => {
            let days = load_realized_caps(&args.input)?;
            render_realized_cap_chart(&days, &args.output)?;
        }
        "mvrv" => {
            let records = load_mvrv(&args.input)?;
            render_mvrv_chart(&records, &args.output)?;
        }
        _ => {
            return Err(eyre!(
                "unknown series kind '{}'; use 'realized' or 'mvrv'",
                args.kind
            ))
        }
    }

    info!(
        input = %args.input.display(),
        output = %args.output.display(),
        "plot command completed"
    );
    Ok(())
}
