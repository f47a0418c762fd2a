use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use fvrepo::batch;
use fvrepo::config::OffloadConfig;
use fvrepo::protocol::args::{
    scalars_offset, KernelSignature, ACCURATE_ARGS, INIT_ARGS, PARAM_HEAD_SIZE, RELEASE_ARGS,
    REPO_ADD_ARGS, REPO_DEL_ARGS, SCALAR_SIZE, SEARCH_ARGS, IO_ADDR_SIZE,
};
use fvrepo::protocol::SearchMode;
use fvrepo::runtime::DevicePtr;
use fvrepo::selftest::{self, SelfTestOptions};

#[derive(Parser)]
#[command(
    name = "fvrepo",
    about = "Feature-vector repository offload toolkit",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (otherwise $FVREPO_CONFIG, then /etc/fvrepo/fvrepo.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every repository operation against the simulated device
    SelfTest {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        /// Features per added record
        #[arg(long, default_value_t = 1000)]
        features: u32,

        /// Queries per search
        #[arg(long, default_value_t = 12)]
        queries: u32,
    },

    /// Print the batch plan for a bulk operation
    Plan {
        #[arg(long, value_enum)]
        op: PlanOp,

        /// Number of features (add) or queries (search)
        #[arg(long)]
        count: u64,

        #[arg(long, value_enum, default_value = "n-to-m")]
        mode: ModeArg,

        #[arg(long)]
        json: bool,
    },

    /// Dump a representative kernel argument buffer
    Layout {
        #[arg(long, value_enum)]
        op: LayoutOp,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PlanOp {
    Add,
    Search,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    OneToN,
    NToM,
}

impl From<ModeArg> for SearchMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::OneToN => SearchMode::OneToN,
            ModeArg::NToM => SearchMode::NToM,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutOp {
    Init,
    Release,
    Add,
    Del,
    Accurate,
    Search,
}

impl LayoutOp {
    fn signature(self) -> (&'static str, KernelSignature) {
        match self {
            LayoutOp::Init => ("init", INIT_ARGS),
            LayoutOp::Release => ("release", RELEASE_ARGS),
            LayoutOp::Add => ("repo add", REPO_ADD_ARGS),
            LayoutOp::Del => ("repo del", REPO_DEL_ARGS),
            LayoutOp::Accurate => ("accurate delete/modify", ACCURATE_ARGS),
            LayoutOp::Search => ("search", SEARCH_ARGS),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => OffloadConfig::load(path)?,
        None => OffloadConfig::load_or_default(),
    };
    fvrepo::logging::init(&config.logging)?;

    match cli.command {
        Commands::SelfTest {
            json,
            features,
            queries,
        } => {
            tracing::info!(features, queries, "Running offload self-test");
            let report = selftest::run(config, SelfTestOptions { features, queries }).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\nfvrepo Offload Self-Test ({:?} run mode)", report.run_mode);
                println!("{:<16} | {:<6} | {:>7} | Details", "Step", "Status", "Kernels");
                println!("{:-<16}-|-{:-<6}-|-{:-<7}-|-{:-<40}", "", "", "", "");
                for res in &report.results {
                    println!(
                        "{:<16} | {:<6} | {:>7} | {}",
                        res.step,
                        res.status.label(),
                        res.invocations,
                        res.details
                    );
                    if let Some(rem) = &res.remediation {
                        println!("{:<16} | {:<6} | {:>7} |   -> {}", "", "", "", rem);
                    }
                }
                println!();
            }
            if !report.passed() {
                anyhow::bail!("self-test failed");
            }
        }
        Commands::Plan {
            op,
            count,
            mode,
            json,
        } => {
            let max = match op {
                PlanOp::Add => config.batching.repo_add_max,
                PlanOp::Search => config.batching.search_max,
            };
            let mode = SearchMode::from(mode);
            let plan = batch::plan(mode, count, max);
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!("{} {} item(s) in {} mode, batch max {}:", plan.len(), count, mode, max);
                println!("{:>5} | {:>12} | {:>12}", "Batch", "Offset", "Count");
                for (i, b) in plan.iter().enumerate() {
                    println!("{:>5} | {:>12} | {:>12}", i, b.offset, b.count);
                }
                println!("{} batches", plan.len());
            }
        }
        Commands::Layout { op } => {
            let (name, sig) = op.signature();
            print_layout(name, &sig)?;
        }
    }

    Ok(())
}

fn print_layout(name: &str, sig: &KernelSignature) -> Result<()> {
    let mut builder = sig.builder();
    for i in 0..sig.io_addrs.len() {
        builder.push_addr(DevicePtr(0x1000_0000 + 0x40 * i as u64))?;
    }
    for i in 0..sig.scalars.len() {
        builder.push_u32(i as u32 + 1)?;
    }
    let args = builder.finish()?;

    println!("{name} kernel arguments, {} bytes", args.len());
    println!("{:>6}  {:<14} {}", 0, "length", "u32");
    println!("{:>6}  {:<14} {}", 4, "ioAddrNum", "u32");
    println!("{:>6}  {:<14} {}", 8, "extInfoLength", "u32");
    println!("{:>6}  {:<14} {}", 12, "extInfoAddr", "u64");
    for (i, field) in sig.io_addrs.iter().enumerate() {
        println!("{:>6}  {:<14} {}", PARAM_HEAD_SIZE + i * IO_ADDR_SIZE, field, "u64");
    }
    let base = scalars_offset(sig.io_addrs.len());
    for (i, field) in sig.scalars.iter().enumerate() {
        println!("{:>6}  {:<14} {}", base + i * SCALAR_SIZE, field, "u32");
    }

    println!();
    for (row, chunk) in args.as_bytes().chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        println!("{:06x}  {}", row * 16, hex.join(" "));
    }
    Ok(())
}
