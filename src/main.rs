mod account;
mod app;
mod cli;
mod clock;
mod config;
mod discovery;
mod error;
mod event;
mod guard;
mod journal;
mod location;
mod matching;
mod model;
mod navigation;
mod session;
mod settings;
mod store;
mod timer;

use anyhow::Result;
use clap::Parser;
use std::cell::RefCell;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "opento", about = "Open to connect: time-boxed presence sessions")]
pub struct Args {
    #[arg(long, env = "OPENTO_DATA_DIR", help = "Where state and journal are kept")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "OPENTO_LOG", help = "Log filter (e.g. opento=debug)")]
    pub log: Option<String>,

    #[arg(long, help = "Verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Seed for simulated discovery")]
    pub seed: Option<u64>,

    #[arg(long, help = "Disable simulated discovery")]
    pub no_discovery: bool,

    #[arg(short, long = "exec", value_name = "COMMAND", action = clap::ArgAction::Append, help = "Run a command and exit (repeatable)")]
    pub exec: Vec<String>,
}

fn init_tracing(args: &Args) {
    let default = if args.verbose { "opento=debug" } else { "opento=info" };
    let filter = args
        .log
        .as_deref()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args);

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)?
    } else {
        config::Config::load()?
    };

    // CLI overrides
    if let Some(dir) = &args.data_dir {
        cfg.data_dir = Some(dir.clone());
    }
    if args.seed.is_some() {
        cfg.discovery.seed = args.seed;
    }
    if args.no_discovery {
        cfg.discovery.enabled = Some(false);
    }

    if let Err(errors) = cfg.validate() {
        for e in &errors {
            eprintln!("Config error {}", e);
        }
        anyhow::bail!("invalid configuration ({} errors)", errors.len());
    }

    let data_dir = cfg.resolve_data_dir();
    let store = store::FileStore::open(&data_dir)?;
    tracing::debug!(data_dir = %data_dir.display(), "store opened");

    let mut app = app::App::from_config(Box::new(store), Box::new(clock::SystemClock), &cfg);

    let mut journal_path = None;
    if cfg.journal.enabled() {
        let path = data_dir.join("journal.jsonl");
        match journal::Journal::open(&path) {
            Ok(journal) => {
                journal_path = Some(journal.path.clone());
                app = app.with_journal(journal);
            }
            Err(e) => tracing::warn!(error = %e, "journal disabled"),
        }
    }

    let ctx = cli::Context {
        app: RefCell::new(app),
        data_dir,
        journal_path,
    };

    let result = if args.exec.is_empty() {
        cli::run_repl(&ctx)
    } else {
        cli::run_once(&ctx, &args.exec)
    };
    ctx.app.borrow_mut().shutdown();
    result
}
