//! Run command - drive a session over stdin/stdout.
//!
//! One line of input per turn; the rendered page goes to stdout after
//! every turn. Exit codes: 0 normal end, 1 fatal, 2 canceled, 3
//! terminated by the application.

use crate::config::BundleConfig;
use anyhow::{Context as _, Result};
use clap::Args;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::debug;
use trellis_runtime::{Config, Context, Engine, ErrorKind, RuntimeError, StoreResource};
use trellis_store::FsStore;

#[derive(Args)]
pub struct RunArgs {
    /// Session identifier
    #[arg(long = "session-id", default_value = "")]
    pub session_id: String,

    /// Entry node symbol (overrides trellis.toml and TRELLIS_ROOT)
    #[arg(long)]
    pub root: Option<String>,

    /// Content bundle directory
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Session persistence directory
    #[arg(long = "persist-dir")]
    pub persist_dir: Option<PathBuf>,

    /// Preferred content language
    #[arg(long)]
    pub lang: Option<String>,
}

pub fn run(args: &RunArgs) -> Result<u8> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    run_with(args, &mut stdin.lock(), &mut stdout)
}

/// Driver loop against arbitrary input/output streams.
pub fn run_with<I: BufRead, O: Write>(args: &RunArgs, input: &mut I, output: &mut O) -> Result<u8> {
    let file_cfg = BundleConfig::load(&args.dir)
        .with_context(|| format!("failed to read bundle config in {}", args.dir.display()))?;

    let root = args
        .root
        .clone()
        .or_else(|| file_cfg.root.clone())
        .or_else(|| std::env::var("TRELLIS_ROOT").ok())
        .unwrap_or_else(|| "root".to_string());
    let defaults = Config::default();
    let config = Config {
        root,
        session_id: args.session_id.clone(),
        flag_count: file_cfg.flag_count.unwrap_or(0),
        cache_size: file_cfg.cache_size.unwrap_or(0),
        output_size: file_cfg.output_size.unwrap_or(0),
        input_size: file_cfg.input_size.unwrap_or(defaults.input_size),
    };
    debug!(root = config.root.as_str(), session = config.session_id.as_str(), "starting session");

    let bundle = FsStore::open(&args.dir)
        .with_context(|| format!("failed to open bundle at {}", args.dir.display()))?;
    let mut engine = Engine::new(config, StoreResource::new(bundle));
    if let Some(dir) = &args.persist_dir {
        let store = FsStore::open(dir)
            .with_context(|| format!("failed to open persist dir {}", dir.display()))?
            .writable();
        engine = engine.with_store(Box::new(store));
    }

    let lang = args.lang.clone().or_else(|| file_cfg.lang.clone());
    let mut ctx = Context::new(args.session_id.clone());
    if let Some(lang) = lang {
        ctx = ctx.with_lang(lang);
    }

    let mut cont = match engine.init(&ctx) {
        Ok(cont) => cont,
        Err(e) => return finish(Err(e)),
    };

    loop {
        let mut page = Vec::new();
        if let Err(e) = engine.write_result(&ctx, &mut page) {
            output.write_all(&page)?;
            output.write_all(b"\n")?;
            return finish(Err(e));
        }
        output.write_all(&page)?;
        output.write_all(b"\n")?;
        output.flush()?;

        if !cont {
            return Ok(if engine.terminated() { 3 } else { 0 });
        }

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(0);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        cont = match engine.exec(&ctx, trimmed.as_bytes()) {
            Ok(cont) => cont,
            Err(e) => {
                // Drain the error page before reporting.
                let mut page = Vec::new();
                let _ = engine.write_result(&ctx, &mut page);
                output.write_all(&page)?;
                output.write_all(b"\n")?;
                return finish(Err(e));
            }
        };
    }
}

/// Map runtime failures onto the documented exit codes.
fn finish(result: Result<u8, RuntimeError>) -> Result<u8> {
    match result {
        Ok(code) => Ok(code),
        Err(e) => match e.kind() {
            ErrorKind::Canceled => Ok(2),
            ErrorKind::Terminated => Ok(3),
            _ => Err(e.into()),
        },
    }
}
