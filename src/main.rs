use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use cellisp::{Config, EvaluationContext};
use log::info;

struct Options {
    config: Config,
    stats: bool,
    files: Vec<PathBuf>,
}

fn parse() -> anyhow::Result<Options> {
    let mut args = pico_args::Arguments::from_env();

    if args.contains(["-h", "--help"]) {
        println!("Usage: cellisp [options] [files...]");
        println!("Options:");
        println!("  -h, --help: Print this help message");
        println!("  --config <file>: Load settings from a JSON file");
        println!("  --capacity <slots>: Number of heap slots (default: 256)");
        println!("  --token-limit <chars>: Longest symbol or string literal (default: 99)");
        println!("  --stats: Print heap statistics on exit");
        println!("Without files, starts an interactive session.");
        std::process::exit(0);
    }

    let mut config = match args.opt_value_from_str::<_, PathBuf>("--config")? {
        Some(path) => {
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Config::from_json(&source).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => Config::default(),
    };
    if let Some(capacity) = args.opt_value_from_str("--capacity")? {
        config.capacity = capacity;
    }
    if let Some(limit) = args.opt_value_from_str("--token-limit")? {
        config.max_token_len = limit;
    }
    let stats = args.contains("--stats");

    let files = args.finish().into_iter().map(PathBuf::from).collect();
    Ok(Options { config, stats, files })
}

/// Reads, evaluates and prints every expression of `input`.
///
/// Interactive sessions report errors and carry on; otherwise the first
/// error ends the input and is returned.
fn run<R: BufRead>(context: &mut EvaluationContext, input: R, interactive: bool) -> anyhow::Result<()> {
    let mut reader = context.reader(input);
    loop {
        if interactive {
            print!("> ");
            io::stdout().flush()?;
        }

        let result = context
            .read(&mut reader)
            .and_then(|expression| expression.map(|e| context.evaluate(e)).transpose());
        match result {
            Ok(Some(value)) => println!("{}", context.render(value)),
            Ok(None) => return Ok(()),
            Err(error) if interactive => println!("Error: {}", error),
            Err(error) => return Err(error.into()),
        }
    }
}

fn run_file(context: &mut EvaluationContext, path: &Path) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    info!("running {}", path.display());
    run(context, BufReader::new(file), false)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let options = parse()?;

    let mut context = EvaluationContext::with_config(options.config)
        .context("heap too small for the global environment")?;

    let mut failed = false;
    if options.files.is_empty() {
        println!("Welcome to cellisp. Press ctrl-d to exit.");
        run(&mut context, io::stdin().lock(), true)?;
        println!();
    } else {
        for path in &options.files {
            if let Err(error) = run_file(&mut context, path) {
                println!("Error: {:#}", error);
                failed = true;
            }
        }
    }

    if options.stats {
        let stats = context.heap().stats();
        println!(
            "heap: {} slots, {} active, {} free, {} collections, {} symbols",
            stats.capacity,
            stats.active,
            stats.free,
            stats.collections,
            context.heap().symbol_count()
        );
        println!("token limit: {} characters", context.config().max_token_len);
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
