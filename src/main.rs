use std::fs;
use std::path::PathBuf;

use clap::Parser;

use ampstyle::resolve::PathMapper;
use ampstyle::{SanitizerOptions, StyleSanitizer};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// HTML document to sanitize.
    input: PathBuf,
    /// Write the sanitized document here instead of stdout.
    #[clap(short, long)]
    output: Option<PathBuf>,
    /// Directory that stylesheet link URLs resolve into.
    #[clap(long)]
    css_root: Option<PathBuf>,
    /// URL prefix mapped onto --css-root.
    #[clap(long, default_value = "")]
    css_prefix: String,
    /// Keep rules for classes that never occur in the document.
    #[clap(long)]
    keep_unused_classes: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("ampstyle=warn"))
        .init();

    let args = Args::parse();

    let mut sanitizer = StyleSanitizer::new(SanitizerOptions {
        tree_shaking: !args.keep_unused_classes,
    });
    if let Some(root) = args.css_root {
        sanitizer = sanitizer.with_resolver(Box::new(PathMapper::single(args.css_prefix, root)));
    }

    let html = fs::read_to_string(&args.input)?;
    let result = sanitizer.process(&html)?;

    for record in &result.errors {
        log::warn!("{}: {}", record.error.code(), record.error);
    }

    match args.output {
        Some(path) => fs::write(path, result.html)?,
        None => print!("{}", result.html),
    }
    Ok(())
}
