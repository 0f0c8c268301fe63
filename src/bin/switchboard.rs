use clap::{command, Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use switchboard::{config::SwitchboardConfig, i18n::I18n, Error, Registry};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "switchboard.json")]
    config: PathBuf,

    /// Enable debug mode
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a key with the configured translations
    Translate {
        key: String,

        /// Language to translate into, the configured default otherwise
        #[arg(short, long)]
        lang: Option<String>,

        /// Namespace holding the key
        #[arg(short, long)]
        ns: Option<String>,

        /// Interpolation option as name=value, may be repeated
        #[arg(short, long = "opt", value_parser = parse_option)]
        opts: Vec<(String, String)>,
    },
}

fn parse_option(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{s}'"))
}

fn run(cli: &Cli) -> Result<(), Error> {
    let config = if cli.config.exists() {
        SwitchboardConfig::from_file(&cli.config)?
    } else {
        SwitchboardConfig::default()
    };
    info!("config loaded.");
    debug!("config: {:?}", config);

    let registry = Arc::new(Registry::new());
    config.apply(&registry)?;

    match &cli.command {
        Commands::Translate {
            key,
            lang,
            ns,
            opts,
        } => {
            let i18n = I18n::new(&registry)?;
            if let Some(lang) = lang {
                i18n.change_language(lang);
            }
            let options: Vec<(&str, &str)> = opts
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect();
            let translation = match ns {
                Some(ns) => i18n.namespace(ns)?.t(key, &options),
                None => i18n.t(key, &options),
            };
            println!("{translation}");
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
