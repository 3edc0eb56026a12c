use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use miette::Result;
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use papl::authz::{self, AuthorizationEngine};
use papl::rules::RuleEngine;
use papl::settings::Settings;
use papl::store::{Page, VersionedStore};
use papl::PaplError;

#[derive(Parser, Debug)]
#[command(
    name = "papl",
    version,
    about = "Policy decision engine for authorization policies and rule modules"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "papl.toml", env = "PAPL_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decide one authorization request
    Authorize {
        #[arg(long)]
        principal: String,
        #[arg(long)]
        action: String,
        #[arg(long)]
        resource: String,
        /// Context record as JSON
        #[arg(long, default_value = "{}")]
        context: String,
        /// Policy file or directory (overrides [authz] policies)
        #[arg(long)]
        policies: Option<PathBuf>,
        /// Entity file (overrides [authz] entities)
        #[arg(long)]
        entities: Option<PathBuf>,
        /// Print the full response with diagnostics
        #[arg(long)]
        explain: bool,
    },
    /// Evaluate a rule query
    Eval {
        query: String,
        #[command(flatten)]
        rules: RuleArgs,
    },
    /// Evaluate one rule by path (data.<package>.<rule>)
    Rule {
        path: String,
        #[command(flatten)]
        rules: RuleArgs,
    },
    /// List loaded rule packages
    Packages {
        #[command(flatten)]
        rules: RuleArgs,
    },
    /// Read and write the versioned store
    Store {
        #[command(subcommand)]
        command: StoreCommand,
    },
}

#[derive(Args, Debug)]
struct RuleArgs {
    /// Bundle directory or .tar.gz archive, in addition to [rules] bundles
    #[arg(long = "bundle")]
    bundles: Vec<PathBuf>,
    /// JSON document merged into data, in addition to [rules] data
    #[arg(long = "data")]
    data: Vec<PathBuf>,
    /// Input document (.json)
    #[arg(long)]
    input: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum StoreCommand {
    Save {
        key: String,
        value: String,
        #[arg(long, default_value = "0")]
        version: String,
        /// Seconds since the Unix epoch; defaults to now
        #[arg(long)]
        stamp: Option<i64>,
    },
    Get {
        key: String,
        /// Also print the version
        #[arg(long)]
        with_version: bool,
    },
    Version {
        key: String,
    },
    Delete {
        key: String,
    },
    /// List keys, optionally filtered by stamp
    Keys {
        /// Only keys stamped at or after this time
        #[arg(long, conflicts_with = "until")]
        since: Option<i64>,
        /// Only keys stamped at or before this time
        #[arg(long)]
        until: Option<i64>,
        /// Zero-based page number; requires --since or --until
        #[arg(long, requires = "size")]
        page: Option<usize>,
        #[arg(long, requires = "page")]
        size: Option<usize>,
    },
    /// Delete entries by stamp
    Evict {
        #[arg(long, conflicts_with = "until", required_unless_present = "until")]
        since: Option<i64>,
        #[arg(long)]
        until: Option<i64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;

    // logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!(?settings, "Loaded configuration");

    match cli.command {
        Command::Authorize {
            principal,
            action,
            resource,
            context,
            policies,
            entities,
            explain,
        } => {
            let mut engine = AuthorizationEngine::new();
            if let Some(path) = policies.or(settings.authz.policies) {
                authz::loader::load_policies(&mut engine, &path)?;
            }
            if let Some(path) = entities.or(settings.authz.entities) {
                authz::loader::load_entities(&mut engine, &path)?;
            }
            let response = engine.authorize_request(&principal, &action, &resource, &context)?;
            if explain {
                println!("{}", pretty(&response)?);
            } else {
                println!("{}", response.decision);
            }
        }
        Command::Eval { query, rules } => {
            let engine = rule_engine(&settings, rules)?;
            let results = engine.eval_query(&query)?;
            println!("{}", pretty(&results)?);
        }
        Command::Rule { path, rules } => {
            let engine = rule_engine(&settings, rules)?;
            match engine.eval_rule(&path)? {
                Some(value) => println!("{}", pretty(&value)?),
                None => println!("undefined"),
            }
        }
        Command::Packages { rules } => {
            let engine = rule_engine(&settings, rules)?;
            for package in engine.get_packages() {
                println!("{package}");
            }
        }
        Command::Store { command } => {
            let store = VersionedStore::open(&settings.store.kind.to_string(), &settings.store.path)?;
            run_store(&store, command)?;
            store.close()?;
        }
    }
    Ok(())
}

fn pretty(value: &impl Serialize) -> Result<String, PaplError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn rule_engine(settings: &Settings, args: RuleArgs) -> Result<RuleEngine> {
    let mut engine = RuleEngine::new();
    engine.set_strict_builtin_errors(settings.rules.strict);

    let bundles: Vec<PathBuf> = settings.rules.bundles.iter().cloned().chain(args.bundles).collect();
    engine.add_bundles(&bundles)?;
    for path in settings.rules.data.iter().chain(&args.data) {
        engine.add_data(path)?;
    }
    if let Some(input) = args.input {
        engine.add_input(input)?;
    }
    Ok(engine)
}

fn run_store(store: &VersionedStore, command: StoreCommand) -> Result<()> {
    match command {
        StoreCommand::Save {
            key,
            value,
            version,
            stamp,
        } => {
            match stamp {
                Some(stamp) => store.save_stamped(&key, &value, &version, stamp)?,
                None => store.save(&key, &value, &version)?,
            }
            tracing::info!(key = %key, version = %version, "Saved");
        }
        StoreCommand::Get { key, with_version } => {
            if with_version {
                let (value, version) = store.value_with_version(&key)?;
                println!("{version}\t{value}");
            } else {
                println!("{}", store.get(&key)?);
            }
        }
        StoreCommand::Version { key } => println!("{}", store.version(&key)?),
        StoreCommand::Delete { key } => {
            if !store.delete(&key)? {
                tracing::warn!(key = %key, "Key did not exist");
            }
        }
        StoreCommand::Keys {
            since,
            until,
            page,
            size,
        } => {
            let page = page.zip(size).map(|(number, size)| Page::new(number, size));
            let keys = match (since, until, page) {
                (Some(stamp), _, None) => store.keys_since(stamp)?,
                (Some(stamp), _, Some(page)) => store.keys_since_page(stamp, page)?,
                (None, Some(stamp), None) => store.keys_until(stamp)?,
                (None, Some(stamp), Some(page)) => store.keys_until_page(stamp, page)?,
                (None, None, None) => store.keys()?,
                (None, None, Some(_)) => {
                    return Err(miette::miette!("--page needs --since or --until"));
                }
            };
            for key in keys {
                println!("{key}");
            }
        }
        StoreCommand::Evict { since, until } => {
            let evicted = match (since, until) {
                (Some(stamp), _) => store.evict_since(stamp)?,
                (None, Some(stamp)) => store.evict_until(stamp)?,
                (None, None) => 0,
            };
            println!("{evicted}");
        }
    }
    Ok(())
}
