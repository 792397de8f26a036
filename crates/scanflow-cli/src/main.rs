mod display;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use rand::distributions::Alphanumeric;
use rand::Rng;
use scanflow_core::events::Normalizer;
use scanflow_core::model::rule::CascadingRule;
use scanflow_core::model::{is_dns_label, LabelSelector, ScanRequest, ScanSpec};
use scanflow_core::store::{InMemoryStore, ResourceStore};
use scanflow_core::Scan;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "scanflow",
    version,
    about = "scanflow — submit and inspect security scans",
    long_about = "Submit scans to the scanflow orchestrator, feed it external cloud events, and validate cascading rule manifests."
)]
struct Cli {
    /// Namespace to operate in
    #[arg(short = 'n', long, global = true, default_value = "default")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new scan; scanner parameters go after `--`
    Scan {
        /// Scan type to execute (e.g. nmap)
        scan_type: String,

        /// Name for the scan record; derived from the scan type if omitted
        #[arg(long)]
        name: Option<String>,

        /// Cascading rule selector, as repeated key=value label pairs
        #[arg(long = "cascades", value_name = "KEY=VALUE")]
        cascades: Vec<String>,

        /// Parameters handed to the scanner, separated by `--`
        #[arg(last = true)]
        parameters: Vec<String>,
    },

    /// Normalize an external event payload into scan records
    Ingest {
        /// Path to a JSON event file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Work with cascading rule manifests
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
}

#[derive(Subcommand)]
enum RulesCommands {
    /// Parse and sanity-check rule manifests in a YAML file
    Validate {
        /// Path to a YAML file with one or more CascadingRule documents
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Stand-in for the cluster-backed store; a deployment wires the real
    // client behind the same trait.
    let store = InMemoryStore::new();
    let cli = Cli::parse();
    execute(cli, store).await
}

async fn execute(cli: Cli, store: Arc<dyn ResourceStore>) -> Result<()> {
    match cli.command {
        Commands::Scan {
            scan_type,
            name,
            cascades,
            parameters,
        } => cmd_scan(&store, &cli.namespace, &scan_type, name, &cascades, parameters).await,
        Commands::Ingest { file } => cmd_ingest(&store, &cli.namespace, &file).await,
        Commands::Rules {
            command: RulesCommands::Validate { file },
        } => cmd_rules_validate(&file),
    }
}

async fn cmd_scan(
    store: &Arc<dyn ResourceStore>,
    namespace: &str,
    scan_type: &str,
    name: Option<String>,
    cascades: &[String],
    parameters: Vec<String>,
) -> Result<()> {
    if parameters.is_empty() {
        bail!("you must use '--' to separate scan parameters");
    }

    let name = name.unwrap_or_else(|| format!("{}-{}", scan_type, name_suffix()));
    if !is_dns_label(&name) {
        bail!("scan name '{}' must be a lowercase DNS label", name);
    }

    let request = ScanRequest {
        name: name.clone(),
        namespace: namespace.to_string(),
        labels: BTreeMap::new(),
        annotations: BTreeMap::new(),
        spec: ScanSpec {
            scan_type: scan_type.to_string(),
            parameters,
            cascades: parse_cascades(cascades)?,
        },
        origin: None,
    };
    request.spec.validate()?;

    store
        .create_scan(Scan::from_request(request))
        .await
        .with_context(|| format!("Failed to create scan '{}'", name))?;

    display::print_scan_created(&name, namespace);
    Ok(())
}

async fn cmd_ingest(
    store: &Arc<dyn ResourceStore>,
    namespace: &str,
    file: &Path,
) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read event file '{}'", file.display()))?;

    let normalizer = Normalizer::with_default_adapters();
    let requests = normalizer.normalize(&raw, namespace)?;

    if requests.is_empty() {
        println!("Event recognized, no scan requests derived.");
        return Ok(());
    }

    let mut created = Vec::new();
    for request in requests {
        let name = request.name.clone();
        store
            .create_scan(Scan::from_request(request))
            .await
            .with_context(|| format!("Failed to create scan '{}'", name))?;
        created.push(name);
    }
    display::print_ingested(&created, namespace);
    Ok(())
}

fn cmd_rules_validate(file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read rules file '{}'", file.display()))?;

    let mut rules = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&content) {
        let rule = CascadingRule::deserialize(document)
            .with_context(|| format!("Invalid rule manifest in '{}'", file.display()))?;
        if !is_dns_label(&rule.metadata.name) {
            bail!("rule name '{}' must be a lowercase DNS label", rule.metadata.name);
        }
        rule.spec
            .scan_spec
            .validate()
            .map_err(|e| anyhow::anyhow!("rule '{}': {}", rule.metadata.name, e))?;
        if rule.spec.matches.any_of.is_empty() {
            bail!("rule '{}' has no match conditions and can never fire", rule.metadata.name);
        }
        rules.push(rule);
    }

    if rules.is_empty() {
        bail!("no rule documents found in '{}'", file.display());
    }
    display::print_rules_valid(&rules, file);
    Ok(())
}

fn parse_cascades(pairs: &[String]) -> Result<Option<LabelSelector>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut match_labels = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Invalid --cascades value '{}', expected key=value", pair))?;
        match_labels.insert(key.to_string(), value.to_string());
    }
    Ok(Some(LabelSelector { match_labels }))
}

fn name_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .take(5)
        .collect()
}
