use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::broadcast;

use catalog_browser::collection::{BrowserContext, Collection};
use catalog_browser::config::{log_level_filter, BrowserConfig, LayoutMode};
use catalog_browser::config_persistence::{
    default_config_path, load_config_file, persist_config_file,
};
use catalog_browser::error::{BrowserError, Result};
use catalog_browser::memory::MemoryCollection;
use catalog_browser::meta::CollectionId;
use catalog_browser::tree::levels::parse_levels;
use catalog_browser::tree::{CollectionTreeModel, FilterChange, NodeId, TreeOptions};

const USAGE: &str = "catalog-browser [--config PATH] [--levels artist,album] [--merged] \
[--filter TEXT] CATALOG.json...";

#[derive(Debug, Default)]
struct CliArgs {
    config_path: Option<PathBuf>,
    levels: Option<String>,
    merged: bool,
    filter: Option<String>,
    catalogs: Vec<PathBuf>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                parsed.config_path = Some(PathBuf::from(required_value(&mut args, &arg)?))
            }
            "--levels" => parsed.levels = Some(required_value(&mut args, &arg)?),
            "--filter" => parsed.filter = Some(required_value(&mut args, &arg)?),
            "--merged" => parsed.merged = true,
            "-h" | "--help" => return Err(BrowserError::Usage(USAGE.to_string())),
            _ if arg.starts_with("--") => {
                return Err(BrowserError::Usage(format!("unknown option {}", arg)))
            }
            _ => parsed.catalogs.push(PathBuf::from(&arg)),
        }
    }
    Ok(parsed)
}

fn required_value(args: &mut impl Iterator<Item = String>, option: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| BrowserError::Usage(format!("{} needs a value", option)))
}

fn load_collections(paths: &[PathBuf]) -> Result<Vec<Arc<dyn Collection>>> {
    let mut collections: Vec<Arc<dyn Collection>> = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        let id = CollectionId::new(format!("catalog-{}", index + 1));
        collections.push(Arc::new(MemoryCollection::from_json_file(id, path)?));
    }
    Ok(collections)
}

/// Expands one level of the whole tree at a time until only tracks remain.
fn expand_everything(model: &mut CollectionTreeModel) {
    let mut frontier = vec![model.root()];
    while !frontier.is_empty() {
        for node in &frontier {
            model.node_expanded(*node);
        }
        model.process_until_idle();
        frontier = frontier
            .iter()
            .flat_map(|node| model.children(*node).to_vec())
            .filter(|child| !model.is_leaf(*child))
            .collect();
    }
}

fn print_tree(model: &CollectionTreeModel, node: NodeId, depth: usize) {
    for child in model.children(node) {
        println!("{}{}", "  ".repeat(depth), model.display_name(*child));
        print_tree(model, *child, depth + 1);
    }
}

fn run() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.catalogs.is_empty() {
        return Err(BrowserError::Usage(USAGE.to_string()));
    }

    let config_path = args.config_path.clone().or_else(default_config_path);
    let mut config = match &config_path {
        Some(path) => load_config_file(path),
        None => {
            warn!("No config directory available. Using defaults.");
            BrowserConfig::default()
        }
    };
    if let Some(level) = log_level_filter(&config.log_level) {
        log::set_max_level(level);
    }
    if let Some(levels) = &args.levels {
        config.levels =
            parse_levels(levels).ok_or_else(|| BrowserError::UnknownLevel(levels.clone()))?;
    }
    if args.merged {
        config.layout = LayoutMode::Merged;
    }

    let context = BrowserContext::new(load_collections(&args.catalogs)?);
    let (event_tx, _) = broadcast::channel(1024);
    let mut model = CollectionTreeModel::new(context, TreeOptions::from(&config), event_tx);

    if let Some(filter) = &args.filter {
        if model.set_active_filter(filter, true) == FilterChange::IgnoredBusy {
            warn!("Filter {:?} was not applied", filter);
        }
    }
    expand_everything(&mut model);

    println!("{}", model.header_text());
    print_tree(&model, model.root(), 0);

    config.levels = model.levels().to_vec();
    if let Some(path) = &config_path {
        info!("Saving config to {}", path.display());
        persist_config_file(&config, path);
    }
    Ok(())
}

fn main() -> ExitCode {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Trace);
    clog.init();
    log::set_max_level(log::LevelFilter::Info);

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
