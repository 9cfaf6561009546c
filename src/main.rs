use anyhow::{bail, Context};
use projectstore_lib::logging::init_logging;
use projectstore_lib::{AppState, StoreConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Usage: projectstore <config.json> <owner/project>...
///
/// Refreshes the file index of each project (rehashing changed files) and
/// prints the listings as JSON.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(config_path) = args.next().map(PathBuf::from) else {
        bail!("usage: projectstore <config.json> <owner/project>...");
    };
    let projects: Vec<String> = args.collect();

    let config = StoreConfig::load(&config_path);
    let _log_guard = init_logging(&config.log);

    let state = AppState::new(config);
    state.start();

    let mut listings = BTreeMap::new();
    let mut result = Ok(());
    for project in &projects {
        match state.engine.list_project_files(project, true).await {
            Ok(files) => {
                listings.insert(project.clone(), files);
            }
            Err(e) => {
                result = Err(e).with_context(|| format!("listing {}", project));
                break;
            }
        }
    }

    state.cleanup().await;
    result?;

    println!(
        "{}",
        serde_json::to_string_pretty(&listings).context("serializing listings")?
    );
    Ok(())
}
