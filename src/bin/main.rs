//! Operator CLI over file-backed sessions.
//!
//! Reads `SESSION_*` settings from the environment and acts on the
//! sessions stored under `SESSION_SAVE_PATH`.

use std::env;
use std::error::Error;
use std::process;

use log::{error, info};
use sessionkit::save_handler::FileSaveHandler;
use sessionkit::storage::METADATA_KEY;
use sessionkit::{Container, SaveHandler, SessionConfig, SessionManager, Storage};

const USAGE: &str = "usage: sessionkit <list | show <id> | destroy <id> | gc>";

fn main() {
    env_logger::init();

    if let Err(e) = run(env::args().skip(1).collect()) {
        error!("{}", e);
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(args: Vec<String>) -> Result<(), Box<dyn Error>> {
    let config = SessionConfig::from_env()?;
    let mut handler = FileSaveHandler::new();
    handler.open(&config.save_path, &config.name)?;
    info!("Using session files in {}", config.save_path);

    match (args.first().map(String::as_str), args.get(1)) {
        (Some("list"), None) => {
            for id in handler.list()? {
                println!("{}", id);
            }
        }
        (Some("show"), Some(id)) => show(&config, &mut handler, id)?,
        (Some("destroy"), Some(id)) => {
            handler.destroy(id)?;
            println!("destroyed {}", id);
        }
        (Some("gc"), None) => {
            handler.gc(config.gc_maxlifetime)?;
            println!("gc done (max lifetime {}s)", config.gc_maxlifetime);
        }
        _ => return Err(USAGE.into()),
    }

    handler.close()?;
    Ok(())
}

/// Print each container with the entries that are still live, followed by
/// the raw metadata.
fn show(config: &SessionConfig, handler: &mut FileSaveHandler, id: &str) -> Result<(), Box<dyn Error>> {
    let blob = handler.read(id)?;
    if blob.is_empty() {
        return Err(format!("no session {}", id).into());
    }

    let mut storage = Storage::new();
    storage.from_blob(&blob)?;
    let raw = storage.to_array(true);
    let names: Vec<String> = storage.keys().cloned().collect();

    // Inspect through a throwaway in-memory manager so the file is untouched.
    let manager = SessionManager::with_storage(
        config.clone(),
        Box::new(sessionkit::save_handler::MemorySaveHandler::new()),
        storage,
    )?;

    for name in names {
        match Container::new(&name, Some(manager.clone())) {
            Ok(container) => {
                println!("[{}] {} live entries", name, container.len());
                for (key, value) in &container {
                    println!("  {} = {}", key, value);
                }
            }
            Err(_) => println!("[{}] (not a container)", name),
        }
    }

    if let Some(metadata) = raw.get(METADATA_KEY) {
        println!("metadata: {}", serde_json::to_string_pretty(metadata)?);
    }
    Ok(())
}
