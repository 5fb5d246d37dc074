use sessionkit::save_handler::{CacheSaveHandler, FileSaveHandler, MemorySaveHandler};
use sessionkit::{SaveHandler, SaveHandlerError};

/// Lifecycle every handler must support.
fn exercise(handler: &mut dyn SaveHandler, save_path: &str) {
    assert!(handler.open(save_path, "SESSID").unwrap());
    assert_eq!(handler.read("a1b2c3").unwrap(), "");

    handler.write("a1b2c3", r#"{"Default":{"k":"v"}}"#).unwrap();
    assert_eq!(handler.read("a1b2c3").unwrap(), r#"{"Default":{"k":"v"}}"#);

    handler.write("a1b2c3", "{}").unwrap();
    assert_eq!(handler.read("a1b2c3").unwrap(), "{}");

    assert!(handler.destroy("a1b2c3").unwrap());
    assert_eq!(handler.read("a1b2c3").unwrap(), "");
    // Destroying twice is fine.
    assert!(handler.destroy("a1b2c3").unwrap());

    assert!(handler.close().unwrap());
}

#[test]
fn test_memory_handler_lifecycle() {
    let mut handler = MemorySaveHandler::new();
    exercise(&mut handler, "");
    assert!(handler.is_empty());
}

#[test]
fn test_file_handler_lifecycle() {
    let dir = std::env::temp_dir().join(format!("sessionkit-handlers-{}", std::process::id()));
    let mut handler = FileSaveHandler::new();
    exercise(&mut handler, dir.to_str().unwrap());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_file_handler_rejects_path_like_ids() {
    let dir = std::env::temp_dir().join(format!("sessionkit-ids-{}", std::process::id()));
    let mut handler = FileSaveHandler::new();
    handler.open(dir.to_str().unwrap(), "SESSID").unwrap();

    assert!(matches!(
        handler.read("../etc/passwd"),
        Err(SaveHandlerError::InvalidId(_))
    ));
    assert!(matches!(
        handler.write("", "{}"),
        Err(SaveHandlerError::InvalidId(_))
    ));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_memory_gc_keeps_fresh_sessions() {
    let mut handler = MemorySaveHandler::new();
    handler.write("fresh", "{}").unwrap();
    handler.write("stale", "{}").unwrap();
    handler.backdate("stale", 0);

    handler.gc(1440).unwrap();
    assert!(handler.contains("fresh"));
    assert!(!handler.contains("stale"));
}

#[test]
#[ignore = "requires a Redis server at SESSION_REDIS_URL or redis://127.0.0.1:6379"]
fn test_cache_handler_lifecycle() {
    let url = std::env::var("SESSION_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let mut handler = CacheSaveHandler::from_url(&url, 60).unwrap();
    exercise(&mut handler, "");
}
