use std::fs;

use tempfile::TempDir;
use weft::driver::{self, Flags};
use wiremock::MockServer;

/// Writing a config is a purely local operation: the file appears and no
/// request reaches the store.
#[tokio::test]
async fn configure_writes_config_without_network() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.yml");

    let flags = Flags {
        config_path: config_path.to_string_lossy().to_string(),
        password: "abc".to_string(),
        theme_id: "123".to_string(),
        domain: server.uri(),
        directory: dir.path().to_string_lossy().to_string(),
        ..Flags::default()
    };

    driver::for_default_client(flags, Vec::new(), |ctx| async move {
        let mut conf = ctx.conf.lock().unwrap();
        conf.set(&ctx.env.name, ctx.env.clone(), &[])?;
        conf.save()
    })
    .await
    .unwrap();

    let saved = fs::read_to_string(&config_path).unwrap();
    assert!(saved.contains("development:"));
    assert!(saved.contains("password: abc"));
    assert!(saved.contains("theme_id: '123'"));

    assert_eq!(server.received_requests().await.unwrap().len(), 0);
}

/// A saved config loads back into a working environment for the next run.
#[tokio::test]
async fn configure_then_reload_round_trips() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.yml");

    let flags = Flags {
        config_path: config_path.to_string_lossy().to_string(),
        password: "abc".to_string(),
        theme_id: "123".to_string(),
        domain: server.uri(),
        directory: dir.path().to_string_lossy().to_string(),
        ..Flags::default()
    };

    driver::for_default_client(flags, Vec::new(), |ctx| async move {
        let mut conf = ctx.conf.lock().unwrap();
        conf.set(&ctx.env.name, ctx.env.clone(), &[])?;
        conf.save()
    })
    .await
    .unwrap();

    // a second run with no flags picks everything up from the file
    let reload_flags = Flags {
        config_path: config_path.to_string_lossy().to_string(),
        ..Flags::default()
    };
    driver::for_default_client(reload_flags, Vec::new(), |ctx| async move {
        assert_eq!(ctx.env.password, "abc");
        assert_eq!(ctx.env.theme_id, "123");
        Ok(())
    })
    .await
    .unwrap();
}
