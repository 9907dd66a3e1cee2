use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use tokio::sync::broadcast;
use tracing::info;

use weft::driver::{self, Ctx, Flags};
use weft::error::{Error, Result, WatchError};
use weft::executor;
use weft::notifier::Notifier;
use weft::watcher::Watcher;

/// Watch each selected environment's project directory and upload changes
/// as they land. A change to the config file itself restarts every watcher
/// with a freshly loaded config.
pub async fn run(flags: Flags) -> Result<()> {
    let (reload_bus, _) = broadcast::channel::<()>(4);
    let reload_bus = Arc::new(reload_bus);

    driver::for_each_client(flags, Vec::new(), move |ctx| {
        let reload_bus = Arc::clone(&reload_bus);
        async move { watch_environment(ctx, reload_bus).await }
    })
    .await
}

async fn watch_environment(ctx: Arc<Ctx>, reload_bus: Arc<broadcast::Sender<()>>) -> Result<()> {
    let mut reload_rx = reload_bus.subscribe();

    println!(
        "[{}] watching for file changes on {}",
        ctx.env.name.green(),
        ctx.env.domain.yellow()
    );

    let config_path = std::fs::canonicalize(&ctx.flags.config_path)
        .unwrap_or_else(|_| PathBuf::from(&ctx.flags.config_path));
    let notifier = Notifier::new(&ctx.env.notify);
    let mut watcher = Watcher::start(&ctx.env, &config_path, HashMap::new(), notifier)?;

    let outcome = loop {
        tokio::select! {
            maybe_event = watcher.recv() => {
                let Some(event) = maybe_event else {
                    break Err(WatchError::ChannelClosed.into());
                };

                if event.path == config_path.to_string_lossy() {
                    println!("[{}] reloading because of config changes", ctx.env.name.green());
                    let _ = reload_bus.send(());
                    break Err(Error::Reload);
                }

                info!("[{}] received {:?} event on {}", ctx.env.name, event.op, event.path);
                if let Err(err) = executor::perform(&ctx, &event.path, event.op, None).await {
                    break Err(err);
                }
            }
            _ = reload_rx.recv() => {
                break Err(Error::Reload);
            }
            _ = tokio::signal::ctrl_c() => {
                println!("[{}] stopping watch", ctx.env.name.green());
                break Ok(());
            }
        }
    };

    watcher.stop();
    outcome
}
