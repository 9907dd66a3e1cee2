use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use colored::Colorize;
use tokio::task::JoinSet;
use tracing::debug;

use crate::asset::{self, Asset};
use crate::driver::Ctx;
use crate::error::{Error, Result};
use crate::manifest::Entry;
use crate::planner::{Op, Plan, SETTINGS_DATA_KEY};

/// Running per-environment counters, updated atomically by concurrent
/// workers and displayed once the environment's run completes.
#[derive(Debug, Default)]
pub struct Summary {
    downloaded: AtomicU32,
    uploaded: AtomicU32,
    removed: AtomicU32,
    skipped: AtomicU32,
    disabled: AtomicBool,
    errors: Mutex<Vec<String>>,
}

impl Summary {
    pub fn complete_op(&self, op: Op) {
        let counter = match op {
            Op::Get => &self.downloaded,
            Op::Update => &self.uploaded,
            Op::Remove => &self.removed,
            Op::Skip => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, message: String) {
        self.errors.lock().expect("summary poisoned").push(message);
    }

    /// Suppress the closing summary line, for commands that produce their
    /// own output.
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::Relaxed);
    }

    pub fn has_errors(&self) -> bool {
        !self.disabled.load(Ordering::Relaxed)
            && !self.errors.lock().expect("summary poisoned").is_empty()
    }

    pub fn counts(&self) -> (u32, u32, u32, u32, u32) {
        (
            self.downloaded.load(Ordering::Relaxed),
            self.uploaded.load(Ordering::Relaxed),
            self.removed.load(Ordering::Relaxed),
            self.skipped.load(Ordering::Relaxed),
            self.errors.lock().expect("summary poisoned").len() as u32,
        )
    }

    pub fn display(&self, env_name: &str) {
        if self.disabled.load(Ordering::Relaxed) {
            return;
        }
        let (downloaded, uploaded, removed, skipped, errored) = self.counts();
        let total = downloaded + uploaded + removed + skipped + errored;
        if total == 0 {
            return;
        }

        let mut results = vec![format!("{} files", total)];
        if downloaded > 0 {
            results.push(format!("{}: {}", "Downloaded".blue(), downloaded));
        }
        if uploaded > 0 {
            results.push(format!("{}: {}", "Updated".green(), uploaded));
        }
        if removed > 0 {
            results.push(format!("{}: {}", "Removed".yellow(), removed));
        }
        if skipped > 0 {
            results.push(format!("{}: {}", "No Change".cyan(), skipped));
        }
        if errored > 0 {
            results.push(format!("{}: {}", "Errored".red(), errored));
        }
        println!("[{}] {}", env_name.green(), results.join(", "));

        let errors = self.errors.lock().expect("summary poisoned");
        if !errors.is_empty() {
            eprintln!("[{}] {}", env_name.green(), "Errors encountered: ".red());
            for message in errors.iter() {
                eprintln!("\t{}", message);
            }
        }
    }
}

/// Run every action in the plan concurrently, gated only by the per-host
/// rate limiter. The theme settings file is held back until every other
/// worker has finished, then processed alone on the calling task.
pub async fn execute_plan(ctx: &Arc<Ctx>, plan: Plan) -> Result<()> {
    let Plan {
        mut actions,
        remote_checksums,
    } = plan;

    ctx.start_progress(actions.len() as u64);
    let settings_op = actions.remove(SETTINGS_DATA_KEY);
    let remote_checksums = Arc::new(remote_checksums);

    let mut workers = JoinSet::new();
    for (path, op) in actions {
        let ctx = Arc::clone(ctx);
        let remote_checksums = Arc::clone(&remote_checksums);
        workers.spawn(async move {
            let remote_sum = remote_checksums.get(&path).cloned();
            perform(&ctx, &path, op, remote_sum).await
        });
    }

    let mut fatal = None;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Err(err)) if fatal.is_none() => fatal = Some(err),
            Ok(_) => {}
            Err(err) => {
                if fatal.is_none() {
                    fatal = Some(Error::Other(format!("worker panicked: {}", err)));
                }
            }
        }
    }
    if let Some(err) = fatal {
        return Err(err);
    }

    if let Some(op) = settings_op {
        let remote_sum = remote_checksums.get(SETTINGS_DATA_KEY).cloned();
        perform(ctx, SETTINGS_DATA_KEY, op, remote_sum).await?;
    }

    Ok(())
}

/// Execute a single action. Recoverable failures are recorded against the
/// asset and the run continues; fatal failures are returned to abort the
/// environment's run.
pub async fn perform(ctx: &Ctx, path: &str, op: Op, remote_checksum: Option<String>) -> Result<()> {
    let outcome = match op {
        Op::Skip => Ok(()),
        Op::Update => upload(ctx, path, remote_checksum).await,
        Op::Remove => remove_remote(ctx, path).await,
        Op::Get => download(ctx, path).await,
    };

    match outcome {
        Ok(()) => {
            debug!("[{}] completed {:?} for {}", ctx.env.name, op, path);
            ctx.summary.complete_op(op);
            ctx.tick_progress();
            Ok(())
        }
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            ctx.summary.record_error(format!("{}: {}", path, err));
            ctx.tick_progress();
            Ok(())
        }
    }
}

async fn upload(ctx: &Ctx, path: &str, remote_checksum: Option<String>) -> Result<()> {
    let asset = asset::read_asset(&ctx.env.directory, path)?;

    // prefer the checksum recorded at the last successful sync; a remote
    // copy that moved past it fails the precondition instead of being
    // silently overwritten
    let last_known = ctx
        .manifest
        .get(path, &ctx.env.name)
        .map(|entry| entry.checksum)
        .filter(|sum| !sum.is_empty())
        .or(remote_checksum)
        .unwrap_or_default();

    let updated = ctx.client.update_asset(&asset, &last_known).await?;
    ctx.manifest.set(
        path,
        &ctx.env.name,
        Entry {
            updated_at: updated.updated_at,
            checksum: asset.checksum,
        },
    )?;
    Ok(())
}

async fn remove_remote(ctx: &Ctx, path: &str) -> Result<()> {
    let asset = Asset {
        key: path.to_string(),
        ..Asset::default()
    };
    ctx.client.delete_asset(&asset).await?;
    ctx.manifest.delete(path, &ctx.env.name)?;
    Ok(())
}

async fn download(ctx: &Ctx, path: &str) -> Result<()> {
    let asset = ctx.client.get_asset(path).await?;
    asset.write(&ctx.env.directory)?;

    let checksum = if asset.checksum.is_empty() {
        asset::file_checksum(&ctx.env.directory, path).unwrap_or_default()
    } else {
        asset.checksum.clone()
    };
    ctx.manifest.set(
        path,
        &ctx.env.name,
        Entry {
            updated_at: asset.updated_at,
            checksum,
        },
    )?;
    Ok(())
}
