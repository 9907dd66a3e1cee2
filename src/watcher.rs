use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, PollWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::asset;
use crate::config::Env;
use crate::error::{Result, WatchError};
use crate::filter::Filter;
use crate::notifier::Notifier;
use crate::paths;
use crate::planner::Op;

/// Interval the observer polls the filesystem. Polling is used instead of
/// native notifications for portability; it must stay shorter than the drain
/// timeout or debouncing cannot work.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// How long to keep draining incoming events before emitting a batch.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
/// Quiet period after which the notify target is touched.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// A file change seen by the watcher, keyed by project-relative path. The
/// config file is the one exception: it is delivered under its full path so
/// the command can trigger a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub op: Op,
    pub path: String,
    pub checksum: String,
}

/// Watches an environment's project directory and emits debounced change
/// events.
pub struct Watcher {
    events: mpsc::UnboundedReceiver<Event>,
    _fs_watcher: PollWatcher,
    pump: JoinHandle<()>,
}

impl Watcher {
    /// Start observing the environment's directory. Checksums seed the
    /// editor-noise suppression map; the notifier is pinged whenever the
    /// watcher has been idle for a full quiet period.
    pub fn start(
        env: &Env,
        config_path: &Path,
        checksums: HashMap<String, String>,
        notifier: Notifier,
    ) -> Result<Watcher> {
        let translator = Translator::new(env, config_path, checksums)?;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let mut fs_watcher = PollWatcher::new(
            move |result: notify::Result<notify::Event>| {
                // errors from the observer are not actionable for users; the
                // common one is a directory deleted mid-scan
                if let Ok(event) = result {
                    let _ = raw_tx.send(event);
                }
            },
            // content comparison makes the poller report writes as data
            // changes rather than mtime metadata noise
            notify::Config::default()
                .with_poll_interval(POLL_INTERVAL)
                .with_compare_contents(true),
        )
        .map_err(|e| WatchError::Setup {
            path: env.directory.clone(),
            message: e.to_string(),
        })?;

        fs_watcher
            .watch(&env.directory, RecursiveMode::Recursive)
            .map_err(|e| WatchError::Setup {
                path: env.directory.clone(),
                message: e.to_string(),
            })?;

        let pump = tokio::spawn(pump(raw_rx, out_tx, translator, notifier));

        Ok(Watcher {
            events: out_rx,
            _fs_watcher: fs_watcher,
            pump,
        })
    }

    /// Next debounced event. `None` once the watcher has stopped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    pub fn stop(self) {
        self.pump.abort();
    }
}

struct Translator {
    directory: PathBuf,
    config_path: PathBuf,
    filter: Filter,
    checksums: HashMap<String, String>,
}

impl Translator {
    fn new(env: &Env, config_path: &Path, checksums: HashMap<String, String>) -> Result<Translator> {
        Ok(Translator {
            directory: env.directory.clone(),
            config_path: config_path.to_path_buf(),
            filter: Filter::new(&env.directory, &env.ignored_files, &env.ignores)?,
            checksums,
        })
    }

    /// Map one raw observer event onto watch events. Returns nothing for
    /// noise: directories, filtered files, metadata-only changes, and writes
    /// whose content checksum has not moved.
    fn translate(&self, raw: &notify::Event) -> Vec<Event> {
        match &raw.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any) | EventKind::Modify(ModifyKind::Other) => raw
                .paths
                .iter()
                .filter_map(|path| self.change_event(path))
                .collect(),
            EventKind::Remove(_) => raw
                .paths
                .iter()
                .filter_map(|path| self.remove_event(path))
                .collect(),
            EventKind::Modify(ModifyKind::Name(mode)) => self.rename_events(mode, &raw.paths),
            // metadata-only changes carry nothing worth uploading
            _ => Vec::new(),
        }
    }

    fn rename_events(&self, mode: &RenameMode, moved: &[PathBuf]) -> Vec<Event> {
        match mode {
            RenameMode::Both if moved.len() == 2 => {
                let mut events: Vec<Event> = self.remove_event(&moved[0]).into_iter().collect();
                events.extend(self.change_event(&moved[1]));
                events
            }
            RenameMode::From => moved.iter().filter_map(|p| self.remove_event(p)).collect(),
            RenameMode::To => moved.iter().filter_map(|p| self.change_event(p)).collect(),
            _ => moved
                .iter()
                .flat_map(|p| {
                    // without old/new pairing, resolve by what is on disk now
                    if p.exists() {
                        self.change_event(p)
                    } else {
                        self.remove_event(p)
                    }
                })
                .collect(),
        }
    }

    fn change_event(&self, full_path: &Path) -> Option<Event> {
        if self.is_config(full_path) {
            return Some(Event {
                op: Op::Update,
                path: self.config_path.to_string_lossy().to_string(),
                checksum: String::new(),
            });
        }

        if full_path.is_dir() {
            return None;
        }
        let key = self.project_key(full_path)?;

        let checksum = asset::file_checksum(&self.directory, &key).unwrap_or_default();
        let known = self.checksums.get(&key);
        if !checksum.is_empty() && known == Some(&checksum) {
            trace!("suppressing unchanged write to {}", key);
            return None;
        }

        Some(Event {
            op: Op::Update,
            path: key,
            checksum,
        })
    }

    fn remove_event(&self, full_path: &Path) -> Option<Event> {
        if self.is_config(full_path) {
            return Some(Event {
                op: Op::Remove,
                path: self.config_path.to_string_lossy().to_string(),
                checksum: String::new(),
            });
        }

        let key = self.project_key(full_path)?;
        Some(Event {
            op: Op::Remove,
            path: key,
            checksum: String::new(),
        })
    }

    fn is_config(&self, full_path: &Path) -> bool {
        full_path == self.config_path
    }

    /// Project-relative key for a watched path, or `None` when the filter
    /// rules it out.
    fn project_key(&self, full_path: &Path) -> Option<String> {
        let raw = full_path.to_string_lossy();
        if self.filter.matches(&raw) {
            return None;
        }
        let key = paths::to_project_key(&self.directory, full_path);
        (!key.is_empty()).then_some(key)
    }

    fn record(&mut self, event: &Event) {
        match event.op {
            Op::Update => {
                if !event.checksum.is_empty() {
                    self.checksums.insert(event.path.clone(), event.checksum.clone());
                }
            }
            Op::Remove => {
                self.checksums.remove(&event.path);
            }
            _ => {}
        }
    }
}

/// Debounce loop: raw events coalesce into a per-path map until the drain
/// window closes, then the batch is emitted with removes ahead of updates.
/// A separate idle timer touches the notify target when nothing is pending.
async fn pump(
    mut raw: mpsc::UnboundedReceiver<notify::Event>,
    out: mpsc::UnboundedSender<Event>,
    mut translator: Translator,
    notifier: Notifier,
) {
    let mut pending: HashMap<String, Event> = HashMap::new();

    let drain = tokio::time::sleep(DRAIN_TIMEOUT);
    tokio::pin!(drain);
    let idle = tokio::time::sleep(IDLE_TIMEOUT);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            maybe_raw = raw.recv() => {
                match maybe_raw {
                    Some(raw_event) => {
                        for event in translator.translate(&raw_event) {
                            pending.insert(event.path.clone(), event);
                        }
                        // a burst always delivers as one batch: every arrival
                        // pushes the drain deadline out again
                        drain.as_mut().reset(tokio::time::Instant::now() + DRAIN_TIMEOUT);
                        idle.as_mut().reset(tokio::time::Instant::now() + IDLE_TIMEOUT);
                    }
                    None => {
                        flush(&mut pending, &mut translator, &out);
                        return;
                    }
                }
            }
            _ = drain.as_mut(), if !pending.is_empty() => {
                flush(&mut pending, &mut translator, &out);
            }
            _ = idle.as_mut() => {
                if pending.is_empty() {
                    notifier.notify("").await;
                }
                idle.as_mut().reset(tokio::time::Instant::now() + IDLE_TIMEOUT);
            }
        }
    }
}

fn flush(
    pending: &mut HashMap<String, Event>,
    translator: &mut Translator,
    out: &mpsc::UnboundedSender<Event>,
) {
    if pending.is_empty() {
        return;
    }
    debug!("emitting batch of {} change(s)", pending.len());

    let mut batch: Vec<Event> = pending.drain().map(|(_, event)| event).collect();
    // removes go first so a replace of the same path lands in order
    batch.sort_by_key(|event| match event.op {
        Op::Remove => 0,
        _ => 1,
    });

    for event in batch {
        translator.record(&event);
        if out.send(event).is_err() {
            return;
        }
    }
}
