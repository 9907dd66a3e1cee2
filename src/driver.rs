use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::task::JoinSet;
use tracing::warn;

use crate::client::{Client, Shop};
use crate::config::{self, env::DEFAULT_ENV_NAME, Conf, Env};
use crate::error::{ConfigError, Error, RemoteError, Result};
use crate::executor::Summary;
use crate::manifest::Manifest;

/// Command-line state shared by every command.
#[derive(Debug, Clone)]
pub struct Flags {
    pub config_path: String,
    pub vars_path: String,
    pub environments: Vec<String>,
    pub all_envs: bool,
    pub directory: String,
    pub password: String,
    pub theme_id: String,
    pub domain: String,
    pub proxy: String,
    pub timeout: Option<Duration>,
    pub notify: String,
    pub ignored_files: Vec<String>,
    pub ignores: Vec<String>,
    pub disable_ignore: bool,
    pub verbose: bool,
    pub allow_live: bool,
    pub no_delete: bool,
    pub name: String,
    pub list: bool,
    pub live: bool,
}

impl Default for Flags {
    fn default() -> Flags {
        Flags {
            config_path: "config.yml".to_string(),
            vars_path: String::new(),
            environments: Vec::new(),
            all_envs: false,
            directory: String::new(),
            password: String::new(),
            theme_id: String::new(),
            domain: String::new(),
            proxy: String::new(),
            timeout: None,
            notify: String::new(),
            ignored_files: Vec::new(),
            ignores: Vec::new(),
            disable_ignore: false,
            verbose: false,
            allow_live: false,
            no_delete: false,
            name: String::new(),
            list: false,
            live: false,
        }
    }
}

impl Flags {
    /// The environment layer carried by command-line flags. Only fields the
    /// user actually set are populated, so the layer overlays cleanly.
    pub fn env_overlay(&self) -> Env {
        let mut env = Env {
            password: self.password.clone(),
            theme_id: self.theme_id.clone(),
            domain: self.domain.clone(),
            directory: if self.directory.is_empty() {
                PathBuf::new()
            } else {
                PathBuf::from(&self.directory)
            },
            proxy: self.proxy.clone(),
            timeout: self.timeout,
            notify: self.notify.clone(),
            ignored_files: Vec::new(),
            ignores: Vec::new(),
            read_only: false,
            name: String::new(),
        };
        if !self.disable_ignore {
            env.ignored_files = self.ignored_files.clone();
            env.ignores = self.ignores.clone();
        }
        env
    }
}

/// Everything a command needs to operate on one environment.
pub struct Ctx {
    pub conf: Mutex<Conf>,
    pub env: Env,
    pub client: Client,
    pub flags: Flags,
    pub args: Vec<String>,
    pub manifest: Arc<Manifest>,
    pub summary: Summary,
    pub shop: Option<Shop>,
    progress: MultiProgress,
    bar: Mutex<Option<ProgressBar>>,
}

impl std::fmt::Debug for Ctx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ctx").field("env", &self.env.name).finish_non_exhaustive()
    }
}

impl Ctx {
    /// Attach a progress bar for `count` units of work to the command's
    /// shared bar group. Verbose runs log lines instead.
    pub fn start_progress(&self, count: u64) {
        if self.flags.verbose || count == 0 {
            return;
        }
        let bar = self.progress.add(ProgressBar::new(count));
        bar.set_prefix(format!("[{}]", self.env.name));
        bar.set_style(
            ProgressStyle::with_template("{prefix} {pos}/{len} {bar:40} {percent}%")
                .expect("progress template"),
        );
        *self.bar.lock().expect("bar poisoned") = Some(bar);
    }

    pub fn tick_progress(&self) {
        if let Some(bar) = self.bar.lock().expect("bar poisoned").as_ref() {
            bar.inc(1);
        }
    }

    pub fn finish_progress(&self) {
        if let Some(bar) = self.bar.lock().expect("bar poisoned").take() {
            bar.finish_and_clear();
        }
    }

    /// Build a standalone context around an environment without touching the
    /// network. Used by bootstrap commands that assemble their own client,
    /// and by tests.
    pub fn detached(env: Env, config_path: &Path, flags: Flags) -> Result<Ctx> {
        Ok(Ctx {
            conf: Mutex::new(Conf::new(config_path)),
            client: Client::new(&env)?,
            manifest: Arc::new(Manifest::load(config_path)?),
            env,
            flags,
            args: Vec::new(),
            summary: Summary::default(),
            shop: None,
            progress: MultiProgress::new(),
            bar: Mutex::new(None),
        })
    }
}

async fn create_ctx(
    conf: Conf,
    env: Env,
    flags: &Flags,
    args: &[String],
    manifest: Arc<Manifest>,
    progress: &MultiProgress,
    validate: bool,
) -> Result<Arc<Ctx>> {
    if !env.proxy.is_empty() {
        warn!(
            "[{}] proxy {} detected, SSL certificate validation is disabled",
            env.name, env.proxy
        );
    }

    let client = Client::new(&env)?;

    let mut shop = None;
    if validate {
        shop = Some(client.get_shop().await.map_err(|err| match err {
            Error::Remote(RemoteError::ShopDomainNotFound) => {
                eprintln!(
                    "[{}] invalid credentials, the domain {} is not found",
                    env.name.green(),
                    env.domain.yellow()
                );
                err
            }
            other => other,
        })?);

        // the theme listing doubles as a token check
        let themes = client.themes().await?;
        for theme in themes {
            if theme.role == "main" && theme.id.to_string() == env.theme_id {
                if flags.allow_live {
                    warn!("[{}] this is the live theme on {}", env.name, env.domain);
                } else {
                    eprintln!(
                        "[{}] this is the live theme on {}. To make changes to it, pass the --allow-live flag",
                        env.name.red(),
                        env.domain.yellow()
                    );
                    return Err(ConfigError::LiveTheme.into());
                }
            }
        }
    }

    Ok(Arc::new(Ctx {
        conf: Mutex::new(conf),
        env,
        client,
        flags: flags.clone(),
        args: args.to_vec(),
        manifest,
        summary: Summary::default(),
        shop,
        progress: progress.clone(),
        bar: Mutex::new(None),
    }))
}

fn load_or_blank(flags: &Flags) -> Result<Conf> {
    match Conf::load(&flags.config_path) {
        Ok(conf) => Ok(conf),
        Err(Error::Config(ConfigError::NotFound { path })) => {
            warn!("could not find config file at {:?}", path);
            Ok(Conf::new(&flags.config_path))
        }
        Err(err) => Err(err),
    }
}

/// Expand the selected environment names: an explicit list (glob patterns
/// allowed), every configured environment, or the default.
fn expand_environments(flags: &Flags, conf: &Conf) -> Vec<String> {
    if flags.all_envs {
        return conf.envs.keys().cloned().collect();
    }

    let mut names = Vec::new();
    for flag_env in &flags.environments {
        if flag_env.contains('*') {
            if let Ok(pattern) = glob::Pattern::new(flag_env) {
                names.extend(conf.envs.keys().filter(|n| pattern.matches(n)).cloned());
            }
        } else {
            names.push(flag_env.clone());
        }
    }

    if names.is_empty() {
        names.push(DEFAULT_ENV_NAME.to_string());
    }
    names
}

async fn generate_ctxs(
    flags: &Flags,
    args: &[String],
    progress: &MultiProgress,
    validate: bool,
) -> Result<Vec<Arc<Ctx>>> {
    config::source_variables(&flags.vars_path)?;
    let mut conf = load_or_blank(flags)?;
    let manifest = Arc::new(Manifest::load(Path::new(&flags.config_path))?);
    let flag_env = flags.env_overlay();

    let mut ctxs = Vec::new();
    for name in expand_environments(flags, &conf) {
        let mut env = match conf.get(&name, std::slice::from_ref(&flag_env)) {
            Ok(env) => env,
            Err(Error::Config(ConfigError::EnvDoesNotExist))
            | Err(Error::Config(ConfigError::EnvNotDefined)) => {
                conf.set(&name, flag_env.clone(), &[])?
            }
            Err(err) => return Err(err),
        };

        if flags.disable_ignore {
            env.ignored_files.clear();
            env.ignores.clear();
        }

        let ctx = create_ctx(
            conf.clone(),
            env,
            flags,
            args,
            Arc::clone(&manifest),
            progress,
            validate,
        )
        .await?;
        ctxs.push(ctx);
    }

    if ctxs.is_empty() {
        return Err(ConfigError::NoEnvironmentsLoaded.into());
    }
    Ok(ctxs)
}

/// Run the handler once per selected environment, in parallel. The first
/// non-reload error is returned after every environment completes; a reload
/// sentinel re-enters the whole call with a freshly loaded config.
pub async fn for_each_client<F, Fut>(flags: Flags, args: Vec<String>, handler: F) -> Result<()>
where
    F: Fn(Arc<Ctx>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    loop {
        let progress = MultiProgress::new();
        let ctxs = generate_ctxs(&flags, &args, &progress, true).await?;

        let mut workers = JoinSet::new();
        for ctx in &ctxs {
            let ctx = Arc::clone(ctx);
            let handler = handler.clone();
            workers.spawn(async move { handler(ctx).await });
        }

        let mut first_err = None;
        let mut reload = false;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(Error::Reload)) => reload = true,
                Ok(Err(err)) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(Error::Other(format!("environment worker failed: {}", err)));
                    }
                }
            }
        }

        if reload && first_err.is_none() {
            continue;
        }

        let mut had_errors = false;
        for ctx in &ctxs {
            ctx.finish_progress();
            ctx.summary.display(&ctx.env.name);
            had_errors = had_errors || ctx.summary.has_errors();
        }

        return match first_err {
            Some(err) => Err(err),
            None if had_errors => Err(Error::CommandErrors),
            None => Ok(()),
        };
    }
}

/// Run the handler against exactly one selected environment.
pub async fn for_single_client<F, Fut>(flags: Flags, args: Vec<String>, handler: F) -> Result<()>
where
    F: Fn(Arc<Ctx>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    loop {
        let progress = MultiProgress::new();
        let ctxs = generate_ctxs(&flags, &args, &progress, true).await?;
        if ctxs.len() > 1 {
            return Err(ConfigError::SingleEnvironmentOnly.into());
        }

        let ctx = Arc::clone(&ctxs[0]);
        match handler(ctx).await {
            Err(Error::Reload) => continue,
            result => {
                ctxs[0].finish_progress();
                ctxs[0].summary.display(&ctxs[0].env.name);
                return match result {
                    Ok(()) if ctxs[0].summary.has_errors() => Err(Error::CommandErrors),
                    other => other,
                };
            }
        }
    }
}

/// Run the handler with a synthesized default environment, even when no
/// config file exists yet. No network validation happens here, so bootstrap
/// commands can run before credentials are proven.
pub async fn for_default_client<F, Fut>(flags: Flags, args: Vec<String>, handler: F) -> Result<()>
where
    F: Fn(Arc<Ctx>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    config::source_variables(&flags.vars_path)?;
    let mut conf = load_or_blank(&flags)?;
    let manifest = Arc::new(Manifest::load(Path::new(&flags.config_path))?);

    let name = flags
        .environments
        .first()
        .cloned()
        .unwrap_or_else(|| DEFAULT_ENV_NAME.to_string());

    let flag_env = flags.env_overlay();
    let env = match conf.get(&name, std::slice::from_ref(&flag_env)) {
        Ok(env) => env,
        Err(_) => conf.set(&name, flag_env, &[])?,
    };

    let progress = MultiProgress::new();
    let ctx = create_ctx(
        conf,
        env,
        &flags,
        &args,
        manifest,
        &progress,
        false,
    )
    .await?;

    let result = handler(Arc::clone(&ctx)).await;
    ctx.finish_progress();
    ctx.summary.display(&ctx.env.name);

    match result {
        Ok(()) if ctx.summary.has_errors() => Err(Error::CommandErrors),
        other => other,
    }
}
