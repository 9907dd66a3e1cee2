pub mod commands;

use clap::{Args, Parser, Subcommand};

use weft::config::env::parse_duration;
use weft::driver::Flags;
use weft::error::Result;

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Keep a local theme directory in sync with a remote storefront theme", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args)]
pub struct GlobalArgs {
    #[arg(long, global = true, default_value = "config.yml", help = "Path to the config file")]
    pub config: String,

    #[arg(long, global = true, help = "Path to an environment variables file")]
    pub vars: Option<String>,

    #[arg(
        short,
        long = "env",
        global = true,
        help = "Environment(s) to run against, glob patterns allowed"
    )]
    pub environments: Vec<String>,

    #[arg(long, global = true, help = "Run against every configured environment")]
    pub all_environments: bool,

    #[arg(long, global = true, help = "Project directory")]
    pub dir: Option<String>,

    #[arg(long, global = true, help = "Private app password or Theme Access token")]
    pub password: Option<String>,

    #[arg(long, global = true, help = "Theme id to operate on")]
    pub theme_id: Option<String>,

    #[arg(long, global = true, help = "Store domain, e.g. shop.myshopify.com")]
    pub store: Option<String>,

    #[arg(long, global = true, help = "Proxy requests through this URL")]
    pub proxy: Option<String>,

    #[arg(long, global = true, help = "Request timeout, e.g. 40s")]
    pub timeout: Option<String>,

    #[arg(long, global = true, help = "File or URL to notify once the uploader is idle")]
    pub notify: Option<String>,

    #[arg(long = "ignored-file", global = true, help = "Pattern to ignore")]
    pub ignored_files: Vec<String>,

    #[arg(long = "ignores", global = true, help = "File of patterns to ignore")]
    pub ignores: Vec<String>,

    #[arg(long, global = true, help = "Turn off every ignore rule")]
    pub disable_ignore: bool,

    #[arg(long, global = true, help = "Allow changes to the published theme")]
    pub allow_live: bool,

    #[arg(short, long, global = true, help = "Log every operation")]
    pub verbose: bool,
}

impl GlobalArgs {
    fn to_flags(&self) -> Result<Flags> {
        let timeout = match &self.timeout {
            Some(raw) => Some(parse_duration(raw)?),
            None => None,
        };

        Ok(Flags {
            config_path: self.config.clone(),
            vars_path: self.vars.clone().unwrap_or_default(),
            environments: self.environments.clone(),
            all_envs: self.all_environments,
            directory: self.dir.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            theme_id: self.theme_id.clone().unwrap_or_default(),
            domain: self.store.clone().unwrap_or_default(),
            proxy: self.proxy.clone().unwrap_or_default(),
            timeout,
            notify: self.notify.clone().unwrap_or_default(),
            ignored_files: self.ignored_files.clone(),
            ignores: self.ignores.clone(),
            disable_ignore: self.disable_ignore,
            verbose: self.verbose,
            allow_live: self.allow_live,
            ..Flags::default()
        })
    }
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Create or update the config file from the given flags")]
    Configure,

    #[command(about = "Get a theme and its config from the store")]
    Get {
        #[arg(long, help = "List the themes available on the store")]
        list: bool,
        #[arg(long, help = "Target the currently published theme")]
        live: bool,
    },

    #[command(about = "Create a new unpublished theme from the local project")]
    New {
        #[arg(long, help = "Name for the new theme")]
        name: String,
    },

    #[command(about = "Deploy local files, removing remote files missing locally")]
    Deploy {
        #[arg(help = "Specific files to deploy")]
        paths: Vec<String>,
        #[arg(long, help = "Keep remote files that are missing locally")]
        no_delete: bool,
    },

    #[command(about = "Upload specific files without removing anything")]
    Upload {
        #[arg(help = "Files to upload")]
        paths: Vec<String>,
    },

    #[command(about = "Overwrite the remote theme completely with the local files")]
    Replace {
        #[arg(help = "Specific files to replace")]
        paths: Vec<String>,
    },

    #[command(about = "Download files from the remote theme")]
    Download {
        #[arg(help = "Files to download, glob patterns allowed")]
        paths: Vec<String>,
    },

    #[command(about = "Remove theme file(s) from the remote theme")]
    Remove {
        #[arg(help = "Files to remove")]
        paths: Vec<String>,
    },

    #[command(about = "Watch the project directory and upload changes as they happen")]
    Watch,

    #[command(about = "Publish the configured theme")]
    Publish,

    #[command(about = "Print the version")]
    Version,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut flags = self.global.to_flags()?;

        match self.command {
            Commands::Configure => commands::configure::run(flags).await,
            Commands::Get { list, live } => {
                flags.list = list;
                flags.live = live;
                commands::get::run(flags).await
            }
            Commands::New { name } => {
                flags.name = name;
                commands::new::run(flags).await
            }
            Commands::Deploy { paths, no_delete } => {
                flags.no_delete = no_delete;
                commands::deploy::run(flags, paths).await
            }
            Commands::Upload { paths } => commands::upload::run(flags, paths).await,
            Commands::Replace { paths } => commands::deploy::run(flags, paths).await,
            Commands::Download { paths } => commands::download::run(flags, paths).await,
            Commands::Remove { paths } => commands::remove::run(flags, paths).await,
            Commands::Watch => commands::watch::run(flags).await,
            Commands::Publish => commands::publish::run(flags).await,
            Commands::Version => commands::version::run(),
        }
    }
}
