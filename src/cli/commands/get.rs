use colored::Colorize;

use weft::asset;
use weft::client::Theme;
use weft::driver::{self, Flags};
use weft::error::{Error, RemoteError, Result};
use weft::executor;
use weft::planner;

/// Fetch a theme and write a config for it. `--list` prints the themes
/// available on the store instead; `--live` targets the published theme.
pub async fn run(mut flags: Flags) -> Result<()> {
    if flags.list {
        let themes = available_themes(flags.clone()).await?;
        println!("Available theme versions:");
        for theme in themes {
            let live = if theme.role == "main" { "[live]" } else { "" };
            println!("  [{}]{} {}", theme.id, live.green(), theme.name);
        }
        return Ok(());
    }

    if flags.live {
        let themes = available_themes(flags.clone()).await?;
        let live = themes
            .into_iter()
            .find(|theme| theme.role == "main")
            .ok_or(Error::Remote(RemoteError::ThemeNotFound))?;
        flags.theme_id = live.id.to_string();
    }

    driver::for_default_client(flags, Vec::new(), |ctx| async move {
        {
            let mut conf = ctx.conf.lock().expect("conf poisoned");
            conf.set(&ctx.env.name, ctx.env.clone(), &[])?;
            conf.save()?;
        }

        let remote = ctx.client.get_all_assets().await?;
        let plan = planner::plan_download(
            &remote,
            |key| asset::file_checksum(&ctx.env.directory, key).ok(),
            &[],
        )?;
        executor::execute_plan(&ctx, plan).await
    })
    .await
}

async fn available_themes(mut flags: Flags) -> Result<Vec<Theme>> {
    // listing themes does not need a theme id, but environment composition
    // validates one; a placeholder satisfies it
    if flags.theme_id.is_empty() {
        flags.theme_id = "1337".to_string();
    }

    let themes = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let collected = std::sync::Arc::clone(&themes);
    driver::for_default_client(flags, Vec::new(), move |ctx| {
        let collected = std::sync::Arc::clone(&collected);
        async move {
            let found = ctx.client.themes().await?;
            if found.is_empty() {
                return Err(RemoteError::NoThemes.into());
            }
            *collected.lock().expect("themes poisoned") = found;
            Ok(())
        }
    })
    .await?;

    let themes = themes.lock().expect("themes poisoned").clone();
    Ok(themes)
}
