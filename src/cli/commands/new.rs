use colored::Colorize;

use weft::asset;
use weft::client::Client;
use weft::driver::{self, Flags};
use weft::error::Result;
use weft::executor;
use weft::planner::{self, SyncMode};

/// Create a new unpublished theme on the store, point the config at it, and
/// upload the local project into it.
pub async fn run(mut flags: Flags) -> Result<()> {
    // theme creation happens before an id exists; a placeholder satisfies
    // environment validation until the real id comes back
    if flags.theme_id.is_empty() {
        flags.theme_id = "1337".to_string();
    }

    driver::for_default_client(flags, Vec::new(), |ctx| async move {
        let mut client = Client::new(&ctx.env)?;
        let theme = client.create_new_theme(&ctx.flags.name).await?;
        println!(
            "[{}] created theme {} with id {}",
            ctx.env.name.green(),
            theme.name.yellow(),
            theme.id
        );

        let mut env = ctx.env.clone();
        env.theme_id = theme.id.to_string();
        {
            let mut conf = ctx.conf.lock().expect("conf poisoned");
            conf.set(&env.name, env.clone(), &[])?;
            conf.save()?;
        }

        let local = asset::find_assets(&env, &[])?;
        let plan = planner::plan_sync(&[], &local, SyncMode::Exact)?;

        let upload_ctx = std::sync::Arc::new(driver::Ctx::detached(
            env,
            std::path::Path::new(&ctx.flags.config_path),
            ctx.flags.clone(),
        )?);
        executor::execute_plan(&upload_ctx, plan).await?;
        upload_ctx.finish_progress();
        upload_ctx.summary.display(&upload_ctx.env.name);
        Ok(())
    })
    .await
}
