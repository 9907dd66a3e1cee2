use weft::asset;
use weft::driver::{self, Flags};
use weft::error::Result;
use weft::executor;
use weft::planner::{self, SyncMode};

/// Upload-direction sync. With no paths the whole project is reconciled and
/// remote files missing locally are removed (unless --no-delete); with paths
/// only those files are uploaded.
pub async fn run(flags: Flags, paths: Vec<String>) -> Result<()> {
    driver::for_each_client(flags, paths, |ctx| async move {
        let remote = ctx.client.get_all_assets().await?;
        let local = asset::find_assets(&ctx.env, &ctx.args)?;

        let mode = if ctx.args.is_empty() && !ctx.flags.no_delete {
            SyncMode::Mirror
        } else {
            SyncMode::Exact
        };

        // drop manifest entries for files gone on both sides
        let remote_keys: Vec<String> = remote.iter().map(|a| a.key.clone()).collect();
        ctx.manifest
            .prune(|key| ctx.env.directory.join(key).is_file(), &remote_keys)?;

        let plan = planner::plan_sync(&remote, &local, mode)?;
        executor::execute_plan(&ctx, plan).await
    })
    .await
}
