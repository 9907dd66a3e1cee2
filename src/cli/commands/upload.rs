use weft::asset;
use weft::driver::{self, Flags};
use weft::error::Result;
use weft::executor;
use weft::planner::{self, SyncMode};

/// Upload the given files (or the whole project) without removing anything
/// remote.
pub async fn run(flags: Flags, paths: Vec<String>) -> Result<()> {
    driver::for_each_client(flags, paths, |ctx| async move {
        let remote = ctx.client.get_all_assets().await?;
        let local = asset::find_assets(&ctx.env, &ctx.args)?;
        let plan = planner::plan_sync(&remote, &local, SyncMode::Exact)?;
        executor::execute_plan(&ctx, plan).await
    })
    .await
}
