use weft::asset;
use weft::driver::{self, Flags};
use weft::error::Result;
use weft::executor;
use weft::planner;

/// Download the requested files (or the whole theme), skipping files whose
/// local content already matches the remote checksum.
pub async fn run(flags: Flags, paths: Vec<String>) -> Result<()> {
    driver::for_each_client(flags, paths, |ctx| async move {
        let remote = ctx.client.get_all_assets().await?;
        let plan = planner::plan_download(
            &remote,
            |key| asset::file_checksum(&ctx.env.directory, key).ok(),
            &ctx.args,
        )?;
        executor::execute_plan(&ctx, plan).await
    })
    .await
}
