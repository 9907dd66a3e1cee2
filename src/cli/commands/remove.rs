use std::collections::BTreeMap;
use std::fs;

use weft::driver::{self, Flags};
use weft::error::{Error, Result};
use weft::executor;
use weft::planner::{Op, Plan};

/// Delete the given files from the remote theme, then from disk.
pub async fn run(flags: Flags, paths: Vec<String>) -> Result<()> {
    if paths.is_empty() {
        return Err(Error::Other("please specify file(s) to be removed".to_string()));
    }

    driver::for_each_client(flags, paths, |ctx| async move {
        let mut actions = BTreeMap::new();
        for path in &ctx.args {
            actions.insert(path.clone(), Op::Remove);
        }

        executor::execute_plan(
            &ctx,
            Plan {
                actions,
                remote_checksums: Default::default(),
            },
        )
        .await?;

        for path in &ctx.args {
            let local = ctx.env.directory.join(path);
            if local.is_file() {
                let _ = fs::remove_file(local);
            }
        }
        Ok(())
    })
    .await
}
