use colored::Colorize;

use weft::driver::{self, Flags};
use weft::error::Result;

/// Promote each selected environment's theme to the published theme.
pub async fn run(flags: Flags) -> Result<()> {
    driver::for_each_client(flags, Vec::new(), |ctx| async move {
        ctx.client.publish_theme().await?;
        println!(
            "[{}] published theme {}",
            ctx.env.name.green(),
            ctx.env.theme_id.yellow()
        );
        Ok(())
    })
    .await
}
