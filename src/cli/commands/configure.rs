use weft::driver::{self, Flags};
use weft::error::Result;

/// Write the flag-provided environment into the config file. No network
/// traffic happens here; credentials are only checked once a sync runs.
pub async fn run(flags: Flags) -> Result<()> {
    driver::for_default_client(flags, Vec::new(), |ctx| async move {
        let mut conf = ctx.conf.lock().expect("conf poisoned");
        conf.set(&ctx.env.name, ctx.env.clone(), &[])?;
        conf.save()
    })
    .await
}
