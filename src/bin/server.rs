use clap::Parser;
use native_yield_automation::config::{Ctx, Env, setup_tracing};
use native_yield_automation::launch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed_env = Env::parse();
    let ctx = Ctx::load_files(&parsed_env.config, &parsed_env.secrets)?;

    setup_tracing(&ctx.log_level);

    launch(ctx).await
}
