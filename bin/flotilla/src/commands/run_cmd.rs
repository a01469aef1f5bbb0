use crate::demo::{self, DemoKind};
use flotilla_agent::AgentRuntime;
use flotilla_core::{AgentIdentity, Config};
use tracing::info;

pub async fn run(
    name: String,
    kind: DemoKind,
    description: Option<String>,
    models: Vec<String>,
) -> anyhow::Result<()> {
    let config = Config::from_env();
    let identity = AgentIdentity::new(name)
        .with_description(description.unwrap_or_else(|| kind.description().to_string()))
        .with_models(models);

    info!(agent = %identity.name(), kind = ?kind, "Launching agent");
    let agent = demo::build(kind, identity);
    AgentRuntime::from_config(config, agent)?.run().await?;
    Ok(())
}
