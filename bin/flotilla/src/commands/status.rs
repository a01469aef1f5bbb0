use chrono::Utc;
use flotilla_agent::{ControlPlane, HttpControlPlane};
use flotilla_core::Config;

pub async fn run() -> anyhow::Result<()> {
    let config = Config::from_env();
    let control_plane = HttpControlPlane::from_config(&config)?;
    let agents = control_plane.status().await?;

    println!("flotilla status ({})", control_plane.base_url());
    println!("===============");
    println!();

    if agents.is_empty() {
        println!("No agents registered.");
        return Ok(());
    }

    println!(
        "{:<24} {:<32} {:>10} {:>7}",
        "NAME", "DEPLOYMENT", "LAST SEEN", "TASKS"
    );
    let now = Utc::now();
    for record in &agents {
        let age = (now - record.updated_at).num_seconds().max(0);
        println!(
            "{:<24} {:<32} {:>9}s {:>7}",
            record.identity.name(),
            record.identity.deployment_name(),
            age,
            record.activity.active_task_ids.len()
        );
        for task in &record.activity.active_task_ids {
            println!(
                "    {} [{}] waiting {:.1} min",
                task.id, task.status, task.waiting_since_mins
            );
        }
    }
    println!();
    println!("{} agent(s)", agents.len());
    Ok(())
}
