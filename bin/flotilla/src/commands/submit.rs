use flotilla_bus::{BusConnector, NatsConnector};
use flotilla_core::{Config, TaskMessage};

pub async fn run(
    id: Option<String>,
    target: Option<String>,
    payload: Option<String>,
) -> anyhow::Result<()> {
    let config = Config::from_env();
    let task = build_task(id, target, payload.as_deref())?;

    let transport = NatsConnector::new(config.bus_url.clone())
        .with_client_name("flotilla-submit")
        .connect()
        .await?;
    transport
        .publish(&config.task_topic, serde_json::to_vec(&task)?)
        .await?;
    transport.flush().await?;

    match &task.target_agent {
        Some(target) => println!("Submitted task {} for {} on {}", task.id, target, config.task_topic),
        None => println!("Submitted task {} on {}", task.id, config.task_topic),
    }
    Ok(())
}

fn build_task(
    id: Option<String>,
    target: Option<String>,
    payload: Option<&str>,
) -> anyhow::Result<TaskMessage> {
    let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut task = TaskMessage::new(id);
    if let Some(target) = target.filter(|t| !t.trim().is_empty()) {
        task = task.for_agent(target);
    }
    if let Some(raw) = payload {
        match serde_json::from_str::<serde_json::Value>(raw)? {
            serde_json::Value::Object(map) => task = task.with_payload(map),
            other => anyhow::bail!("Payload must be a JSON object, got: {}", other),
        }
    }
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_task_defaults() {
        let task = build_task(None, None, None).unwrap();
        assert!(uuid::Uuid::parse_str(&task.id).is_ok());
        assert!(task.target_agent.is_none());
        assert!(task.payload.is_empty());
        assert!(task.submitted_at.is_some());
    }

    #[test]
    fn test_build_task_with_target_and_payload() {
        let task = build_task(
            Some("t1".into()),
            Some("agent-a".into()),
            Some(r#"{"topic":"latency"}"#),
        )
        .unwrap();
        assert_eq!(task.id, "t1");
        assert_eq!(task.target_agent.as_deref(), Some("agent-a"));
        assert_eq!(task.payload["topic"], "latency");
    }

    #[test]
    fn test_build_task_rejects_non_object_payload() {
        assert!(build_task(None, None, Some("[1,2]")).is_err());
        assert!(build_task(None, None, Some("{not json")).is_err());
    }
}
