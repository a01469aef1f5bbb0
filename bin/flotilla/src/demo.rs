//! Built-in agent behaviours for `flotilla run`.
//!
//! `research` and `writer` emit a phased log cycle on the log topic so a
//! monitoring stack has something to show; `idle` only answers tasks.

use async_trait::async_trait;
use clap::ValueEnum;
use flotilla_agent::{Agent, AgentContext};
use flotilla_core::{AgentIdentity, LogLevel, Result, TaskMessage};
use rand::seq::IndexedRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DemoKind {
    Idle,
    Research,
    Writer,
}

impl DemoKind {
    pub fn description(&self) -> &'static str {
        match self {
            DemoKind::Idle => "Waits for tasks on the bus",
            DemoKind::Research => "Collects and analyses cluster metrics",
            DemoKind::Writer => "Generates periodic system reports",
        }
    }
}

pub fn build(kind: DemoKind, identity: AgentIdentity) -> Arc<dyn Agent> {
    Arc::new(DemoAgent { kind, identity })
}

struct DemoAgent {
    kind: DemoKind,
    identity: AgentIdentity,
}

const METRICS: &[&str] = &["CPU", "Memory", "Network", "Disk I/O"];
const ANALYSES: &[&str] = &[
    "Anomaly detection in pod resource usage",
    "Queue depth trend analysis",
    "LLM token consumption patterns",
    "Agent workload distribution",
    "Network latency correlation",
];
const RECOMMENDATIONS: &[&str] = &[
    "Scaling pod replicas for research-agent deployment",
    "Reducing task topic consumer lag",
    "Adjusting LLM rate limits",
    "Rebalancing queue priorities",
    "Updating resource quotas",
];
const SOURCES: &[&str] = &["system_snapshots", "agent_logs", "queue_metrics", "llm_usage"];
const OPERATIONS: &[&str] = &[
    "Aggregating hourly statistics",
    "Computing performance trends",
    "Identifying bottlenecks",
    "Generating insights",
    "Building visualizations",
];
const SECTIONS: &[&str] = &[
    "Executive Summary",
    "System Overview",
    "Performance Analysis",
    "Recommendations",
];

fn pick(items: &[&'static str]) -> &'static str {
    items.choose(&mut rand::rng()).copied().unwrap_or_default()
}

fn roll(low: u32, high: u32) -> u32 {
    rand::rng().random_range(low..=high)
}

/// Log one phase, then pause. `false` once shutdown interrupts the pause.
async fn phase(ctx: &AgentContext, task_id: &str, level: LogLevel, message: String, pause_ms: u64) -> bool {
    ctx.log_task(level, message, task_id).await;
    ctx.sleep(Duration::from_millis(pause_ms)).await
}

async fn research_cycle(ctx: &AgentContext, n: u32) -> bool {
    let id = format!("research-{:04}", n);
    let health = roll(70, 99);
    let (level, verdict) = if health > 90 {
        (LogLevel::Info, "All systems nominal")
    } else if health > 80 {
        (LogLevel::Warning, "Minor optimization recommended")
    } else {
        (LogLevel::Error, "Attention required")
    };

    phase(ctx, &id, LogLevel::Info, format!("Initiating research cycle #{}", n), 500).await
        && phase(ctx, &id, LogLevel::Info, format!("Collecting {} metrics from cluster nodes", pick(METRICS)), 800).await
        && phase(ctx, &id, LogLevel::Info, format!("Running analysis: {}", pick(ANALYSES)), 1000).await
        && phase(ctx, &id, level, format!("Analysis complete: System health at {}% - {}", health, verdict), 500).await
        && phase(ctx, &id, LogLevel::Info, format!("Recommendation: {}", pick(RECOMMENDATIONS)), 1200).await
        && phase(ctx, &id, LogLevel::Info, format!("Research cycle #{} completed successfully", n), 2000).await
}

async fn writer_cycle(ctx: &AgentContext, n: u32) -> bool {
    let id = format!("writer-{:04}", n);
    let quality = roll(85, 100);
    let grade = if quality >= 95 { "Excellent" } else { "Good" };

    phase(ctx, &id, LogLevel::Info, format!("Starting report generation #{}", n), 600).await
        && phase(ctx, &id, LogLevel::Info, format!("Fetching data from {} table", pick(SOURCES)), 900).await
        && phase(ctx, &id, LogLevel::Info, pick(OPERATIONS).to_string(), 1100).await
        && phase(ctx, &id, LogLevel::Info, format!("Writing section: {}", pick(SECTIONS)), 800).await
        && phase(ctx, &id, LogLevel::Info, format!("Report quality check: {}/100 - {}", quality, grade), 700).await
        && phase(ctx, &id, LogLevel::Info, format!("Report #{} generated and saved", n), 2500).await
}

#[async_trait]
impl Agent for DemoAgent {
    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    async fn run(&self, ctx: AgentContext) -> Result<()> {
        let mut n = 0;
        loop {
            n += 1;
            let more = match self.kind {
                DemoKind::Idle => {
                    ctx.cancelled().await;
                    false
                }
                DemoKind::Research => research_cycle(&ctx, n).await,
                DemoKind::Writer => writer_cycle(&ctx, n).await,
            };
            if !more {
                return Ok(());
            }
        }
    }

    async fn on_task(&self, task: TaskMessage, ctx: &AgentContext) -> Result<()> {
        let keys: Vec<&str> = task.payload.keys().map(String::as_str).collect();
        let detail = if keys.is_empty() {
            String::new()
        } else {
            format!(" (payload: {})", keys.join(", "))
        };
        ctx.log_task(
            LogLevel::Info,
            format!("{} acknowledged task {}{}", self.identity.name(), task.id, detail),
            &task.id,
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_agent::RunState;
    use flotilla_bus::{MemoryBus, Producer};
    use flotilla_core::LogEvent;

    async fn context(bus: &MemoryBus, name: &str) -> AgentContext {
        let producer = Arc::new(Producer::new("agent-logs"));
        producer.connect(bus).await.unwrap();
        AgentContext::new(Arc::new(AgentIdentity::new(name)), producer, RunState::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_research_cycle_logs_every_phase() {
        let bus = MemoryBus::new();
        let ctx = context(&bus, "research-agent").await;
        let agent = build(DemoKind::Research, AgentIdentity::new("research-agent"));

        let state = ctx.run_state().clone();
        let handle = tokio::spawn(async move { agent.run(ctx).await });
        // one full cycle is 6s of pauses
        tokio::time::sleep(Duration::from_millis(6500)).await;
        state.request_shutdown();
        handle.await.unwrap().unwrap();

        let events: Vec<LogEvent> = bus.published_as("agent-logs");
        let first: Vec<&LogEvent> = events
            .iter()
            .filter(|e| e.task_id.as_deref() == Some("research-0001"))
            .collect();
        assert_eq!(first.len(), 6);
        assert_eq!(first[0].message, "Initiating research cycle #1");
        assert_eq!(first[5].message, "Research cycle #1 completed successfully");
        assert!(events.iter().any(|e| e.task_id.as_deref() == Some("research-0002")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_stops_mid_cycle_on_shutdown() {
        let bus = MemoryBus::new();
        let ctx = context(&bus, "writer-agent").await;
        let agent = build(DemoKind::Writer, AgentIdentity::new("writer-agent"));

        let state = ctx.run_state().clone();
        let handle = tokio::spawn(async move { agent.run(ctx).await });
        tokio::time::sleep(Duration::from_millis(1000)).await;
        state.request_shutdown();
        handle.await.unwrap().unwrap();

        let events: Vec<LogEvent> = bus.published_as("agent-logs");
        assert_eq!(events.len(), 2);
        assert!(events[1].message.starts_with("Fetching data from"));
    }

    #[tokio::test]
    async fn test_task_acknowledged_with_payload_keys() {
        let bus = MemoryBus::new();
        let ctx = context(&bus, "agent-a").await;
        let agent = build(DemoKind::Idle, AgentIdentity::new("agent-a"));

        let mut payload = serde_json::Map::new();
        payload.insert("topic".into(), serde_json::json!("latency"));
        agent
            .on_task(TaskMessage::new("t1").with_payload(payload), &ctx)
            .await
            .unwrap();

        let events: Vec<LogEvent> = bus.published_as("agent-logs");
        assert_eq!(events[0].message, "agent-a acknowledged task t1 (payload: topic)");
        assert_eq!(events[0].task_id.as_deref(), Some("t1"));
    }
}
