/*!
Test harness for reporter scenarios

Wires an `Agent` to a `MockTransport` and a `StaticMetrics` provider and
offers assertions over what reached the transport:
- messages split by status, values and discovery topics
- nested JSON field lookups on the latest report
- settling helpers for detached publishes under paused time
*/

use crate::mock_transport::{MockMessage, MockTransport};
use crate::static_metrics::{sample_identity, StaticMetrics};
use anyhow::Result;
use rpireport_agent::{Agent, AgentError, HostIdentity, ReportSettings, RunningAgent, Topics, REPORTER};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct TestHarness {
    pub transport: MockTransport,
    pub identity: HostIdentity,
    pub topics: Topics,
    pub settings: ReportSettings,
    metrics: Option<StaticMetrics>,
    metrics_calls: Arc<AtomicUsize>,
    connect_timeout: Duration,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok();

        let identity = sample_identity();
        let topics = Topics::new(
            "home/nodes",
            &format!("rpi-{}", identity.hostname),
            "homeassistant",
        );
        let metrics = StaticMetrics::sample();

        Self {
            transport: MockTransport::new(),
            metrics_calls: metrics.calls(),
            metrics: Some(metrics),
            identity,
            topics,
            settings: ReportSettings {
                interval_minutes: 5,
                stall: false,
                reporter: REPORTER.to_string(),
            },
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_transport(mut self, transport: MockTransport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_metrics(mut self, metrics: StaticMetrics) -> Self {
        self.metrics_calls = metrics.calls();
        self.metrics = Some(metrics);
        self
    }

    pub fn with_interval(mut self, minutes: u32) -> Self {
        self.settings.interval_minutes = minutes;
        self
    }

    pub fn with_stall(mut self) -> Self {
        self.settings.stall = true;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builds the agent; the metrics provider moves into it
    pub fn agent(&mut self) -> Agent {
        let metrics = self.metrics.take().unwrap_or_else(StaticMetrics::sample);
        self.metrics_calls = metrics.calls();

        Agent::new(
            self.identity.clone(),
            self.topics.clone(),
            self.settings.clone(),
            Arc::new(self.transport.clone()),
            Arc::new(metrics),
        )
        .with_connect_timeout(self.connect_timeout)
    }

    /// Runs the startup sequence and lets detached publishes land
    pub async fn start(&mut self) -> Result<RunningAgent, AgentError> {
        let running = self.agent().start().await?;
        settle().await;
        Ok(running)
    }

    pub fn metrics_calls(&self) -> usize {
        self.metrics_calls.load(Ordering::SeqCst)
    }

    pub fn status_messages(&self) -> Vec<MockMessage> {
        self.transport.find_messages_by_topic(&self.topics.status)
    }

    pub fn report_messages(&self) -> Vec<MockMessage> {
        self.transport.find_messages_by_topic(&self.topics.values)
    }

    pub fn discovery_messages(&self) -> Vec<MockMessage> {
        let prefix = format!("{}/", self.topics.discovery_prefix);
        self.transport
            .get_published_messages()
            .into_iter()
            .filter(|msg| msg.topic.starts_with(&prefix))
            .collect()
    }

    /// Latest values payload, wrapper included
    pub fn last_report(&self) -> Result<Value> {
        match self.transport.get_last_json_message::<Value>(&self.topics.values)? {
            Some(report) => Ok(report),
            None => anyhow::bail!("No report published on {}", self.topics.values),
        }
    }

    /// Compares one field of the latest report, e.g. `info.memory_size`
    pub fn assert_report_field(&self, field_path: &str, expected: &Value) -> Result<()> {
        let report = self.last_report()?;
        match get_nested_field(&report, field_path) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => anyhow::bail!(
                "Field '{}' mismatch: expected {:?}, got {:?}",
                field_path,
                expected,
                actual
            ),
            None => anyhow::bail!("Field '{}' not found in latest report", field_path),
        }
    }

    pub fn get_stats(&self) -> TestStats {
        let messages = self.transport.get_published_messages();
        let mut topic_counts = HashMap::new();
        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }
        TestStats {
            total_messages: messages.len(),
            topic_counts,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Lets spawned publish tasks run without moving virtual time noticeably
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

pub fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub topic_counts: HashMap<String, usize>,
}

impl TestStats {
    pub fn print(&self) {
        println!("Test Statistics:");
        println!("  Total messages: {}", self.total_messages);
        for (topic, count) in &self.topic_counts {
            println!("    {}: {} messages", topic, count);
        }
    }
}
