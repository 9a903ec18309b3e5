//! Change observer: poll, normalize, diff, render.
//!
//! Polls one device or sensor on a fixed interval, flattens its snapshot to
//! a dotted-path primitive map, diffs against the previous poll and emits
//! either a colorized textual diff or a one-line JSON document. Poll errors
//! are logged and swallowed; only cancellation ends the loop.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Local};
use colored::Colorize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::client::PicoClient;
use crate::error::ClientError;

/// What the observer polls.
#[derive(Debug, Clone, Copy)]
pub enum ObserveTarget {
    Device(u8),
    Sensor(u8),
}

/// One detected change set between consecutive polls.
#[derive(Debug, Clone)]
pub struct ObjectDiff {
    pub changes: BTreeMap<String, (Value, Value)>,
    pub unchanged: BTreeMap<String, Value>,
    pub hints: Option<BTreeMap<String, String>>,
    pub timestamp: DateTime<Local>,
}

pub struct ObjectObserver {
    interval: Duration,
    field_filter: Option<Vec<String>>,
    json_mode: bool,
    include_unchanged: bool,
    re_hints: bool,
    previous: Option<BTreeMap<String, Value>>,
}

impl ObjectObserver {
    pub fn new(interval: Duration) -> Self {
        ObjectObserver {
            interval,
            field_filter: None,
            json_mode: false,
            include_unchanged: false,
            re_hints: false,
            previous: None,
        }
    }

    /// Comma-separated substrings matched case-insensitively against keys
    /// (e.g. `ohms,state_field,fields.18`).
    pub fn field_filter(mut self, csv: Option<&str>) -> Self {
        self.field_filter = csv.map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        });
        self
    }

    pub fn json_mode(mut self, on: bool) -> Self {
        self.json_mode = on;
        self
    }

    pub fn include_unchanged(mut self, on: bool) -> Self {
        self.include_unchanged = on;
        self
    }

    pub fn re_hints(mut self, on: bool) -> Self {
        self.re_hints = on;
        self
    }

    // ── Normalization ─────────────────────────────────────────────────────────

    /// Flatten a nested snapshot into dotted-path keys. Integer-keyed field
    /// maps arrive as `{"fields": {"3": ...}}` and flatten to `fields.3`.
    fn normalize(snapshot: &Value) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        Self::flatten("", snapshot, &mut out);
        out
    }

    fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    Self::flatten(&path, child, out);
                }
            }
            other => {
                out.insert(prefix.to_string(), other.clone());
            }
        }
    }

    fn matches_filter(&self, key: &str) -> bool {
        let Some(filter) = &self.field_filter else {
            return true;
        };
        let key = key.to_lowercase();
        filter
            .iter()
            .any(|rule| key == *rule || key.starts_with(rule) || key.contains(rule))
    }

    // ── Diffing ───────────────────────────────────────────────────────────────

    /// Feed one snapshot; returns a diff once a previous poll exists and
    /// something (surviving the filter) changed.
    pub fn observe(&mut self, snapshot: &Value) -> Option<ObjectDiff> {
        let current = Self::normalize(snapshot);
        let previous = self.previous.replace(current.clone())?;

        let mut changes = BTreeMap::new();
        let mut unchanged = BTreeMap::new();
        let keys: BTreeSet<&String> = previous.keys().chain(current.keys()).collect();
        for key in keys {
            if !self.matches_filter(key) {
                continue;
            }
            let old = previous.get(key).cloned().unwrap_or(Value::Null);
            let new = current.get(key).cloned().unwrap_or(Value::Null);
            if old == new {
                if self.include_unchanged {
                    unchanged.insert(key.clone(), new);
                }
            } else {
                changes.insert(key.clone(), (old, new));
            }
        }

        if changes.is_empty() && !(self.include_unchanged && !unchanged.is_empty()) {
            return None;
        }

        let hints = self.re_hints.then(|| Self::generate_hints(&changes));
        Some(ObjectDiff {
            changes,
            unchanged,
            hints,
            timestamp: Local::now(),
        })
    }

    /// Heuristic classification of numeric deltas, to speed up figuring out
    /// what an undocumented field is.
    fn generate_hints(changes: &BTreeMap<String, (Value, Value)>) -> BTreeMap<String, String> {
        let mut hints = BTreeMap::new();
        for (key, (old, new)) in changes {
            let hint = match (old.as_f64(), new.as_f64()) {
                (Some(old), Some(new)) => {
                    let delta = new - old;
                    if delta == 0.0 {
                        "no change".to_string()
                    } else if delta.abs() < 5.0 {
                        "small incremental change".to_string()
                    } else if delta.abs() > 10_000.0 {
                        "large jump — maybe counter or timestamp".to_string()
                    } else {
                        "likely analog measurement".to_string()
                    }
                }
                _ => "value changed type/flag".to_string(),
            };
            hints.insert(key.clone(), hint);
        }
        hints
    }

    // ── Output ────────────────────────────────────────────────────────────────

    fn emit(&self, label: &str, diff: &ObjectDiff) {
        if self.json_mode {
            self.emit_json(label, diff);
        } else {
            self.emit_text(label, diff);
        }
    }

    fn emit_text(&self, label: &str, diff: &ObjectDiff) {
        println!("==== Object Change ====");
        println!("Object: {label}");
        println!("Time  : {}", diff.timestamp.format("%H:%M:%S"));

        for (key, (old, new)) in &diff.changes {
            println!(
                "  {key:<30} {} → {}",
                old.to_string().red(),
                new.to_string().green()
            );
        }

        if self.include_unchanged && !diff.unchanged.is_empty() {
            println!("  ---- unchanged ----");
            for (key, value) in &diff.unchanged {
                println!("  {key:<30} {value}");
            }
        }

        if let Some(hints) = &diff.hints {
            println!("  ---- hints ----");
            for (key, hint) in hints {
                println!("  {key:<30} {}", hint.yellow());
            }
        }
    }

    fn emit_json(&self, label: &str, diff: &ObjectDiff) {
        let mut changed = Map::new();
        for (key, (old, new)) in &diff.changes {
            changed.insert(key.clone(), json!({ "old": old, "new": new }));
        }

        let mut doc = json!({
            "timestamp": diff.timestamp.timestamp_millis() as f64 / 1000.0,
            "object": label,
            "changed": changed,
            "unchanged": if self.include_unchanged { json!(diff.unchanged) } else { json!({}) },
        });
        if let Some(hints) = &diff.hints {
            doc["hints"] = json!(hints);
        }
        println!("{doc}");
    }

    // ── Polling ───────────────────────────────────────────────────────────────

    async fn fetch(
        &self,
        client: &mut PicoClient,
        target: ObserveTarget,
    ) -> Result<(String, Value), ClientError> {
        match target {
            ObserveTarget::Device(id) => {
                let device = client.get_device(id).await?;
                let label = format!(
                    "Device #{} {:?} (type={})",
                    device.id().unwrap_or(i32::from(id)),
                    device.name().unwrap_or_default(),
                    device.type_name()
                );
                Ok((label, device.snapshot()))
            }
            ObserveTarget::Sensor(id) => {
                let mut sensor = client.get_sensor(id).await?;
                let state = client.get_sensors_state().await?;
                if let Some(field) = sensor
                    .id()
                    .and_then(|sid| u8::try_from(sid).ok())
                    .and_then(|sid| state.get(&sid).cloned())
                {
                    sensor.set_state_field(field);
                }
                let label = format!(
                    "Sensor #{} (type={})",
                    sensor.id().unwrap_or(i32::from(id)),
                    sensor.type_name()
                );
                Ok((label, sensor.snapshot()))
            }
        }
    }

    /// One poll: fetch, diff, emit.
    pub async fn sample(
        &mut self,
        client: &mut PicoClient,
        target: ObserveTarget,
    ) -> Result<(), ClientError> {
        let (label, snapshot) = self.fetch(client, target).await?;
        if let Some(diff) = self.observe(&snapshot) {
            self.emit(&label, &diff);
        }
        Ok(())
    }

    /// Poll until cancelled. Per-poll failures are logged and the loop keeps
    /// going; protocol drift on a live boat is something to observe, not to
    /// crash on.
    pub async fn run(
        &mut self,
        client: &mut PicoClient,
        target: ObserveTarget,
        token: CancellationToken,
    ) {
        while !token.is_cancelled() {
            if let Err(e) = self.sample(client, target).await {
                warn!("observer poll failed: {e}");
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
