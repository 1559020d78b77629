//! Execution tracking.
//!
//! The tracker is an append-only log of node lifecycle events plus the
//! metrics derived from it. It is a pure observer: the orchestrator feeds it,
//! nothing reads it back into scheduling decisions.

use std::collections::HashMap;

use crate::graph::CompiledDiagram;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEvent {
    Started,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct TrackRecord {
    pub node_id: String,
    pub event: TrackEvent,
    /// Unix milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Default)]
pub struct ExecutionTracker {
    records: Vec<TrackRecord>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, node_id: impl Into<String>, event: TrackEvent, timestamp: i64) {
        self.records.push(TrackRecord {
            node_id: node_id.into(),
            event,
            timestamp,
        });
    }

    pub fn records(&self) -> &[TrackRecord] {
        &self.records
    }

    pub fn success_count(&self) -> usize {
        self.count(TrackEvent::Completed)
    }

    pub fn failure_count(&self) -> usize {
        self.count(TrackEvent::Failed)
    }

    pub fn skip_count(&self) -> usize {
        self.count(TrackEvent::Skipped)
    }

    fn count(&self, event: TrackEvent) -> usize {
        self.records.iter().filter(|r| r.event == event).count()
    }

    /// Total time spent per node in milliseconds, summed over dispatches.
    /// Each Started is paired with the next terminal event for that node.
    pub fn durations_ms(&self) -> HashMap<String, i64> {
        let mut open: HashMap<&str, i64> = HashMap::new();
        let mut totals: HashMap<String, i64> = HashMap::new();
        for record in &self.records {
            match record.event {
                TrackEvent::Started => {
                    open.insert(&record.node_id, record.timestamp);
                }
                TrackEvent::Completed | TrackEvent::Failed => {
                    if let Some(started) = open.remove(record.node_id.as_str()) {
                        *totals.entry(record.node_id.clone()).or_insert(0) +=
                            record.timestamp - started;
                    }
                }
                TrackEvent::Skipped => {}
            }
        }
        totals
    }

    /// Critical-path length in milliseconds: the longest duration-weighted
    /// path through successfully executed nodes. Loop edges are excluded so
    /// the walk stays acyclic; iterated nodes contribute their summed
    /// duration at their position in the path.
    pub fn critical_path_ms(&self, diagram: &CompiledDiagram) -> i64 {
        let durations = self.durations_ms();
        let mut memo: HashMap<String, i64> = HashMap::new();

        fn longest_from(
            node_id: &str,
            diagram: &CompiledDiagram,
            durations: &HashMap<String, i64>,
            memo: &mut HashMap<String, i64>,
        ) -> i64 {
            if let Some(cached) = memo.get(node_id) {
                return *cached;
            }
            let own = durations.get(node_id).copied().unwrap_or(0);
            let best_tail = diagram
                .outgoing_edges(node_id)
                .into_iter()
                .filter(|e| !diagram.is_loop_edge(e))
                .filter(|e| durations.contains_key(&e.target))
                .map(|e| longest_from(&e.target, diagram, durations, memo))
                .max()
                .unwrap_or(0);
            let total = own + best_tail;
            memo.insert(node_id.to_string(), total);
            total
        }

        durations
            .keys()
            .map(|node_id| longest_from(node_id, diagram, &durations, &mut memo))
            .max()
            .unwrap_or(0)
    }
}
