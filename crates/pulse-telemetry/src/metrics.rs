use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// A point-in-time reading of one internal stat, as exposed by the
/// status API.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatSample {
    pub name: String,
    pub value: f64,
    pub kind: &'static str,
    pub timestamp: String,
}

/// Summary statistics over a histogram's observations.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

struct Counter {
    value: AtomicU64,
}

struct Gauge {
    // f64 bits in an i64 so negative deltas work with atomics.
    value: AtomicI64,
}

impl Gauge {
    fn set(&self, v: f64) {
        self.value.store(v.to_bits() as i64, Ordering::Relaxed);
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed) as u64)
    }
}

struct Histogram {
    observations: Mutex<Vec<f64>>,
}

impl Histogram {
    fn summary(&self) -> HistogramSummary {
        let mut obs = self.observations.lock();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = obs.len();
        let sum: f64 = obs.iter().sum();
        HistogramSummary {
            count: count as u64,
            sum,
            p50: obs[count / 2],
            p95: obs[((count as f64 * 0.95) as usize).min(count - 1)],
            p99: obs[((count as f64 * 0.99) as usize).min(count - 1)],
        }
    }
}

/// In-process stats for hub self-observation: monotone counters, gauges,
/// and latency histograms, all keyed by name. No persistence — snapshots
/// are served straight from memory by the status API.
#[derive(Default)]
pub struct Recorder {
    counters: RwLock<HashMap<String, Counter>>,
    gauges: RwLock<HashMap<String, Gauge>>,
    histograms: RwLock<HashMap<String, Histogram>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_inc(&self, name: &str, n: u64) {
        {
            let counters = self.counters.read();
            if let Some(c) = counters.get(name) {
                c.value.fetch_add(n, Ordering::Relaxed);
                return;
            }
        }
        let mut counters = self.counters.write();
        counters
            .entry(name.to_string())
            .or_insert_with(|| Counter {
                value: AtomicU64::new(0),
            })
            .value
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn counter_get(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map_or(0, |c| c.value.load(Ordering::Relaxed))
    }

    pub fn gauge_set(&self, name: &str, value: f64) {
        {
            let gauges = self.gauges.read();
            if let Some(g) = gauges.get(name) {
                g.set(value);
                return;
            }
        }
        let mut gauges = self.gauges.write();
        gauges
            .entry(name.to_string())
            .or_insert_with(|| Gauge {
                value: AtomicI64::new(0),
            })
            .set(value);
    }

    pub fn gauge_get(&self, name: &str) -> f64 {
        self.gauges.read().get(name).map_or(0.0, Gauge::get)
    }

    pub fn histogram_observe(&self, name: &str, value: f64) {
        {
            let histograms = self.histograms.read();
            if let Some(h) = histograms.get(name) {
                h.observations.lock().push(value);
                return;
            }
        }
        let mut histograms = self.histograms.write();
        histograms
            .entry(name.to_string())
            .or_insert_with(|| Histogram {
                observations: Mutex::new(Vec::new()),
            })
            .observations
            .lock()
            .push(value);
    }

    pub fn histogram_summary(&self, name: &str) -> HistogramSummary {
        self.histograms
            .read()
            .get(name)
            .map(Histogram::summary)
            .unwrap_or_default()
    }

    /// Snapshot every stat for the status API. Histograms report p50.
    pub fn snapshot(&self) -> Vec<StatSample> {
        let now = Utc::now().to_rfc3339();
        let mut out = Vec::new();

        for (name, counter) in self.counters.read().iter() {
            out.push(StatSample {
                name: name.clone(),
                value: counter.value.load(Ordering::Relaxed) as f64,
                kind: "counter",
                timestamp: now.clone(),
            });
        }
        for (name, gauge) in self.gauges.read().iter() {
            out.push(StatSample {
                name: name.clone(),
                value: gauge.get(),
                kind: "gauge",
                timestamp: now.clone(),
            });
        }
        for (name, histogram) in self.histograms.read().iter() {
            out.push(StatSample {
                name: name.clone(),
                value: histogram.summary().p50,
                kind: "histogram",
                timestamp: now.clone(),
            });
        }

        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}
