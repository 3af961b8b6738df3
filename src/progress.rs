use std::collections::BTreeMap;

use burn::train::renderer::{MetricState, MetricsRenderer, TrainingProgress};
use log::{debug, info};

/// Reports learner progress through the `log` facade instead of a terminal UI.
///
/// Per-iteration updates go to `debug!`; the last iteration of every epoch is
/// summarized at `info!` with the latest value of each metric.
#[derive(Debug, Default)]
pub struct LogRenderer {
    train: BTreeMap<String, String>,
    valid: BTreeMap<String, String>,
}

impl LogRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(metrics: &mut BTreeMap<String, String>, state: MetricState) {
        let entry = match state {
            MetricState::Generic(entry) => entry,
            MetricState::Numeric(entry, _) => entry,
        };
        metrics.insert(entry.name, entry.formatted);
    }

    fn render(stage: &str, metrics: &BTreeMap<String, String>, item: &TrainingProgress) {
        let summary = summary(metrics);
        if item.progress.items_processed >= item.progress.items_total {
            info!(
                "epoch {}/{} {stage}: {summary}",
                item.epoch, item.epoch_total
            );
        } else {
            debug!(
                "epoch {}/{} {stage} [{}/{}] iteration {}: {summary}",
                item.epoch,
                item.epoch_total,
                item.progress.items_processed,
                item.progress.items_total,
                item.iteration
            );
        }
    }
}

fn summary(metrics: &BTreeMap<String, String>) -> String {
    metrics.values().cloned().collect::<Vec<_>>().join(", ")
}

impl MetricsRenderer for LogRenderer {
    fn update_train(&mut self, state: MetricState) {
        Self::record(&mut self.train, state);
    }

    fn update_valid(&mut self, state: MetricState) {
        Self::record(&mut self.valid, state);
    }

    fn render_train(&mut self, item: TrainingProgress) {
        Self::render("train", &self.train, &item);
    }

    fn render_valid(&mut self, item: TrainingProgress) {
        Self::render("valid", &self.valid, &item);
    }
}
