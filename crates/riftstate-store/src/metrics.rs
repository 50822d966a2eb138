//! World metrics: derived scalar indicators in the closed interval [0, 1].
//!
//! Metrics are read-only to every collaborator; they change only as a side
//! effect of a committed transaction's declared deltas, applied by the
//! commit path. An update that would leave [0, 1] saturates at the bound
//! rather than erroring -- a cataclysm can pin danger at 1, it cannot
//! overflow it.
//!
//! All values are [`Decimal`]; metric arithmetic never touches floating
//! point.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::trace;

use riftstate_types::{Metric, MetricDelta};

/// The neutral starting value for an untouched metric.
///
/// World indicators begin balanced rather than at catastrophe (0) or
/// utopia (1).
pub const NEUTRAL: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// The aggregator holding every world metric.
#[derive(Debug, Default)]
pub struct WorldMetrics {
    values: RwLock<BTreeMap<Metric, Decimal>>,
}

impl WorldMetrics {
    /// Create an aggregator with every metric at [`NEUTRAL`].
    pub const fn new() -> Self {
        Self {
            values: RwLock::new(BTreeMap::new()),
        }
    }

    /// Read a metric. Untouched metrics read as [`NEUTRAL`].
    pub fn get(&self, metric: Metric) -> Decimal {
        self.values.read().get(&metric).copied().unwrap_or(NEUTRAL)
    }

    /// Apply one delta, clamping the result to [0, 1]. Returns the new
    /// value.
    pub fn apply(&self, delta: MetricDelta) -> Decimal {
        let mut values = self.values.write();
        let current = values.get(&delta.metric).copied().unwrap_or(NEUTRAL);
        let updated = current
            .saturating_add(delta.delta)
            .clamp(Decimal::ZERO, Decimal::ONE);
        values.insert(delta.metric, updated);
        trace!(metric = %delta.metric, %updated, "metric updated");
        updated
    }

    /// Apply a batch of deltas in order.
    pub fn apply_all(&self, deltas: &[MetricDelta]) {
        for delta in deltas {
            self.apply(*delta);
        }
    }

    /// Current values of the given metrics, for revert bookkeeping.
    pub fn values_of(&self, metrics: impl IntoIterator<Item = Metric>) -> Vec<(Metric, Decimal)> {
        let values = self.values.read();
        metrics
            .into_iter()
            .map(|metric| (metric, values.get(&metric).copied().unwrap_or(NEUTRAL)))
            .collect()
    }

    /// Overwrite the given metrics with saved values. Used to revert a
    /// commit whose durable record never reached disk, and by recovery.
    pub fn restore(&self, saved: &[(Metric, Decimal)]) {
        let mut values = self.values.write();
        for (metric, value) in saved {
            values.insert(*metric, *value);
        }
    }

    /// Every metric's current value, in declaration order. Metrics never
    /// written appear at [`NEUTRAL`].
    pub fn snapshot(&self) -> Vec<(Metric, Decimal)> {
        let values = self.values.read();
        Metric::ALL
            .iter()
            .map(|metric| (*metric, values.get(metric).copied().unwrap_or(NEUTRAL)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: a delta on the given metric.
    fn delta(metric: Metric, value: Decimal) -> MetricDelta {
        MetricDelta::new(metric, value)
    }

    #[test]
    fn untouched_metric_reads_neutral() {
        let metrics = WorldMetrics::new();
        assert_eq!(metrics.get(Metric::Stability), NEUTRAL);
        assert_eq!(NEUTRAL, Decimal::new(5, 1));
    }

    #[test]
    fn deltas_accumulate() {
        let metrics = WorldMetrics::new();
        metrics.apply(delta(Metric::Danger, Decimal::new(2, 1)));
        metrics.apply(delta(Metric::Danger, Decimal::new(1, 1)));
        assert_eq!(metrics.get(Metric::Danger), Decimal::new(8, 1));
    }

    #[test]
    fn huge_positive_delta_saturates_at_one() {
        let metrics = WorldMetrics::new();
        metrics.apply(delta(Metric::Corruption, Decimal::new(1_000_000, 0)));
        assert_eq!(metrics.get(Metric::Corruption), Decimal::ONE);
    }

    #[test]
    fn huge_negative_delta_saturates_at_zero() {
        let metrics = WorldMetrics::new();
        metrics.apply(delta(Metric::Morale, Decimal::new(-1_000_000, 0)));
        assert_eq!(metrics.get(Metric::Morale), Decimal::ZERO);
    }

    #[test]
    fn values_never_leave_unit_interval() {
        let metrics = WorldMetrics::new();
        let swings = [
            Decimal::new(97, 1),
            Decimal::new(-312, 1),
            Decimal::new(45, 2),
            Decimal::MAX,
            Decimal::MIN,
        ];
        for swing in swings {
            metrics.apply(delta(Metric::MagicSaturation, swing));
            let value = metrics.get(Metric::MagicSaturation);
            assert!(value >= Decimal::ZERO);
            assert!(value <= Decimal::ONE);
        }
    }

    #[test]
    fn restore_reverts_applied_deltas() {
        let metrics = WorldMetrics::new();
        let saved = metrics.values_of([Metric::Prosperity]);
        metrics.apply(delta(Metric::Prosperity, Decimal::new(3, 1)));
        metrics.restore(&saved);
        assert_eq!(metrics.get(Metric::Prosperity), NEUTRAL);
    }

    #[test]
    fn snapshot_covers_every_metric() {
        let metrics = WorldMetrics::new();
        metrics.apply(delta(Metric::Stability, Decimal::new(-1, 1)));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), Metric::ALL.len());
        assert!(snapshot.contains(&(Metric::Stability, Decimal::new(4, 1))));
        assert!(snapshot.contains(&(Metric::Morale, NEUTRAL)));
    }
}
