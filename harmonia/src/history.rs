//! Per-call history of a balancer.
//!
//! Retention is bounded: once `capacity` records are held the oldest one is
//! dropped for every new one. A capacity of zero keeps everything.

use std::collections::VecDeque;

use serde::Serialize;

/// What one `balance_signal` call left behind.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryRecord {
    /// THD of the output, `None` when its spectrum was degenerate.
    pub thd: Option<f64>,
    pub phases: Vec<f64>,
    /// In-band detected frequency minus the base frequency before tracking.
    pub frequency_drift: f64,
    /// Base frequency after tracking.
    pub base_frequency: f64,
    /// Final phase-search cost, `None` when the search fell back.
    pub objective: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct HistoryLog {
    records: VecDeque<HistoryRecord>,
    capacity: usize,
}

impl HistoryLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, record: HistoryRecord) {
        if self.capacity > 0 && self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest(&self) -> Option<&HistoryRecord> {
        self.records.back()
    }

    /// THD values of every retained record, oldest first.
    pub fn thd_series(&self) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.thd).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(thd: f64) -> HistoryRecord {
        HistoryRecord {
            thd: Some(thd),
            phases: vec![0.0; 2],
            frequency_drift: 0.0,
            base_frequency: 60.0,
            objective: None,
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut log = HistoryLog::with_capacity(3);
        for i in 0..5 {
            log.push(record(i as f64));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.thd_series(), vec![Some(2.0), Some(3.0), Some(4.0)]);
        assert_eq!(log.latest().and_then(|r| r.thd), Some(4.0));
    }

    #[test]
    fn zero_capacity_is_unbounded() {
        let mut log = HistoryLog::with_capacity(0);
        for i in 0..2000 {
            log.push(record(i as f64));
        }
        assert_eq!(log.len(), 2000);
        assert_eq!(log.thd_series().first(), Some(&Some(0.0)));
    }
}
