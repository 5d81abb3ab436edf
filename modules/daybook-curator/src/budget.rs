use std::sync::atomic::{AtomicU64, Ordering};

const MICROS_PER_USD: f64 = 1_000_000.0;

fn to_micros(usd: f64) -> u64 {
    (usd.max(0.0) * MICROS_PER_USD).round() as u64
}

/// Per-run spend tracker. Every paid call reserves its estimated cost first;
/// a reservation that would exceed the cap is refused and nothing is spent.
pub struct BudgetTracker {
    max_micros: u64,
    spent_micros: AtomicU64,
}

impl BudgetTracker {
    pub fn new(max_usd: f64) -> Self {
        Self::resume(max_usd, 0.0)
    }

    /// Continue a run that already spent `spent_usd`.
    pub fn resume(max_usd: f64, spent_usd: f64) -> Self {
        Self {
            max_micros: to_micros(max_usd),
            spent_micros: AtomicU64::new(to_micros(spent_usd)),
        }
    }

    /// Try to reserve `cost_usd`. Returns true if it fit within the budget.
    pub fn try_reserve(&self, cost_usd: f64) -> bool {
        let cost = to_micros(cost_usd);
        self.spent_micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |spent| {
                spent
                    .checked_add(cost)
                    .filter(|total| *total <= self.max_micros)
            })
            .is_ok()
    }

    /// USD
    pub fn spent(&self) -> f64 {
        self.spent_micros.load(Ordering::SeqCst) as f64 / MICROS_PER_USD
    }

    /// USD
    pub fn remaining(&self) -> f64 {
        self.max_micros
            .saturating_sub(self.spent_micros.load(Ordering::SeqCst)) as f64
            / MICROS_PER_USD
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn refuses_reservation_past_cap() {
        let budget = BudgetTracker::new(0.05);
        assert!(budget.try_reserve(0.02));
        assert!(budget.try_reserve(0.02));
        assert!(!budget.try_reserve(0.02));
        assert!((budget.spent() - 0.04).abs() < 1e-9);
        assert!(budget.try_reserve(0.01));
        assert_eq!(budget.remaining(), 0.0);
    }

    #[test]
    fn zero_budget_affords_nothing_paid() {
        let budget = BudgetTracker::new(0.0);
        assert!(!budget.try_reserve(0.02));
        assert!(budget.try_reserve(0.0));
        assert_eq!(budget.spent(), 0.0);
    }

    #[test]
    fn resume_keeps_prior_spend() {
        let budget = BudgetTracker::resume(1.0, 0.98);
        assert!(!budget.try_reserve(0.05));
        assert!(budget.try_reserve(0.02));
    }

    #[test]
    fn concurrent_reservations_never_overshoot() {
        let budget = Arc::new(BudgetTracker::new(1.0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let budget = budget.clone();
                std::thread::spawn(move || (0..100).filter(|_| budget.try_reserve(0.02)).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
        assert!(budget.spent() <= 1.0);
    }
}
