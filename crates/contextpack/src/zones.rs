//! Zone allocator.
//!
//! Distributes a token budget across the context zones: floors first,
//! then the remainder in fixed zone-priority order, capped by each
//! zone's ceiling and demand. A demand of zero stays zero.

use std::collections::HashMap;

use bv_domain::config::{Zone, ZoneBudgets};

/// Result of one allocation pass.
#[derive(Debug, Clone)]
pub struct ZoneAllocation {
    pub accepted: bool,
    pub reason: Option<&'static str>,
    pub per_zone: HashMap<Zone, usize>,
    pub total: usize,
}

impl ZoneAllocation {
    pub fn get(&self, zone: Zone) -> usize {
        self.per_zone.get(&zone).copied().unwrap_or(0)
    }

    fn rejected(reason: &'static str) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
            per_zone: HashMap::new(),
            total: 0,
        }
    }
}

/// Distribute `total_budget` across zones given per-zone demands.
///
/// The effective floor of a zone is `min(min, demand)` — a zone never
/// receives more than it asked for. If the effective floors alone
/// exceed the budget, the whole allocation is rejected (`floor_unmet`)
/// rather than silently starving a floor.
pub fn allocate(
    total_budget: usize,
    demands: &HashMap<Zone, usize>,
    budgets: &ZoneBudgets,
) -> ZoneAllocation {
    let mut per_zone: HashMap<Zone, usize> = HashMap::new();
    let mut floor_total = 0usize;

    for (zone, budget) in budgets.iter() {
        let demand = demands.get(&zone).copied().unwrap_or(0);
        if demand == 0 {
            continue;
        }
        let floor = budget.min.min(demand);
        floor_total += floor;
        per_zone.insert(zone, floor);
    }

    if floor_total > total_budget {
        return ZoneAllocation::rejected("floor_unmet");
    }

    // Spend the remainder top-down.
    let mut remaining = total_budget - floor_total;
    for (zone, budget) in budgets.iter() {
        if remaining == 0 {
            break;
        }
        let demand = demands.get(&zone).copied().unwrap_or(0);
        if demand == 0 {
            continue;
        }
        let current = per_zone.get(&zone).copied().unwrap_or(0);
        let ceiling = budget.max.min(demand);
        let extra = ceiling.saturating_sub(current).min(remaining);
        if extra > 0 {
            per_zone.insert(zone, current + extra);
            remaining -= extra;
        }
    }

    let total = per_zone.values().sum();
    ZoneAllocation {
        accepted: true,
        reason: None,
        per_zone,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_domain::config::ZoneBudget;

    fn budgets() -> ZoneBudgets {
        ZoneBudgets {
            identity: ZoneBudget { min: 400, max: 800 },
            truth: ZoneBudget { min: 400, max: 800 },
            task_state: ZoneBudget { min: 400, max: 800 },
            tool_failures: ZoneBudget { min: 0, max: 400 },
            memory_working: ZoneBudget { min: 0, max: 400 },
            memory_recall: ZoneBudget { min: 0, max: 600 },
            rag_external: ZoneBudget { min: 0, max: 400 },
        }
    }

    fn demands(pairs: &[(Zone, usize)]) -> HashMap<Zone, usize> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn rejects_when_floors_exceed_budget() {
        let demands = demands(&[
            (Zone::Identity, 400),
            (Zone::Truth, 400),
            (Zone::TaskState, 400),
        ]);
        let allocation = allocate(500, &demands, &budgets());
        assert!(!allocation.accepted);
        assert_eq!(allocation.reason, Some("floor_unmet"));
    }

    #[test]
    fn floors_then_priority_order() {
        let demands = demands(&[
            (Zone::Identity, 600),
            (Zone::MemoryRecall, 600),
            (Zone::Truth, 500),
        ]);
        // Floors: identity 400, truth 400, recall 0. Remainder 300
        // goes to identity first (200 to its demand), then truth (100).
        let allocation = allocate(1100, &demands, &budgets());
        assert!(allocation.accepted);
        assert_eq!(allocation.get(Zone::Identity), 600);
        assert_eq!(allocation.get(Zone::Truth), 500);
        assert_eq!(allocation.get(Zone::MemoryRecall), 0);
        assert_eq!(allocation.total, 1100);
    }

    #[test]
    fn zero_demand_stays_zero() {
        let demands = demands(&[(Zone::Truth, 100)]);
        let allocation = allocate(10_000, &demands, &budgets());
        assert_eq!(allocation.get(Zone::Identity), 0);
        assert_eq!(allocation.get(Zone::Truth), 100);
    }

    #[test]
    fn respects_ceilings_and_demand() {
        let demands = demands(&[(Zone::MemoryRecall, 5_000)]);
        let allocation = allocate(10_000, &demands, &budgets());
        // Capped at the zone max.
        assert_eq!(allocation.get(Zone::MemoryRecall), 600);
    }

    #[test]
    fn every_demanded_zone_meets_its_floor_when_feasible() {
        let demands = demands(&[
            (Zone::Identity, 450),
            (Zone::Truth, 450),
            (Zone::TaskState, 450),
            (Zone::MemoryRecall, 450),
        ]);
        let allocation = allocate(1300, &demands, &budgets());
        assert!(allocation.accepted);
        for zone in [Zone::Identity, Zone::Truth, Zone::TaskState] {
            assert!(allocation.get(zone) >= 400, "{zone} under floor");
        }
        assert!(allocation.total <= 1300);
    }
}
