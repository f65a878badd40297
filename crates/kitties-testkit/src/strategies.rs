//! Property test strategies for kitties data.
//!
//! The central strategy is [`arb_schedule`]: a record count plus every owner
//! and DNA answer for `0..count`, shuffled into an arbitrary arrival order.
//! [`arb_growth_schedule`] spreads the same answers over a count that grows
//! in steps.

use kitties_core::{KittyCount, KittyDna, KittyIndex, OwnerId, PartialKitties};
use proptest::prelude::*;

// Re-export proptest for convenience
pub use proptest;

use crate::mock_ledger::MockLedger;

/// One answer delivered by a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Owner answer for an index
    Owner(KittyIndex, Option<OwnerId>),
    /// DNA answer for an index
    Dna(KittyIndex, Option<KittyDna>),
}

impl Resolution {
    /// Index the answer belongs to.
    pub fn index(&self) -> KittyIndex {
        match self {
            Self::Owner(index, _) | Self::Dna(index, _) => *index,
        }
    }

    /// Apply the answer directly to an accumulating map.
    pub fn apply_to_records(&self, records: &mut PartialKitties) -> bool {
        match self {
            Self::Owner(index, owner) => records.resolve_owner(*index, owner.clone()),
            Self::Dna(index, dna) => records.resolve_dna(*index, dna.clone()),
        }
    }

    /// Deliver the answer through a mock ledger.
    pub fn apply_to_ledger(&self, ledger: &MockLedger) {
        match self {
            Self::Owner(index, owner) => ledger.set_owner(*index, owner.clone()),
            Self::Dna(index, dna) => ledger.set_dna(*index, dna.clone()),
        }
    }
}

/// A count and a shuffled list of answers covering every index below it.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Record count
    pub count: KittyCount,
    /// Answers in arrival order
    pub resolutions: Vec<Resolution>,
}

/// Owners drawn from a small pool so ownership collisions happen.
pub fn arb_owner() -> impl Strategy<Value = OwnerId> {
    prop::sample::select(vec!["alice", "bob", "charlie", "dave"]).prop_map(OwnerId::from)
}

/// 16-byte DNA.
pub fn arb_dna() -> impl Strategy<Value = KittyDna> {
    any::<[u8; 16]>().prop_map(KittyDna::from)
}

/// Answer that is present most of the time and absent otherwise.
fn mostly_present<T: std::fmt::Debug>(
    value: impl Strategy<Value = T>,
) -> impl Strategy<Value = Option<T>> {
    prop::option::weighted(0.85, value)
}

/// Count in `0..=max_count` with every answer, arrival order shuffled.
pub fn arb_schedule(max_count: KittyCount) -> impl Strategy<Value = Schedule> {
    (0..=max_count)
        .prop_flat_map(|count| {
            let answers = (
                mostly_present(arb_owner()),
                mostly_present(arb_dna()),
            );
            (Just(count), prop::collection::vec(answers, count as usize))
        })
        .prop_flat_map(|(count, answers)| {
            let resolutions: Vec<Resolution> = answers
                .into_iter()
                .enumerate()
                .flat_map(|(i, (owner, dna))| {
                    let index = KittyIndex(i as u32);
                    [Resolution::Owner(index, owner), Resolution::Dna(index, dna)]
                })
                .collect();
            (Just(count), Just(resolutions).prop_shuffle())
        })
        .prop_map(|(count, resolutions)| Schedule { count, resolutions })
}

/// Answers delivered after the count was raised to `count`.
#[derive(Debug, Clone)]
pub struct GrowthStep {
    /// Count published before these answers
    pub count: KittyCount,
    /// Answers in arrival order, all for indices below `count`
    pub resolutions: Vec<Resolution>,
}

/// A schedule split into strictly increasing count steps.
#[derive(Debug, Clone)]
pub struct GrowthSchedule {
    /// Steps in order; the last count is the final count
    pub steps: Vec<GrowthStep>,
}

impl GrowthSchedule {
    /// Final count.
    pub fn count(&self) -> KittyCount {
        self.steps.last().map_or(0, |step| step.count)
    }

    /// Every answer in arrival order.
    pub fn resolutions(&self) -> impl Iterator<Item = &Resolution> {
        self.steps.iter().flat_map(|step| step.resolutions.iter())
    }
}

/// A [`Schedule`] whose count grows through up to four intermediate steps.
///
/// Each answer lands in the first step that covers its index or, at random,
/// a later one, so old indices keep resolving while new ones appear.
pub fn arb_growth_schedule(max_count: KittyCount) -> impl Strategy<Value = GrowthSchedule> {
    arb_schedule(max_count)
        .prop_flat_map(|schedule| {
            let cuts = prop::collection::btree_set(1..=schedule.count.max(1), 0..4);
            let delays = prop::collection::vec(0..3usize, schedule.resolutions.len());
            (Just(schedule), cuts, delays)
        })
        .prop_map(|(schedule, cuts, delays)| {
            let mut steps: Vec<GrowthStep> = cuts
                .into_iter()
                .filter(|count| *count < schedule.count)
                .chain([schedule.count])
                .map(|count| GrowthStep {
                    count,
                    resolutions: Vec::new(),
                })
                .collect();
            let last = steps.len() - 1;
            for (resolution, delay) in schedule.resolutions.into_iter().zip(delays) {
                let first = steps
                    .iter()
                    .position(|step| resolution.index().value() < step.count)
                    .unwrap_or(last);
                steps[(first + delay).min(last)].resolutions.push(resolution);
            }
            GrowthSchedule { steps }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn schedule_covers_every_field_once(schedule in arb_schedule(6)) {
            prop_assert_eq!(schedule.resolutions.len(), schedule.count as usize * 2);
            for index in KittyIndex::range(0, schedule.count) {
                let hits = schedule.resolutions.iter().filter(|r| r.index() == index).count();
                prop_assert_eq!(hits, 2);
            }
        }

        #[test]
        fn growth_steps_increase_and_cover_their_answers(schedule in arb_growth_schedule(6)) {
            for pair in schedule.steps.windows(2) {
                prop_assert!(pair[0].count < pair[1].count);
            }
            for step in &schedule.steps {
                for resolution in &step.resolutions {
                    prop_assert!(resolution.index().value() < step.count);
                }
            }
            prop_assert_eq!(schedule.resolutions().count(), schedule.count() as usize * 2);
        }
    }
}
