use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::Mutex as Gate;

use crate::queue::MutationTarget;

use super::MutationState;

/// Ownership of a target handed to one attempt chain.
#[derive(Debug)]
pub(crate) struct Claim {
    pub generation: u64,
    /// Value to restore if the chain fails: the value from before the first
    /// of any overlapping intents.
    pub baseline: Option<Value>,
    /// Held for the duration of every remote call made for the target.
    pub gate: Arc<Gate<()>>,
}

struct Active {
    baseline: Option<Value>,
    desired: Option<Value>,
}

struct Slot {
    generation: u64,
    state: MutationState,
    active: Option<Active>,
    gate: Arc<Gate<()>>,
}

impl Slot {
    /// Nothing owns the target and no chain holds or awaits its gate.
    fn is_idle(&self) -> bool {
        self.active.is_none() && Arc::strong_count(&self.gate) == 1
    }
}

#[derive(Default)]
struct Slots {
    next_generation: u64,
    by_target: HashMap<MutationTarget, Slot>,
}

/// Per-target ownership deciding which attempt chain may write a target.
///
/// Every new intent takes a fresh generation; a chain holding an older
/// generation is superseded and must stop without touching the store.
/// Generations come from one counter, so they keep growing after an idle
/// slot is dropped.
#[derive(Default)]
pub(crate) struct InFlight {
    slots: Mutex<Slots>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `target` for a new intent. If another chain is
    /// active its baseline carries over; otherwise `fallback` becomes the
    /// baseline.
    pub fn claim(&self, target: &MutationTarget, desired: Option<Value>, fallback: Option<Value>) -> Claim {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.next_generation += 1;
        let generation = slots.next_generation;
        let slot = slots.by_target.entry(target.clone()).or_insert_with(|| Slot {
            generation,
            state: MutationState::Idle,
            active: None,
            gate: Arc::new(Gate::new(())),
        });
        slot.generation = generation;
        let baseline = match slot.active.take() {
            Some(active) => active.baseline,
            None => fallback,
        };
        slot.active = Some(Active {
            baseline: baseline.clone(),
            desired,
        });
        slot.state = MutationState::Applied;
        Claim {
            generation,
            baseline,
            gate: Arc::clone(&slot.gate),
        }
    }

    pub fn is_latest(&self, target: &MutationTarget, generation: u64) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .by_target
            .get(target)
            .map_or(false, |slot| slot.generation == generation)
    }

    /// Current baseline of the chain holding `generation`, if it still owns
    /// the target. Import may have moved it since the claim.
    pub fn baseline(&self, target: &MutationTarget, generation: u64) -> Option<Option<Value>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots
            .by_target
            .get(target)
            .filter(|slot| slot.generation == generation)?;
        slot.active.as_ref().map(|active| active.baseline.clone())
    }

    pub fn set_state(&self, target: &MutationTarget, generation: u64, state: MutationState) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.by_target.get_mut(target) {
            if slot.generation == generation {
                slot.state = state;
            }
        }
    }

    /// State of the mutation currently owning `target`; `Idle` once it has
    /// settled and nothing else is pending.
    pub fn state(&self, target: &MutationTarget) -> MutationState {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .by_target
            .get(target)
            .map_or(MutationState::Idle, |slot| slot.state)
    }

    /// Give up ownership, then drop the slot if it went idle. Releasing a
    /// stale generation leaves the newer owner in place.
    pub fn release(&self, target: &MutationTarget, generation: u64) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slots.by_target.get_mut(target) else {
            return;
        };
        if slot.generation == generation {
            slot.active = None;
        }
        if slot.is_idle() {
            slots.by_target.remove(target);
        }
    }

    /// Targets with an active chain and the value each is writing.
    pub fn active(&self) -> Vec<(MutationTarget, Option<Value>)> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut active: Vec<_> = slots
            .by_target
            .iter()
            .filter_map(|(target, slot)| {
                slot.active
                    .as_ref()
                    .map(|active| (target.clone(), active.desired.clone()))
            })
            .collect();
        active.sort_by(|a, b| a.0.cmp(&b.0));
        active
    }

    /// Move the baseline of an active chain, e.g. onto freshly imported data.
    pub fn rebase(&self, target: &MutationTarget, baseline: Option<Value>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = slots
            .by_target
            .get_mut(target)
            .and_then(|slot| slot.active.as_mut())
        {
            active.baseline = baseline;
        }
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_target
            .len()
    }
}
