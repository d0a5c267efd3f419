//! # Cross-kind batch synchronization.
//!
//! Touch and delete batches share the downstream source, and how much they
//! may interleave is a policy decision:
//!
//! - [`SyncMode::Unrestricted`] both kinds run concurrently without bound.
//! - [`SyncMode::Safe`] one batch at a time, either kind.
//! - [`SyncMode::Alternating`] each kind may run in parallel with itself,
//!   never with the other kind; the gate flips between the two groups.
//!
//! ## Alternating rules (evaluated under one mutex)
//! - *Free entry*: no active group, or the active group is mine **and** the
//!   other group has no waiters.
//! - *Granted entry*: the active group is mine and my `granted` counter is
//!   positive. Grants are issued at flip time, sized to the cohort that was
//!   already waiting, and one is consumed by every same-side admit (free
//!   entry included) so none survives the cohort; later arrivals wait for
//!   the next flip.
//! - Otherwise the caller parks on its side's latch (counted once).
//! - On leave: when the last active of a group leaves and the other group
//!   has waiters, the gate flips and grants exactly that cohort; with no
//!   waiters the gate clears. The other side's latch is signaled either way.
//!
//! ## Invariants
//! - Touch and delete are never active simultaneously.
//! - A group with waiters is admitted as a whole cohort before the other
//!   group may re-enter.
//! - A late arrival cannot overtake earlier waiters of the other group.

use std::str::FromStr;
use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex;

use crate::sync::signal::ManualResetSignal;

/// Which of the two batch kinds is asking for admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// Claim-renewal batches.
    Touch,
    /// Claim-release batches.
    Delete,
}

impl Side {
    fn other(self) -> Side {
        match self {
            Side::Touch => Side::Delete,
            Side::Delete => Side::Touch,
        }
    }
}

/// Requested interleaving between touch and delete batches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// One batch at a time, either kind.
    #[default]
    Safe,
    /// No coordination at all.
    Unrestricted,
    /// Same-kind batches in parallel, kinds strictly alternating.
    Alternating,
}

impl FromStr for SyncMode {
    type Err = std::convert::Infallible;

    /// Parses a mode name; unrecognized names fall back to [`SyncMode::Safe`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "unrestricted" => SyncMode::Unrestricted,
            "alternating" => SyncMode::Alternating,
            _ => SyncMode::Safe,
        })
    }
}

/// Admission bookkeeping for one group.
#[derive(Debug, Default)]
struct GroupState {
    waiting: usize,
    active: usize,
    granted: usize,
}

#[derive(Debug, Default)]
struct AlternatingState {
    touch: GroupState,
    delete: GroupState,
    current: Option<Side>,
}

impl AlternatingState {
    fn group(&mut self, side: Side) -> &mut GroupState {
        match side {
            Side::Touch => &mut self.touch,
            Side::Delete => &mut self.delete,
        }
    }
}

/// Two-group gate for the alternating mode.
#[derive(Debug, Default)]
struct AlternatingGate {
    state: StdMutex<AlternatingState>,
    touch_latch: ManualResetSignal,
    delete_latch: ManualResetSignal,
}

impl AlternatingGate {
    fn latch(&self, side: Side) -> &ManualResetSignal {
        match side {
            Side::Touch => &self.touch_latch,
            Side::Delete => &self.delete_latch,
        }
    }

    async fn enter(&self, side: Side) {
        let mut registered = false;
        loop {
            {
                let mut s = self.state.lock().expect("gate mutex poisoned");
                let other_waiting = s.group(side.other()).waiting;
                let admitted = match s.current {
                    None => true,
                    Some(cur) if cur == side => {
                        // A pending grant is consumed on every same-side
                        // admit, free entry included: a grant left behind by
                        // a cohort that entered freely would otherwise let a
                        // late arrival cut ahead of the other side's waiters.
                        if s.group(side).granted > 0 {
                            s.group(side).granted -= 1;
                            true
                        } else {
                            other_waiting == 0
                        }
                    }
                    Some(_) => false,
                };
                if admitted {
                    s.current = Some(side);
                    s.group(side).active += 1;
                    if registered {
                        s.group(side).waiting -= 1;
                    }
                    return;
                }
                if !registered {
                    s.group(side).waiting += 1;
                    registered = true;
                }
                // Re-arm the latch under the state lock: a concurrent leave
                // either already updated the state we just inspected, or its
                // set() lands after this reset and the wait returns at once.
                self.latch(side).reset();
            }
            self.latch(side).wait().await;
        }
    }

    fn leave(&self, side: Side) {
        let mut s = self.state.lock().expect("gate mutex poisoned");
        debug_assert!(s.group(side).active > 0);
        s.group(side).active -= 1;
        if s.group(side).active > 0 {
            return;
        }

        let other = side.other();
        let cohort = s.group(other).waiting;
        if cohort > 0 {
            s.current = Some(other);
            s.group(other).granted = cohort;
        } else {
            // Stale grants must not survive an idle gate.
            s.current = None;
            s.touch.granted = 0;
            s.delete.granted = 0;
        }
        self.latch(other).set();
    }
}

/// Gate between touch and delete batches, selected at construction.
#[derive(Debug)]
pub struct SyncPolicy(Gate);

#[derive(Debug)]
enum Gate {
    Unrestricted,
    Safe(Mutex<()>),
    Alternating(AlternatingGate),
}

impl SyncPolicy {
    /// Builds the policy for the requested mode.
    ///
    /// `concurrency <= 1` forces [`SyncMode::Safe`]: with a single batch in
    /// flight there is nothing to interleave.
    pub fn select(mode: SyncMode, concurrency: usize) -> Self {
        let mode = if concurrency <= 1 { SyncMode::Safe } else { mode };
        SyncPolicy(match mode {
            SyncMode::Unrestricted => Gate::Unrestricted,
            SyncMode::Safe => Gate::Safe(Mutex::new(())),
            SyncMode::Alternating => Gate::Alternating(AlternatingGate::default()),
        })
    }

    /// Returns the effective mode after selection.
    pub fn mode(&self) -> SyncMode {
        match self.0 {
            Gate::Unrestricted => SyncMode::Unrestricted,
            Gate::Safe(_) => SyncMode::Safe,
            Gate::Alternating(_) => SyncMode::Alternating,
        }
    }

    /// Waits for admission of `side` and returns the guard that holds it.
    ///
    /// The guard releases the slot on drop, on every exit path.
    pub async fn enter(&self, side: Side) -> SyncGuard<'_> {
        match &self.0 {
            Gate::Unrestricted => SyncGuard(GuardInner::Open),
            Gate::Safe(mutex) => SyncGuard(GuardInner::Slot(mutex.lock().await)),
            Gate::Alternating(gate) => {
                gate.enter(side).await;
                SyncGuard(GuardInner::Group { gate, side })
            }
        }
    }
}

/// Admission held by a batch for the duration of its user callback.
#[must_use = "dropping the guard releases the admission"]
pub struct SyncGuard<'a>(GuardInner<'a>);

enum GuardInner<'a> {
    Open,
    Slot(tokio::sync::MutexGuard<'a, ()>),
    Group {
        gate: &'a AlternatingGate,
        side: Side,
    },
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        if let GuardInner::Group { gate, side } = &self.0 {
            gate.leave(*side);
        }
    }
}
