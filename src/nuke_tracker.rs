/// Count-based registry of in-flight nukes, keyed by the game's unit id.
///
/// LED state is a pure function of `get_active_count(kind, direction)` —
/// there is no timer-driven decay. The one bounded exception: LAND and
/// NAVAL alerts have no resolution event on the game side, so their entries
/// carry a 15 s expiry swept by the dispatcher's housekeeping tick.
/// ATOM / HYDRO / MIRV rely strictly on explicit resolution.
///
/// Owned by the dispatcher consumer task; mutated only from `apply()` there,
/// so no locking is required. Modules see it read-only through the context.
use crate::events::{EventKind, InternalEvent};
use std::collections::HashMap;

/// Maximum IN_FLIGHT entries before the oldest same-bucket entry is evicted.
pub const MAX_IN_FLIGHT: usize = 32;

/// LAND/NAVAL auto-expiry. Confirm against the game side before changing.
pub const LAND_NAVAL_EXPIRY_MS: u64 = 15_000;

/// Resolved entries are retained briefly so late consumers (sound loop
/// cancellation) can still look up kind/direction, then swept.
const RESOLVED_RETENTION_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NukeKind {
    Atom,
    Hydro,
    Mirv,
    Land,
    Naval,
}

impl NukeKind {
    /// Wire spelling in NUKE_LAUNCHED payloads.
    pub fn from_wire(s: &str) -> Option<Self> {
        Some(match s {
            "Atom" => Self::Atom,
            "Hydro" => Self::Hydro,
            "MIRV" => Self::Mirv,
            _ => return None,
        })
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Atom => "Atom",
            Self::Hydro => "Hydro",
            Self::Mirv => "MIRV",
            Self::Land => "Land",
            Self::Naval => "Naval",
        }
    }

    /// Whether entries of this kind expire without an explicit resolution.
    fn auto_expires(&self) -> bool {
        matches!(self, Self::Land | Self::Naval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NukeState {
    InFlight,
    Exploded,
    Intercepted,
}

#[derive(Debug, Clone)]
struct Tracked {
    kind: NukeKind,
    direction: Direction,
    state: NukeState,
    /// Launch order, for oldest-first eviction.
    seq: u64,
    /// Monotonic deadline for LAND/NAVAL entries; None for explicit kinds.
    expires_at_ms: Option<u64>,
    /// When the entry left IN_FLIGHT (for retention sweeping).
    resolved_at_ms: Option<u64>,
}

pub struct NukeTracker {
    entries: HashMap<u32, Tracked>,
    next_seq: u64,
}

impl NukeTracker {
    pub fn new() -> Self {
        Self { entries: HashMap::new(), next_seq: 0 }
    }

    pub fn register_launch(
        &mut self,
        unit_id: u32,
        kind: NukeKind,
        direction: Direction,
        now_ms: u64,
    ) {
        if self.entries.contains_key(&unit_id) {
            tracing::warn!("Duplicate launch for unit {} — ignoring", unit_id);
            return;
        }

        if self.in_flight_total() >= MAX_IN_FLIGHT {
            self.evict_oldest(kind, direction, now_ms);
        }

        let expires_at_ms = kind.auto_expires().then(|| now_ms + LAND_NAVAL_EXPIRY_MS);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            unit_id,
            Tracked {
                kind,
                direction,
                state: NukeState::InFlight,
                seq,
                expires_at_ms,
                resolved_at_ms: None,
            },
        );
        tracing::debug!(
            "Nuke {} registered: {:?} {:?} ({} in flight)",
            unit_id,
            kind,
            direction,
            self.in_flight_total()
        );
    }

    /// Mark a unit EXPLODED or INTERCEPTED. Returns the affected bucket so
    /// callers can react to the count change; `None` (with a WARN) when the
    /// unit was never registered.
    pub fn resolve(
        &mut self,
        unit_id: u32,
        exploded: bool,
        now_ms: u64,
    ) -> Option<(NukeKind, Direction)> {
        let Some(entry) = self.entries.get_mut(&unit_id) else {
            tracing::warn!("Resolution for unknown unit {} — ignoring", unit_id);
            return None;
        };
        if entry.state == NukeState::InFlight {
            entry.state = if exploded { NukeState::Exploded } else { NukeState::Intercepted };
            entry.resolved_at_ms = Some(now_ms);
        }
        Some((entry.kind, entry.direction))
    }

    /// Kind/direction/state of a tracked unit, resolved or not.
    pub fn lookup(&self, unit_id: u32) -> Option<(NukeKind, Direction, NukeState)> {
        self.entries
            .get(&unit_id)
            .map(|e| (e.kind, e.direction, e.state))
    }

    pub fn get_active_count(&self, kind: NukeKind, direction: Direction) -> u8 {
        self.entries
            .values()
            .filter(|e| e.kind == kind && e.direction == direction && e.state == NukeState::InFlight)
            .count() as u8
    }

    /// Any incoming nuke of any kind still in flight (drives the WARNING LED).
    pub fn any_incoming(&self) -> bool {
        self.entries
            .values()
            .any(|e| e.direction == Direction::Incoming && e.state == NukeState::InFlight)
    }

    pub fn clear_all(&mut self) {
        if !self.entries.is_empty() {
            tracing::info!("Nuke tracker cleared ({} entries)", self.entries.len());
        }
        self.entries.clear();
    }

    /// Housekeeping sweep: expire overdue LAND/NAVAL entries and drop
    /// resolved entries past their retention window.
    pub fn expire_stale(&mut self, now_ms: u64) {
        for (unit_id, entry) in self.entries.iter_mut() {
            if entry.state == NukeState::InFlight {
                if let Some(deadline) = entry.expires_at_ms {
                    if now_ms >= deadline {
                        tracing::debug!("{:?} alert unit {} expired", entry.kind, unit_id);
                        entry.state = NukeState::Exploded;
                        entry.resolved_at_ms = Some(now_ms);
                    }
                }
            }
        }
        self.entries.retain(|_, e| match e.resolved_at_ms {
            Some(t) => now_ms.saturating_sub(t) < RESOLVED_RETENTION_MS,
            None => true,
        });
    }

    /// Central application of game events. Runs before module routing so
    /// modules always derive LED state from up-to-date counts.
    pub fn apply(&mut self, ev: &InternalEvent, now_ms: u64) {
        match ev.kind() {
            EventKind::NukeLaunched => {
                let Some(unit_id) = ev.event.unit_id() else {
                    tracing::warn!("NUKE_LAUNCHED without unit id — ignoring");
                    return;
                };
                let kind = ev
                    .event
                    .nuke_type()
                    .as_deref()
                    .and_then(NukeKind::from_wire)
                    .unwrap_or(NukeKind::Atom);
                self.register_launch(unit_id, kind, Direction::Outgoing, now_ms);
            }
            EventKind::AlertAtom
            | EventKind::AlertHydro
            | EventKind::AlertMirv
            | EventKind::AlertLand
            | EventKind::AlertNaval => {
                let Some(unit_id) = ev.event.unit_id() else {
                    tracing::warn!("{:?} without unit id — ignoring", ev.kind());
                    return;
                };
                let kind = match ev.kind() {
                    EventKind::AlertAtom => NukeKind::Atom,
                    EventKind::AlertHydro => NukeKind::Hydro,
                    EventKind::AlertMirv => NukeKind::Mirv,
                    EventKind::AlertLand => NukeKind::Land,
                    _ => NukeKind::Naval,
                };
                self.register_launch(unit_id, kind, Direction::Incoming, now_ms);
            }
            EventKind::NukeExploded | EventKind::NukeIntercepted => {
                if let Some(unit_id) = ev.event.unit_id() {
                    let exploded = ev.kind() == EventKind::NukeExploded;
                    self.resolve(unit_id, exploded, now_ms);
                }
            }
            EventKind::GameEnd => self.clear_all(),
            _ => {}
        }
    }

    fn in_flight_total(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state == NukeState::InFlight)
            .count()
    }

    /// Forcibly resolve the oldest IN_FLIGHT entry, preferring the same
    /// (kind, direction) bucket, to bound memory at `MAX_IN_FLIGHT`.
    fn evict_oldest(&mut self, kind: NukeKind, direction: Direction, now_ms: u64) {
        let victim = self
            .entries
            .iter()
            .filter(|(_, e)| {
                e.state == NukeState::InFlight && e.kind == kind && e.direction == direction
            })
            .min_by_key(|(_, e)| e.seq)
            .or_else(|| {
                self.entries
                    .iter()
                    .filter(|(_, e)| e.state == NukeState::InFlight)
                    .min_by_key(|(_, e)| e.seq)
            })
            .map(|(id, _)| *id);

        if let Some(unit_id) = victim {
            tracing::warn!(
                "Tracker at capacity ({}) — force-resolving oldest unit {} as exploded",
                MAX_IN_FLIGHT,
                unit_id
            );
            self.resolve(unit_id, true, now_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSource, GameEvent};

    fn launched(unit_id: u32, kind: &str) -> InternalEvent {
        InternalEvent::new(
            GameEvent::new(
                EventKind::NukeLaunched,
                0,
                String::new(),
                format!(r#"{{"nukeUnitID":{},"type":"{}"}}"#, unit_id, kind),
            ),
            EventSource::WebSocket,
        )
    }

    fn resolved(unit_id: u32, kind: EventKind) -> InternalEvent {
        InternalEvent::new(
            GameEvent::new(kind, 0, String::new(), format!(r#"{{"unitID":{}}}"#, unit_id)),
            EventSource::WebSocket,
        )
    }

    #[test]
    fn counts_track_launch_and_resolution() {
        let mut t = NukeTracker::new();
        t.register_launch(1, NukeKind::Atom, Direction::Outgoing, 0);
        t.register_launch(2, NukeKind::Atom, Direction::Outgoing, 0);
        assert_eq!(t.get_active_count(NukeKind::Atom, Direction::Outgoing), 2);

        t.resolve(1, true, 100);
        assert_eq!(t.get_active_count(NukeKind::Atom, Direction::Outgoing), 1);

        t.resolve(2, false, 200);
        assert_eq!(t.get_active_count(NukeKind::Atom, Direction::Outgoing), 0);
    }

    #[test]
    fn overlapping_launches_keep_count_exact() {
        // Resolving unit A never steals unit B's in-flight count.
        let mut t = NukeTracker::new();
        t.apply(&launched(10, "Atom"), 0);
        t.apply(&launched(11, "Atom"), 500);
        assert_eq!(t.get_active_count(NukeKind::Atom, Direction::Outgoing), 2);

        t.apply(&resolved(10, EventKind::NukeExploded), 1_000);
        assert_eq!(t.get_active_count(NukeKind::Atom, Direction::Outgoing), 1);

        t.apply(&resolved(11, EventKind::NukeIntercepted), 1_500);
        assert_eq!(t.get_active_count(NukeKind::Atom, Direction::Outgoing), 0);
    }

    #[test]
    fn duplicate_launch_is_a_noop() {
        let mut t = NukeTracker::new();
        t.register_launch(7, NukeKind::Hydro, Direction::Outgoing, 0);
        t.register_launch(7, NukeKind::Mirv, Direction::Incoming, 0);
        assert_eq!(t.get_active_count(NukeKind::Hydro, Direction::Outgoing), 1);
        assert_eq!(t.get_active_count(NukeKind::Mirv, Direction::Incoming), 0);
    }

    #[test]
    fn resolving_unknown_unit_returns_none() {
        let mut t = NukeTracker::new();
        assert_eq!(t.resolve(999, true, 0), None);
    }

    #[test]
    fn capacity_evicts_oldest_same_bucket() {
        let mut t = NukeTracker::new();
        for id in 0..MAX_IN_FLIGHT as u32 {
            t.register_launch(id, NukeKind::Atom, Direction::Outgoing, 0);
        }
        assert_eq!(
            t.get_active_count(NukeKind::Atom, Direction::Outgoing) as usize,
            MAX_IN_FLIGHT
        );

        // The 33rd launch force-resolves unit 0 (the oldest of the bucket).
        t.register_launch(1_000, NukeKind::Atom, Direction::Outgoing, 0);
        assert_eq!(
            t.get_active_count(NukeKind::Atom, Direction::Outgoing) as usize,
            MAX_IN_FLIGHT
        );
        assert_eq!(
            t.lookup(0).map(|(_, _, s)| s),
            Some(NukeState::Exploded)
        );
        assert_eq!(
            t.lookup(1_000).map(|(_, _, s)| s),
            Some(NukeState::InFlight)
        );
    }

    #[test]
    fn land_naval_expire_but_explicit_kinds_do_not() {
        let mut t = NukeTracker::new();
        t.register_launch(1, NukeKind::Land, Direction::Incoming, 0);
        t.register_launch(2, NukeKind::Atom, Direction::Incoming, 0);

        t.expire_stale(LAND_NAVAL_EXPIRY_MS - 1);
        assert_eq!(t.get_active_count(NukeKind::Land, Direction::Incoming), 1);

        t.expire_stale(LAND_NAVAL_EXPIRY_MS);
        assert_eq!(t.get_active_count(NukeKind::Land, Direction::Incoming), 0);
        // Atom alerts only clear on explicit resolution.
        assert_eq!(t.get_active_count(NukeKind::Atom, Direction::Incoming), 1);
    }

    #[test]
    fn game_end_clears_everything() {
        let mut t = NukeTracker::new();
        t.apply(&launched(1, "Hydro"), 0);
        t.apply(
            &InternalEvent::simple(EventKind::GameEnd, EventSource::WebSocket),
            100,
        );
        assert_eq!(t.get_active_count(NukeKind::Hydro, Direction::Outgoing), 0);
        assert!(!t.any_incoming());
    }

    #[test]
    fn resolved_entries_are_swept_after_retention() {
        let mut t = NukeTracker::new();
        t.register_launch(5, NukeKind::Atom, Direction::Incoming, 0);
        t.resolve(5, true, 1_000);
        assert!(t.lookup(5).is_some());

        t.expire_stale(1_000 + RESOLVED_RETENTION_MS);
        assert!(t.lookup(5).is_none());
    }

    #[test]
    fn apply_defaults_unknown_type_to_atom() {
        let mut t = NukeTracker::new();
        t.apply(&launched(3, "Tsar"), 0);
        assert_eq!(t.get_active_count(NukeKind::Atom, Direction::Outgoing), 1);
    }
}
