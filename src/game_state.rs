/// Game phase state machine — derives a single `phase` from the event stream.
///
/// All state lives in one `GameState` owned by the dispatcher consumer task;
/// no locking is needed because the machine is only touched from there. The
/// dispatcher applies `update()` before any module sees the event, so module
/// handlers always observe the post-transition phase.
///
/// Transition table (exhaustive):
///   LOBBY            → SPAWNING on GAME_SPAWNING
///   LOBBY/SPAWNING   → IN_GAME  on GAME_START
///   IN_GAME          → WON / LOST / ENDED on GAME_END (by `victory` field)
///   WON/LOST/ENDED   → LOBBY    on reset() (WS connect or disconnect)
use crate::events::{EventKind, GameEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    Lobby,
    Spawning,
    InGame,
    Won,
    Lost,
    Ended,
}

type PhaseObserver = Box<dyn Fn(GamePhase) + Send>;

pub struct GameState {
    phase: GamePhase,
    /// Single observer callback; must be pure (no blocking I/O).
    observer: Option<PhaseObserver>,
}

impl GameState {
    pub fn new() -> Self {
        Self { phase: GamePhase::Lobby, observer: None }
    }

    pub fn get_phase(&self) -> GamePhase {
        self.phase
    }

    pub fn set_observer(&mut self, observer: PhaseObserver) {
        self.observer = Some(observer);
    }

    /// Apply one event to the machine. Connection lifecycle events reset to
    /// LOBBY; everything else follows the transition table. Events with no
    /// matching transition leave the phase untouched.
    pub fn update(&mut self, event: &GameEvent) {
        match event.kind {
            EventKind::GameSpawning if self.phase == GamePhase::Lobby => {
                self.transition(GamePhase::Spawning);
            }
            EventKind::GameStart
                if matches!(self.phase, GamePhase::Lobby | GamePhase::Spawning) =>
            {
                self.transition(GamePhase::InGame);
            }
            EventKind::GameEnd if self.phase == GamePhase::InGame => {
                let next = match event.victory() {
                    Some(true) => GamePhase::Won,
                    Some(false) => GamePhase::Lost,
                    None => GamePhase::Ended,
                };
                self.transition(next);
            }
            EventKind::WsConnected | EventKind::WsDisconnected => self.reset(),
            _ => {}
        }
    }

    /// Return to LOBBY unconditionally and notify the observer.
    pub fn reset(&mut self) {
        if self.phase != GamePhase::Lobby {
            tracing::info!("Game state reset: {:?} → Lobby", self.phase);
        }
        self.transition(GamePhase::Lobby);
    }

    fn transition(&mut self, next: GamePhase) {
        if self.phase == next {
            return;
        }
        tracing::info!("Game phase {:?} → {:?}", self.phase, next);
        self.phase = next;
        if let Some(cb) = &self.observer {
            cb(next);
        }
    }
}
