/// Typed event model — everything that flows through the dispatcher.
///
/// Game events arrive as JSON over the WebSocket and leave the boundary as
/// `GameEvent` values: an enumerated kind, a short human-readable message,
/// and an opaque JSON `data` substring for payload fields we don't model
/// structurally. The frequently inspected payload values (`unitID`,
/// `troops.current`, `victory`, ...) have typed accessors that parse `data`
/// on demand, so hot-path consumers never touch raw JSON strings.
///
/// `InternalEvent` wraps a game event with its origin (`EventSource`) and
/// adds the lifecycle kinds that never cross the wire (WS_CONNECTED,
/// BUTTON_PRESSED, ...).
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Opaque `data` payloads are capped; anything longer is truncated with a WARN.
pub const MAX_DATA_LEN: usize = 512;

// ---------------------------------------------------------------------------
// Monotonic clock
// ---------------------------------------------------------------------------

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds since process start. Monotonic; used for debounce windows,
/// blink phases, and animation timing. Wall-clock timestamps from the game
/// are kept separately on the event and used only for logs.
pub fn now_ms() -> u64 {
    PROCESS_START.elapsed().as_millis() as u64
}

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    // Wire kinds (sent by the game / userscript)
    Info,
    Error,
    GameSpawning,
    GameStart,
    GameEnd,
    SoundPlay,
    HardwareDiagnostic,
    NukeLaunched,
    NukeExploded,
    NukeIntercepted,
    AlertAtom,
    AlertHydro,
    AlertMirv,
    AlertLand,
    AlertNaval,
    TroopUpdate,
    HardwareTest,
    // Internal-only kinds (never parsed from the wire)
    NetworkConnected,
    NetworkDisconnected,
    WsConnected,
    WsDisconnected,
    WsError,
    ButtonPressed,
}

impl EventKind {
    /// Parse the wire spelling used in WS `event` envelopes.
    /// Internal-only kinds are deliberately absent — a remote client must
    /// not be able to forge lifecycle events.
    pub fn from_wire(s: &str) -> Option<Self> {
        Some(match s {
            "INFO" => Self::Info,
            "ERROR" => Self::Error,
            "GAME_SPAWNING" => Self::GameSpawning,
            "GAME_START" => Self::GameStart,
            "GAME_END" => Self::GameEnd,
            "SOUND_PLAY" => Self::SoundPlay,
            "HARDWARE_DIAGNOSTIC" => Self::HardwareDiagnostic,
            "NUKE_LAUNCHED" => Self::NukeLaunched,
            "NUKE_EXPLODED" => Self::NukeExploded,
            "NUKE_INTERCEPTED" => Self::NukeIntercepted,
            "ALERT_ATOM" => Self::AlertAtom,
            "ALERT_HYDRO" => Self::AlertHydro,
            "ALERT_MIRV" => Self::AlertMirv,
            "ALERT_LAND" => Self::AlertLand,
            "ALERT_NAVAL" => Self::AlertNaval,
            "TROOP_UPDATE" => Self::TroopUpdate,
            "HARDWARE_TEST" => Self::HardwareTest,
            _ => return None,
        })
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Error => "ERROR",
            Self::GameSpawning => "GAME_SPAWNING",
            Self::GameStart => "GAME_START",
            Self::GameEnd => "GAME_END",
            Self::SoundPlay => "SOUND_PLAY",
            Self::HardwareDiagnostic => "HARDWARE_DIAGNOSTIC",
            Self::NukeLaunched => "NUKE_LAUNCHED",
            Self::NukeExploded => "NUKE_EXPLODED",
            Self::NukeIntercepted => "NUKE_INTERCEPTED",
            Self::AlertAtom => "ALERT_ATOM",
            Self::AlertHydro => "ALERT_HYDRO",
            Self::AlertMirv => "ALERT_MIRV",
            Self::AlertLand => "ALERT_LAND",
            Self::AlertNaval => "ALERT_NAVAL",
            Self::TroopUpdate => "TROOP_UPDATE",
            Self::HardwareTest => "HARDWARE_TEST",
            Self::NetworkConnected => "NETWORK_CONNECTED",
            Self::NetworkDisconnected => "NETWORK_DISCONNECTED",
            Self::WsConnected => "WS_CONNECTED",
            Self::WsDisconnected => "WS_DISCONNECTED",
            Self::WsError => "WS_ERROR",
            Self::ButtonPressed => "BUTTON_PRESSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    Button,
    WebSocket,
    Timer,
    System,
    Unknown,
}

// ---------------------------------------------------------------------------
// Game event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEvent {
    pub kind: EventKind,
    /// Sender's timestamp (wall clock or game tick) — log/order hint only.
    pub timestamp_ms: u64,
    pub message: String,
    /// Opaque JSON object substring, ≤ `MAX_DATA_LEN` bytes. Empty = none.
    pub data: String,
}

impl GameEvent {
    pub fn new(kind: EventKind, timestamp_ms: u64, message: String, data: String) -> Self {
        let data = if data.len() > MAX_DATA_LEN {
            tracing::warn!(
                "{:?} data payload {}B exceeds cap — truncating to {}B",
                kind,
                data.len(),
                MAX_DATA_LEN
            );
            // Truncate on a char boundary so the (now invalid) JSON is at
            // least valid UTF-8 for logging.
            let mut end = MAX_DATA_LEN;
            while !data.is_char_boundary(end) {
                end -= 1;
            }
            data[..end].to_owned()
        } else {
            data
        };
        Self { kind, timestamp_ms, message, data }
    }

    pub fn simple(kind: EventKind) -> Self {
        Self { kind, timestamp_ms: now_ms(), message: String::new(), data: String::new() }
    }

    fn data_value(&self) -> Option<serde_json::Value> {
        if self.data.is_empty() {
            return None;
        }
        serde_json::from_str(&self.data).ok()
    }

    /// Unit id of the projectile this event refers to.
    /// NUKE_LAUNCHED carries `nukeUnitID`; resolution and alert events carry
    /// `unitID`. Both spellings are accepted everywhere.
    pub fn unit_id(&self) -> Option<u32> {
        let v = self.data_value()?;
        v.get("unitID")
            .or_else(|| v.get("nukeUnitID"))
            .and_then(|n| n.as_u64())
            .map(|n| n as u32)
    }

    /// `(current, max)` troop counts from a TROOP_UPDATE payload.
    pub fn troops(&self) -> Option<(u64, u64)> {
        let v = self.data_value()?;
        let t = v.get("troops")?;
        Some((t.get("current")?.as_u64()?, t.get("max")?.as_u64()?))
    }

    /// GAME_END verdict. `None` when the field is missing or null — the
    /// phase machine maps that to ENDED rather than WON/LOST.
    pub fn victory(&self) -> Option<bool> {
        self.data_value()?.get("victory")?.as_bool()
    }

    pub fn sound_index(&self) -> Option<u16> {
        self.data_value()?
            .get("sound_index")?
            .as_u64()
            .map(|n| n as u16)
    }

    /// Nuke type string from a NUKE_LAUNCHED payload ("Atom" | "Hydro" | "MIRV").
    pub fn nuke_type(&self) -> Option<String> {
        self.data_value()?
            .get("type")?
            .as_str()
            .map(|s| s.to_owned())
    }

    pub fn button_index(&self) -> Option<u8> {
        self.data_value()?
            .get("buttonIndex")?
            .as_u64()
            .map(|n| n as u8)
    }
}

// ---------------------------------------------------------------------------
// Internal event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct InternalEvent {
    pub event: GameEvent,
    pub source: EventSource,
}

impl InternalEvent {
    pub fn new(event: GameEvent, source: EventSource) -> Self {
        Self { event, source }
    }

    pub fn simple(kind: EventKind, source: EventSource) -> Self {
        Self { event: GameEvent::simple(kind), source }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind
    }
}
