/// JSON framing for the WebSocket link — the only place wire strings
/// become typed values.
///
/// Envelopes:
///   {"type":"handshake","clientType":"userscript"|"ui"|"firmware"}
///   {"type":"event","payload":{"type":"<KIND>","timestamp":N,"message":S,"data":{}}}
///   {"type":"cmd","payload":{"action":S,"params":{}}}
///
/// `parse` never fails: anything malformed or unknown degrades to an INFO
/// event carrying the original string in `message` (WARN logged). Inbound
/// INFO is the game's heartbeat and gets dropped before the dispatcher
/// queue, so a malformed-frame flood can't build pressure.
use crate::events::{now_ms, EventKind, GameEvent};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Ui,
    Userscript,
    Firmware,
    Unknown,
}

impl ClientType {
    /// Case-sensitive wire spellings.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "ui" => Self::Ui,
            "userscript" => Self::Userscript,
            "firmware" => Self::Firmware,
            _ => Self::Unknown,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Ui => "ui",
            Self::Userscript => "userscript",
            Self::Firmware => "firmware",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub enum WsMessage {
    Handshake { client_type: ClientType },
    Event(GameEvent),
    Command { action: String, params: Value },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "clientType", default)]
    client_type: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

/// Parse one inbound text frame. Never fails; bad input degrades to INFO.
pub fn parse(raw: &str) -> WsMessage {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("Unparseable WS frame ({}): {}", e, preview(raw));
            return fallback_info(raw);
        }
    };

    match envelope.kind.as_str() {
        "handshake" => {
            let client_type = match envelope.client_type.as_deref() {
                Some(s) => {
                    let ct = ClientType::from_wire(s);
                    if ct == ClientType::Unknown {
                        tracing::warn!("Handshake with unknown clientType {:?}", s);
                    }
                    ct
                }
                None => {
                    tracing::warn!("Handshake without clientType");
                    ClientType::Unknown
                }
            };
            WsMessage::Handshake { client_type }
        }
        "event" => parse_event(raw, envelope.payload),
        "cmd" => {
            let payload = envelope.payload.unwrap_or(Value::Null);
            let action = payload
                .get("action")
                .and_then(|a| a.as_str())
                .unwrap_or("")
                .to_owned();
            let params = payload.get("params").cloned().unwrap_or(Value::Null);
            WsMessage::Command { action, params }
        }
        other => {
            tracing::warn!("Unknown WS envelope type {:?}", other);
            fallback_info(raw)
        }
    }
}

fn parse_event(raw: &str, payload: Option<Value>) -> WsMessage {
    let Some(payload) = payload else {
        tracing::warn!("Event envelope without payload: {}", preview(raw));
        return fallback_info(raw);
    };
    let Some(kind) = payload
        .get("type")
        .and_then(|t| t.as_str())
        .and_then(EventKind::from_wire)
    else {
        tracing::warn!("Event with missing/unknown kind: {}", preview(raw));
        return fallback_info(raw);
    };

    let timestamp_ms = payload
        .get("timestamp")
        .and_then(|t| t.as_u64())
        .unwrap_or_else(now_ms);
    let message = payload
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("")
        .to_owned();
    let data = match payload.get("data") {
        Some(Value::Null) | None => String::new(),
        // Round-trips through Value normalize formatting but preserve fields.
        Some(d) => serde_json::to_string(d).unwrap_or_default(),
    };

    WsMessage::Event(GameEvent::new(kind, timestamp_ms, message, data))
}

fn fallback_info(raw: &str) -> WsMessage {
    WsMessage::Event(GameEvent::new(
        EventKind::Info,
        now_ms(),
        preview(raw),
        String::new(),
    ))
}

/// First 128 chars of a frame, for logs and fallback messages.
fn preview(raw: &str) -> String {
    let mut end = raw.len().min(128);
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_owned()
}

// ---------------------------------------------------------------------------
// Outbound building
// ---------------------------------------------------------------------------

pub fn build_event(event: &GameEvent) -> String {
    let data: Value = if event.data.is_empty() {
        json!({})
    } else {
        serde_json::from_str(&event.data).unwrap_or(json!({}))
    };
    json!({
        "type": "event",
        "payload": {
            "type": event.kind.as_wire(),
            "timestamp": event.timestamp_ms,
            "message": event.message,
            "data": data,
        }
    })
    .to_string()
}

pub fn build_command(action: &str, params: Value) -> String {
    json!({
        "type": "cmd",
        "payload": { "action": action, "params": params }
    })
    .to_string()
}

pub fn build_handshake(client_type: ClientType) -> String {
    json!({ "type": "handshake", "clientType": client_type.as_wire() }).to_string()
}

pub fn build_troops_percent(percent: u8) -> String {
    build_command("set-troops-percent", json!({ "percent": percent.min(100) }))
}

pub fn build_ping() -> String {
    build_command("ping", json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_handshake_case_sensitively() {
        let msg = parse(r#"{"type":"handshake","clientType":"userscript"}"#);
        let WsMessage::Handshake { client_type } = msg else {
            panic!("wrong variant");
        };
        assert_eq!(client_type, ClientType::Userscript);

        // Wrong case is not a userscript.
        let msg = parse(r#"{"type":"handshake","clientType":"Userscript"}"#);
        let WsMessage::Handshake { client_type } = msg else {
            panic!("wrong variant");
        };
        assert_eq!(client_type, ClientType::Unknown);
    }

    #[test]
    fn parses_nuke_launched_event() {
        let raw = r#"{"type":"event","payload":{"type":"NUKE_LAUNCHED","timestamp":1000,"message":"atom away","data":{"nukeUnitID":10,"type":"Atom","targetTile":512}}}"#;
        let WsMessage::Event(ev) = parse(raw) else {
            panic!("wrong variant");
        };
        assert_eq!(ev.kind, EventKind::NukeLaunched);
        assert_eq!(ev.timestamp_ms, 1000);
        assert_eq!(ev.message, "atom away");
        assert_eq!(ev.unit_id(), Some(10));
        assert_eq!(ev.nuke_type().as_deref(), Some("Atom"));
    }

    #[test]
    fn empty_event_payload_degrades_to_info() {
        let WsMessage::Event(ev) = parse(r#"{"type":"event","payload":{}}"#) else {
            panic!("wrong variant");
        };
        assert_eq!(ev.kind, EventKind::Info);
    }

    #[test]
    fn garbage_degrades_to_info_with_original_text() {
        let WsMessage::Event(ev) = parse("not json at all") else {
            panic!("wrong variant");
        };
        assert_eq!(ev.kind, EventKind::Info);
        assert_eq!(ev.message, "not json at all");
    }

    #[test]
    fn unknown_event_kind_degrades_to_info() {
        let WsMessage::Event(ev) =
            parse(r#"{"type":"event","payload":{"type":"GAME_PAUSED","timestamp":1}}"#)
        else {
            panic!("wrong variant");
        };
        assert_eq!(ev.kind, EventKind::Info);
    }

    #[test]
    fn parses_cmd_envelope() {
        let raw = r#"{"type":"cmd","payload":{"action":"ping","params":{}}}"#;
        let WsMessage::Command { action, .. } = parse(raw) else {
            panic!("wrong variant");
        };
        assert_eq!(action, "ping");
    }

    #[test]
    fn build_then_parse_preserves_fields() {
        let original = GameEvent::new(
            EventKind::TroopUpdate,
            4_242,
            "troops".to_owned(),
            r#"{"troops":{"current":120000,"max":1100000}}"#.to_owned(),
        );
        let WsMessage::Event(back) = parse(&build_event(&original)) else {
            panic!("wrong variant");
        };
        assert_eq!(back.kind, original.kind);
        assert_eq!(back.timestamp_ms, original.timestamp_ms);
        assert_eq!(back.message, original.message);
        assert_eq!(back.troops(), Some((120_000, 1_100_000)));
    }

    #[test]
    fn troops_percent_command_shape() {
        let raw = build_troops_percent(51);
        let v: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["type"], "cmd");
        assert_eq!(v["payload"]["action"], "set-troops-percent");
        assert_eq!(v["payload"]["params"]["percent"], 51);
    }

    #[test]
    fn handshake_builder_round_trips() {
        let WsMessage::Handshake { client_type } = parse(&build_handshake(ClientType::Firmware))
        else {
            panic!("wrong variant");
        };
        assert_eq!(client_type, ClientType::Firmware);
    }
}
