/// CAN wire format for the external audio module.
///
/// 11-bit identifiers, 8 data bytes, multi-byte fields little-endian.
/// This byte layout is normative — the audio module firmware decodes these
/// offsets verbatim.
///
///   0x420 PLAY_SOUND  [idx_lo, idx_hi, flags, volume, req_lo, req_hi, 0, 0]
///   0x421 STOP_SOUND  [queue_id, flags, req_lo, req_hi, 0, 0, 0, 0]
///   0x422 SOUND_STATUS [state, cur_lo, cur_hi, error, volume, up0, up1, up2]
///   0x423 SOUND_ACK   [ok, idx_lo, idx_hi, queue_id, error, req_lo, req_hi, 0]
///
/// `volume = 0xFF` means "use the audio module's potentiometer".
pub const CAN_ID_PLAY_SOUND: u16 = 0x420;
pub const CAN_ID_STOP_SOUND: u16 = 0x421;
pub const CAN_ID_SOUND_STATUS: u16 = 0x422;
pub const CAN_ID_SOUND_ACK: u16 = 0x423;

pub const PLAY_FLAG_INTERRUPT: u8 = 1 << 0;
pub const PLAY_FLAG_HIGH_PRIORITY: u8 = 1 << 1;
pub const PLAY_FLAG_LOOP: u8 = 1 << 2;

pub const STOP_FLAG_ALL: u8 = 1 << 0;

pub const VOLUME_USE_POT: u8 = 0xFF;

/// Mixer has no free slot; the play may be retried shortly.
pub const ACK_ERR_MIXER_FULL: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u16,
    pub dlc: u8,
    pub data: [u8; 8],
}

impl CanFrame {
    pub fn new(id: u16, data: [u8; 8]) -> Self {
        Self { id, dlc: 8, data }
    }
}

pub fn build_play_sound(sound_index: u16, flags: u8, volume: u8, req_id: u16) -> CanFrame {
    let [idx_lo, idx_hi] = sound_index.to_le_bytes();
    let [req_lo, req_hi] = req_id.to_le_bytes();
    CanFrame::new(
        CAN_ID_PLAY_SOUND,
        [idx_lo, idx_hi, flags, volume, req_lo, req_hi, 0, 0],
    )
}

pub fn build_stop_sound(queue_id: u8, flags: u8, req_id: u16) -> CanFrame {
    let [req_lo, req_hi] = req_id.to_le_bytes();
    CanFrame::new(
        CAN_ID_STOP_SOUND,
        [queue_id, flags, req_lo, req_hi, 0, 0, 0, 0],
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundAck {
    pub ok: bool,
    pub sound_index: u16,
    pub queue_id: u8,
    pub error_code: u8,
    pub req_id: u16,
}

pub fn parse_ack(frame: &CanFrame) -> Option<SoundAck> {
    if frame.id != CAN_ID_SOUND_ACK || frame.dlc < 7 {
        return None;
    }
    let d = &frame.data;
    Some(SoundAck {
        ok: d[0] != 0,
        sound_index: u16::from_le_bytes([d[1], d[2]]),
        queue_id: d[3],
        error_code: d[4],
        req_id: u16::from_le_bytes([d[5], d[6]]),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundStatus {
    pub state_bits: u8,
    pub current_sound: u16,
    pub error_code: u8,
    pub volume: u8,
    pub uptime_s: u32,
}

pub fn parse_status(frame: &CanFrame) -> Option<SoundStatus> {
    if frame.id != CAN_ID_SOUND_STATUS || frame.dlc < 8 {
        return None;
    }
    let d = &frame.data;
    Some(SoundStatus {
        state_bits: d[0],
        current_sound: u16::from_le_bytes([d[1], d[2]]),
        error_code: d[3],
        volume: d[4],
        uptime_s: u32::from_le_bytes([d[5], d[6], d[7], 0]),
    })
}
