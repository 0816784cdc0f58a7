/// Audio-module command path: request queue → CAN frames → ACK bookkeeping.
///
/// The sound module posts `CanRequest`s; this task owns the transport and
/// the request/ACK lifecycle:
///
///   * every PLAY/STOP carries a fresh `req_id`; the ACK echoes it back
///   * ACK wait is 200 ms — a silent audio module just times out quietly
///   * mixer-full (0x01) is retried exactly once, 500 ms later
///   * looped plays record the module-assigned queue id so a later
///     `Stop { loop_key }` can cancel that specific loop
pub mod codec;
pub mod transport;

use crate::events::now_ms;
use crate::nuke_tracker::NukeKind;
use self::codec::{
    build_play_sound, build_stop_sound, parse_ack, CanFrame, ACK_ERR_MIXER_FULL,
    CAN_ID_PLAY_SOUND,
};
use self::transport::CanTransport;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

pub const CAN_QUEUE_CAPACITY: usize = 16;
const ACK_TIMEOUT_MS: u64 = 200;
const MIXER_FULL_RETRY_MS: u64 = 500;
const POLL_INTERVAL_MS: u64 = 20;

/// Identity of a looped cue, for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKey {
    Alert(NukeKind),
}

#[derive(Debug, Clone, Copy)]
pub enum CanRequest {
    Play {
        sound_index: u16,
        flags: u8,
        volume: u8,
        /// Set when the play loops and may need cancelling later.
        loop_key: Option<LoopKey>,
    },
    Stop {
        loop_key: LoopKey,
    },
    StopAll,
}

struct PendingPlay {
    frame: CanFrame,
    deadline_ms: u64,
    retried: bool,
    loop_key: Option<LoopKey>,
}

/// Transmit-side state machine. Separated from the task loop so the ACK and
/// retry behavior is testable with a scripted clock.
pub struct SoundTx {
    transport: Box<dyn CanTransport>,
    next_req_id: u16,
    pending: HashMap<u16, PendingPlay>,
    /// loop_key → queue id assigned by the audio module.
    loops: HashMap<LoopKey, u8>,
    /// Mixer-full retries: (due_ms, original frame, loop_key).
    retries: Vec<(u64, CanFrame, Option<LoopKey>)>,
}

impl SoundTx {
    pub fn new(transport: Box<dyn CanTransport>) -> Self {
        Self {
            transport,
            next_req_id: 1,
            pending: HashMap::new(),
            loops: HashMap::new(),
            retries: Vec::new(),
        }
    }

    pub fn handle_request(&mut self, req: CanRequest, now: u64) {
        match req {
            CanRequest::Play { sound_index, flags, volume, loop_key } => {
                let req_id = self.alloc_req_id();
                let frame = build_play_sound(sound_index, flags, volume, req_id);
                self.send_play(frame, loop_key, now, false);
            }
            CanRequest::Stop { loop_key } => match self.loops.remove(&loop_key) {
                Some(queue_id) => {
                    let req_id = self.alloc_req_id();
                    let frame = build_stop_sound(queue_id, 0, req_id);
                    if let Err(e) = self.transport.send(&frame) {
                        tracing::warn!("CAN STOP_SOUND send failed: {}", e);
                    }
                }
                None => {
                    tracing::debug!("Stop for {:?} with no active loop — skipping", loop_key);
                }
            },
            CanRequest::StopAll => {
                self.loops.clear();
                let req_id = self.alloc_req_id();
                let frame = build_stop_sound(0, codec::STOP_FLAG_ALL, req_id);
                if let Err(e) = self.transport.send(&frame) {
                    tracing::warn!("CAN STOP_ALL send failed: {}", e);
                }
            }
        }
    }

    /// Poll inbound frames, expire pending ACK waits, fire due retries.
    pub fn poll(&mut self, now: u64) {
        while let Some(frame) = self.transport.try_recv() {
            if let Some(ack) = parse_ack(&frame) {
                self.handle_ack(ack, now);
            }
            // SOUND_STATUS frames are informational; nothing reacts today.
        }

        self.pending.retain(|req_id, p| {
            if now >= p.deadline_ms {
                tracing::debug!("ACK timeout for req {} — audio module absent?", req_id);
                false
            } else {
                true
            }
        });

        let due: Vec<_> = {
            let mut i = 0;
            let mut due = Vec::new();
            while i < self.retries.len() {
                if now >= self.retries[i].0 {
                    due.push(self.retries.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            due
        };
        for (_, mut frame, loop_key) in due {
            // Fresh req_id for the retry so a late first ACK can't match it.
            let req_id = self.alloc_req_id();
            let [lo, hi] = req_id.to_le_bytes();
            frame.data[4] = lo;
            frame.data[5] = hi;
            tracing::info!("Retrying mixer-full play (req {})", req_id);
            self.send_play(frame, loop_key, now, true);
        }
    }

    fn handle_ack(&mut self, ack: codec::SoundAck, now: u64) {
        let Some(pending) = self.pending.remove(&ack.req_id) else {
            tracing::debug!("ACK for unknown req {} — ignoring", ack.req_id);
            return;
        };
        if ack.ok {
            if let Some(key) = pending.loop_key {
                self.loops.insert(key, ack.queue_id);
            }
            return;
        }
        if ack.error_code == ACK_ERR_MIXER_FULL && !pending.retried {
            tracing::info!(
                "Mixer full for sound {} — retrying in {} ms",
                ack.sound_index,
                MIXER_FULL_RETRY_MS
            );
            let mut frame = pending.frame;
            frame.data[4] = 0; // req_id reassigned at retry time
            frame.data[5] = 0;
            self.retries
                .push((now + MIXER_FULL_RETRY_MS, frame, pending.loop_key));
        } else {
            tracing::warn!(
                "Audio module rejected sound {} (error 0x{:02x})",
                ack.sound_index,
                ack.error_code
            );
        }
    }

    fn send_play(&mut self, frame: CanFrame, loop_key: Option<LoopKey>, now: u64, retried: bool) {
        debug_assert_eq!(frame.id, CAN_ID_PLAY_SOUND);
        let req_id = u16::from_le_bytes([frame.data[4], frame.data[5]]);
        match self.transport.send(&frame) {
            Ok(()) => {
                self.pending.insert(
                    req_id,
                    PendingPlay { frame, deadline_ms: now + ACK_TIMEOUT_MS, retried, loop_key },
                );
            }
            Err(e) => tracing::warn!("CAN PLAY_SOUND send failed: {}", e),
        }
    }

    fn alloc_req_id(&mut self) -> u16 {
        let id = self.next_req_id;
        self.next_req_id = self.next_req_id.wrapping_add(1).max(1);
        id
    }
}

pub async fn run(transport: Box<dyn CanTransport>, mut rx: mpsc::Receiver<CanRequest>) {
    tracing::info!("CAN sound task starting");
    let mut tx = SoundTx::new(transport);
    let mut tick = tokio::time::interval(Duration::from_millis(POLL_INTERVAL_MS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            req = rx.recv() => {
                let Some(req) = req else {
                    tracing::info!("CAN request queue closed — task stopping");
                    return;
                };
                tx.handle_request(req, now_ms());
            }
            _ = tick.tick() => tx.poll(now_ms()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::codec::{CanFrame, CAN_ID_SOUND_ACK, CAN_ID_STOP_SOUND, PLAY_FLAG_LOOP};
    use super::transport::MockCan;

    fn tx_pair() -> (SoundTx, MockCan) {
        let mock = MockCan::new();
        (SoundTx::new(Box::new(mock.clone())), mock)
    }

    fn ack(req_id: u16, ok: bool, queue_id: u8, error: u8) -> CanFrame {
        let [req_lo, req_hi] = req_id.to_le_bytes();
        CanFrame::new(
            CAN_ID_SOUND_ACK,
            [ok as u8, 0, 0, queue_id, error, req_lo, req_hi, 0],
        )
    }

    #[test]
    fn play_sends_a_frame_with_fresh_req_id() {
        let (mut tx, mock) = tx_pair();
        tx.handle_request(
            CanRequest::Play { sound_index: 5, flags: 0, volume: 80, loop_key: None },
            0,
        );
        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, 0x420);
        assert_eq!(u16::from_le_bytes([sent[0].data[4], sent[0].data[5]]), 1);
    }

    #[test]
    fn looped_play_then_stop_uses_acked_queue_id() {
        let (mut tx, mock) = tx_pair();
        let key = LoopKey::Alert(NukeKind::Atom);
        tx.handle_request(
            CanRequest::Play {
                sound_index: 3,
                flags: PLAY_FLAG_LOOP,
                volume: codec::VOLUME_USE_POT,
                loop_key: Some(key),
            },
            0,
        );
        mock.push_rx(ack(1, true, 42, 0));
        tx.poll(50);

        mock.clear_sent();
        tx.handle_request(CanRequest::Stop { loop_key: key }, 100);
        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, CAN_ID_STOP_SOUND);
        assert_eq!(sent[0].data[0], 42); // queue id from the ACK
    }

    #[test]
    fn stop_without_ack_sends_nothing() {
        let (mut tx, mock) = tx_pair();
        tx.handle_request(
            CanRequest::Stop { loop_key: LoopKey::Alert(NukeKind::Hydro) },
            0,
        );
        assert!(mock.sent().is_empty());
    }

    #[test]
    fn mixer_full_is_retried_once_after_500ms() {
        let (mut tx, mock) = tx_pair();
        tx.handle_request(
            CanRequest::Play { sound_index: 9, flags: 0, volume: 100, loop_key: None },
            0,
        );
        mock.push_rx(ack(1, false, 0, ACK_ERR_MIXER_FULL));
        tx.poll(50);
        assert_eq!(mock.sent().len(), 1, "retry not due yet");

        tx.poll(549);
        assert_eq!(mock.sent().len(), 1);

        tx.poll(550);
        let sent = mock.sent();
        assert_eq!(sent.len(), 2);
        // Same sound, fresh req id.
        assert_eq!(sent[1].data[0], 9);
        assert_ne!(sent[1].data[4], sent[0].data[4]);
    }

    #[test]
    fn mixer_full_retry_happens_only_once() {
        let (mut tx, mock) = tx_pair();
        tx.handle_request(
            CanRequest::Play { sound_index: 9, flags: 0, volume: 100, loop_key: None },
            0,
        );
        mock.push_rx(ack(1, false, 0, ACK_ERR_MIXER_FULL));
        tx.poll(50);
        tx.poll(550); // retry goes out with req 2
        assert_eq!(mock.sent().len(), 2);

        // The retry also hits a full mixer — that's the end of the line.
        mock.push_rx(ack(2, false, 0, ACK_ERR_MIXER_FULL));
        tx.poll(600);
        tx.poll(2_000);
        assert_eq!(mock.sent().len(), 2);
    }

    #[test]
    fn ack_timeout_clears_pending_quietly() {
        let (mut tx, mock) = tx_pair();
        tx.handle_request(
            CanRequest::Play { sound_index: 1, flags: 0, volume: 0, loop_key: None },
            0,
        );
        tx.poll(ACK_TIMEOUT_MS);
        assert!(tx.pending.is_empty());
        // No retry was produced by a timeout.
        tx.poll(10_000);
        assert_eq!(mock.sent().len(), 1);
    }

    #[test]
    fn stop_all_carries_the_flag() {
        let (mut tx, mock) = tx_pair();
        tx.handle_request(CanRequest::StopAll, 0);
        let sent = mock.sent();
        assert_eq!(sent[0].id, CAN_ID_STOP_SOUND);
        assert_eq!(sent[0].data[1] & codec::STOP_FLAG_ALL, codec::STOP_FLAG_ALL);
    }
}
