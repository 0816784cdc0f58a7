/// Sound module — translates game moments into audio-module CAN requests.
///
/// Two inputs: explicit SOUND_PLAY events carrying a `sound_index`, and a
/// fixed cue table for the internal moments (game start/end, launches,
/// explosions, alerts). Alert cues loop until the incoming count for their
/// kind reaches zero; the CAN task holds the queue-id bookkeeping, this
/// module just says "stop that loop".
///
/// Sound indices match the sample layout flashed on the audio module's SD
/// card.
use super::{HardwareModule, ModuleContext, ModuleStatus};
use crate::can::codec::{PLAY_FLAG_HIGH_PRIORITY, PLAY_FLAG_INTERRUPT, PLAY_FLAG_LOOP, VOLUME_USE_POT};
use crate::can::{CanRequest, LoopKey};
use crate::events::{EventKind, InternalEvent};
use crate::nuke_tracker::{Direction, NukeKind, NukeState};
use anyhow::Result;

const SND_GAME_START: u16 = 1;
const SND_VICTORY: u16 = 2;
const SND_DEFEAT: u16 = 3;
const SND_NUKE_LAUNCH: u16 = 4;
const SND_NUKE_EXPLODE: u16 = 5;
const SND_NUKE_INTERCEPT: u16 = 6;
const SND_ALERT_ATOM: u16 = 7;
const SND_ALERT_HYDRO: u16 = 8;
const SND_ALERT_MIRV: u16 = 9;
const SND_ALERT_LAND: u16 = 10;
const SND_ALERT_NAVAL: u16 = 11;
const SND_HW_TEST: u16 = 12;

fn alert_sound(kind: NukeKind) -> u16 {
    match kind {
        NukeKind::Atom => SND_ALERT_ATOM,
        NukeKind::Hydro => SND_ALERT_HYDRO,
        NukeKind::Mirv => SND_ALERT_MIRV,
        NukeKind::Land => SND_ALERT_LAND,
        NukeKind::Naval => SND_ALERT_NAVAL,
    }
}

fn alert_kind(event: EventKind) -> Option<NukeKind> {
    Some(match event {
        EventKind::AlertAtom => NukeKind::Atom,
        EventKind::AlertHydro => NukeKind::Hydro,
        EventKind::AlertMirv => NukeKind::Mirv,
        EventKind::AlertLand => NukeKind::Land,
        EventKind::AlertNaval => NukeKind::Naval,
        _ => return None,
    })
}

pub struct SoundModule {
    cues_sent: u32,
}

impl SoundModule {
    pub fn new() -> Self {
        Self { cues_sent: 0 }
    }

    fn play(&mut self, ctx: &mut ModuleContext, sound_index: u16, flags: u8, loop_key: Option<LoopKey>) {
        ctx.send_sound(CanRequest::Play {
            sound_index,
            flags,
            volume: VOLUME_USE_POT,
            loop_key,
        });
        self.cues_sent += 1;
    }
}

impl Default for SoundModule {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareModule for SoundModule {
    fn name(&self) -> &'static str {
        "sound"
    }

    fn init(&mut self, _ctx: &mut ModuleContext) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, _ctx: &mut ModuleContext) -> Result<()> {
        Ok(())
    }

    fn handle_event(&mut self, event: &InternalEvent, ctx: &mut ModuleContext) -> bool {
        let kind = event.kind();

        if let Some(alert) = alert_kind(kind) {
            self.play(
                ctx,
                alert_sound(alert),
                PLAY_FLAG_LOOP | PLAY_FLAG_HIGH_PRIORITY,
                Some(LoopKey::Alert(alert)),
            );
            return true;
        }

        match kind {
            EventKind::SoundPlay => {
                let Some(index) = event.event.sound_index() else {
                    tracing::warn!("SOUND_PLAY without sound_index");
                    return true;
                };
                self.play(ctx, index, 0, None);
                true
            }
            EventKind::GameStart => {
                self.play(ctx, SND_GAME_START, PLAY_FLAG_INTERRUPT, None);
                true
            }
            EventKind::GameEnd => {
                // Kill any still-looping alerts before the outro.
                ctx.send_sound(CanRequest::StopAll);
                match event.event.victory() {
                    Some(true) => self.play(ctx, SND_VICTORY, PLAY_FLAG_INTERRUPT, None),
                    Some(false) => self.play(ctx, SND_DEFEAT, PLAY_FLAG_INTERRUPT, None),
                    None => {}
                }
                true
            }
            EventKind::NukeLaunched => {
                self.play(ctx, SND_NUKE_LAUNCH, 0, None);
                true
            }
            EventKind::NukeExploded | EventKind::NukeIntercepted => {
                let sound = if kind == EventKind::NukeExploded {
                    SND_NUKE_EXPLODE
                } else {
                    SND_NUKE_INTERCEPT
                };
                self.play(ctx, sound, 0, None);

                // The tracker resolved this unit before routing; when it was
                // the last incoming of its kind, stop that alert loop.
                if let Some(unit_id) = event.event.unit_id() {
                    if let Some((nuke_kind, Direction::Incoming, state)) =
                        ctx.tracker.lookup(unit_id)
                    {
                        let quiet = state != NukeState::InFlight
                            && ctx.tracker.get_active_count(nuke_kind, Direction::Incoming) == 0;
                        if quiet {
                            ctx.send_sound(CanRequest::Stop {
                                loop_key: LoopKey::Alert(nuke_kind),
                            });
                        }
                    }
                }
                true
            }
            EventKind::HardwareTest => {
                self.play(ctx, SND_HW_TEST, PLAY_FLAG_INTERRUPT, None);
                true
            }
            _ => false,
        }
    }

    fn get_status(&self, out: &mut ModuleStatus) {
        out.operational = out.initialized;
    }

    fn shutdown(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        ctx.send_sound(CanRequest::StopAll);
        Ok(())
    }
}
