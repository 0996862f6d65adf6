//! The audio pull clock.
//!
//! A player owns its own interpreter thread and one signal cursor per
//! channel. Every render callback zeroes the output, then each live
//! player fills a scratch block per channel and accumulates it into the
//! mix; players whose channels have all ended are removed after the
//! callback. Platform devices sit behind [`AudioBackend`]; the driver
//! itself is device-free and directly testable.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{wrong_type, Error, Result};
use crate::input::ZIn;
use crate::thread::Thread;
use crate::value::{V, Z};

/// Channel cap for multichannel play.
pub const MAX_CHANNELS: usize = 32;

pub struct Player {
    th: Thread,
    channels: Vec<ZIn>,
    channel_done: Vec<bool>,
    scratch: Vec<Z>,
    done: bool,
}

impl Player {
    /// Build a player from a playable value: a signal list is one
    /// channel, a finite value list of signal lists is multichannel.
    pub fn from_value(th: &mut Thread, v: V) -> Result<Player> {
        let engine = th.engine().clone();
        let player_thread = Thread::new(engine);
        let channels: Vec<ZIn> = match &v {
            V::List(l) if l.kind() == crate::value::ItemKind::Z => {
                vec![ZIn::from_list(l.clone())]
            }
            V::List(l) => {
                if !l.is_finite() {
                    return Err(Error::IndefiniteOperation("play"));
                }
                let Some(packed) = l.pack(th, Some(MAX_CHANNELS))? else {
                    return Err(Error::OutOfRange(format!(
                        "too many channels, max is {MAX_CHANNELS}"
                    )));
                };
                let array = packed.packed_array().expect("packed");
                let items = array.to_vs();
                let mut channels = Vec::with_capacity(items.len());
                for item in items {
                    channels.push(ZIn::try_new(item)?);
                }
                channels
            }
            other => {
                return Err(wrong_type("play", "List", other.type_name()));
            }
        };
        if channels.is_empty() {
            return Err(Error::OutOfRange("play needs at least one channel".into()));
        }
        let n = channels.len();
        Ok(Player {
            th: player_thread,
            channel_done: vec![false; n],
            channels,
            scratch: Vec::new(),
            done: false,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Mix one block into the outputs. Any error drops this player and is
    /// reported to the log, never to the audio host.
    fn render_into(&mut self, outputs: &mut [&mut [f32]], frames: usize) {
        if self.scratch.len() < frames {
            self.scratch.resize(frames, 0.0);
        }
        let usable = self.channels.len().min(outputs.len());
        let mut all_done = true;
        for ch in 0..usable {
            if self.channel_done[ch] {
                continue;
            }
            let mut n = frames;
            match self.channels[ch].fill(
                &mut self.th,
                &mut n,
                &mut self.scratch,
                1,
            ) {
                Ok(done) => {
                    let out = &mut outputs[ch];
                    for i in 0..n.min(out.len()) {
                        out[i] += self.scratch[i] as f32;
                    }
                    if done {
                        self.channel_done[ch] = true;
                    } else {
                        all_done = false;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        channel = ch,
                        error = %e,
                        "player failed while rendering; dropping it"
                    );
                    self.done = true;
                    return;
                }
            }
        }
        // channels beyond the device's count still count as live
        for ch in usable..self.channels.len() {
            if !self.channel_done[ch] {
                all_done = false;
            }
        }
        if all_done {
            self.done = true;
        }
    }
}

/// The fixed-block driver bridging interpreter-side pulls to the render
/// callback.
pub struct AudioDriver {
    players: Mutex<Vec<Player>>,
}

impl AudioDriver {
    pub fn new() -> Arc<AudioDriver> {
        Arc::new(AudioDriver {
            players: Mutex::new(Vec::new()),
        })
    }

    /// Register a playable value. The player becomes visible to the next
    /// render callback, never to one already running.
    pub fn play(&self, th: &mut Thread, v: V) -> Result<()> {
        let player = Player::from_value(th, v)?;
        tracing::debug!(channels = player.num_channels(), "player added");
        self.players.lock().push(player);
        Ok(())
    }

    pub fn add_player(&self, player: Player) {
        self.players.lock().push(player);
    }

    pub fn player_count(&self) -> usize {
        self.players.lock().len()
    }

    /// The render callback body. Holds the player mutex for the duration
    /// of the callback; registrations wait, which keeps any generator's
    /// pull single-threaded.
    pub fn render(&self, outputs: &mut [&mut [f32]], frames: usize) {
        for out in outputs.iter_mut() {
            for sample in out.iter_mut() {
                *sample = 0.0;
            }
        }
        let mut players = self.players.lock();
        for player in players.iter_mut() {
            player.render_into(outputs, frames);
        }
        let before = players.len();
        players.retain(|p| !p.done);
        let removed = before - players.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = players.len(), "players finished");
        }
    }

    /// Finalize and drop every player.
    pub fn stop_all(&self) {
        let mut players = self.players.lock();
        let n = players.len();
        players.clear();
        if n > 0 {
            tracing::info!(stopped = n, "stopped all players");
        }
    }

    /// Drop only the players flagged done.
    pub fn stop_finished(&self) {
        self.players.lock().retain(|p| !p.done);
    }
}

/// A platform audio device. The engine drives whichever backend is
/// installed; the null backend stands in when no device is available.
pub trait AudioBackend: Send + Sync {
    fn play(&self, th: &mut Thread, v: V) -> Result<()>;
    fn record(&self, th: &mut Thread, v: V, filename: &str) -> Result<()>;
    fn stop_all(&self);
    fn stop_finished(&self);
}

/// Reports unavailability for every operation.
pub struct NullAudioBackend {
    reason: String,
}

impl NullAudioBackend {
    pub fn new(reason: impl Into<String>) -> NullAudioBackend {
        NullAudioBackend {
            reason: reason.into(),
        }
    }
}

impl AudioBackend for NullAudioBackend {
    fn play(&self, _th: &mut Thread, _v: V) -> Result<()> {
        Err(Error::Failed(self.reason.clone()))
    }

    fn record(&self, _th: &mut Thread, _v: V, _filename: &str) -> Result<()> {
        Err(Error::Failed(self.reason.clone()))
    }

    fn stop_all(&self) {}

    fn stop_finished(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{test_engine, test_thread};

    const FRAMES: usize = 256;

    fn render_once(driver: &AudioDriver, channels: usize) -> Vec<Vec<f32>> {
        let mut bufs: Vec<Vec<f32>> = vec![vec![0.0; FRAMES]; channels];
        {
            let mut refs: Vec<&mut [f32]> =
                bufs.iter_mut().map(|b| b.as_mut_slice()).collect();
            driver.render(&mut refs, FRAMES);
        }
        bufs
    }

    #[test]
    fn half_second_sine_delivers_exactly_its_frames() {
        let engine = test_engine();
        let mut th = engine.new_thread();
        // 0.5 s at the engine rate: the ramp bounds the sine
        th.run("440 sinosc 0 1 0.5 line * play").unwrap();
        let driver = engine.audio();
        assert_eq!(driver.player_count(), 1);

        let total = (th.rate().sample_rate * 0.5) as usize; // 24000
        let full_blocks = total / FRAMES;
        for _ in 0..full_blocks {
            render_once(driver, 1);
            assert_eq!(driver.player_count(), 1);
        }
        // the final short block exhausts the stream and removes the player
        render_once(driver, 1);
        assert_eq!(driver.player_count(), 0);
    }

    #[test]
    fn rendering_is_deterministic_per_block() {
        let collect = || -> Vec<f32> {
            let engine = test_engine();
            let mut th = engine.new_thread();
            th.run("440 sinosc 0 1 0.1 line * play").unwrap();
            let mut out = Vec::new();
            while engine.audio().player_count() > 0 {
                out.extend(render_once(engine.audio(), 1).remove(0));
            }
            out
        };
        let a = collect();
        let b = collect();
        assert_eq!(a, b);
    }

    #[test]
    fn multichannel_play_from_finite_vlist() {
        let engine = test_engine();
        let mut th = engine.new_thread();
        th.run("[0 1 0.01 line 1 0 0.01 line] play").unwrap();
        let bufs = render_once(engine.audio(), 2);
        // channel 0 ramps up from zero, channel 1 down from one
        assert_eq!(bufs[0][0], 0.0);
        assert!((bufs[1][0] - 1.0).abs() < 1e-6);
        assert!(bufs[0][FRAMES - 1] > 0.0);
    }

    #[test]
    fn play_rejects_indefinite_channel_lists() {
        let engine = test_engine();
        let mut th = engine.new_thread();
        // an each-mapped indefinite stream of channels can't be played
        let v = th.eval("440 sinosc").unwrap();
        let infinite_channels = {
            // a VList wrapping the infinite ZList is fine; an indefinite
            // VList of channels is not. Build the latter with scan over
            // a VList? Simplest: mark a gen-backed VList as indefinite.
            use crate::list::{Gen, List, Pulled};
            struct Channels(V);
            impl Gen for Channels {
                fn pull(
                    &mut self,
                    _th: &mut Thread,
                ) -> crate::error::Result<Pulled> {
                    Ok(Pulled::Block(crate::array::Array::from_vs(vec![
                        self.0.clone(),
                    ])))
                }
            }
            V::List(List::from_gen(
                Box::new(Channels(v)),
                crate::value::ItemKind::V,
                false,
            ))
        };
        assert!(matches!(
            Player::from_value(&mut th, infinite_channels),
            Err(Error::IndefiniteOperation(_))
        ));
    }

    #[test]
    fn play_rejects_scalars() {
        let mut th = test_thread();
        assert!(matches!(
            Player::from_value(&mut th, V::Real(1.0)),
            Err(Error::WrongType { .. })
        ));
    }

    #[test]
    fn mix_accumulates_across_players() {
        let engine = test_engine();
        let mut th = engine.new_thread();
        th.run("1 1 0.01 line play").unwrap();
        th.run("1 1 0.01 line play").unwrap();
        assert_eq!(engine.audio().player_count(), 2);
        let bufs = render_once(engine.audio(), 1);
        assert!((bufs[0][0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn stop_all_clears_players() {
        let engine = test_engine();
        let mut th = engine.new_thread();
        th.run("440 sinosc play").unwrap();
        assert_eq!(engine.audio().player_count(), 1);
        th.run("stop").unwrap();
        assert_eq!(engine.audio().player_count(), 0);
    }

    #[test]
    fn null_backend_reports_failure() {
        let mut th = test_thread();
        let backend = NullAudioBackend::new("no audio device in tests");
        assert!(matches!(
            backend.play(&mut th, V::Real(0.0)),
            Err(Error::Failed(_))
        ));
    }
}
