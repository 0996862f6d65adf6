//! MIDI routing and the shared control-state grid.
//!
//! Incoming raw bytes from any backend are routed into a process-wide
//! state grid indexed by (port, channel). Audio-rate readers read one
//! byte or short at a time with relaxed atomics; transient inconsistency
//! across fields is acceptable for control values, and no torn read
//! beyond 16 bits is possible.

use std::sync::atomic::{AtomicI16, AtomicU32, AtomicU8, Ordering};

use crate::error::Result;
use crate::value::Z;

pub const MAX_MIDI_PORTS: usize = 16;
pub const MIDI_CHANNELS: usize = 16;

/// Per-(port, channel) control state.
pub struct MidiChanState {
    pub control: [AtomicU8; 128],
    pub polytouch: [AtomicU8; 128],
    pub keyvel: [AtomicU8; 128],
    pub num_keys_down: AtomicU32,
    /// 14-bit pitch bend, biased to be signed and centered at 0.
    pub bend: AtomicI16,
    pub touch: AtomicU8,
    pub program: AtomicU8,
    pub lastkey: AtomicU8,
    pub lastvel: AtomicU8,
}

impl MidiChanState {
    const fn new() -> MidiChanState {
        MidiChanState {
            control: [const { AtomicU8::new(0) }; 128],
            polytouch: [const { AtomicU8::new(0) }; 128],
            keyvel: [const { AtomicU8::new(0) }; 128],
            num_keys_down: AtomicU32::new(0),
            bend: AtomicI16::new(0),
            touch: AtomicU8::new(0),
            program: AtomicU8::new(0),
            lastkey: AtomicU8::new(0),
            lastvel: AtomicU8::new(0),
        }
    }

    fn reset(&self) {
        for cell in &self.control {
            cell.store(0, Ordering::Relaxed);
        }
        for cell in &self.polytouch {
            cell.store(0, Ordering::Relaxed);
        }
        for cell in &self.keyvel {
            cell.store(0, Ordering::Relaxed);
        }
        self.num_keys_down.store(0, Ordering::Relaxed);
        self.bend.store(0, Ordering::Relaxed);
        self.touch.store(0, Ordering::Relaxed);
        self.program.store(0, Ordering::Relaxed);
        self.lastkey.store(0, Ordering::Relaxed);
        self.lastvel.store(0, Ordering::Relaxed);
    }
}

/// The one truly global piece of engine state: written by the MIDI
/// ingestion thread, read lock-free by audio-rate code.
static MIDI_STATE: [[MidiChanState; MIDI_CHANNELS]; MAX_MIDI_PORTS] =
    [const { [const { MidiChanState::new() }; MIDI_CHANNELS] }; MAX_MIDI_PORTS];

/// Access the state record for a (port, channel) pair.
pub fn midi_state(port: usize, chan: usize) -> &'static MidiChanState {
    &MIDI_STATE[port & (MAX_MIDI_PORTS - 1)][chan & (MIDI_CHANNELS - 1)]
}

/// One-pole smoother for control values, so MIDI steps arriving between
/// audio blocks do not produce audible discontinuities.
#[derive(Debug, Clone, Copy)]
pub struct MidiLag {
    coeff: Z,
    state: Z,
}

impl MidiLag {
    /// `lag_time` is the time to decay to 0.1% of a step.
    pub fn new(lag_time: Z, sample_rate: Z) -> MidiLag {
        let log001 = (0.001f64).ln();
        let coeff = if lag_time > 0.0 {
            (log001 / (lag_time * sample_rate)).exp()
        } else {
            0.0
        };
        MidiLag { coeff, state: 0.0 }
    }

    pub fn next(&mut self, target: Z) -> Z {
        self.state = target + self.coeff * (self.state - target);
        self.state
    }
}

/// Routes raw MIDI bytes into the state grid. One router per ingestion
/// thread; the sysex and running-status state is not shared.
pub struct MidiRouter {
    sysex: bool,
    running_status: u8,
}

impl Default for MidiRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiRouter {
    pub fn new() -> MidiRouter {
        MidiRouter {
            sysex: false,
            running_status: 0,
        }
    }

    /// Zero the whole grid and this router's parser state.
    pub fn reset_state(&mut self) {
        for port in &MIDI_STATE {
            for chan in port {
                chan.reset();
            }
        }
        self.sysex = false;
        self.running_status = 0;
    }

    /// Consume one incoming packet from input `src`.
    pub fn handle_incoming_message(&mut self, src: usize, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let src = src & (MAX_MIDI_PORTS - 1);

        let mut i = 0usize;
        while i < data.len() {
            let status;
            let chan;
            // operands start after an explicit status byte, or at the
            // current byte when the running status is reused
            let opnd;
            if data[i] & 0x80 != 0 {
                status = data[i] & 0xF0;
                chan = (data[i] & 0x0F) as usize;
                // set the running status for voice messages
                self.running_status = if status == 0xF0 { 0 } else { data[i] };
                opnd = i + 1;
            } else if self.running_status != 0 && !self.sysex {
                status = self.running_status & 0xF0;
                chan = (self.running_status & 0x0F) as usize;
                opnd = i;
            } else {
                // garbage or continuing sysex
                i += self.process_system_packet(&data[i..], 0);
                continue;
            }

            let state = midi_state(src, chan);
            match status {
                0x80 => {
                    // note off
                    if opnd + 2 > data.len() {
                        return;
                    }
                    let key = data[opnd] as usize & 127;
                    tracing::trace!(src, chan, key, "note off");
                    state.keyvel[key].store(0, Ordering::Relaxed);
                    decrement_keys(state);
                    i = opnd + 2;
                }
                0x90 => {
                    // note on; velocity zero means off
                    if opnd + 2 > data.len() {
                        return;
                    }
                    let key = data[opnd] as usize & 127;
                    let vel = data[opnd + 1];
                    tracing::trace!(src, chan, key, vel, "note on");
                    if vel != 0 {
                        state.lastkey.store(key as u8, Ordering::Relaxed);
                        state.lastvel.store(vel, Ordering::Relaxed);
                        state.num_keys_down.fetch_add(1, Ordering::Relaxed);
                    } else {
                        decrement_keys(state);
                    }
                    state.keyvel[key].store(vel, Ordering::Relaxed);
                    i = opnd + 2;
                }
                0xA0 => {
                    // polytouch
                    if opnd + 2 > data.len() {
                        return;
                    }
                    let key = data[opnd] as usize & 127;
                    state.polytouch[key].store(data[opnd + 1], Ordering::Relaxed);
                    i = opnd + 2;
                }
                0xB0 => {
                    // control change
                    if opnd + 2 > data.len() {
                        return;
                    }
                    let cc = data[opnd] as usize & 127;
                    let value = data[opnd + 1];
                    state.control[cc].store(value, Ordering::Relaxed);
                    if cc == 120 || (123..=127).contains(&cc) {
                        // all notes off
                        for cell in &state.keyvel {
                            cell.store(0, Ordering::Relaxed);
                        }
                        state.num_keys_down.store(0, Ordering::Relaxed);
                    } else if cc == 121 {
                        // reset all controllers
                        for cell in &state.control {
                            cell.store(0, Ordering::Relaxed);
                        }
                        state.bend.store(0, Ordering::Relaxed);
                    }
                    i = opnd + 2;
                }
                0xC0 => {
                    // program change
                    if opnd + 1 > data.len() {
                        return;
                    }
                    state.program.store(data[opnd], Ordering::Relaxed);
                    i = opnd + 1;
                }
                0xD0 => {
                    // channel pressure
                    if opnd + 1 > data.len() {
                        return;
                    }
                    state.touch.store(data[opnd], Ordering::Relaxed);
                    i = opnd + 1;
                }
                0xE0 => {
                    // pitch bend, 14-bit centered on 0
                    if opnd + 2 > data.len() {
                        return;
                    }
                    let lsb = data[opnd] as i32;
                    let msb = data[opnd + 1] as i32;
                    let bend = ((msb << 7) | lsb) - 8192;
                    state.bend.store(bend as i16, Ordering::Relaxed);
                    i = opnd + 2;
                }
                0xF0 => {
                    i += self.process_system_packet(&data[i..], chan);
                }
                _ => {
                    i = opnd.max(i + 1);
                }
            }
        }
    }

    /// Returns the number of bytes consumed.
    fn process_system_packet(&mut self, data: &[u8], chan: usize) -> usize {
        match chan {
            // sysex start, or EOX first in a packet
            0 | 7 => {
                let mut consumed = 0usize;
                for &byte in data {
                    consumed += 1;
                    if byte & 0x80 != 0 {
                        match byte {
                            0xF7 => {
                                self.sysex = false;
                                break;
                            }
                            0xF0 => {
                                self.running_status = 0;
                                self.sysex = true;
                            }
                            _ => {
                                // abnormal byte inside sysex: flush it
                                self.sysex = false;
                                return data.len();
                            }
                        }
                    } else if !self.sysex {
                        break; // stray data byte
                    }
                }
                consumed.max(1)
            }
            1 => 2,  // MTC quarter frame
            2 => 3,  // song position pointer
            3 => 2,  // song select
            8 | 10 | 11 | 12 | 15 => {
                // realtime: clock, start, continue, stop, reset
                self.running_status = 0;
                1
            }
            _ => 1,
        }
    }
}

fn decrement_keys(state: &MidiChanState) {
    let _ = state.num_keys_down.fetch_update(
        Ordering::Relaxed,
        Ordering::Relaxed,
        |n| n.checked_sub(1),
    );
}

/// A platform MIDI transport.
pub trait MidiBackend: Send {
    fn initialize(&mut self, num_in: usize, num_out: usize) -> Result<()>;
    fn cleanup(&mut self);
    fn restart(&mut self) -> Result<()>;
    fn list_devices(&self) -> Vec<String>;
    fn connect_input(&mut self, uid: i32, port_index: usize) -> Result<()>;
    fn disconnect_input(&mut self, uid: i32, port_index: usize) -> Result<()>;
    fn send_message(
        &mut self,
        port: usize,
        dest_index: usize,
        bytes: &[u8],
        latency_seconds: Z,
    ) -> Result<()>;
}

/// Stands in when no MIDI transport is available.
pub struct NullMidiBackend;

impl MidiBackend for NullMidiBackend {
    fn initialize(&mut self, _num_in: usize, _num_out: usize) -> Result<()> {
        Ok(())
    }

    fn cleanup(&mut self) {}

    fn restart(&mut self) -> Result<()> {
        Ok(())
    }

    fn list_devices(&self) -> Vec<String> {
        Vec::new()
    }

    fn connect_input(&mut self, _uid: i32, _port_index: usize) -> Result<()> {
        Ok(())
    }

    fn disconnect_input(&mut self, _uid: i32, _port_index: usize) -> Result<()> {
        Ok(())
    }

    fn send_message(
        &mut self,
        _port: usize,
        _dest_index: usize,
        _bytes: &[u8],
        _latency_seconds: Z,
    ) -> Result<()> {
        Ok(())
    }
}
