//! Test-support signal generators.
//!
//! The full generator library lives outside the execution core; these two
//! are enough to drive the audio clock end to end.

use crate::array::Array;
use crate::error::Result;
use crate::input::ZIn;
use crate::list::{Gen, Pulled, BLOCK_SIZE};
use crate::thread::Thread;
use crate::value::Z;

/// A phase-increment sine oscillator. Ends when its frequency input ends;
/// a constant frequency makes it indefinite.
pub struct SinOsc {
    freq: ZIn,
    phase: Z,
    radians_per_sample: Z,
}

impl SinOsc {
    pub fn new(freq: ZIn, radians_per_sample: Z) -> SinOsc {
        SinOsc {
            freq,
            phase: 0.0,
            radians_per_sample,
        }
    }
}

impl Gen for SinOsc {
    fn name(&self) -> &'static str {
        "sinosc"
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let mut out = Vec::with_capacity(BLOCK_SIZE);
        let mut ended = false;
        for _ in 0..BLOCK_SIZE {
            let mut freq = 0.0;
            if self.freq.one_z(th, &mut freq)? {
                ended = true;
                break;
            }
            out.push(self.phase.sin());
            self.phase += freq * self.radians_per_sample;
            if self.phase >= std::f64::consts::TAU {
                self.phase -= std::f64::consts::TAU;
            }
        }
        if out.is_empty() {
            return Ok(Pulled::End);
        }
        let array = Array::from_zs(out);
        Ok(if ended {
            Pulled::Last(array)
        } else {
            Pulled::Block(array)
        })
    }
}

/// A finite linear ramp over a fixed number of frames.
pub struct LineGen {
    current: Z,
    step: Z,
    remaining: usize,
}

impl LineGen {
    pub fn new(start: Z, end: Z, frames: usize) -> LineGen {
        let step = if frames > 1 {
            (end - start) / (frames - 1) as Z
        } else {
            0.0
        };
        LineGen {
            current: start,
            step,
            remaining: frames,
        }
    }
}

impl Gen for LineGen {
    fn name(&self) -> &'static str {
        "line"
    }

    fn pull(&mut self, _th: &mut Thread) -> Result<Pulled> {
        if self.remaining == 0 {
            return Ok(Pulled::End);
        }
        let n = self.remaining.min(BLOCK_SIZE);
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.current);
            self.current += self.step;
        }
        self.remaining -= n;
        let array = Array::from_zs(out);
        Ok(if self.remaining == 0 {
            Pulled::Last(array)
        } else {
            Pulled::Block(array)
        })
    }
}
