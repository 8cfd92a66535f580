use std::f32::consts::PI;

/// Zero-lag taps per side, in units of the larger rate factor
const HALF_TAPS_PER_FACTOR: usize = 10;

/// Streaming polyphase resampler for 16-bit PCM
///
/// Converts by the rational factor `up/down` (reduced by the gcd of the two
/// rates) with a Hamming-windowed sinc low-pass. Chunks may be fed in any
/// size; output is produced as soon as enough input lookahead is buffered and
/// `flush` emits the tail. Output is aligned with input (no filter delay).
pub struct Resampler {
    up: u64,
    down: u64,
    half: u64,
    taps: Vec<f32>,
    buffer: Vec<f32>,
    /// Absolute input index of `buffer[0]`
    base: u64,
    total_in: u64,
    next_out: u64,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let divisor = gcd(from_rate.max(1) as u64, to_rate.max(1) as u64);
        let up = to_rate.max(1) as u64 / divisor;
        let down = from_rate.max(1) as u64 / divisor;
        let factor = up.max(down);
        let half = HALF_TAPS_PER_FACTOR as u64 * factor;

        let len = (2 * half + 1) as usize;
        let taps = (0..len)
            .map(|j| {
                let x = (j as f32 - half as f32) / factor as f32;
                let window = 0.54 - 0.46 * (2.0 * PI * j as f32 / (len - 1) as f32).cos();
                sinc(x) / factor as f32 * window
            })
            .collect();

        Self {
            up,
            down,
            half,
            taps,
            buffer: Vec::new(),
            base: 0,
            total_in: 0,
            next_out: 0,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.up == self.down
    }

    /// Feed a chunk and collect whatever output is ready
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if self.is_passthrough() {
            return input.to_vec();
        }
        self.buffer.extend(input.iter().map(|&s| s as f32));
        self.total_in += input.len() as u64;
        self.drain(false)
    }

    /// Emit the remaining output and reset for a new stream
    pub fn flush(&mut self) -> Vec<i16> {
        if self.is_passthrough() {
            return Vec::new();
        }
        let out = self.drain(true);
        self.buffer.clear();
        self.base = 0;
        self.total_in = 0;
        self.next_out = 0;
        out
    }

    fn drain(&mut self, flushing: bool) -> Vec<i16> {
        let expected_total = (self.total_in * self.up).div_ceil(self.down);
        let mut out = Vec::new();

        loop {
            let n = self.next_out;
            if flushing && n >= expected_total {
                break;
            }
            let t = n * self.down;
            let last = (t + self.half) / self.up;
            if !flushing && last >= self.total_in {
                break;
            }
            let first = t.saturating_sub(self.half).div_ceil(self.up).max(self.base);

            let mut acc = 0.0f32;
            let mut i = first;
            while i <= last && i < self.total_in {
                let tap = (t + self.half - i * self.up) as usize;
                acc += self.taps[tap] * self.buffer[(i - self.base) as usize];
                i += 1;
            }
            let sample = (acc * self.up as f32).round();
            out.push(sample.clamp(i16::MIN as f32, i16::MAX as f32) as i16);
            self.next_out += 1;
        }

        let keep_from = (self.next_out * self.down).saturating_sub(self.half) / self.up;
        if keep_from > self.base {
            let drop = ((keep_from - self.base) as usize).min(self.buffer.len());
            self.buffer.drain(..drop);
            self.base += drop as u64;
        }
        out
    }
}

/// Resample a whole buffer in one call
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    let mut resampler = Resampler::new(from_rate, to_rate);
    let mut out = resampler.process(samples);
    out.extend(resampler.flush());
    out
}

fn sinc(x: f32) -> f32 {
    if x.abs() < 1e-6 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}
