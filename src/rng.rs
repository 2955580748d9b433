//! Buffered random source.
//!
//! All randomness in the fuzzer is drawn from one process-wide byte stream so
//! that a run is fully determined by its seed. The source keeps a 512 KiB
//! buffer refilled from a seeded [`StdRng`] in one call, amortizing generator
//! overhead across the millions of small draws a cycle makes.
//!
//! The seed can be injected (`Options.SeedInFile`) to replay a prior run, or
//! captured at startup (`Options.SeedOutFile`). The source is passed into the
//! cycle at construction — it is a service, not a global.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{RngCore as _, SeedableRng as _};

use crate::error::{ErrorContext as _, FuzzerError, Result};

/// Size of the refill buffer.
const BUFFER_SIZE: usize = 512 * 1024;

/// Seed width in bytes (hex-encoded in seed files).
pub const SEED_LEN: usize = 32;

// ---------------------------------------------------------------------------
// RandomSource
// ---------------------------------------------------------------------------

/// Thread-safe buffered random byte stream.
pub struct RandomSource {
    inner: Mutex<Buffer>,
    seed: [u8; SEED_LEN],
}

struct Buffer {
    rng: StdRng,
    buf: Box<[u8; BUFFER_SIZE]>,
    pos: usize,
}

impl RandomSource {
    /// Create a source seeded from OS entropy.
    #[must_use]
    pub fn new() -> Self {
        let mut seed = [0_u8; SEED_LEN];
        rand::rng().fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Create a source with an explicit seed (replay).
    #[must_use]
    pub fn from_seed(seed: [u8; SEED_LEN]) -> Self {
        let mut rng = StdRng::from_seed(seed);
        let mut buf = Box::new([0_u8; BUFFER_SIZE]);
        rng.fill_bytes(&mut buf[..]);
        Self {
            inner: Mutex::new(Buffer { rng, buf, pos: 0 }),
            seed,
        }
    }

    /// Create a source from a seed file written by [`RandomSource::write_seed_file`].
    pub fn from_seed_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading seed file {}", path.display()))?;
        let seed = parse_seed(text.trim())?;
        Ok(Self::from_seed(seed))
    }

    /// The seed this source was built with.
    #[must_use]
    pub fn seed(&self) -> [u8; SEED_LEN] {
        self.seed
    }

    /// Persist the seed as lowercase hex.
    pub fn write_seed_file(&self, path: &Path) -> Result<()> {
        let mut text = String::with_capacity(SEED_LEN * 2 + 1);
        for b in self.seed {
            text.push_str(&format!("{b:02x}"));
        }
        text.push('\n');
        fs::write(path, text).with_context(|| format!("writing seed file {}", path.display()))
    }

    /// Fill `out` with random bytes.
    pub fn fill(&self, out: &mut [u8]) {
        let mut inner = self.inner.lock().expect("random source poisoned");
        let mut written = 0;
        while written < out.len() {
            if inner.pos == BUFFER_SIZE {
                let Buffer { rng, buf, pos } = &mut *inner;
                rng.fill_bytes(&mut buf[..]);
                *pos = 0;
            }
            let take = (out.len() - written).min(BUFFER_SIZE - inner.pos);
            let pos = inner.pos;
            out[written..written + take].copy_from_slice(&inner.buf[pos..pos + take]);
            inner.pos += take;
            written += take;
        }
    }

    /// A uniform `u64`.
    pub fn u64(&self) -> u64 {
        let mut b = [0_u8; 8];
        self.fill(&mut b);
        u64::from_le_bytes(b)
    }

    /// A uniform `u32`.
    pub fn u32(&self) -> u32 {
        let mut b = [0_u8; 4];
        self.fill(&mut b);
        u32::from_le_bytes(b)
    }

    /// A uniform `i64`.
    pub fn i64(&self) -> i64 {
        self.u64() as i64
    }

    /// A uniform draw in `[0, bound)` by modulo. `bound` must be non-zero.
    pub fn u64_below(&self, bound: u64) -> u64 {
        debug_assert!(bound > 0, "u64_below requires a non-zero bound");
        self.u64() % bound
    }

    /// A uniform draw in the inclusive range `[lower, upper]`.
    pub fn u64_range(&self, lower: u64, upper: u64) -> u64 {
        debug_assert!(lower <= upper);
        let span = upper - lower;
        if span == u64::MAX {
            return self.u64();
        }
        lower + self.u64_below(span + 1)
    }

    /// A uniform draw in the inclusive signed range `[lower, upper]`.
    pub fn i64_range(&self, lower: i64, upper: i64) -> i64 {
        debug_assert!(lower <= upper);
        let span = upper.wrapping_sub(lower) as u64;
        if span == u64::MAX {
            return self.i64();
        }
        lower.wrapping_add(self.u64_below(span + 1) as i64)
    }

    /// A coin flip.
    pub fn bool(&self) -> bool {
        self.u64() & 1 == 1
    }

    /// A uniform `f64` in `[0, 1)`.
    pub fn f64_unit(&self) -> f64 {
        // 53 mantissa bits.
        (self.u64() >> 11) as f64 / (1_u64 << 53) as f64
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_seed(text: &str) -> Result<[u8; SEED_LEN]> {
    if text.len() != SEED_LEN * 2 {
        return Err(FuzzerError::new(format!(
            "seed must be {} hex characters, got {}",
            SEED_LEN * 2,
            text.len()
        )));
    }
    let mut seed = [0_u8; SEED_LEN];
    for (i, chunk) in text.as_bytes().chunks(2).enumerate() {
        let pair = std::str::from_utf8(chunk)
            .map_err(|_| FuzzerError::new("seed must be ASCII hex"))?;
        seed[i] = u8::from_str_radix(pair, 16)
            .map_err(|_| FuzzerError::new(format!("invalid hex in seed: {pair:?}")))?;
    }
    Ok(seed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
