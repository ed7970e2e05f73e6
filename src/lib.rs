pub mod args;
pub mod capture;
pub mod config;
pub mod errors;
pub mod exfil;
pub mod launch;
pub mod mode;
pub mod monitoring;
pub mod packing;
pub mod protocol;
pub mod recorder;
pub mod sync;

// We need a lot of transfers queued to survive scheduling hiccups of the OS.
// 256 was not enough at normal priority over 12h, 768 was.
pub const NUM_TRANSFERS: usize = 768;
// Big enough buffers that the pump doesn't wake up too often
pub const TRANSFER_SIZE: usize = 16384;

// Queue depths, in blocks
pub const UNPACKED_QUEUE_DEPTH: usize = 4 * NUM_TRANSFERS;
pub const PACKED_QUEUE_DEPTH: usize = NUM_TRANSFERS;
pub const AGC_QUEUE_DEPTH: usize = 64;

/// Raw bytes of one completed IF transfer
pub type UnpackedBlock = Vec<u8>;
/// IF samples after bit-packing
pub type PackedBlock = Vec<u8>;

/// One poll's worth of AGC samples, each paired with the poll's Unix time
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgcBatch {
    samples: Vec<u16>,
    timestamps: Vec<i64>,
}

impl AgcBatch {
    /// Stamp every sample with the same `timestamp`
    pub fn stamped(samples: Vec<u16>, timestamp: i64) -> Self {
        let timestamps = vec![timestamp; samples.len()];
        Self {
            samples,
            timestamps,
        }
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `(sample, timestamp)` pairs in acquisition order
    pub fn records(&self) -> impl Iterator<Item = (u16, i64)> + '_ {
        self.samples
            .iter()
            .copied()
            .zip(self.timestamps.iter().copied())
    }
}
