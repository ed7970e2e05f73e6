//! Bit-packing of raw IF samples into the on-disk format
//!
//! The front-end delivers one byte per sample (real modes, 2 significant bits)
//! or per interleaved I/Q pair (complex modes, 4 significant bits). Packing
//! squeezes four real or two complex samples into every output byte, lowest
//! bits first.

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use crate::{
    errors::{Error, Result},
    mode::Mode,
    PackedBlock, UnpackedBlock,
};

const TWO_BIT_MASK: u8 = 0x03;
const FOUR_BIT_MASK: u8 = 0x0F;

/// Pack `unpacked` according to a pack factor and complex flag pair. Only
/// (4, real) and (2, complex) are meaningful, anything else is an error.
pub fn pack(unpacked: &[u8], pack_factor: u8, complex: bool) -> Result<PackedBlock> {
    let (mask, width) = match (pack_factor, complex) {
        (4, false) => (TWO_BIT_MASK, 2),
        (2, true) => (FOUR_BIT_MASK, 4),
        _ => {
            return Err(Error::IncompatiblePacking {
                pack_factor,
                complex,
            })
        }
    };
    if unpacked.len() % pack_factor as usize != 0 {
        return Err(Error::RaggedBlock {
            len: unpacked.len(),
            pack_factor,
        });
    }
    Ok(unpacked
        .chunks_exact(pack_factor as usize)
        .map(|group| {
            group
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, s)| acc | ((s & mask) << (i * width)))
        })
        .collect())
}

/// Inverse of [`pack`]: spread every packed byte back out, one sample per byte
pub fn unpack(packed: &[u8], pack_factor: u8, complex: bool) -> Result<UnpackedBlock> {
    let (mask, width) = match (pack_factor, complex) {
        (4, false) => (TWO_BIT_MASK, 2),
        (2, true) => (FOUR_BIT_MASK, 4),
        _ => {
            return Err(Error::IncompatiblePacking {
                pack_factor,
                complex,
            })
        }
    };
    Ok(packed
        .iter()
        .flat_map(|b| (0..pack_factor as usize).map(move |i| (b >> (i * width)) & mask))
        .collect())
}

/// Pack every block coming off the unpacked IF queue into the packed IF queue.
/// Returns once the unpacked queue is closed and everything in it has been packed.
pub fn pack_stream(
    rx: Receiver<UnpackedBlock>,
    tx: Sender<PackedBlock>,
    mode: Mode,
) -> Result<()> {
    let mut blocks = 0usize;
    for unpacked in rx {
        let packed = pack(&unpacked, mode.pack_factor(), mode.is_complex())?;
        tx.send(packed).map_err(|_| Error::QueueClosed("packed IF"))?;
        blocks += 1;
    }
    debug!(blocks, "Packer drained");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};
    use std::thread;

    #[test]
    fn test_real_packing() {
        let (a, b, c, d) = (0xFEu8, 0x01u8, 0x12u8, 0x33u8);
        let expected = (a & 3) | ((b & 3) << 2) | ((c & 3) << 4) | ((d & 3) << 6);
        assert_eq!(pack(&[a, b, c, d], 4, false).unwrap(), vec![expected]);
        assert_eq!(pack(&[1, 2, 3, 0, 3, 3, 3, 3], 4, false).unwrap(), vec![0x39, 0xFF]);
    }

    #[test]
    fn test_complex_packing() {
        let (a, b) = (0xA7u8, 0x3Cu8);
        assert_eq!(
            pack(&[a, b], 2, true).unwrap(),
            vec![(a & 0xF) | ((b & 0xF) << 4)]
        );
    }

    #[test]
    fn test_invalid_layouts_rejected() {
        for (factor, complex) in [(4, true), (2, false), (1, false), (8, true)] {
            assert!(matches!(
                pack(&[0; 8], factor, complex),
                Err(Error::IncompatiblePacking { .. })
            ));
        }
    }

    #[test]
    fn test_ragged_block_rejected() {
        assert!(matches!(
            pack(&[0; 6], 4, false),
            Err(Error::RaggedBlock { len: 6, .. })
        ));
    }

    #[test]
    fn test_repack_keeps_low_bits() {
        let raw: Vec<u8> = (0..=255u8).collect();
        for (factor, complex, mask) in [(4, false, 0x03), (2, true, 0x0F)] {
            let packed = pack(&raw, factor, complex).unwrap();
            assert_eq!(packed.len(), raw.len() / factor as usize);
            let unpacked = unpack(&packed, factor, complex).unwrap();
            let low: Vec<u8> = raw.iter().map(|b| b & mask).collect();
            assert_eq!(unpacked, low);
            assert_eq!(pack(&unpacked, factor, complex).unwrap(), packed);
        }
    }

    #[test]
    fn test_pack_stream_preserves_order() {
        let (utx, urx) = unbounded();
        let (ptx, prx) = unbounded();
        for i in 0..4u8 {
            utx.send(vec![i, i]).unwrap();
        }
        drop(utx);
        pack_stream(urx, ptx, Mode::new(8).unwrap()).unwrap();
        let out: Vec<_> = prx.iter().collect();
        assert_eq!(out, vec![vec![0x00], vec![0x11], vec![0x22], vec![0x33]]);
    }

    #[test]
    fn test_pack_stream_drains_after_close() {
        let (utx, urx) = bounded(8);
        let (ptx, prx) = unbounded();
        let packer = thread::spawn(move || pack_stream(urx, ptx, Mode::new(1).unwrap()));
        for _ in 0..3 {
            utx.send(vec![0x01, 0x02, 0x03, 0x00]).unwrap();
        }
        drop(utx);
        packer.join().unwrap().unwrap();
        assert_eq!(prx.try_iter().collect::<Vec<_>>(), vec![vec![0x39]; 3]);
    }

    #[test]
    fn test_pack_stream_fails_when_writer_is_gone() {
        let (utx, urx) = unbounded();
        let (ptx, prx) = unbounded();
        drop(prx);
        utx.send(vec![0; 4]).unwrap();
        drop(utx);
        assert!(matches!(
            pack_stream(urx, ptx, Mode::new(1).unwrap()),
            Err(Error::QueueClosed(_))
        ));
    }
}
