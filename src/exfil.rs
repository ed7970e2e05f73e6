//! This module is responsible for exfilling AGC and IF data to disk

use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use tracing::{debug, info};

use crate::{
    errors::{Error, Result},
    AgcBatch, PackedBlock,
};

/// Size past which the circular IF file starts over at the beginning
pub const MAX_CIRCULAR_IF_SIZE: u64 = 50 * 1024 * 1024 * 1024;

/// Convert a chrono DateTime into the timestamp used in output filenames
fn file_timestamp(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H-%M-%S").to_string()
}

/// `<prefix>_<kind>_<timestamp>.bin`
pub fn output_path(log_name: &str, kind: &str, start: &DateTime<Utc>) -> PathBuf {
    PathBuf::from(format!("{log_name}_{kind}_{}.bin", file_timestamp(start)))
}

/// Open a fresh output file. An existing file is never truncated, so a session
/// restarted within the same second fails instead of overwriting the last one.
pub fn create_output(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| Error::OutputFile {
            path: path.to_owned(),
            source,
        })
}

/// An output that wraps back to offset zero once it grows past a ceiling
pub struct CircularWriter<W> {
    inner: W,
    position: u64,
    ceiling: Option<u64>,
    laps: usize,
}

impl<W: Write + Seek> CircularWriter<W> {
    /// `ceiling` of `None` makes a plain append-only writer
    pub fn new(inner: W, ceiling: Option<u64>) -> Self {
        Self {
            inner,
            position: 0,
            ceiling,
            laps: 0,
        }
    }

    /// Write a block verbatim, wrap if we're now past the ceiling, then flush
    pub fn write_block(&mut self, block: &[u8]) -> Result<()> {
        self.inner.write_all(block)?;
        self.position += block.len() as u64;
        if matches!(self.ceiling, Some(c) if self.position > c) {
            info!(position = self.position, "A new circle");
            self.inner.seek(SeekFrom::Start(0))?;
            self.position = 0;
            self.laps += 1;
        }
        self.inner.flush()?;
        Ok(())
    }

    /// Offset the next block will be written at
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn laps(&self) -> usize {
        self.laps
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Drain the packed IF queue into `out` until the queue is closed and empty
pub fn write_if<W: Write + Seek>(
    rx: Receiver<PackedBlock>,
    out: &mut CircularWriter<W>,
) -> Result<()> {
    for block in rx {
        out.write_block(&block)?;
    }
    info!(position = out.position(), laps = out.laps(), "Stopping IF write");
    Ok(())
}

/// Drain the AGC queue into `out`, one `(sample, timestamp)` pair of
/// little-endian u32s per sample
pub fn write_agc<W: Write>(rx: Receiver<AgcBatch>, out: W) -> Result<()> {
    let mut out = BufWriter::new(out);
    let mut records = 0usize;
    for batch in rx {
        for (sample, timestamp) in batch.records() {
            out.write_all(&u32::from(sample).to_le_bytes())?;
            // Seconds since the epoch fit in 32 bits until 2106
            out.write_all(&(timestamp as u32).to_le_bytes())?;
            records += 1;
        }
        out.flush()?;
    }
    out.flush()?;
    debug!(records, "AGC writer drained");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crossbeam_channel::unbounded;
    use std::{io::Cursor, thread, time::Duration};

    #[test]
    fn test_output_path() {
        let start = Utc.with_ymd_and_hms(2024, 3, 9, 17, 5, 2).unwrap();
        assert_eq!(
            output_path("data/rec", "IF", &start),
            PathBuf::from("data/rec_IF_2024-03-09T17-05-02.bin")
        );
    }

    #[test]
    fn test_existing_output_is_not_truncated() {
        let start = Utc::now();
        let prefix = std::env::temp_dir().join(format!("sige_exfil_{}", std::process::id()));
        let path = output_path(&prefix.to_string_lossy(), "AGC", &start);
        let _ = std::fs::remove_file(&path);

        let mut first = create_output(&path).unwrap();
        first.write_all(&[1, 2, 3]).unwrap();
        drop(first);
        assert!(matches!(
            create_output(&path),
            Err(Error::OutputFile { path: p, .. }) if p == path
        ));
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_wraps_only_past_ceiling() {
        let mut w = CircularWriter::new(Cursor::new(Vec::new()), Some(8));
        w.write_block(&[1; 4]).unwrap();
        w.write_block(&[2; 4]).unwrap();
        // Exactly at the ceiling is not past it
        assert_eq!(w.position(), 8);
        assert_eq!(w.laps(), 0);
        w.write_block(&[3; 4]).unwrap();
        assert_eq!(w.position(), 0);
        assert_eq!(w.laps(), 1);
        w.write_block(&[4; 2]).unwrap();
        assert_eq!(
            w.into_inner().into_inner(),
            vec![4, 4, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]
        );
    }

    #[test]
    fn test_linear_never_wraps() {
        let mut w = CircularWriter::new(Cursor::new(Vec::new()), None);
        for _ in 0..10 {
            w.write_block(&[7; 100]).unwrap();
        }
        assert_eq!(w.position(), 1000);
        assert_eq!(w.into_inner().into_inner().len(), 1000);
    }

    #[test]
    fn test_if_writer_drains_after_shutdown() {
        let (tx, rx) = unbounded();
        let writer = thread::spawn(move || {
            let mut out = CircularWriter::new(Cursor::new(Vec::new()), None);
            write_if(rx, &mut out).map(|_| out.into_inner().into_inner())
        });
        // Writer is blocked waiting when the items and the shutdown arrive
        thread::sleep(Duration::from_millis(20));
        for i in 0..3u8 {
            tx.send(vec![i; 4]).unwrap();
        }
        drop(tx);
        let written = writer.join().unwrap().unwrap();
        assert_eq!(written, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_agc_records_are_interleaved() {
        let (tx, rx) = unbounded();
        tx.send(AgcBatch::stamped(vec![0x0123, 0x0FFF], 1_700_000_000))
            .unwrap();
        tx.send(AgcBatch::stamped(vec![], 1_700_000_001)).unwrap();
        tx.send(AgcBatch::stamped(vec![7], 1_700_000_002)).unwrap();
        drop(tx);
        let mut out = Vec::new();
        write_agc(rx, &mut out).unwrap();
        assert_eq!(out.len(), 3 * 8);
        let words: Vec<u32> = out
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes(w.try_into().unwrap()))
            .collect();
        assert_eq!(
            words,
            vec![0x0123, 1_700_000_000, 0x0FFF, 1_700_000_000, 7, 1_700_000_002]
        );
    }
}
