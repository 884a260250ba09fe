//! BDF-style continuous dump: a header describing `nchannels + 1` channels
//! (data plus a status channel) followed by the raw pre-gain integer samples
//! of every decoded chunk. Playback of a dump (used by the emulator device)
//! re-frames the stored samples the way the emulator's own wire frames look,
//! so gain round-trips exactly through a write/read cycle.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::BciError;

const MAGIC: &[u8; 4] = b"BDFR";

/// Appends raw (pre-gain) chunks to a simple binary dump, closed on `drop`.
pub struct BdfWriter {
    writer: BufWriter<File>,
    nchannels: usize,
}

impl BdfWriter {
    pub fn create(
        path: impl AsRef<Path>,
        nchannels: usize,
        sample_rate: f64,
        labels: &[String],
    ) -> Result<Self, BciError> {
        let file = File::create(path.as_ref())
            .map_err(|source| BciError::io(source, format!("creating BDF dump at {:?}", path.as_ref())))?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer, nchannels, sample_rate, labels)
            .map_err(|source| BciError::io(source, "writing BDF header"))?;
        Ok(Self { writer, nchannels })
    }

    /// Write one decoded chunk's raw channel samples and status vector.
    /// `samples` is `nchannels * ninstances` long in channel-major order.
    pub fn write_chunk(&mut self, samples: &[i32], status: &[i32]) -> Result<(), BciError> {
        debug_assert_eq!(samples.len(), self.nchannels * status.len());
        let ninstances = status.len() as u32;
        (|| -> io::Result<()> {
            self.writer.write_u32::<LittleEndian>(ninstances)?;
            for &s in samples {
                self.writer.write_i32::<LittleEndian>(s)?;
            }
            for &s in status {
                self.writer.write_i32::<LittleEndian>(s)?;
            }
            Ok(())
        })()
        .map_err(|source| BciError::io(source, "writing BDF chunk"))
    }

    pub fn flush(&mut self) -> Result<(), BciError> {
        self.writer
            .flush()
            .map_err(|source| BciError::io(source, "flushing BDF writer"))
    }
}

fn write_header(
    w: &mut impl Write,
    nchannels: usize,
    sample_rate: f64,
    labels: &[String],
) -> io::Result<()> {
    w.write_all(MAGIC)?;
    w.write_u32::<LittleEndian>(nchannels as u32)?;
    w.write_f64::<LittleEndian>(sample_rate)?;
    w.write_u32::<LittleEndian>(labels.len() as u32)?;
    for label in labels {
        let bytes = label.as_bytes();
        w.write_u32::<LittleEndian>(bytes.len() as u32)?;
        w.write_all(bytes)?;
    }
    Ok(())
}

/// Plays a `BdfWriter` dump back as a `Read` stream of emulator-shaped wire
/// frames (sync byte, sequence number, `i16` channels, `i16` status), one
/// frame per recorded instance.
pub struct BdfReader {
    reader: BufReader<File>,
    nchannels: usize,
    sample_rate: f64,
    labels: Vec<String>,
    pending: VecDeque<(Vec<i32>, i32)>,
    seq: u8,
}

impl BdfReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BciError> {
        let file = File::open(path.as_ref())
            .map_err(|source| BciError::io(source, format!("opening BDF dump at {:?}", path.as_ref())))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|source| BciError::io(source, "reading BDF magic"))?;
        if &magic != MAGIC {
            return Err(BciError::device("not a recognized BDF dump"));
        }

        let nchannels = reader
            .read_u32::<LittleEndian>()
            .map_err(|source| BciError::io(source, "reading BDF channel count"))? as usize;
        let sample_rate = reader
            .read_f64::<LittleEndian>()
            .map_err(|source| BciError::io(source, "reading BDF sample rate"))?;
        let nlabels = reader
            .read_u32::<LittleEndian>()
            .map_err(|source| BciError::io(source, "reading BDF label count"))?;

        let mut labels = Vec::with_capacity(nlabels as usize);
        for _ in 0..nlabels {
            let len = reader
                .read_u32::<LittleEndian>()
                .map_err(|source| BciError::io(source, "reading BDF label length"))?;
            let mut buf = vec![0u8; len as usize];
            reader
                .read_exact(&mut buf)
                .map_err(|source| BciError::io(source, "reading BDF label"))?;
            labels.push(String::from_utf8_lossy(&buf).into_owned());
        }

        Ok(Self {
            reader,
            nchannels,
            sample_rate,
            labels,
            pending: VecDeque::new(),
            seq: 0,
        })
    }

    pub fn nchannels(&self) -> usize {
        self.nchannels
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn channel_labels(&self) -> Vec<String> {
        self.labels.clone()
    }

    fn refill(&mut self) -> io::Result<bool> {
        let ninstances = match self.reader.read_u32::<LittleEndian>() {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e),
        };

        let mut samples = vec![0i32; self.nchannels * ninstances as usize];
        for s in samples.iter_mut() {
            *s = self.reader.read_i32::<LittleEndian>()?;
        }
        let mut status = vec![0i32; ninstances as usize];
        for s in status.iter_mut() {
            *s = self.reader.read_i32::<LittleEndian>()?;
        }

        for i in 0..ninstances as usize {
            let channels = (0..self.nchannels).map(|c| samples[c * ninstances as usize + i]).collect();
            self.pending.push_back((channels, status[i]));
        }
        Ok(true)
    }
}

impl Read for BdfReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let frame_size = 2 + self.nchannels * 2 + 2;
        if buf.len() < frame_size {
            return Ok(0);
        }

        if self.pending.is_empty() && !self.refill()? {
            return Ok(0);
        }

        let max_frames = buf.len() / frame_size;
        let mut written = 0;
        while written < max_frames {
            let Some((channels, status)) = self.pending.pop_front() else {
                break;
            };
            let off = written * frame_size;
            buf[off] = 0xAA;
            buf[off + 1] = self.seq;
            self.seq = self.seq.wrapping_add(1);
            for (c, value) in channels.iter().enumerate() {
                let bytes = (*value as i16).to_le_bytes();
                buf[off + 2 + c * 2] = bytes[0];
                buf[off + 2 + c * 2 + 1] = bytes[1];
            }
            let status_off = off + 2 + self.nchannels * 2;
            let bytes = (status as i16).to_le_bytes();
            buf[status_off] = bytes[0];
            buf[status_off + 1] = bytes[1];
            written += 1;
        }

        Ok(written * frame_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_reads_back_a_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.bdfr");

        let labels = vec!["a".to_string(), "b".to_string()];
        let mut writer = BdfWriter::create(&path, 2, 1000.0, &labels).unwrap();
        writer.write_chunk(&[1, 2, 3, 4, 5, 6], &[0, 0, 7]).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut reader = BdfReader::open(&path).unwrap();
        assert_eq!(reader.nchannels(), 2);
        assert_eq!(reader.sample_rate(), 1000.0);
        assert_eq!(reader.channel_labels(), labels);

        let frame_size = 2 + 2 * 2 + 2;
        let mut buf = vec![0u8; frame_size * 3];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(n, frame_size * 3);
    }
}
