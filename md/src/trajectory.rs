//! Binary coordinate trajectories in the CHARMM/NAMD DCD layout.
//!
//! A DCD file is a sequence of Fortran unformatted records, each framed by
//! its byte length as a 32-bit integer on both sides. The header holds the
//! frame count, first step, save interval and time step; each frame is three
//! records of single-precision X, Y and Z coordinates in ångström.
//!
//! Frames are assembled in memory and written with a single `write_all`. If
//! the write fails the file is truncated back to the last complete frame, so
//! a reader never sees a partial frame produced by this writer.

use crate::error::{MdError, Result};
use crate::reporter::{Frame, Reporter};
use crate::units::{AKMA_TIME_PS, NM_TO_ANGSTROM};
use itertools::izip;
use nalgebra::Vector3;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const HEADER_MAGIC: &[u8; 4] = b"CORD";
const HEADER_RECORD_LEN: i32 = 84;
const CHARMM_VERSION: i32 = 24;
const TITLE_LINE_LEN: usize = 80;
const MAX_TITLE_LINES: usize = 64;
/// Largest atom count whose coordinate block length fits the i32 record marker.
const MAX_ATOMS: usize = i32::MAX as usize / 4;

// Byte offsets of the fields patched after every frame.
const NSET_OFFSET: u64 = 8;
const ISTART_OFFSET: u64 = 12;
const NSTEP_OFFSET: u64 = 20;

/// Writes frames to a DCD file, keeping the header consistent after every frame.
pub struct DcdWriter {
    file: File,
    path: PathBuf,
    n_atoms: usize,
    interval: u64,
    frames: u64,
    first_step: Option<u64>,
    committed_len: u64,
}

impl DcdWriter {
    /// Create `path` and write the header immediately.
    ///
    /// `interval` is the number of steps between frames and `dt` the
    /// integration time step in ps.
    pub fn create<P: AsRef<Path>>(path: P, n_atoms: usize, interval: u64, dt: f64, title: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if n_atoms == 0 || n_atoms > MAX_ATOMS {
            return Err(MdError::Configuration(format!(
                "cannot write a trajectory for {} atoms",
                n_atoms
            )));
        }
        if interval == 0 {
            return Err(MdError::Configuration("Trajectory interval must be positive".to_string()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| MdError::io(path.display().to_string(), e))?;

        let header = encode_header(n_atoms, interval, dt, title);
        let mut writer = DcdWriter {
            file,
            path,
            n_atoms,
            interval,
            frames: 0,
            first_step: None,
            committed_len: header.len() as u64,
        };
        writer
            .file
            .write_all(&header)
            .map_err(|e| MdError::io(writer.sink_name(), e))?;
        tracing::debug!("Opened trajectory {} for {} atoms", writer.path.display(), n_atoms);
        Ok(writer)
    }

    fn sink_name(&self) -> String {
        self.path.display().to_string()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Append one frame. Positions are in nm.
    pub fn write_frame(&mut self, step: u64, positions: &[Vector3<f64>]) -> Result<()> {
        if positions.len() != self.n_atoms {
            return Err(MdError::TrajectoryFormat(format!(
                "frame has {} atoms, trajectory expects {}",
                positions.len(),
                self.n_atoms
            )));
        }
        if positions.iter().any(|p| !p.iter().all(|c| c.is_finite())) {
            return Err(MdError::NumericalInstability(format!(
                "refusing to write non-finite coordinates at step {}",
                step
            )));
        }
        if let Some(first) = self.first_step {
            let expected = first + self.frames * self.interval;
            if step != expected {
                tracing::warn!(
                    "Trajectory frame at step {} does not follow the header spacing (expected {})",
                    step,
                    expected
                );
            }
        }

        let frame = encode_frame(positions);
        if let Err(e) = self.append(&frame) {
            // Drop whatever part of the frame reached the disk.
            if let Err(trunc) = self.file.set_len(self.committed_len) {
                tracing::error!("Could not truncate {} after a failed write: {}", self.path.display(), trunc);
            }
            return Err(MdError::io(self.sink_name(), e));
        }
        self.committed_len += frame.len() as u64;
        self.frames += 1;
        let first = *self.first_step.get_or_insert(step);

        let last = first + (self.frames - 1) * self.interval;
        self.patch_header(first, last)
            .map_err(|e| MdError::io(self.sink_name(), e))
    }

    fn append(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(self.committed_len))?;
        self.file.write_all(bytes)
    }

    fn patch_header(&mut self, first: u64, last: u64) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(NSET_OFFSET))?;
        self.file.write_all(&clamp_i32(self.frames).to_le_bytes())?;
        self.file.seek(SeekFrom::Start(ISTART_OFFSET))?;
        self.file.write_all(&clamp_i32(first).to_le_bytes())?;
        self.file.seek(SeekFrom::Start(NSTEP_OFFSET))?;
        self.file.write_all(&clamp_i32(last).to_le_bytes())?;
        self.file.seek(SeekFrom::Start(self.committed_len))?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(|e| MdError::io(self.sink_name(), e))
    }
}

fn clamp_i32(value: u64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn encode_header(n_atoms: usize, interval: u64, dt: f64, title: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(196);

    let mut icntrl = [0i32; 20];
    icntrl[2] = clamp_i32(interval);
    icntrl[19] = CHARMM_VERSION;
    buf.extend_from_slice(&HEADER_RECORD_LEN.to_le_bytes());
    buf.extend_from_slice(HEADER_MAGIC);
    for (i, value) in icntrl.iter().enumerate() {
        if i == 9 {
            buf.extend_from_slice(&((dt / AKMA_TIME_PS) as f32).to_le_bytes());
        } else {
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
    buf.extend_from_slice(&HEADER_RECORD_LEN.to_le_bytes());

    let mut line = [b' '; TITLE_LINE_LEN];
    for (dst, src) in line.iter_mut().zip(title.bytes()) {
        *dst = src;
    }
    let title_len = (4 + TITLE_LINE_LEN) as i32;
    buf.extend_from_slice(&title_len.to_le_bytes());
    buf.extend_from_slice(&1i32.to_le_bytes());
    buf.extend_from_slice(&line);
    buf.extend_from_slice(&title_len.to_le_bytes());

    buf.extend_from_slice(&4i32.to_le_bytes());
    buf.extend_from_slice(&(n_atoms as i32).to_le_bytes());
    buf.extend_from_slice(&4i32.to_le_bytes());
    buf
}

fn encode_frame(positions: &[Vector3<f64>]) -> Vec<u8> {
    let block = (4 * positions.len()) as i32;
    let mut buf = Vec::with_capacity(3 * (8 + 4 * positions.len()));
    for axis in 0..3 {
        buf.extend_from_slice(&block.to_le_bytes());
        for p in positions {
            buf.extend_from_slice(&((p[axis] * NM_TO_ANGSTROM) as f32).to_le_bytes());
        }
        buf.extend_from_slice(&block.to_le_bytes());
    }
    buf
}

/// Reporter that appends a DCD frame every `interval` steps.
pub struct CoordinateReporter {
    writer: DcdWriter,
    name: String,
}

impl CoordinateReporter {
    pub fn create<P: AsRef<Path>>(path: P, n_atoms: usize, interval: u64, dt: f64) -> Result<Self> {
        let writer = DcdWriter::create(path, n_atoms, interval, dt, "Created by md-engine")?;
        let name = format!("trajectory {}", writer.path().display());
        Ok(CoordinateReporter { writer, name })
    }

    pub fn frames_written(&self) -> u64 {
        self.writer.frames_written()
    }
}

impl Reporter for CoordinateReporter {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> u64 {
        self.writer.interval
    }

    fn report(&mut self, frame: &Frame<'_>) -> Result<()> {
        self.writer.write_frame(frame.step, frame.positions)
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        tracing::debug!(
            "Closed trajectory {} with {} frames",
            self.writer.path().display(),
            self.writer.frames_written()
        );
        Ok(())
    }
}

/// One frame read back from a trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFrame {
    pub step: u64,
    /// Simulated time in ps.
    pub time: f64,
    /// Positions in nm.
    pub positions: Vec<Vector3<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

impl Endian {
    fn i32(self, bytes: [u8; 4]) -> i32 {
        match self {
            Endian::Little => i32::from_le_bytes(bytes),
            Endian::Big => i32::from_be_bytes(bytes),
        }
    }

    fn f32(self, bytes: [u8; 4]) -> f32 {
        match self {
            Endian::Little => f32::from_le_bytes(bytes),
            Endian::Big => f32::from_be_bytes(bytes),
        }
    }
}

/// Header fields of a DCD file.
#[derive(Debug, Clone, PartialEq)]
pub struct DcdHeader {
    /// Frame count recorded in the header.
    pub frames: u64,
    pub first_step: u64,
    pub interval: u64,
    /// Integration time step in ps.
    pub dt: f64,
    pub n_atoms: usize,
    pub title: String,
    has_unit_cell: bool,
}

/// Streams frames from a DCD file. Reading stops at a clean end of file; a
/// file that ends in the middle of a frame yields a `TrajectoryFormat` error.
pub struct TrajectoryReader<R: Read> {
    reader: R,
    name: String,
    endian: Endian,
    header: DcdHeader,
    index: u64,
    done: bool,
}

impl TrajectoryReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| MdError::io(path.display().to_string(), e))?;
        TrajectoryReader::new(BufReader::new(file), path.display().to_string())
    }
}

impl<R: Read> TrajectoryReader<R> {
    pub fn new(mut reader: R, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let mut first = [0u8; 4];
        read_exact(&mut reader, &mut first, &name)?;
        let endian = if i32::from_le_bytes(first) == HEADER_RECORD_LEN {
            Endian::Little
        } else if i32::from_be_bytes(first) == HEADER_RECORD_LEN {
            Endian::Big
        } else {
            return Err(MdError::TrajectoryFormat(format!("{} is not a DCD file", name)));
        };

        let mut this = TrajectoryReader {
            reader,
            name,
            endian,
            header: DcdHeader {
                frames: 0,
                first_step: 0,
                interval: 0,
                dt: 0.0,
                n_atoms: 0,
                title: String::new(),
                has_unit_cell: false,
            },
            index: 0,
            done: false,
        };
        this.read_header()?;
        Ok(this)
    }

    pub fn header(&self) -> &DcdHeader {
        &self.header
    }

    pub fn n_atoms(&self) -> usize {
        self.header.n_atoms
    }

    fn read_header(&mut self) -> Result<()> {
        let mut magic = [0u8; 4];
        read_exact(&mut self.reader, &mut magic, &self.name)?;
        if &magic != HEADER_MAGIC {
            return Err(MdError::TrajectoryFormat(format!(
                "{} does not contain coordinates",
                self.name
            )));
        }
        let mut raw = [[0u8; 4]; 20];
        for field in raw.iter_mut() {
            read_exact(&mut self.reader, field, &self.name)?;
        }
        let icntrl: Vec<i32> = raw.iter().map(|b| self.endian.i32(*b)).collect();
        self.expect_marker(HEADER_RECORD_LEN)?;

        if icntrl[8] != 0 {
            return Err(MdError::TrajectoryFormat(format!(
                "{} uses fixed atoms, which are not supported",
                self.name
            )));
        }

        let title_len = self.read_i32()?;
        if title_len < 4 || title_len as usize > 4 + MAX_TITLE_LINES * TITLE_LINE_LEN {
            return Err(MdError::TrajectoryFormat(format!(
                "{}: bad title record of {} bytes",
                self.name, title_len
            )));
        }
        let mut title = vec![0u8; title_len as usize];
        read_exact(&mut self.reader, &mut title, &self.name)?;
        self.expect_marker(title_len)?;

        self.expect_marker(4)?;
        let n_atoms = self.read_i32()?;
        self.expect_marker(4)?;
        if n_atoms <= 0 || n_atoms as usize > MAX_ATOMS {
            return Err(MdError::TrajectoryFormat(format!(
                "{} declares {} atoms",
                self.name, n_atoms
            )));
        }

        self.header = DcdHeader {
            frames: icntrl[0].max(0) as u64,
            first_step: icntrl[1].max(0) as u64,
            interval: icntrl[2].max(1) as u64,
            dt: self.endian.f32(raw[9]) as f64 * AKMA_TIME_PS,
            n_atoms: n_atoms as usize,
            title: String::from_utf8_lossy(&title[4..]).trim_end().to_string(),
            has_unit_cell: icntrl[10] != 0,
        };
        Ok(())
    }

    fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        read_exact(&mut self.reader, &mut buf, &self.name)?;
        Ok(self.endian.i32(buf))
    }

    fn expect_marker(&mut self, expected: i32) -> Result<()> {
        let marker = self.read_i32()?;
        if marker != expected {
            return Err(MdError::TrajectoryFormat(format!(
                "{}: record marker {} where {} was expected",
                self.name, marker, expected
            )));
        }
        Ok(())
    }

    /// First marker of a frame, or `None` at a clean end of file.
    fn read_frame_start(&mut self) -> Result<Option<i32>> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .reader
                .read(&mut buf[filled..])
                .map_err(|e| MdError::io(self.name.clone(), e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        match filled {
            0 => Ok(None),
            4 => Ok(Some(self.endian.i32(buf))),
            _ => Err(self.truncated()),
        }
    }

    fn truncated(&self) -> MdError {
        MdError::TrajectoryFormat(format!("{}: frame {} is truncated", self.name, self.index))
    }

    fn read_frame(&mut self) -> Result<Option<RecordedFrame>> {
        let Some(mut marker) = self.read_frame_start()? else {
            return Ok(None);
        };
        if self.header.has_unit_cell {
            if marker != 48 {
                return Err(MdError::TrajectoryFormat(format!("{}: bad unit cell record", self.name)));
            }
            let mut cell = [0u8; 48];
            self.read_frame_bytes(&mut cell)?;
            self.expect_frame_marker(48)?;
            marker = self.read_frame_i32()?;
        }

        // The header check keeps 4 * n within i32.
        let n = self.header.n_atoms;
        let block = (4 * n) as i32;
        let endian = self.endian;
        let mut axes: [Vec<f32>; 3] = Default::default();
        for (axis, values) in axes.iter_mut().enumerate() {
            if axis > 0 {
                marker = self.read_frame_i32()?;
            }
            if marker != block {
                return Err(MdError::TrajectoryFormat(format!(
                    "{}: frame {} has a {}-byte coordinate block, expected {}",
                    self.name, self.index, marker, block
                )));
            }
            let bytes = self.read_frame_block(4 * n)?;
            *values = bytes
                .chunks_exact(4)
                .map(|c| endian.f32([c[0], c[1], c[2], c[3]]))
                .collect();
            self.expect_frame_marker(block)?;
        }

        let step = self.header.first_step + self.index * self.header.interval;
        let [xs, ys, zs] = axes;
        let positions = izip!(xs, ys, zs)
            .map(|(x, y, z)| Vector3::new(x as f64, y as f64, z as f64) / NM_TO_ANGSTROM)
            .collect();
        self.index += 1;
        Ok(Some(RecordedFrame {
            step,
            time: step as f64 * self.header.dt,
            positions,
        }))
    }

    fn read_frame_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(self.truncated()),
            Err(e) => Err(MdError::io(self.name.clone(), e)),
        }
    }

    /// Read `len` bytes, growing the buffer only as data arrives so a corrupt
    /// atom count cannot force a huge allocation.
    fn read_frame_block(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        (&mut self.reader)
            .take(len as u64)
            .read_to_end(&mut bytes)
            .map_err(|e| MdError::io(self.name.clone(), e))?;
        if bytes.len() < len {
            return Err(self.truncated());
        }
        Ok(bytes)
    }

    fn read_frame_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_frame_bytes(&mut buf)?;
        Ok(self.endian.i32(buf))
    }

    fn expect_frame_marker(&mut self, expected: i32) -> Result<()> {
        let marker = self.read_frame_i32()?;
        if marker != expected {
            return Err(MdError::TrajectoryFormat(format!(
                "{}: frame {} has a mismatched record marker",
                self.name, self.index
            )));
        }
        Ok(())
    }
}

impl<R: Read> Iterator for TrajectoryReader<R> {
    type Item = Result<RecordedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], name: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            MdError::TrajectoryFormat(format!("{}: header is truncated", name))
        } else {
            MdError::io(name.to_string(), e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn positions(shift: f64) -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.1, 0.2) + Vector3::repeat(shift),
            Vector3::new(-1.25, 0.5, 3.0) + Vector3::repeat(shift),
            Vector3::new(0.15, -0.15, 0.0) + Vector3::repeat(shift),
        ]
    }

    #[test]
    fn test_header_layout() {
        let header = encode_header(3, 100, 0.002, "test");
        assert_eq!(header.len(), 196);
        assert_eq!(i32::from_le_bytes(header[0..4].try_into().unwrap()), 84);
        assert_eq!(&header[4..8], b"CORD");
        assert_eq!(i32::from_le_bytes(header[16..20].try_into().unwrap()), 100);
        assert_eq!(i32::from_le_bytes(header[84..88].try_into().unwrap()), 24);
        let delta = f32::from_le_bytes(header[44..48].try_into().unwrap());
        assert_relative_eq!(delta as f64 * AKMA_TIME_PS, 0.002, max_relative = 1e-6);
        assert_eq!(i32::from_le_bytes(header[188..192].try_into().unwrap()), 3);
    }

    #[test]
    fn test_write_then_read_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("traj.dcd");
        let mut writer = DcdWriter::create(&path, 3, 100, 0.002, "round trip").unwrap();
        writer.write_frame(100, &positions(0.0)).unwrap();
        writer.write_frame(200, &positions(0.5)).unwrap();
        writer.flush().unwrap();

        let reader = TrajectoryReader::open(&path).unwrap();
        assert_eq!(reader.header().frames, 2);
        assert_eq!(reader.header().first_step, 100);
        assert_eq!(reader.header().title, "round trip");
        let frames: Vec<RecordedFrame> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].step, 200);
        assert_relative_eq!(frames[1].time, 0.4, max_relative = 1e-6);
        for (read, written) in frames[1].positions.iter().zip(positions(0.5)) {
            assert_relative_eq!((read - written).norm(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("traj.dcd");
        let mut writer = DcdWriter::create(&path, 3, 1, 0.002, "").unwrap();
        writer.write_frame(1, &positions(0.0)).unwrap();
        writer.write_frame(2, &positions(0.1)).unwrap();
        drop(writer);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 7);
        let mut reader = TrajectoryReader::new(Cursor::new(bytes), "memory").unwrap();
        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(reader.next(), Some(Err(MdError::TrajectoryFormat(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_header_only_file_has_no_frames() {
        let bytes = encode_header(2, 10, 0.001, "");
        let reader = TrajectoryReader::new(Cursor::new(bytes), "memory").unwrap();
        assert_eq!(reader.count(), 0);
    }

    #[test]
    fn test_big_endian_file_is_detected() {
        // Re-encode a little-endian file word by word.
        let mut bytes = encode_header(1, 5, 0.002, "");
        bytes.extend(encode_frame(&[Vector3::new(0.1, 0.2, 0.3)]));
        let title_start = 92 + 8;
        let mut swapped = Vec::with_capacity(bytes.len());
        for (i, word) in bytes.chunks_exact(4).enumerate() {
            let offset = i * 4;
            let is_text = (4..8).contains(&offset) || (title_start..title_start + 80).contains(&offset);
            if is_text {
                swapped.extend_from_slice(word);
            } else {
                swapped.extend(word.iter().rev());
            }
        }
        let mut reader = TrajectoryReader::new(Cursor::new(swapped), "memory").unwrap();
        let frame = reader.next().unwrap().unwrap();
        assert_relative_eq!(frame.positions[0].z, 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_wrong_atom_count_rejected() {
        let dir = tempdir().unwrap();
        let mut writer = DcdWriter::create(dir.path().join("t.dcd"), 3, 1, 0.002, "").unwrap();
        let err = writer.write_frame(1, &[Vector3::zeros()]).unwrap_err();
        assert!(matches!(err, MdError::TrajectoryFormat(_)));
        assert_eq!(writer.frames_written(), 0);
    }

    /// Overwrite the atom count stored in an encoded header.
    fn with_atom_count(mut bytes: Vec<u8>, n_atoms: i32) -> Vec<u8> {
        bytes[188..192].copy_from_slice(&n_atoms.to_le_bytes());
        bytes
    }

    #[test]
    fn test_corrupt_atom_count_is_rejected() {
        let bytes = with_atom_count(encode_header(2, 1, 0.002, ""), i32::MAX);
        let err = TrajectoryReader::new(Cursor::new(bytes), "memory").err().unwrap();
        assert!(matches!(err, MdError::TrajectoryFormat(_)));

        // A large but representable count fails on the missing data, not on allocation.
        let n = (MAX_ATOMS - 1) as i32;
        let mut bytes = with_atom_count(encode_header(2, 1, 0.002, ""), n);
        bytes.extend_from_slice(&(4 * n).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 64]);
        let mut reader = TrajectoryReader::new(Cursor::new(bytes), "memory").unwrap();
        assert_eq!(reader.n_atoms(), MAX_ATOMS - 1);
        assert!(matches!(reader.next(), Some(Err(MdError::TrajectoryFormat(_)))));
    }

    #[test]
    fn test_oversized_title_is_rejected() {
        let mut bytes = encode_header(1, 1, 0.002, "");
        bytes[92..96].copy_from_slice(&i32::MAX.to_le_bytes());
        let err = TrajectoryReader::new(Cursor::new(bytes), "memory").err().unwrap();
        assert!(matches!(err, MdError::TrajectoryFormat(_)));
    }

    #[test]
    fn test_writer_rejects_unrepresentable_atom_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.dcd");
        let err = DcdWriter::create(&path, MAX_ATOMS + 1, 1, 0.002, "").err().unwrap();
        assert!(matches!(err, MdError::Configuration(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_rejects_non_dcd_input() {
        let err = TrajectoryReader::new(Cursor::new(b"hello world, not a trajectory".to_vec()), "memory")
            .err()
            .unwrap();
        assert!(matches!(err, MdError::TrajectoryFormat(_)));
    }
}
