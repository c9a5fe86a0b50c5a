//! Routing of S-record data into core and shared memory

use std::path::Path;

use epiphany_chip::{addr, CoreId, GridRect};

use crate::config::ExternalMemory;
use crate::error::{EhalError, Result};
use crate::mmio::MappedFile;

use super::record::{parse_record, RecordKind};

/// File extensions accepted by [`SrecLoader::load_file`]
pub const SREC_EXTENSIONS: [&str; 12] = [
    "srec", "sx", "mot", "mxt", "exo", "s19", "s28", "s37", "s", "s1", "s2", "s3",
];

/// Destination of decoded image data
pub trait ImageSink {
    /// Write `data` at local offset `local` of `core`
    ///
    /// # Errors
    ///
    /// Returns an error if the range is not backed by a mapped window.
    fn write_core(&mut self, core: CoreId, local: u32, data: &[u8]) -> Result<()>;

    /// Write `data` at coprocessor address `addr` in shared memory
    ///
    /// # Errors
    ///
    /// Returns an error if the range is not backed by a mapped window.
    fn write_shared(&mut self, addr: u32, data: &[u8]) -> Result<()>;
}

/// Summary of one load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Records parsed, any type
    pub records: usize,
    /// Data records seen
    pub data_records: usize,
    /// Payload bytes written, counting each broadcast copy
    pub bytes_written: usize,
    /// Data records whose address matched no destination
    pub skipped: usize,
    /// Last header text
    pub header: Option<String>,
    /// Start address from the last terminator
    pub entry: Option<u32>,
}

/// Loader for one rectangle of cores and one shared memory segment
#[derive(Debug, Clone, Copy)]
pub struct SrecLoader {
    rect: GridRect,
    dram: ExternalMemory,
}

impl SrecLoader {
    /// Loader targeting `rect`, with `dram` as the shared memory destination
    #[must_use]
    pub const fn new(rect: GridRect, dram: ExternalMemory) -> Self {
        Self { rect, dram }
    }

    /// Target cores
    #[must_use]
    pub const fn rect(&self) -> GridRect {
        self.rect
    }

    /// Parse `image` and write every data record into `sink`.
    ///
    /// Each record is verified in full before anything from it is written;
    /// the first bad record aborts the load, leaving earlier records applied.
    ///
    /// # Errors
    ///
    /// Returns [`EhalError::Protocol`] on a malformed record, or the sink's
    /// error if a write fails.
    pub fn parse<S: ImageSink + ?Sized>(&self, image: &[u8], sink: &mut S) -> Result<LoadStats> {
        let mut stats = LoadStats::default();
        let mut running = 0usize;
        let mut pos = 0;
        let mut line = 1;

        while pos < image.len() {
            let (rec, used) = parse_record(&image[pos..], line)?;
            pos += used;
            line += 1;
            stats.records += 1;

            match rec.kind {
                RecordKind::Header => {
                    if rec.address != 0 {
                        return Err(EhalError::protocol(
                            line - 1,
                            format!("header address {:#06x} is not zero", rec.address),
                        ));
                    }
                    let text = String::from_utf8_lossy(&rec.data).into_owned();
                    tracing::debug!("SREC header: {text}");
                    stats.header = Some(text);
                }
                RecordKind::Data16 | RecordKind::Data24 | RecordKind::Data32 => {
                    match self.route(rec.address, &rec.data, sink)? {
                        Some(n) => stats.bytes_written += n,
                        None => stats.skipped += 1,
                    }
                    stats.data_records += 1;
                    running += 1;
                }
                RecordKind::Count16 | RecordKind::Count24 => {
                    if rec.address as usize != running {
                        tracing::warn!(
                            "SREC record count differs: {running} vs {}",
                            rec.address
                        );
                    }
                }
                RecordKind::Start32 | RecordKind::Start24 | RecordKind::Start16 => {
                    tracing::debug!("SREC start address {:#010x}", rec.address);
                    stats.entry = Some(rec.address);
                    running = 0;
                }
            }
        }

        tracing::info!(
            "Loaded {} data records, {} bytes ({} skipped)",
            stats.data_records,
            stats.bytes_written,
            stats.skipped
        );
        Ok(stats)
    }

    /// Map `path` read-only and [`parse`](Self::parse) it.
    ///
    /// # Errors
    ///
    /// Returns [`EhalError::Config`] for an unrecognised extension,
    /// [`EhalError::Io`] if the file cannot be mapped, otherwise as `parse`.
    pub fn load_file<S: ImageSink + ?Sized>(&self, path: &Path, sink: &mut S) -> Result<LoadStats> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !SREC_EXTENSIONS.contains(&ext) {
            return Err(EhalError::config(format!(
                "{}: not an S-record file (expected one of {})",
                path.display(),
                SREC_EXTENSIONS.join(", ")
            )));
        }
        tracing::info!("Loading {} into {}", path.display(), self.rect);
        let image = MappedFile::open(path)?;
        self.parse(image.as_bytes(), sink)
    }

    /// Write one data record; returns the bytes written, `None` if skipped.
    fn route<S: ImageSink + ?Sized>(
        &self,
        address: u32,
        data: &[u8],
        sink: &mut S,
    ) -> Result<Option<usize>> {
        if addr::is_local(address) {
            for core in self.rect.iter() {
                sink.write_core(core, address, data)?;
            }
            return Ok(Some(data.len() * self.rect.len()));
        }
        let core = CoreId::from_addr(address);
        if self.rect.contains(core) {
            sink.write_core(core, addr::local_of(address), data)?;
            return Ok(Some(data.len()));
        }
        // Classified by start address; a record running off the end of the
        // segment is the sink's OutOfWindow, not a skip.
        if self.dram.contains(address, 1) {
            sink.write_shared(address, data)?;
            return Ok(Some(data.len()));
        }
        tracing::debug!("SREC data at {address:#010x} has no destination, skipped");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, Default)]
    struct Recorder {
        core: Vec<(CoreId, u32, Vec<u8>)>,
        shared: Vec<(u32, Vec<u8>)>,
    }

    impl ImageSink for Recorder {
        fn write_core(&mut self, core: CoreId, local: u32, data: &[u8]) -> Result<()> {
            self.core.push((core, local, data.to_vec()));
            Ok(())
        }

        fn write_shared(&mut self, addr: u32, data: &[u8]) -> Result<()> {
            self.shared.push((addr, data.to_vec()));
            Ok(())
        }
    }

    fn loader() -> SrecLoader {
        let rect = GridRect::new(CoreId::new(32, 8).unwrap(), CoreId::new(33, 9).unwrap()).unwrap();
        SrecLoader::new(rect, ExternalMemory::default())
    }

    /// Build a record line with a correct checksum.
    fn rec(kind: u8, addr: &[u8], data: &[u8]) -> String {
        let count = u8::try_from(addr.len() + data.len() + 1).unwrap();
        let mut sum = count;
        let mut out = format!("S{}{count:02X}", char::from(kind));
        for &b in addr.iter().chain(data) {
            sum = sum.wrapping_add(b);
            out.push_str(&format!("{b:02X}"));
        }
        out.push_str(&format!("{:02X}\n", !sum));
        out
    }

    #[test]
    fn local_record_broadcasts_row_major() {
        let mut sink = Recorder::default();
        let stats = loader()
            .parse(b"S311000000580B6EE2000B600210520D00005F\n", &mut sink)
            .unwrap();
        let cores: Vec<(u32, u32)> = sink
            .core
            .iter()
            .map(|(c, _, _)| (c.row(), c.col()))
            .collect();
        assert_eq!(cores, vec![(32, 8), (32, 9), (33, 8), (33, 9)]);
        assert!(sink.core.iter().all(|(_, local, data)| *local == 0x58 && data.len() == 12));
        assert_eq!(stats.data_records, 1);
        assert_eq!(stats.bytes_written, 48);
    }

    #[test]
    fn global_core_and_shared_routing() {
        let mut image = String::new();
        image += &rec(b'3', &[0x84, 0x90, 0x01, 0x00], &[1, 2, 3, 4]);
        image += &rec(b'3', &[0x8E, 0x00, 0x10, 0x00], &[9, 9]);
        let mut sink = Recorder::default();
        loader().parse(image.as_bytes(), &mut sink).unwrap();

        assert_eq!(sink.core.len(), 1);
        let (core, local, data) = &sink.core[0];
        assert_eq!((core.row(), core.col()), (33, 9));
        assert_eq!(*local, 0x100);
        assert_eq!(data, &vec![1, 2, 3, 4]);
        assert_eq!(sink.shared, vec![(0x8E00_1000, vec![9, 9])]);
    }

    #[test]
    fn shared_record_crossing_segment_end_is_not_skipped() {
        let image = rec(b'3', &[0x8F, 0xFF, 0xFF, 0xFE], &[1, 2, 3, 4]);
        let mut sink = Recorder::default();
        let stats = loader().parse(image.as_bytes(), &mut sink).unwrap();
        assert_eq!(stats.skipped, 0);
        assert_eq!(sink.shared, vec![(0x8FFF_FFFE, vec![1, 2, 3, 4])]);
    }

    #[test]
    fn count_mismatch_only_warns() {
        let mut sink = Recorder::default();
        let stats = loader()
            .parse(b"S1050010abcd72\nS5030005F7\n", &mut sink)
            .unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.data_records, 1);
        assert_eq!(stats.bytes_written, 8);
        assert_eq!(sink.core.len(), 4);
        assert!(sink
            .core
            .iter()
            .all(|(_, local, data)| *local == 0x10 && data == &vec![0xAB, 0xCD]));
    }

    #[test]
    fn unroutable_is_skipped_but_counted() {
        let mut image = String::new();
        image += &rec(b'3', &[0x90, 0x00, 0x00, 0x00], &[7]);
        image += &rec(b'5', &[0x00, 0x01], &[]);
        let mut sink = Recorder::default();
        let stats = loader().parse(image.as_bytes(), &mut sink).unwrap();
        assert!(sink.core.is_empty() && sink.shared.is_empty());
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.data_records, 1);
        assert_eq!(stats.bytes_written, 0);
    }

    #[test]
    fn bad_checksum_aborts_after_earlier_records() {
        let mut image = rec(b'3', &[0x84, 0x90, 0x01, 0x00], &[1, 2, 3, 4]);
        image += "S311000000580B6EE2000B600210520D00005E\n";
        image += &rec(b'3', &[0x84, 0x90, 0x02, 0x00], &[5]);
        let mut sink = Recorder::default();
        let err = loader().parse(image.as_bytes(), &mut sink).unwrap_err();
        assert!(matches!(err, EhalError::Protocol { line: 2, .. }));
        // Only the first record was applied.
        assert_eq!(sink.core.len(), 1);
    }

    #[test]
    fn header_terminator_and_count_reset() {
        let mut image = rec(b'0', &[0, 0], b"hello");
        image += &rec(b'1', &[0x00, 0x10], &[0xAA]);
        image += &rec(b'9', &[0x00, 0x10], &[]);
        image += &rec(b'1', &[0x00, 0x20], &[0xBB]);
        image += &rec(b'5', &[0x00, 0x01], &[]);
        let mut sink = Recorder::default();
        let stats = loader().parse(image.as_bytes(), &mut sink).unwrap();
        assert_eq!(stats.header.as_deref(), Some("hello"));
        assert_eq!(stats.entry, Some(0x10));
        assert_eq!(stats.records, 5);
        assert_eq!(stats.data_records, 2);
    }

    #[test]
    fn nonzero_header_address_rejected() {
        let image = rec(b'0', &[0, 1], b"x");
        let mut sink = Recorder::default();
        assert!(loader().parse(image.as_bytes(), &mut sink).is_err());
    }

    #[test]
    fn tolerates_missing_final_newline() {
        let mut sink = Recorder::default();
        let stats = loader()
            .parse(b"S1050010abcd72\r\nS9030000FC", &mut sink)
            .unwrap();
        assert_eq!(stats.records, 2);
    }

    #[test]
    fn empty_image_loads_nothing() {
        let mut sink = Recorder::default();
        assert_eq!(loader().parse(b"", &mut sink).unwrap(), LoadStats::default());
    }

    #[test]
    fn load_file_checks_extension() {
        let mut sink = Recorder::default();
        let mut bad = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        bad.write_all(b"S9030000FC\n").unwrap();
        assert!(matches!(
            loader().load_file(bad.path(), &mut sink),
            Err(EhalError::Config { .. })
        ));

        // Case sensitive.
        let upper = tempfile::Builder::new().suffix(".SREC").tempfile().unwrap();
        assert!(loader().load_file(upper.path(), &mut sink).is_err());

        let mut good = tempfile::Builder::new().suffix(".srec").tempfile().unwrap();
        good.write_all(b"S311000000580B6EE2000B600210520D00005F\n").unwrap();
        let stats = loader().load_file(good.path(), &mut sink).unwrap();
        assert_eq!(stats.data_records, 1);
    }

    #[test]
    fn empty_file_loads_nothing() {
        let empty = tempfile::Builder::new().suffix(".s19").tempfile().unwrap();
        let mut sink = Recorder::default();
        let stats = loader().load_file(empty.path(), &mut sink).unwrap();
        assert_eq!(stats.records, 0);
    }
}
