// io.rs
//
// On-disk index codec and the text-line input abstraction. Both TBI and CSI
// payloads are little-endian and gzip-wrapped; reading goes through a
// multi-member decoder so block-gzipped files from other writers load too.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::dict::ReferenceDictionary;
use crate::error::IndexError;
use crate::index::binning::BinningScheme;
use crate::index::reference::{Bin, Chunk, RefStats, ReferenceIndex, VirtualOffset};
use crate::index::{Index, IndexFormat};
use crate::indexer::Indexer;
use crate::record::Config;

pub const TBI_MAGIC: [u8; 4] = *b"TBI\x01";
pub const CSI_MAGIC: [u8; 4] = *b"CSI\x01";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;

/// A positioned stream of record lines.
///
/// The index treats the per-line offsets as opaque monotone tokens; this
/// crate's implementation hands out plain byte offsets, a block-compressed
/// reader would hand out virtual offsets.
pub trait LineSource {
    /// Reads the next line (without its terminator) into `buf`, returning
    /// the virtual offset of the line's first byte, or `None` at
    /// end of input.
    fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<Option<VirtualOffset>, IndexError>;

    /// Offset one past the last byte handed out.
    fn voff(&self) -> VirtualOffset;
}

/// Line source over any buffered reader; offsets are byte positions in the
/// (decompressed) text.
pub struct PlainLineSource<R> {
    inner: R,
    pos: u64,
}

impl<R: BufRead> PlainLineSource<R> {
    pub fn new(inner: R) -> Self {
        PlainLineSource { inner, pos: 0 }
    }
}

impl PlainLineSource<BufReader<Box<dyn Read>>> {
    /// Opens a plain or gzip-compressed text file.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let mut file = File::open(path)?;
        let reader: Box<dyn Read> = if is_gzipped(&mut file)? {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Self::new(BufReader::with_capacity(
            DEFAULT_BUFFER_SIZE,
            reader,
        )))
    }
}

impl<R: BufRead> LineSource for PlainLineSource<R> {
    fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<Option<VirtualOffset>, IndexError> {
        buf.clear();
        let start = self.pos;
        let n = self.inner.read_until(b'\n', buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.pos += n as u64;
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(Some(VirtualOffset::from(start)))
    }

    fn voff(&self) -> VirtualOffset {
        VirtualOffset::from(self.pos)
    }
}

fn is_gzipped(file: &mut File) -> io::Result<bool> {
    let mut header = [0u8; 2];
    let gzipped = match file.read_exact(&mut header) {
        Ok(()) => header == GZIP_MAGIC,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e),
    };
    file.rewind()?;
    Ok(gzipped)
}

/// Builds an index over `src` and writes it next to the data (or to `out`).
///
/// Returns the path the index was written to.
pub fn build_to_path(
    src: &Path,
    out: Option<&Path>,
    conf: Config,
    min_shift: Option<u32>,
) -> Result<PathBuf, IndexError> {
    let mut source = PlainLineSource::open(src)?;
    let indexer = match min_shift {
        Some(shift) => Indexer::csi(conf, shift),
        None => Indexer::tbi(conf),
    };
    let index = indexer.run(&mut source)?;

    let out = match out {
        Some(p) => p.to_path_buf(),
        None => {
            let mut name = src.as_os_str().to_os_string();
            name.push(match index.format() {
                IndexFormat::Csi => ".csi",
                IndexFormat::Tbi => ".tbi",
            });
            PathBuf::from(name)
        }
    };
    index.save(&out)?;
    Ok(out)
}

impl Index {
    /// Writes the gzip-wrapped index, atomically: the destination either
    /// keeps its old content or receives the complete new index.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let mut tmp_name = path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let file = File::create(&tmp)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        self.write_into(&mut encoder)?;
        encoder.finish()?.flush()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Reads a gzip-wrapped (or raw) index file.
    pub fn load(path: &Path) -> Result<Index, IndexError> {
        let mut file = File::open(path)?;
        let mut payload = Vec::new();
        if is_gzipped(&mut file)? {
            MultiGzDecoder::new(file).read_to_end(&mut payload)?;
        } else {
            file.read_to_end(&mut payload)?;
        }
        Self::from_bytes(&payload)
    }

    /// The uncompressed on-disk payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        let mut buf = Vec::new();
        self.write_into(&mut buf)?;
        Ok(buf)
    }

    /// Parses an uncompressed index payload.
    pub fn from_bytes(data: &[u8]) -> Result<Index, IndexError> {
        if data.len() < 4 {
            return Err(IndexError::invalid_index("shorter than a magic number"));
        }
        let (magic, rest) = data.split_at(4);
        if magic == &TBI_MAGIC[..] {
            parse_tbi(rest)
        } else if magic == &CSI_MAGIC[..] {
            parse_csi(rest)
        } else {
            Err(IndexError::invalid_index("bad magic number"))
        }
    }

    fn write_into<W: Write>(&self, w: &mut W) -> Result<(), IndexError> {
        match self.format {
            IndexFormat::Tbi => self.write_tbi(w)?,
            IndexFormat::Csi => self.write_csi(w)?,
        }
        Ok(())
    }

    fn write_conf_block<W: Write>(&self, w: &mut W, names: &[u8]) -> io::Result<()> {
        w.write_i32::<LittleEndian>(self.conf.raw_preset())?;
        w.write_i32::<LittleEndian>(self.conf.seq_col)?;
        w.write_i32::<LittleEndian>(self.conf.begin_col)?;
        w.write_i32::<LittleEndian>(self.conf.end_col)?;
        w.write_i32::<LittleEndian>(self.conf.meta_char as i32)?;
        w.write_i32::<LittleEndian>(self.conf.line_skip)?;
        w.write_i32::<LittleEndian>(names.len() as i32)?;
        w.write_all(names)
    }

    fn write_tbi<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&TBI_MAGIC)?;
        w.write_i32::<LittleEndian>(self.refs.len() as i32)?;
        let names = names_block(&self.dict);
        self.write_conf_block(w, &names)?;
        for r in &self.refs {
            write_bins(w, r, &self.scheme, false)?;
            w.write_i32::<LittleEndian>(r.linear().len() as i32)?;
            for off in r.linear() {
                w.write_u64::<LittleEndian>(off.value())?;
            }
        }
        w.write_u64::<LittleEndian>(self.n_no_coor)
    }

    fn write_csi<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&CSI_MAGIC)?;
        w.write_i32::<LittleEndian>(self.scheme.min_shift as i32)?;
        w.write_i32::<LittleEndian>(self.scheme.depth as i32)?;

        let names = names_block(&self.dict);
        let mut aux = Vec::with_capacity(28 + names.len());
        self.write_conf_block(&mut aux, &names)?;
        w.write_i32::<LittleEndian>(aux.len() as i32)?;
        w.write_all(&aux)?;

        w.write_i32::<LittleEndian>(self.refs.len() as i32)?;
        for r in &self.refs {
            write_bins(w, r, &self.scheme, true)?;
        }
        w.write_u64::<LittleEndian>(self.n_no_coor)
    }
}

fn names_block(dict: &ReferenceDictionary) -> Vec<u8> {
    let mut block = Vec::new();
    for name in dict.iter() {
        block.extend_from_slice(name.as_bytes());
        block.push(0);
    }
    block
}

/// Bins are written in ascending id order (metadata pseudo-bin last, which
/// has the largest id anyway) so the output is reproducible.
fn write_bins<W: Write>(
    w: &mut W,
    r: &ReferenceIndex,
    scheme: &BinningScheme,
    with_loff: bool,
) -> io::Result<()> {
    let mut ids: Vec<u32> = r.bins().keys().copied().collect();
    ids.sort_unstable();

    let n_bin = ids.len() + usize::from(r.stats().is_some());
    w.write_i32::<LittleEndian>(n_bin as i32)?;

    for id in ids {
        let bin = &r.bins()[&id];
        w.write_u32::<LittleEndian>(id)?;
        if with_loff {
            w.write_u64::<LittleEndian>(bin.loff.value())?;
        }
        w.write_i32::<LittleEndian>(bin.chunks.len() as i32)?;
        for c in &bin.chunks {
            w.write_u64::<LittleEndian>(c.start.value())?;
            w.write_u64::<LittleEndian>(c.end.value())?;
        }
    }

    if let Some(s) = r.stats() {
        w.write_u32::<LittleEndian>(scheme.meta_bin())?;
        if with_loff {
            w.write_u64::<LittleEndian>(0)?;
        }
        w.write_i32::<LittleEndian>(2)?;
        w.write_u64::<LittleEndian>(s.off_beg.value())?;
        w.write_u64::<LittleEndian>(s.off_end.value())?;
        w.write_u64::<LittleEndian>(s.n_mapped)?;
        w.write_u64::<LittleEndian>(s.n_unmapped)?;
    }
    Ok(())
}

// All reads below come from an in-memory payload, so a short read can only
// mean a truncated file.

fn truncated(_: io::Error) -> IndexError {
    IndexError::invalid_index("truncated index file")
}

fn read_i32(r: &mut &[u8]) -> Result<i32, IndexError> {
    r.read_i32::<LittleEndian>().map_err(truncated)
}

fn read_u32(r: &mut &[u8]) -> Result<u32, IndexError> {
    r.read_u32::<LittleEndian>().map_err(truncated)
}

fn read_u64(r: &mut &[u8]) -> Result<u64, IndexError> {
    r.read_u64::<LittleEndian>().map_err(truncated)
}

fn read_count(r: &mut &[u8], what: &str) -> Result<usize, IndexError> {
    let n = read_i32(r)?;
    if n < 0 {
        return Err(IndexError::invalid_index(format!("negative {} count", what)));
    }
    Ok(n as usize)
}

fn take<'a>(r: &mut &'a [u8], len: usize) -> Result<&'a [u8], IndexError> {
    if len > r.len() {
        return Err(IndexError::invalid_index("truncated index file"));
    }
    let (head, tail) = r.split_at(len);
    *r = tail;
    Ok(head)
}

fn parse_conf_and_names(r: &mut &[u8]) -> Result<(Config, ReferenceDictionary), IndexError> {
    let preset = read_i32(r)?;
    let seq_col = read_i32(r)?;
    let begin_col = read_i32(r)?;
    let end_col = read_i32(r)?;
    let meta_char = read_i32(r)?;
    let line_skip = read_i32(r)?;
    let l_nm = read_i32(r)?;
    if l_nm < 0 || l_nm as usize > r.len() {
        return Err(IndexError::invalid_index(
            "name block extends past the end of the file",
        ));
    }
    let conf = Config::from_raw(preset, seq_col, begin_col, end_col, meta_char, line_skip)?;
    let dict = parse_names(take(r, l_nm as usize)?)?;
    Ok((conf, dict))
}

fn parse_names(block: &[u8]) -> Result<ReferenceDictionary, IndexError> {
    let mut dict = ReferenceDictionary::new();
    // names are NUL-terminated back to back; a stray trailing NUL appended
    // by an upstream loader reads as an empty name and is skipped
    for name in block.split(|&b| b == 0) {
        if name.is_empty() {
            continue;
        }
        let name = std::str::from_utf8(name)
            .map_err(|_| IndexError::invalid_index("reference name is not valid UTF-8"))?;
        dict.intern(name)?;
    }
    Ok(dict)
}

fn parse_ref(
    r: &mut &[u8],
    scheme: &BinningScheme,
    with_loff: bool,
) -> Result<ReferenceIndex, IndexError> {
    let mut rref = ReferenceIndex::default();
    let n_bin = read_count(r, "bin")?;
    for _ in 0..n_bin {
        let id = read_u32(r)?;
        let loff = if with_loff { read_u64(r)? } else { 0 };
        let n_chunk = read_count(r, "chunk")?;
        if id == scheme.meta_bin() && n_chunk == 2 {
            rref.stats = Some(RefStats {
                off_beg: read_u64(r)?.into(),
                off_end: read_u64(r)?.into(),
                n_mapped: read_u64(r)?,
                n_unmapped: read_u64(r)?,
            });
        } else {
            let mut chunks = Vec::new();
            for _ in 0..n_chunk {
                let start = read_u64(r)?.into();
                let end = read_u64(r)?.into();
                chunks.push(Chunk::new(start, end));
            }
            rref.bins.insert(
                id,
                Bin {
                    loff: loff.into(),
                    chunks,
                },
            );
        }
    }
    if !with_loff {
        let n_intv = read_count(r, "linear interval")?;
        rref.linear.reserve(n_intv);
        for _ in 0..n_intv {
            rref.linear.push(read_u64(r)?.into());
        }
    }
    Ok(rref)
}

fn parse_tbi(mut data: &[u8]) -> Result<Index, IndexError> {
    let r = &mut data;
    let n_ref = read_count(r, "reference")?;
    let (conf, dict) = parse_conf_and_names(r)?;

    let scheme = BinningScheme::TBI;
    let mut refs = Vec::new();
    for _ in 0..n_ref {
        let mut rref = parse_ref(r, &scheme, false)?;
        rref.refresh_loff(&scheme);
        refs.push(rref);
    }
    let n_no_coor = if r.len() >= 8 { read_u64(r)? } else { 0 };

    Ok(Index {
        format: IndexFormat::Tbi,
        scheme,
        conf,
        dict,
        refs,
        n_no_coor,
    })
}

fn parse_csi(mut data: &[u8]) -> Result<Index, IndexError> {
    let r = &mut data;
    let min_shift = read_i32(r)?;
    let depth = read_i32(r)?;
    if !(1..=31).contains(&min_shift) || depth < 1 || min_shift as i64 + 3 * depth as i64 > 62 {
        return Err(IndexError::invalid_index(format!(
            "implausible geometry (min_shift {}, depth {})",
            min_shift, depth
        )));
    }
    let scheme = BinningScheme {
        min_shift: min_shift as u32,
        depth: depth as u32,
    };

    let l_aux = read_count(r, "auxiliary byte")?;
    let mut aux = take(r, l_aux)?;
    if aux.len() < 28 {
        return Err(IndexError::invalid_index(
            "auxiliary block shorter than the 28-byte preamble",
        ));
    }
    let (conf, dict) = parse_conf_and_names(&mut aux)?;

    let n_ref = read_count(r, "reference")?;
    let mut refs = Vec::new();
    for _ in 0..n_ref {
        refs.push(parse_ref(r, &scheme, true)?);
    }
    let n_no_coor = if r.len() >= 8 { read_u64(r)? } else { 0 };

    Ok(Index {
        format: IndexFormat::Csi,
        scheme,
        conf,
        dict,
        refs,
        n_no_coor,
    })
}
