use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// A contiguous byte range of the payload, ready to be sent in one request.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub offset: u64,
    pub data: Vec<u8>,
    pub is_last: bool,
}

impl Chunk {
    /// Offset one past the final byte of this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// A byte source the orchestrator can re-read from any server-confirmed offset.
pub trait MediaSource {
    /// Total payload length, if known up front.
    fn total_len(&self) -> Option<u64>;

    /// Read up to `max` bytes starting at `offset`.
    fn read_chunk(&mut self, offset: u64, max: usize) -> io::Result<Chunk>;
}

/// Fill `buf` from `reader` until it is full or the reader hits EOF.
fn fill_buf<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break, // EOF
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// A seekable source of known length, e.g. a local file.
pub struct SeekableSource<R> {
    inner: R,
    len: u64,
}

impl<R: Read + Seek> SeekableSource<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self { inner, len })
    }
}

impl<R: Read + Seek> MediaSource for SeekableSource<R> {
    fn total_len(&self) -> Option<u64> {
        Some(self.len)
    }

    fn read_chunk(&mut self, offset: u64, max: usize) -> io::Result<Chunk> {
        if offset > self.len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("offset {} is beyond the end of a {}-byte source", offset, self.len),
            ));
        }
        let want = (self.len - offset).min(max as u64) as usize;
        let mut buf = vec![0u8; want];
        self.inner.seek(SeekFrom::Start(offset))?;
        let filled = fill_buf(&mut self.inner, &mut buf)?;
        if filled < want {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source shrank while uploading: expected {} bytes at offset {}", want, offset),
            ));
        }
        Ok(Chunk {
            offset,
            is_last: offset + filled as u64 == self.len,
            data: buf,
        })
    }
}

/// A forward-only source of unknown length.
///
/// Bytes are dropped once the orchestrator asks for a later offset, which only
/// happens after the server has acknowledged them. Until then the window holds
/// everything still in flight plus one byte of lookahead used to detect the end
/// of the stream.
pub struct StreamSource<R> {
    inner: R,
    window: Vec<u8>,
    window_start: u64,
    exhausted: bool,
}

impl<R: Read> StreamSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            window: Vec::new(),
            window_start: 0,
            exhausted: false,
        }
    }
}

impl<R: Read> MediaSource for StreamSource<R> {
    fn total_len(&self) -> Option<u64> {
        if self.exhausted {
            Some(self.window_start + self.window.len() as u64)
        } else {
            None
        }
    }

    fn read_chunk(&mut self, offset: u64, max: usize) -> io::Result<Chunk> {
        let window_end = self.window_start + self.window.len() as u64;
        if offset < self.window_start || (offset > window_end && self.exhausted) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "offset {} is outside the retained window [{}, {})",
                    offset, self.window_start, window_end
                ),
            ));
        }

        // Skip forward, discarding acknowledged bytes.
        if offset > window_end {
            let skip = offset - window_end;
            let copied = io::copy(&mut (&mut self.inner).take(skip), &mut io::sink())?;
            if copied < skip {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended before offset {}", offset),
                ));
            }
            self.window.clear();
            self.window_start = offset;
        } else {
            self.window.drain(..(offset - self.window_start) as usize);
            self.window_start = offset;
        }

        // One byte past `max` tells us whether this chunk ends the stream.
        let want = max + 1;
        if self.window.len() < want && !self.exhausted {
            let have = self.window.len();
            self.window.resize(want, 0);
            let filled = fill_buf(&mut self.inner, &mut self.window[have..])?;
            self.window.truncate(have + filled);
            if have + filled < want {
                self.exhausted = true;
            }
        }

        let take = self.window.len().min(max);
        Ok(Chunk {
            offset,
            data: self.window[..take].to_vec(),
            is_last: self.exhausted && self.window.len() <= max,
        })
    }
}

/// Open a local file as a known-length source.
pub fn open_file(path: &Path) -> io::Result<SeekableSource<BufReader<File>>> {
    let file = File::open(path)?;
    SeekableSource::new(BufReader::new(file))
}
