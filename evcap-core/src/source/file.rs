//! Replay of recorded event files.

use super::{AcquisitionSource, Fetch, SourceError, SourceKind};
use crate::types::RawChunk;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Reads a recording in fixed-size chunks, header included.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    chunk_size: usize,
}

impl FileSource {
    /// Opens a recording. A missing or unreadable file is reported as
    /// `SourceError::Open`.
    pub fn open<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| SourceError::Open {
            path: path.clone(),
            source,
        })?;
        info!("Opened recording {}", path.display());
        Ok(Self {
            path,
            reader: Some(BufReader::new(file)),
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AcquisitionSource for FileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn read_chunk(&mut self) -> Result<Fetch, SourceError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Fetch::EndOfStream);
        };

        let mut buffer = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buffer.len() {
            match reader.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SourceError::Io(e)),
            }
        }

        if filled == 0 {
            debug!("Reached end of {}", self.path.display());
            return Ok(Fetch::EndOfStream);
        }
        buffer.truncate(filled);
        Ok(Fetch::Chunk(RawChunk::new(buffer)))
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!("Closed recording {}", self.path.display());
        }
    }
}
