use std::io::{self, SeekFrom};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, Stdin};

/// The byte source: a file or standard input.
pub enum Input {
    File(File),
    Stdin(Stdin),
}

impl Input {
    /// Opens `src`, where "-" means stdin.
    pub async fn open(src: &str) -> io::Result<Self> {
        if src == "-" {
            Ok(Self::Stdin(tokio::io::stdin()))
        } else {
            Ok(Self::File(File::open(src).await?))
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(file) => file.read(buf).await,
            Self::Stdin(stdin) => stdin.read(buf).await,
        }
    }

    /// Seeks to an absolute byte offset; a negative offset counts from the
    /// end of the file. Returns the new position.
    pub async fn seek_to(&mut self, offset: i64) -> io::Result<i64> {
        match self {
            Self::File(file) => {
                let pos = if offset < 0 {
                    file.seek(SeekFrom::End(offset + 1)).await?
                } else {
                    file.seek(SeekFrom::Start(offset as u64)).await?
                };
                Ok(pos as i64)
            }
            Self::Stdin(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stdin is not seekable",
            )),
        }
    }
}
