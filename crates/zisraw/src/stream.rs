//! Positional stream contracts and implementations.
//!
//! All I/O in this crate goes through positional reads and writes; nothing
//! assumes a cursor. Streams are not required to be `Sync`: the reader
//! serialises access internally, and parallel access to the same file is
//! achieved by opening multiple streams.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result, WriteError};

/// A byte source supporting positional reads.
pub trait ReadStream {
	/// Read into `buf` starting at `offset`, returning the number of bytes
	/// read. May return fewer bytes than requested only at end-of-stream.
	fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// A byte sink supporting positional writes.
pub trait WriteStream {
	/// Write `buf` at `offset`, returning the number of bytes written.
	/// Writing past the current end extends the stream.
	fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<usize>;
}

/// A stream supporting both positional reads and writes, for in-place editing.
pub trait ReadWriteStream: ReadStream + WriteStream {}

impl<T: ReadStream + WriteStream> ReadWriteStream for T {}

impl ReadStream for File {
	fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
		self.seek(SeekFrom::Start(offset))?;
		let mut total = 0;
		while total < buf.len() {
			match self.read(&mut buf[total..])? {
				0 => break,
				n => total += n,
			}
		}
		Ok(total)
	}
}

impl WriteStream for File {
	fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<usize> {
		self.seek(SeekFrom::Start(offset))?;
		self.write_all(buf)?;
		Ok(buf.len())
	}
}

/// A growable in-memory stream.
///
/// Reads past the end are truncated; writes past the end zero-fill the gap.
#[derive(Clone, Debug, Default)]
pub struct MemoryStream {
	data: Vec<u8>,
}

impl MemoryStream {
	/// An empty stream.
	pub fn new() -> Self {
		Self::default()
	}

	/// A stream over a copy of `data`.
	pub fn with_data(data: impl Into<Vec<u8>>) -> Self {
		Self { data: data.into() }
	}

	/// The current contents.
	pub fn data(&self) -> &[u8] {
		&self.data
	}

	/// Current length in bytes.
	pub fn len(&self) -> usize {
		self.data.len()
	}

	/// Whether the stream is empty.
	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	/// Consume the stream, returning its contents.
	pub fn into_data(self) -> Vec<u8> {
		self.data
	}
}

impl ReadStream for MemoryStream {
	fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
		let offset = usize::try_from(offset)
			.map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "offset too large"))?;
		if offset >= self.data.len() {
			return Ok(0);
		}

		let available = self.data.len() - offset;
		let count = buf.len().min(available);
		buf[..count].copy_from_slice(&self.data[offset..offset + count]);
		Ok(count)
	}
}

impl WriteStream for MemoryStream {
	fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<usize> {
		let offset = usize::try_from(offset)
			.map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "offset too large"))?;
		let end = offset + buf.len();
		if end > self.data.len() {
			self.data.resize(end, 0);
		}

		self.data[offset..end].copy_from_slice(buf);
		Ok(buf.len())
	}
}

/// Read exactly `buf.len()` bytes at `offset`, or fail.
///
/// A short read is reported as [`Error::NotEnoughData`]; stream errors are
/// wrapped with their positional context.
pub(crate) fn read_exact_at<S: ReadStream + ?Sized>(
	stream: &mut S,
	offset: u64,
	buf: &mut [u8],
) -> Result<()> {
	let requested = buf.len() as u64;
	let mut total = 0usize;
	while total < buf.len() {
		let n = stream
			.read_at(offset + total as u64, &mut buf[total..])
			.map_err(|source| Error::Io {
				offset,
				size: requested,
				source,
			})?;
		if n == 0 {
			return Err(Error::NotEnoughData {
				offset,
				requested,
				got: total as u64,
			});
		}

		total += n;
	}

	Ok(())
}

/// Write all of `buf` at `offset`, or fail.
///
/// A short write is fatal ([`WriteError::NotEnoughDataWritten`]); `what`
/// names the segment part being written for diagnostics.
pub(crate) fn write_all_at<S: WriteStream + ?Sized>(
	stream: &mut S,
	offset: u64,
	buf: &[u8],
	what: &'static str,
) -> Result<()> {
	let requested = buf.len() as u64;
	let written = stream
		.write_at(offset, buf)
		.map_err(|source| Error::Io {
			offset,
			size: requested,
			source,
		})? as u64;
	if written != requested {
		return Err(WriteError::NotEnoughDataWritten {
			offset,
			requested,
			written,
			what,
		}
		.into());
	}

	Ok(())
}

/// Write `count` zero bytes at `offset`, in 4-KiB chunks.
pub(crate) fn write_zeroes_at<S: WriteStream + ?Sized>(
	stream: &mut S,
	offset: u64,
	count: u64,
	what: &'static str,
) -> Result<()> {
	let zeroes = [0u8; 4096];
	let mut remaining = count;
	let mut pos = offset;
	while remaining > 0 {
		let chunk = remaining.min(zeroes.len() as u64) as usize;
		write_all_at(stream, pos, &zeroes[..chunk], what)?;
		pos += chunk as u64;
		remaining -= chunk as u64;
	}

	Ok(())
}
