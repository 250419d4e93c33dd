//! Exported linear memories and byte views over them.
//!
//! A [`MemoryView`] remembers the byte length the memory had when the view
//! was taken. Growing a memory may move its storage, so every access first
//! compares that length with the current one; a view taken before a grow is
//! stale and refuses access instead of touching freed bytes. Take a new view
//! with [`Memory::buffer`] after growing.
//!
//! Bytes are never handed out past the end of an access: reads copy out,
//! writes copy in, and [`MemoryView::with_bytes`] lends a slice only for the
//! duration of a closure, under the instance lock.

use std::fmt;
use std::ops::Range;
use std::sync::Weak;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, instrument};
use wasm_bind_common::{BindError, WASM_PAGE_SIZE};

use crate::boundary::Handle;
use crate::instance::{InstanceInner, upgrade};

/// A linear memory exported by an instance.
///
/// Like [`crate::Function`], a `Memory` holds its instance weakly. Every
/// operation fails with `IllegalState` once the instance is closed.
#[derive(Clone)]
pub struct Memory {
    name: String,
    handle: Handle,
    instance: Weak<InstanceInner>,
}

impl Memory {
    pub(crate) fn new(name: &str, handle: Handle, instance: Weak<InstanceInner>) -> Self {
        Self {
            name: name.to_string(),
            handle,
            instance,
        }
    }

    /// The export name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A view over the memory's current bytes.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the instance is closed.
    pub fn buffer(&self) -> Result<MemoryView, BindError> {
        let byte_len = self.data_size()?;
        Ok(MemoryView {
            memory: self.clone(),
            byte_len,
        })
    }

    /// Grow the memory by `pages` 64 KiB pages and return the previous size
    /// in pages.
    ///
    /// Views taken before a successful grow become stale.
    ///
    /// # Errors
    ///
    /// - `Grow` if the memory's maximum or the configured memory limit would
    ///   be exceeded. The size is unchanged.
    /// - `IllegalState` if the instance is closed.
    #[instrument(skip(self), fields(memory = %self.name))]
    pub fn grow(&self, pages: u32) -> Result<u32, BindError> {
        let instance = upgrade(&self.instance)?;
        let previous =
            instance.with_live(|engine, _| engine.memory_grow(self.handle, pages))?;

        info!(
            previous_pages = previous,
            pages = previous.saturating_add(pages),
            "Memory grown"
        );
        Ok(previous)
    }

    /// Current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the instance is closed.
    pub fn data_size(&self) -> Result<usize, BindError> {
        let instance = upgrade(&self.instance)?;
        let mut len = 0;
        instance.with_live(|engine, _| {
            engine.memory_view(self.handle, &mut |bytes: &mut [u8]| len = bytes.len())
        })?;
        Ok(len)
    }

    /// Current size in pages.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the instance is closed.
    pub fn size_pages(&self) -> Result<u32, BindError> {
        let pages = self.data_size()? / WASM_PAGE_SIZE;
        Ok(u32::try_from(pages).unwrap_or(u32::MAX))
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// A bounds-checked window onto a [`Memory`].
///
/// All offsets are byte offsets from the start of the memory. Multi-byte
/// values use little-endian order, matching WebAssembly.
#[derive(Clone)]
pub struct MemoryView {
    memory: Memory,
    byte_len: usize,
}

macro_rules! le_accessors {
    ($($ty:ty, $size:literal, $read:ident, $write:ident;)*) => {
        $(
            #[doc = concat!("Read a little-endian `", stringify!($ty), "` at `offset`.")]
            ///
            /// # Errors
            ///
            /// Same as [`MemoryView::read`].
            pub fn $read(&self, offset: usize) -> Result<$ty, BindError> {
                let mut buf = [0u8; $size];
                self.read(offset, &mut buf)?;
                Ok(LittleEndian::$read(&buf))
            }

            #[doc = concat!("Write a little-endian `", stringify!($ty), "` at `offset`.")]
            ///
            /// # Errors
            ///
            /// Same as [`MemoryView::write`].
            pub fn $write(&self, offset: usize, value: $ty) -> Result<(), BindError> {
                let mut buf = [0u8; $size];
                LittleEndian::$write(&mut buf, value);
                self.write(offset, &buf)
            }
        )*
    };
}

impl MemoryView {
    /// Length in bytes when the view was taken.
    pub fn len(&self) -> usize {
        self.byte_len
    }

    pub fn is_empty(&self) -> bool {
        self.byte_len == 0
    }

    /// The memory this view looks at.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Whether the memory has changed size since the view was taken, or is
    /// no longer reachable.
    pub fn is_stale(&self) -> bool {
        self.memory
            .data_size()
            .map_or(true, |len| len != self.byte_len)
    }

    /// Run `f` over the memory's bytes.
    ///
    /// # Errors
    ///
    /// - `IllegalState` if the view is stale or the instance is closed
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, BindError> {
        self.with_bytes_mut(|bytes| f(bytes))
    }

    /// Run `f` over the memory's bytes, mutably.
    ///
    /// The instance is locked while `f` runs; calling back into the same
    /// instance from `f` deadlocks.
    ///
    /// # Errors
    ///
    /// - `IllegalState` if the view is stale or the instance is closed
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, BindError> {
        let instance = upgrade(&self.memory.instance)?;
        let expected = self.byte_len;
        let mut current = expected;
        let mut f = Some(f);
        let mut output = None;

        instance.with_live(|engine, _| {
            engine.memory_view(self.memory.handle, &mut |bytes: &mut [u8]| {
                current = bytes.len();
                if current == expected {
                    output = f.take().map(|f| f(bytes));
                }
            })
        })?;

        output.ok_or_else(|| {
            debug!(memory = %self.memory.name, expected, current, "Stale memory view");
            BindError::illegal_state(format!(
                "stale view of memory `{}`: taken at {expected} bytes, memory is now {current} bytes",
                self.memory.name
            ))
        })
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    ///
    /// # Errors
    ///
    /// - `MemoryAccess` if the range is out of bounds
    /// - `IllegalState` if the view is stale or the instance is closed
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), BindError> {
        let range = self.range(offset, buf.len())?;
        self.with_bytes(|bytes| buf.copy_from_slice(&bytes[range]))
    }

    /// Copy `data` into memory starting at `offset`.
    ///
    /// # Errors
    ///
    /// - `MemoryAccess` if the range is out of bounds
    /// - `IllegalState` if the view is stale or the instance is closed
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), BindError> {
        let range = self.range(offset, data.len())?;
        self.with_bytes_mut(|bytes| bytes[range].copy_from_slice(data))
    }

    /// Read one byte.
    ///
    /// # Errors
    ///
    /// Same as [`Self::read`].
    pub fn read_u8(&self, offset: usize) -> Result<u8, BindError> {
        let mut buf = [0u8; 1];
        self.read(offset, &mut buf)?;
        Ok(buf[0])
    }

    /// Write one byte.
    ///
    /// # Errors
    ///
    /// Same as [`Self::write`].
    pub fn write_u8(&self, offset: usize, value: u8) -> Result<(), BindError> {
        self.write(offset, &[value])
    }

    le_accessors! {
        i32, 4, read_i32, write_i32;
        i64, 8, read_i64, write_i64;
        f32, 4, read_f32, write_f32;
        f64, 8, read_f64, write_f64;
    }

    /// Copy `len` bytes starting at `offset` into a new `Vec`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::read`].
    pub fn copy_to_vec(&self, offset: usize, len: usize) -> Result<Vec<u8>, BindError> {
        let range = self.range(offset, len)?;
        self.with_bytes(|bytes| bytes[range].to_vec())
    }

    /// Decode `len` bytes at `offset` as UTF-8, replacing invalid sequences.
    ///
    /// # Errors
    ///
    /// Same as [`Self::read`].
    pub fn read_str_lossy(&self, offset: usize, len: usize) -> Result<String, BindError> {
        let range = self.range(offset, len)?;
        self.with_bytes(|bytes| String::from_utf8_lossy(&bytes[range]).into_owned())
    }

    /// Read a NUL-terminated string starting at `offset`, without the NUL.
    ///
    /// Stops at the end of the memory if no NUL follows.
    ///
    /// # Errors
    ///
    /// Same as [`Self::read`].
    pub fn read_c_str_lossy(&self, offset: usize) -> Result<String, BindError> {
        let range = self.range(offset, 0)?;
        self.with_bytes(|bytes| {
            let tail = &bytes[range.start..];
            let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
            String::from_utf8_lossy(&tail[..end]).into_owned()
        })
    }

    fn range(&self, offset: usize, len: usize) -> Result<Range<usize>, BindError> {
        offset
            .checked_add(len)
            .filter(|&end| end <= self.byte_len)
            .map(|end| offset..end)
            .ok_or(BindError::MemoryAccess {
                offset,
                len,
                size: self.byte_len,
            })
    }
}

impl fmt::Debug for MemoryView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryView")
            .field("memory", &self.memory.name)
            .field("len", &self.byte_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(byte_len: usize) -> MemoryView {
        MemoryView {
            memory: Memory::new("memory", Handle::new(1).unwrap(), Weak::new()),
            byte_len,
        }
    }

    #[test]
    fn test_range_checks_bounds() {
        let view = detached(16);

        assert_eq!(view.range(0, 16).unwrap(), 0..16);
        assert_eq!(view.range(16, 0).unwrap(), 16..16);
        assert_eq!(
            view.range(12, 8).unwrap_err(),
            BindError::MemoryAccess {
                offset: 12,
                len: 8,
                size: 16
            }
        );
        assert!(view.range(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_out_of_bounds_is_reported_before_instance_check() {
        let view = detached(4);

        let err = view.read_i64(0).unwrap_err();
        assert!(matches!(err, BindError::MemoryAccess { .. }));
    }

    #[test]
    fn test_detached_view_is_stale() {
        let view = detached(4);

        assert!(view.is_stale());
        let err = view.read_u8(0).unwrap_err();
        assert!(matches!(err, BindError::IllegalState { .. }));
    }

    #[test]
    fn test_len() {
        assert_eq!(detached(0).len(), 0);
        assert!(detached(0).is_empty());
        assert_eq!(detached(65_536).len(), 65_536);
    }
}
