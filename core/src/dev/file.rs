//! Virtual file device.

use indexmap::IndexMap;
use log::debug;
use mipsim_arch::Byte;

/// Open-for-read flag value.
const O_RDONLY: u32 = 0;
/// Open-for-write flag value.
const O_WRONLY: u32 = 1;
/// Append flag bit.
const O_APPEND: u32 = 8;

/// First descriptor handed out; 0-2 are reserved for the console.
const FD_BASE: u32 = 3;

/// In-memory file store backing the file syscalls.
///
/// Files are keyed by name and live for the simulator's lifetime, which is
/// exactly what headless testing of `open`/`read`/`write`/`close` needs.
#[derive(Debug, Default)]
pub struct Files {
    /// File contents by name.
    files: IndexMap<String, Vec<Byte>>,
    /// Open descriptors.
    handles: Vec<Option<Handle>>,
}

#[derive(Debug)]
struct Handle {
    /// File name.
    name: String,
    /// Read cursor.
    pos: usize,
    /// Opened writable.
    writable: bool,
}

impl Files {
    /// Constructs a new, empty `Files`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file's contents, creating or replacing it.
    pub fn put(&mut self, name: &str, contents: &[Byte]) {
        self.files.insert(name.to_owned(), contents.to_vec());
    }

    /// Gets a file's contents.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[Byte]> {
        self.files.get(name).map(Vec::as_slice)
    }

    /// Opens a file, returning its descriptor.
    ///
    /// Opening for read fails when the file does not exist; opening for
    /// write creates or truncates it, and append keeps the contents.
    pub fn open(&mut self, name: &str, flags: u32) -> Option<u32> {
        let writable = flags & O_WRONLY != 0;
        if writable {
            let keep = flags & O_APPEND != 0;
            if !keep || !self.files.contains_key(name) {
                self.files.insert(name.to_owned(), Vec::new());
            }
        } else if flags != O_RDONLY || !self.files.contains_key(name) {
            return None;
        }
        let pos = if writable {
            self.files.get(name).map_or(0, Vec::len)
        } else {
            0
        };
        let handle = Handle {
            name: name.to_owned(),
            pos,
            writable,
        };
        let fd = match self.handles.iter().position(Option::is_none) {
            Some(idx) => {
                self.handles[idx] = Some(handle);
                idx as u32
            }
            None => {
                self.handles.push(Some(handle));
                self.handles.len() as u32 - 1
            }
        };
        debug!("opened `{name}` as fd {}", fd + FD_BASE);
        Some(fd + FD_BASE)
    }

    /// Reads up to `len` bytes from a descriptor.
    ///
    /// Returns `None` for bad descriptors.
    pub fn read(&mut self, fd: u32, len: usize) -> Option<Vec<Byte>> {
        let (name, pos) = {
            let handle = self.handle(fd)?;
            (handle.name.clone(), handle.pos)
        };
        let contents = self.files.get(&name)?;
        let start = pos.min(contents.len());
        let end = (start + len).min(contents.len());
        let out = contents[start..end].to_vec();
        self.handle(fd)?.pos = end;
        Some(out)
    }

    /// Appends bytes through a writable descriptor.
    ///
    /// Returns the number of bytes written, or `None` for bad descriptors.
    pub fn write(&mut self, fd: u32, bytes: &[Byte]) -> Option<usize> {
        let handle = self.handle(fd)?;
        if !handle.writable {
            return None;
        }
        let name = handle.name.clone();
        self.files.get_mut(&name)?.extend_from_slice(bytes);
        Some(bytes.len())
    }

    /// Closes a descriptor.
    pub fn close(&mut self, fd: u32) -> bool {
        let Some(idx) = fd.checked_sub(FD_BASE) else {
            return false;
        };
        match self.handles.get_mut(idx as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    fn handle(&mut self, fd: u32) -> Option<&mut Handle> {
        let idx = fd.checked_sub(FD_BASE)?;
        self.handles.get_mut(idx as usize)?.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_read_close_works() {
        let mut files = Files::new();
        files.put("in.txt", b"hello");
        let fd = files.open("in.txt", O_RDONLY).unwrap();
        assert_eq!(files.read(fd, 3), Some(b"hel".to_vec()));
        assert_eq!(files.read(fd, 10), Some(b"lo".to_vec()));
        assert_eq!(files.read(fd, 1), Some(Vec::new()));
        assert!(files.close(fd));
        assert_eq!(files.read(fd, 1), None);
    }

    #[test]
    fn open_missing_for_read_fails() {
        let mut files = Files::new();
        assert_eq!(files.open("absent.txt", O_RDONLY), None);
    }

    #[test]
    fn write_creates_and_appends() {
        let mut files = Files::new();
        let fd = files.open("out.txt", O_WRONLY).unwrap();
        assert_eq!(files.write(fd, b"ab"), Some(2));
        assert_eq!(files.write(fd, b"cd"), Some(2));
        files.close(fd);
        assert_eq!(files.get("out.txt"), Some(&b"abcd"[..]));
    }

    #[test]
    fn append_keeps_contents() {
        let mut files = Files::new();
        files.put("log.txt", b"old");
        let fd = files.open("log.txt", O_WRONLY | O_APPEND).unwrap();
        files.write(fd, b"+new");
        assert_eq!(files.get("log.txt"), Some(&b"old+new"[..]));
    }

    #[test]
    fn descriptors_are_reused() {
        let mut files = Files::new();
        files.put("a", b"");
        files.put("b", b"");
        let fd_a = files.open("a", O_RDONLY).unwrap();
        files.close(fd_a);
        let fd_b = files.open("b", O_RDONLY).unwrap();
        assert_eq!(fd_a, fd_b);
    }
}
