//! Open files, the console, and an in-memory file system
use crate::{KernelError, KernelResult};
use alloc::{
    boxed::Box,
    collections::{BTreeMap, VecDeque},
    string::String,
    sync::Arc,
    vec::Vec,
};
use chips_abi::FileDescriptor;
use core::{
    fmt::{self, Debug},
    sync::atomic::{AtomicBool, Ordering},
};
use spin::Mutex;
use std::io::Write;

/// An open file as seen through a file descriptor
pub trait OpenFile: Send {
    /// Name the file was opened under
    fn name(&self) -> &str;

    /// Read up to `buffer.len()` bytes. Returns how many were read; 0 at end of file
    fn read(&mut self, buffer: &mut [u8]) -> KernelResult<usize>;

    /// Write `data`, returning how many bytes were written
    fn write(&mut self, data: &[u8]) -> KernelResult<usize>;

    /// Called when the last descriptor for this file is closed
    fn close(&mut self) {}
}

impl Debug for dyn OpenFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OpenFile({})", self.name())
    }
}

#[derive(Debug, Default)]
struct ConsoleBuffers {
    input: Mutex<VecDeque<u8>>,
    output: Mutex<Vec<u8>>,
    echo: AtomicBool,
}

/// Console device. Input is queued by the host; output is collected (and optionally echoed)
#[derive(Clone, Debug, Default)]
pub struct Console {
    buffers: Arc<ConsoleBuffers>,
}

impl Console {
    /// Construct a console with no pending input
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo console output to the host's stdout as well
    pub fn set_echo(&self, echo: bool) {
        self.buffers.echo.store(echo, Ordering::SeqCst);
    }

    /// Queue bytes for user programs to read
    pub fn push_input(&self, data: &[u8]) {
        self.buffers.input.lock().extend(data);
    }

    /// Everything written to the console so far
    pub fn output(&self) -> Vec<u8> {
        self.buffers.output.lock().clone()
    }

    /// Take everything written to the console so far
    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut *self.buffers.output.lock())
    }

    /// Descriptor-ready handle to console input
    pub fn open_for_reading(&self) -> Box<dyn OpenFile> {
        Box::new(ConsoleFile {
            name: "stdin",
            buffers: self.buffers.clone(),
            writable: false,
        })
    }

    /// Descriptor-ready handle to console output
    pub fn open_for_writing(&self) -> Box<dyn OpenFile> {
        Box::new(ConsoleFile {
            name: "stdout",
            buffers: self.buffers.clone(),
            writable: true,
        })
    }
}

struct ConsoleFile {
    name: &'static str,
    buffers: Arc<ConsoleBuffers>,
    writable: bool,
}

impl OpenFile for ConsoleFile {
    fn name(&self) -> &str {
        self.name
    }

    fn read(&mut self, buffer: &mut [u8]) -> KernelResult<usize> {
        if self.writable {
            return Err(KernelError::Io(self.name.into()));
        }

        let mut input = self.buffers.input.lock();
        let count = buffer.len().min(input.len());
        for (slot, byte) in buffer.iter_mut().zip(input.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write(&mut self, data: &[u8]) -> KernelResult<usize> {
        if !self.writable {
            return Err(KernelError::Io(self.name.into()));
        }

        self.buffers.output.lock().extend_from_slice(data);
        if self.buffers.echo.load(Ordering::SeqCst) {
            let mut stdout = std::io::stdout();
            // Host output trouble shouldn't fail the user's write
            let _ = stdout.write_all(data).and_then(|()| stdout.flush());
        }
        Ok(data.len())
    }
}

/// Named files
pub trait FileSystem: Send + Sync {
    /// Open `name`, creating it empty first if `create` is set and it doesn't exist
    fn open(&self, name: &str, create: bool) -> Option<Box<dyn OpenFile>>;

    /// Remove `name`. Already open handles keep working
    fn remove(&self, name: &str) -> bool;
}

type FileContents = Arc<Mutex<Vec<u8>>>;

/// File system that lives entirely in host memory
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: Mutex<BTreeMap<String, FileContents>>,
}

impl MemoryFileSystem {
    /// Construct an empty file system
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a file with the given contents
    pub fn insert(&self, name: &str, contents: &[u8]) {
        self.files
            .lock()
            .insert(name.into(), Arc::new(Mutex::new(contents.to_vec())));
    }

    /// Contents of a file
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .get(name)
            .map(|contents| contents.lock().clone())
    }
}

impl FileSystem for MemoryFileSystem {
    fn open(&self, name: &str, create: bool) -> Option<Box<dyn OpenFile>> {
        let mut files = self.files.lock();
        let contents = match files.get(name) {
            Some(contents) => contents.clone(),
            None if create => files.entry(name.into()).or_default().clone(),
            None => return None,
        };
        Some(Box::new(MemoryFile {
            name: name.into(),
            contents,
            position: 0,
        }))
    }

    fn remove(&self, name: &str) -> bool {
        self.files.lock().remove(name).is_some()
    }
}

struct MemoryFile {
    name: String,
    contents: FileContents,
    position: usize,
}

impl OpenFile for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buffer: &mut [u8]) -> KernelResult<usize> {
        let contents = self.contents.lock();
        let start = self.position.min(contents.len());
        let count = buffer.len().min(contents.len() - start);
        buffer[..count].copy_from_slice(&contents[start..start + count]);
        self.position = start + count;
        Ok(count)
    }

    fn write(&mut self, data: &[u8]) -> KernelResult<usize> {
        let mut contents = self.contents.lock();
        let end = self.position + data.len();
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[self.position..end].copy_from_slice(data);
        self.position = end;
        Ok(data.len())
    }
}

/// Per-process file descriptor table
#[derive(Debug)]
pub struct FileTable {
    slots: Vec<Option<Box<dyn OpenFile>>>,
}

impl FileTable {
    /// Construct a table of `capacity` slots with stdin and stdout bound
    pub fn new(capacity: usize, console: &Console) -> Self {
        assert!(capacity >= 2, "File table too small for stdin and stdout");
        let mut slots: Vec<Option<Box<dyn OpenFile>>> = (0..capacity).map(|_| None).collect();
        slots[usize::from(FileDescriptor::STDIN)] = Some(console.open_for_reading());
        slots[usize::from(FileDescriptor::STDOUT)] = Some(console.open_for_writing());
        Self { slots }
    }

    /// File open under `fd`
    pub fn get_mut(&mut self, fd: FileDescriptor) -> Option<&mut Box<dyn OpenFile>> {
        self.slots.get_mut(usize::from(fd))?.as_mut()
    }

    /// Put `file` in the lowest free slot
    ///
    /// Gives the file back if the table is full
    pub fn insert(&mut self, file: Box<dyn OpenFile>) -> Result<FileDescriptor, Box<dyn OpenFile>> {
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            return Err(file);
        };
        let Ok(fd) = FileDescriptor::try_from(index) else {
            return Err(file);
        };
        self.slots[index] = Some(file);
        Ok(fd)
    }

    /// Close `fd`. Returns false if nothing was open there
    pub fn close(&mut self, fd: FileDescriptor) -> bool {
        match self.slots.get_mut(usize::from(fd)).and_then(Option::take) {
            Some(mut file) => {
                file.close();
                true
            }
            None => false,
        }
    }

    /// Close everything
    pub fn close_all(&mut self) {
        for mut file in self.slots.iter_mut().filter_map(Option::take) {
            file.close();
        }
    }

    /// Number of open descriptors
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}
