//! Executable images
//!
//! An image is what `exec` loads: a set of sections to copy into the new address space, plus the
//! program itself. Programs are host closures that drive the simulated processor through a
//! [UserContext].
use crate::{machine::processor::PAGE_SIZE, userprog::context::UserContext, util::align_up};
use alloc::{collections::BTreeMap, string::String, sync::Arc, vec::Vec};
use core::fmt::{self, Debug};
use spin::RwLock;

/// Code of a user program
pub type UserProgram = Arc<dyn Fn(&mut UserContext<'_>) + Send + Sync>;

/// A contiguous run of pages in an image
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    name: String,
    first_vpn: usize,
    num_pages: usize,
    read_only: bool,
    contents: Vec<u8>,
}

impl Section {
    /// Construct a section just big enough for `contents` (at least one page)
    pub fn new(name: &str, first_vpn: usize, read_only: bool, contents: Vec<u8>) -> Self {
        let num_pages = (align_up::<PAGE_SIZE>(contents.len()) / PAGE_SIZE).max(1);
        Self {
            name: name.into(),
            first_vpn,
            num_pages,
            read_only,
            contents,
        }
    }

    /// Construct a zero-filled section of `num_pages` pages
    pub fn zeroed(name: &str, first_vpn: usize, num_pages: usize, read_only: bool) -> Self {
        Self {
            name: name.into(),
            first_vpn,
            num_pages,
            read_only,
            contents: Vec::new(),
        }
    }

    /// Section name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First virtual page
    pub fn first_vpn(&self) -> usize {
        self.first_vpn
    }

    /// Length in pages
    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Return true if user code may not write the section
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Fill `frame` with page `index` of the section
    pub fn load_page(&self, index: usize, frame: &mut [u8]) {
        assert!(index < self.num_pages, "Page {index} outside {}", self.name);
        frame.fill(0);
        let start = (index * PAGE_SIZE).min(self.contents.len());
        let end = (start + PAGE_SIZE).min(self.contents.len());
        frame[..end - start].copy_from_slice(&self.contents[start..end]);
    }
}

/// An installed executable
#[derive(Clone)]
pub struct Image {
    sections: Vec<Section>,
    entry_point: u32,
    program: UserProgram,
}

impl Image {
    /// Construct an image with no sections
    pub fn new(program: impl Fn(&mut UserContext<'_>) + Send + Sync + 'static) -> Self {
        Self {
            sections: Vec::new(),
            entry_point: 0,
            program: Arc::new(program),
        }
    }

    /// Add a section
    pub fn with_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    /// Set the initial program counter
    pub fn with_entry_point(mut self, entry_point: u32) -> Self {
        self.entry_point = entry_point;
        self
    }

    /// Sections in load order
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Initial program counter
    pub fn entry_point(&self) -> u32 {
        self.entry_point
    }

    /// The program
    pub fn program(&self) -> &UserProgram {
        &self.program
    }
}

impl Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Image")
            .field("sections", &self.sections)
            .field("entry_point", &self.entry_point)
            .finish_non_exhaustive()
    }
}

/// Executables by name
#[derive(Debug, Default)]
pub struct ImageLibrary {
    images: RwLock<BTreeMap<String, Arc<Image>>>,
}

impl ImageLibrary {
    /// Construct an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `image` under `name`, replacing any previous one
    pub fn install(&self, name: &str, image: Image) {
        self.images.write().insert(name.into(), Arc::new(image));
    }

    /// Look up an executable
    pub fn open(&self, name: &str) -> Option<Arc<Image>> {
        self.images.read().get(name).cloned()
    }

    /// Names of every installed executable
    pub fn names(&self) -> Vec<String> {
        self.images.read().keys().cloned().collect()
    }
}
