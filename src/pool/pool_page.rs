//! Pool page implementation.
//!
//! A pool page is one page-aligned page that starts with a [`PageHeader`].
//! The remainder is cut into equal-size slots laid out from the end of the
//! page downwards, so slot `i` lives at `page + PAGE_SIZE - (i + 1) * size`
//! and no slot is ever page-aligned. Free slots are chained through their
//! own first word.
//!
//! This is the only module that reads or writes pool memory directly.

#[repr(C)]
pub(crate) struct PageHeader {
    magic: u32,
    owner: u32,
    object_size: u32,
    nalloc: u32,
    prev: usize,
    next: usize,
    local_free: usize,
}

const POOL_PAGE_MAGIC: u32 = 0x504f_4f4c;

/// Handle to a page owned by an object pool
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolPage<const PAGE_SIZE: usize> {
    pub addr: usize,
}

impl<const PAGE_SIZE: usize> PoolPage<PAGE_SIZE> {
    pub const HEADER_SIZE: usize = core::mem::size_of::<PageHeader>();

    pub const fn new(addr: usize) -> Self {
        Self { addr }
    }

    /// The page holding the object at `obj_addr`
    pub const fn containing(obj_addr: usize) -> Self {
        Self::new(crate::align_down(obj_addr, PAGE_SIZE))
    }

    pub const fn slots_per_page(object_size: usize) -> usize {
        (PAGE_SIZE - Self::HEADER_SIZE) / object_size
    }

    fn header(&self) -> &PageHeader {
        unsafe { &*(self.addr as *const PageHeader) }
    }

    fn header_mut(&mut self) -> &mut PageHeader {
        unsafe { &mut *(self.addr as *mut PageHeader) }
    }

    /// Write the header and thread every slot onto the local free chain.
    pub fn format(&mut self, owner: u32, object_size: usize) {
        let slots = Self::slots_per_page(object_size);
        let page_end = self.addr + PAGE_SIZE;

        // Slot 0 (highest address) ends up at the head of the chain.
        let mut head = 0;
        for i in (0..slots).rev() {
            let slot = page_end - (i + 1) * object_size;
            unsafe { (slot as *mut usize).write(head) };
            head = slot;
        }

        let header = self.header_mut();
        *header = PageHeader {
            magic: POOL_PAGE_MAGIC,
            owner,
            object_size: object_size as u32,
            nalloc: 0,
            prev: 0,
            next: 0,
            local_free: head,
        };
    }

    /// Invalidate the header before the page leaves the pool.
    pub fn retire(&mut self) {
        self.header_mut().magic = 0;
    }

    pub fn is_pool_page(&self) -> bool {
        self.header().magic == POOL_PAGE_MAGIC
    }

    pub fn owner(&self) -> u32 {
        self.header().owner
    }

    pub fn object_size(&self) -> usize {
        self.header().object_size as usize
    }

    pub fn allocated(&self) -> usize {
        self.header().nalloc as usize
    }

    pub fn is_full(&self) -> bool {
        self.header().local_free == 0
    }

    pub fn is_unused(&self) -> bool {
        self.header().nalloc == 0
    }

    /// Take one slot off the local free chain
    pub fn pop_free(&mut self) -> Option<usize> {
        let header = self.header_mut();
        let obj = header.local_free;
        if obj == 0 {
            return None;
        }
        header.local_free = unsafe { (obj as *const usize).read() };
        header.nalloc += 1;
        Some(obj)
    }

    /// Put a slot back on the local free chain
    pub fn push_free(&mut self, obj: usize) {
        let header = self.header_mut();
        unsafe { (obj as *mut usize).write(header.local_free) };
        header.local_free = obj;
        header.nalloc -= 1;
    }

    /// Index of the slot starting at `obj_addr`, if it is one
    pub fn slot_index(&self, obj_addr: usize) -> Option<usize> {
        let object_size = self.object_size();
        let page_end = self.addr + PAGE_SIZE;
        if obj_addr < self.addr + Self::HEADER_SIZE || obj_addr >= page_end {
            return None;
        }
        let offset = page_end - obj_addr;
        if offset % object_size != 0 {
            return None;
        }
        let index = offset / object_size - 1;
        (index < Self::slots_per_page(object_size)).then_some(index)
    }

    /// Push this page onto the front of the spare list starting at `head`.
    pub fn link_front(&mut self, head: &mut Option<usize>) {
        let addr = self.addr;
        let header = self.header_mut();
        header.prev = 0;
        header.next = head.unwrap_or(0);
        if let Some(old) = head.replace(addr) {
            Self::new(old).header_mut().prev = addr;
        }
    }

    /// Take this page off the spare list starting at `head`.
    pub fn unlink(&mut self, head: &mut Option<usize>) {
        let header = self.header_mut();
        let (prev, next) = (header.prev, header.next);
        header.prev = 0;
        header.next = 0;

        if prev == 0 {
            debug_assert_eq!(*head, Some(self.addr));
            *head = (next != 0).then_some(next);
        } else {
            Self::new(prev).header_mut().next = next;
        }
        if next != 0 {
            Self::new(next).header_mut().prev = prev;
        }
    }
}
