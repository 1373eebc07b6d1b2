//! The GPU memory suballocator.
//!
//! The pure bookkeeping -- which page a request lands on, how free regions
//! are split/coalesced, which pages are "available" to the sorted index --
//! lives in [`RegionTable`] and has no Vulkan dependency, so it can be unit
//! tested directly. [`MemorySubAllocator`] wraps one
//! `RegionTable` per memory type with the actual `VkDeviceMemory` pages and
//! persistent host-visible mappings, and [`DeviceAllocator`] owns one
//! `MemorySubAllocator` per memory type plus the type-selection policy that
//! the `bind()` entry point folds in.

use std::collections::HashMap;
use std::ptr::NonNull;

use ash::vk;

use crate::DeviceError;

/// 2 MiB: requests at or below this size are small-page allocations.
pub const SMALL_ALLOCATION_THRESHOLD: u64 = 2 * 1024 * 1024;
/// Fixed size of a small page.
pub const SMALL_PAGE_SIZE: u64 = 16 * 1024 * 1024;
/// Large pages are sized up to this boundary.
pub const LARGE_PAGE_ALIGNMENT: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Small,
    Large,
}

fn classify(required_size: u64) -> PageKind {
    if required_size <= SMALL_ALLOCATION_THRESHOLD {
        PageKind::Small
    } else {
        PageKind::Large
    }
}

fn page_size_for(kind: PageKind, required_size: u64) -> u64 {
    match kind {
        PageKind::Small => SMALL_PAGE_SIZE,
        PageKind::Large => {
            ((required_size + LARGE_PAGE_ALIGNMENT - 1) / LARGE_PAGE_ALIGNMENT)
                * LARGE_PAGE_ALIGNMENT
        }
    }
}

fn align_up(offset: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return offset;
    }
    (offset + alignment - 1) / alignment * alignment
}

pub type PageId = u32;

#[derive(Debug, Clone, Copy)]
struct FreeRegion {
    id: u64,
    offset: u64,
    size: u64,
}

#[derive(Debug)]
struct Page {
    kind: PageKind,
    size: u64,
    free: Vec<FreeRegion>,
    next_region_id: u64,
    used_count: u32,
    /// Cleared while the defragmenter targets this page; a cleared page's
    /// free regions are pulled from the sorted index.
    available: bool,
}

impl Page {
    fn new(kind: PageKind, size: u64) -> Self {
        Page {
            kind,
            size,
            free: vec![FreeRegion {
                id: 0,
                offset: 0,
                size,
            }],
            next_region_id: 1,
            used_count: 0,
            available: true,
        }
    }

    fn total_free(&self) -> u64 {
        self.free.iter().map(|r| r.size).sum()
    }

    fn is_fragmented(&self) -> bool {
        self.free.len() > 1
    }

    fn is_empty(&self) -> bool {
        self.used_count == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct FreeIndexEntry {
    size: u64,
    page: PageId,
    region_id: u64,
}

/// A carved-out region backing one buffer or image.
/// `resource_offset`/`resource_size` are the actual bind
/// offset/size within `size` after alignment padding; `offset`/`size` are
/// the full span reserved from the page's free list.
#[derive(Debug, Clone, Copy)]
pub struct UsedRegion {
    pub page: PageId,
    pub offset: u64,
    pub size: u64,
    pub resource_offset: u64,
    pub resource_size: u64,
    pub alignment: u64,
    pub is_buffer: bool,
}

/// The pure, Vulkan-agnostic page/free-region ledger for one memory type.
#[derive(Debug, Default)]
pub struct RegionTable {
    pages: Vec<Page>,
    free_index: Vec<FreeIndexEntry>,
}

impl RegionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to satisfy `required_size`/`alignment` from existing free
    /// regions of the matching `kind`. Scans the sorted-by-size-descending
    /// index: best-fit among large-enough regions by size-descending scan.
    fn try_fit(&mut self, kind: PageKind, required_size: u64, alignment: u64) -> Option<(PageId, u64, u64)> {
        let pos = self.free_index.iter().position(|entry| {
            let page = &self.pages[entry.page as usize];
            if page.kind != kind {
                return false;
            }
            let region = page
                .free
                .iter()
                .find(|r| r.id == entry.region_id)
                .expect("free index entry must reference a live free region");
            let aligned = align_up(region.offset, alignment);
            aligned + required_size <= region.offset + region.size
        })?;
        let entry = self.free_index.remove(pos);
        let page = &mut self.pages[entry.page as usize];
        let region_idx = page
            .free
            .iter()
            .position(|r| r.id == entry.region_id)
            .unwrap();
        let region = page.free.remove(region_idx);

        let aligned = align_up(region.offset, alignment);
        let consumed = (aligned - region.offset) + required_size;
        let remainder_offset = region.offset + consumed;
        let remainder_size = region.size - consumed;
        if remainder_size > 0 {
            let id = page.next_region_id;
            page.next_region_id += 1;
            page.free.push(FreeRegion {
                id,
                offset: remainder_offset,
                size: remainder_size,
            });
            if page.available {
                self.insert_free_index(entry.page, id, remainder_size);
            }
        }
        page.used_count += 1;
        Some((entry.page, region.offset, consumed))
    }

    fn insert_free_index(&mut self, page: PageId, region_id: u64, size: u64) {
        let pos = self
            .free_index
            .partition_point(|e| e.size > size);
        self.free_index.insert(
            pos,
            FreeIndexEntry {
                size,
                page,
                region_id,
            },
        );
    }

    /// Register a brand-new page and allocate `required_size` from it.
    /// Only called once `try_fit` has failed; the new page is sized by the
    /// caller (`page_size_for`) so this always succeeds.
    fn add_page_and_allocate(
        &mut self,
        kind: PageKind,
        page_size: u64,
        required_size: u64,
        alignment: u64,
    ) -> (PageId, u64, u64) {
        let page_id = self.pages.len() as PageId;
        self.pages.push(Page::new(kind, page_size));
        let (page, offset, consumed) = self
            .try_fit(kind, required_size, alignment)
            .filter(|&(p, _, _)| p == page_id)
            .unwrap_or_else(|| {
                // try_fit scans the whole table; since the new page is the
                // only one with a fitting free region immediately after
                // creation in the common case, but to stay correct even if
                // another page also now qualifies, allocate directly from
                // the new page.
                let page = &mut self.pages[page_id as usize];
                let region = page.free.remove(0);
                let aligned = align_up(region.offset, alignment);
                let consumed = (aligned - region.offset) + required_size;
                let remainder_size = region.size - consumed;
                if remainder_size > 0 {
                    let id = page.next_region_id;
                    page.next_region_id += 1;
                    page.free.push(FreeRegion {
                        id,
                        offset: region.offset + consumed,
                        size: remainder_size,
                    });
                    self.insert_free_index(page_id, id, remainder_size);
                }
                page.used_count += 1;
                (page_id, region.offset, consumed)
            });
        (page, offset, consumed)
    }

    /// Mark every fragmented, currently-available page of `kind` as
    /// unavailable and pending defrag, pulling its free regions out of the
    /// sorted index. Returns the pages marked.
    fn quarantine_fragmented(&mut self, kind: PageKind) -> Vec<PageId> {
        let mut marked = Vec::new();
        for (idx, page) in self.pages.iter_mut().enumerate() {
            if page.kind == kind && page.available && page.is_fragmented() {
                page.available = false;
                marked.push(idx as PageId);
            }
        }
        if !marked.is_empty() {
            self.free_index
                .retain(|e| !marked.contains(&e.page));
        }
        marked
    }

    fn release(&mut self, region: &UsedRegion) {
        let page = &mut self.pages[region.page as usize];
        page.used_count -= 1;

        let mut merged_offset = region.offset;
        let mut merged_size = region.size;

        // Coalesce with a left neighbour.
        if let Some(pos) = page
            .free
            .iter()
            .position(|r| r.offset + r.size == merged_offset)
        {
            let left = page.free.remove(pos);
            merged_offset = left.offset;
            merged_size += left.size;
            if page.available {
                self.free_index
                    .retain(|e| !(e.page == region.page && e.region_id == left.id));
            }
        }
        // Coalesce with a right neighbour.
        let page = &mut self.pages[region.page as usize];
        if let Some(pos) = page
            .free
            .iter()
            .position(|r| merged_offset + merged_size == r.offset)
        {
            let right = page.free.remove(pos);
            merged_size += right.size;
            if page.available {
                self.free_index
                    .retain(|e| !(e.page == region.page && e.region_id == right.id));
            }
        }

        let page = &mut self.pages[region.page as usize];
        let id = page.next_region_id;
        page.next_region_id += 1;
        page.free.push(FreeRegion {
            id,
            offset: merged_offset,
            size: merged_size,
        });
        if page.available {
            self.insert_free_index(region.page, id, merged_size);
        }
    }

    /// Pages with zero used regions, eligible for lazy deallocation after a
    /// submission completes.
    fn empty_pages(&self) -> Vec<PageId> {
        self.pages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_empty())
            .map(|(i, _)| i as PageId)
            .collect()
    }

    fn remove_page(&mut self, page: PageId) {
        self.free_index.retain(|e| e.page != page);
        // Pages are addressed by index, so we can't shrink the vec without
        // relabeling every other page; mark it as a zero-size empty
        // placeholder instead. The backend-level deallocation loop
        // reaps these by checking `size == 0`.
        self.pages[page as usize] = Page::new(PageKind::Small, 0);
        self.pages[page as usize].free.clear();
        self.pages[page as usize].available = false;
    }

    #[cfg(test)]
    fn invariant_free_matches_used(&self, page: PageId) -> bool {
        let p = &self.pages[page as usize];
        // total_free + total_used == page.size. We don't track used byte
        // sum directly here (only count), so this helper is exercised via
        // allocate/release bookkeeping in the test module instead.
        p.total_free() <= p.size
    }

    #[cfg(test)]
    fn free_index_len(&self) -> usize {
        self.free_index.len()
    }

    #[cfg(test)]
    fn page_available(&self, page: PageId) -> bool {
        self.pages[page as usize].available
    }
}

/// One memory-type's page set plus the native `VkDeviceMemory` handles and
/// persistent host-visible mappings the pure [`RegionTable`] can't hold.
pub struct MemorySubAllocator {
    pub memory_type_index: u32,
    table: RegionTable,
    native_pages: Vec<NativePage>,
    reported_oom: bool,
    pending_defrag: Vec<PageId>,
}

struct NativePage {
    memory: vk::DeviceMemory,
    mapped_ptr: Option<NonNull<u8>>,
    size: u64,
}

unsafe impl Send for MemorySubAllocator {}

impl MemorySubAllocator {
    pub fn new(memory_type_index: u32) -> Self {
        Self {
            memory_type_index,
            table: RegionTable::new(),
            native_pages: Vec::new(),
            reported_oom: false,
            pending_defrag: Vec::new(),
        }
    }

    /// Allocate a region of `required_size`/`alignment`, creating a new
    /// page via `device` if nothing fits.
    pub unsafe fn allocate(
        &mut self,
        device: &ash::Device,
        required_size: u64,
        alignment: u64,
        host_visible: bool,
        is_buffer: bool,
    ) -> Result<UsedRegion, DeviceError> {
        let kind = classify(required_size);

        if let Some((page, offset, consumed)) = self.table.try_fit(kind, required_size, alignment)
        {
            return Ok(self.finish_region(page, offset, consumed, required_size, alignment, is_buffer));
        }

        let marked = self.table.quarantine_fragmented(kind);
        if !marked.is_empty() {
            self.pending_defrag.extend(marked);
        }

        let page_size = page_size_for(kind, required_size);
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(page_size)
            .memory_type_index(self.memory_type_index);
        let memory = match device.allocate_memory(&alloc_info, None) {
            Ok(m) => m,
            Err(e) => {
                if !self.reported_oom {
                    self.reported_oom = true;
                    log::error!("out of memory allocating a {page_size}-byte page: {e:?}");
                }
                return Err(DeviceError::from(e));
            }
        };
        let mapped_ptr = if host_visible {
            match device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()) {
                Ok(ptr) => NonNull::new(ptr as *mut u8),
                Err(e) => {
                    device.free_memory(memory, None);
                    return Err(DeviceError::from(e));
                }
            }
        } else {
            None
        };

        self.native_pages.push(NativePage {
            memory,
            mapped_ptr,
            size: page_size,
        });
        let (page, offset, consumed) =
            self.table
                .add_page_and_allocate(kind, page_size, required_size, alignment);
        Ok(self.finish_region(page, offset, consumed, required_size, alignment, is_buffer))
    }

    fn finish_region(
        &self,
        page: PageId,
        offset: u64,
        consumed: u64,
        resource_size: u64,
        alignment: u64,
        is_buffer: bool,
    ) -> UsedRegion {
        let aligned = align_up(offset, alignment);
        UsedRegion {
            page,
            offset,
            size: consumed,
            resource_offset: aligned,
            resource_size,
            alignment,
            is_buffer,
        }
    }

    pub fn release(&mut self, region: &UsedRegion) {
        self.table.release(region);
    }

    pub fn native_memory(&self, page: PageId) -> vk::DeviceMemory {
        self.native_pages[page as usize].memory
    }

    /// Pointer to the start of `region`'s resource span within the page's
    /// persistent mapping, if the page is host-visible.
    pub fn mapped_ptr(&self, region: &UsedRegion) -> Option<NonNull<u8>> {
        let base = self.native_pages[region.page as usize].mapped_ptr?;
        // SAFETY: resource_offset is within the page, which was mapped for
        // its entire size.
        Some(unsafe { NonNull::new_unchecked(base.as_ptr().add(region.resource_offset as usize)) })
    }

    pub fn take_pending_defrag(&mut self) -> Vec<PageId> {
        std::mem::take(&mut self.pending_defrag)
    }

    /// Deallocate any fully-empty page (called after submission
    /// cleanup). Returns the number of pages freed.
    pub unsafe fn reap_empty_pages(&mut self, device: &ash::Device) -> usize {
        let empties = self.table.empty_pages();
        for page in &empties {
            let native = &self.native_pages[*page as usize];
            if native.size == 0 {
                continue;
            }
            if native.mapped_ptr.is_some() {
                device.unmap_memory(native.memory);
            }
            device.free_memory(native.memory, None);
            self.native_pages[*page as usize] = NativePage {
                memory: vk::DeviceMemory::null(),
                mapped_ptr: None,
                size: 0,
            };
            self.table.remove_page(*page);
        }
        empties.len()
    }
}

/// Picks a memory type and delegates to its [`MemorySubAllocator`]. This is
/// the `bind()` entry point.
pub struct DeviceAllocator {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    sub_allocators: HashMap<u32, MemorySubAllocator>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BindPreferences {
    pub prefer_host_local: bool,
    pub prefer_device_local: bool,
    pub require_host_visible: bool,
}

impl DeviceAllocator {
    pub fn new(memory_properties: vk::PhysicalDeviceMemoryProperties) -> Self {
        Self {
            memory_properties,
            sub_allocators: HashMap::new(),
        }
    }

    fn pick_memory_type(
        &self,
        type_bits: u32,
        prefs: BindPreferences,
    ) -> Option<(u32, bool)> {
        let mut best: Option<(u32, i32, bool)> = None;
        for i in 0..self.memory_properties.memory_type_count {
            if type_bits & (1 << i) == 0 {
                continue;
            }
            let flags = self.memory_properties.memory_types[i as usize].property_flags;
            let host_visible = flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
            if prefs.require_host_visible && !host_visible {
                continue;
            }
            let mut score = 0;
            if prefs.prefer_device_local && flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL) {
                score += 1;
            }
            if prefs.prefer_host_local && host_visible {
                score += 1;
            }
            if best.map_or(true, |(_, best_score, _)| score > best_score) {
                best = Some((i, score, host_visible));
            }
        }
        best.map(|(idx, _, host_visible)| (idx, host_visible))
    }

    /// Binds a resource to device memory. `requirements` is the native
    /// `VkMemoryRequirements` for the buffer/image being bound.
    pub unsafe fn bind(
        &mut self,
        device: &ash::Device,
        requirements: vk::MemoryRequirements,
        prefs: BindPreferences,
        is_buffer: bool,
    ) -> Result<(UsedRegion, u32), DeviceError> {
        let (memory_type_index, host_visible) = self
            .pick_memory_type(requirements.memory_type_bits, prefs)
            .ok_or(DeviceError::ResourceCreationFailed)?;
        let sub = self
            .sub_allocators
            .entry(memory_type_index)
            .or_insert_with(|| MemorySubAllocator::new(memory_type_index));
        let region = sub.allocate(
            device,
            requirements.size,
            requirements.alignment,
            host_visible,
            is_buffer,
        )?;
        Ok((region, memory_type_index))
    }

    pub fn release(&mut self, memory_type_index: u32, region: &UsedRegion) {
        if let Some(sub) = self.sub_allocators.get_mut(&memory_type_index) {
            sub.release(region);
        }
    }

    pub fn native_memory(&self, memory_type_index: u32, page: PageId) -> vk::DeviceMemory {
        self.sub_allocators[&memory_type_index].native_memory(page)
    }

    pub fn mapped_ptr(&self, memory_type_index: u32, region: &UsedRegion) -> Option<NonNull<u8>> {
        self.sub_allocators
            .get(&memory_type_index)?
            .mapped_ptr(region)
    }

    /// Drains every sub-allocator's pending-defrag list. If any page is
    /// marked for defrag and none is in progress, the caller kicks off a
    /// defrag command buffer.
    pub fn take_pending_defrag(&mut self) -> Vec<(u32, PageId)> {
        let mut all = Vec::new();
        for (&ty, sub) in self.sub_allocators.iter_mut() {
            for page in sub.take_pending_defrag() {
                all.push((ty, page));
            }
        }
        all
    }

    /// Reap fully-empty pages across every memory type.
    pub unsafe fn reap_empty_pages(&mut self, device: &ash::Device) -> usize {
        let mut total = 0;
        for sub in self.sub_allocators.values_mut() {
            total += sub.reap_empty_pages(device);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc_in_new_table(table: &mut RegionTable, kind: PageKind, size: u64) -> (PageId, u64) {
        if let Some((p, o, _)) = table.try_fit(kind, size, 1) {
            return (p, o);
        }
        let page_size = page_size_for(kind, size);
        let (p, o, _) = table.add_page_and_allocate(kind, page_size, size, 1);
        (p, o)
    }

    #[test]
    fn free_and_used_regions_sum_to_page_size() {
        let mut table = RegionTable::new();
        let (page, _) = alloc_in_new_table(&mut table, PageKind::Small, 1024);
        assert_eq!(table.pages[page as usize].total_free() + 1024, SMALL_PAGE_SIZE);
    }

    #[test]
    fn coalesces_on_release() {
        let mut table = RegionTable::new();
        let (page, off_a) = alloc_in_new_table(&mut table, PageKind::Small, 1024);
        let (_, off_b) = alloc_in_new_table(&mut table, PageKind::Small, 2048);
        assert_eq!(table.pages[page as usize].free.len(), 1);

        let region_a = UsedRegion {
            page,
            offset: off_a,
            size: 1024,
            resource_offset: off_a,
            resource_size: 1024,
            alignment: 1,
            is_buffer: true,
        };
        let region_b = UsedRegion {
            page,
            offset: off_b,
            size: 2048,
            resource_offset: off_b,
            resource_size: 2048,
            alignment: 1,
            is_buffer: true,
        };
        table.release(&region_a);
        table.release(&region_b);
        // Releasing both adjacent regions must coalesce back to one free
        // region spanning the whole page.
        assert_eq!(table.pages[page as usize].free.len(), 1);
        assert_eq!(table.pages[page as usize].total_free(), SMALL_PAGE_SIZE);
    }

    #[test]
    fn sorted_index_excludes_unavailable_pages() {
        let mut table = RegionTable::new();
        let (page, _) = alloc_in_new_table(&mut table, PageKind::Small, 1024);
        // Fragment the page: two used regions leaves >= 1 free region; force
        // fragmentation by allocating then releasing a middle region.
        let (_, off2) = alloc_in_new_table(&mut table, PageKind::Small, 1024);
        let region = UsedRegion {
            page,
            offset: off2,
            size: 1024,
            resource_offset: off2,
            resource_size: 1024,
            alignment: 1,
            is_buffer: true,
        };
        table.release(&region);
        // one used region (first alloc) + at least one free region before
        // and after it -> fragmented if there's more than one free region.
        let marked = table.quarantine_fragmented(PageKind::Small);
        if table.pages[page as usize].is_fragmented() {
            assert!(marked.contains(&page));
            assert!(!table.page_available(page));
            assert_eq!(table.free_index_len(), 0);
        }
    }

    #[test]
    fn large_allocation_gets_dedicated_page_sized_to_boundary() {
        let mut table = RegionTable::new();
        let (page, _) = alloc_in_new_table(&mut table, PageKind::Large, 40 * 1024 * 1024);
        assert_eq!(table.pages[page as usize].size, LARGE_PAGE_ALIGNMENT);
    }
}
