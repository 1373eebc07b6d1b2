bitflags::bitflags! {
    /// Usage bits a buffer was created with. Drives which memory-property
    /// preferences the allocator in `gfx-hal` honors and which access
    /// intents a resource may legally transition through.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsages: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const INDIRECT = 1 << 2;
        const UNIFORM = 1 << 3;
        const GRAPHICS_STORAGE_READ = 1 << 4;
        const COMPUTE_STORAGE_READ = 1 << 5;
        const COMPUTE_STORAGE_WRITE = 1 << 6;
        const TRANSFER_SRC = 1 << 7;
        const TRANSFER_DST = 1 << 8;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsages: u32 {
        const SAMPLER = 1 << 0;
        const COLOR_ATTACHMENT = 1 << 1;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 2;
        const GRAPHICS_STORAGE_READ = 1 << 3;
        const COMPUTE_STORAGE_READ = 1 << 4;
        const COMPUTE_STORAGE_WRITE = 1 << 5;
        const COMPUTE_STORAGE_SIMULTANEOUS_READ_WRITE = 1 << 6;
        const TRANSFER_SRC = 1 << 7;
        const TRANSFER_DST = 1 << 8;
    }
}
