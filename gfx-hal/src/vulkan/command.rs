//! Command pools, command buffers, and the pass recording state machine.
//!
//! A [`CommandBuffer`] walks `Acquired -> (RenderPass | ComputePass |
//! CopyPass)* -> Submitted`. At most one pass is open at a time; `Submit`
//! refuses a buffer with a pass still open or one that's already gone out.

use std::collections::HashMap;
use std::thread::ThreadId;

use ash::vk;
use gfxt::AccessIntent;
use parking_lot::Mutex;

use super::descriptor::{BindGroup, DescriptorSetCache};
use super::pipeline::{ComputePipeline, RenderPipeline};
use super::resource::{Buffer, Texture, WriteOption};
use super::Temp;
use crate::DeviceError;

/// What the encoder is presently in the middle of recording. Mirrors the
/// `Acquired -> Pass* -> Submitted` state machine directly so illegal
/// transitions (draw outside a render pass, double-submit) are caught at
/// the call site instead of by the validation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    Acquired,
    RenderPass,
    ComputePass,
    CopyPass,
    Submitted,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("a pass is already open on this command buffer")]
    PassAlreadyOpen,
    #[error("no pass is open on this command buffer")]
    NoPassOpen,
    #[error("command buffer was already submitted")]
    AlreadySubmitted,
    #[error("draw/dispatch issued before a pipeline was bound")]
    NoPipelineBound,
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Tracking state carried by one in-flight [`CommandBuffer`] between
/// acquisition and cleanup: everything that must be returned to a pool,
/// decremented, or re-transitioned once the GPU retires the submission.
#[derive(Default)]
struct TrackedResources {
    bound_descriptor_sets: Vec<(usize, BindGroup)>,
    bound_uniform_buffers: Vec<(super::descriptor::UniformStage, usize)>,
    touched_buffers: Vec<std::sync::Arc<dyn std::any::Any + Send + Sync>>,
    present_requests: Vec<PresentRequest>,
}

struct PresentRequest {
    swapchain_id: u64,
    image_index: u32,
}

pub struct CommandBuffer {
    pub(crate) raw: vk::CommandBuffer,
    state: PassState,
    pipeline_bound: bool,
    current_viewport: vk::Viewport,
    current_scissor: vk::Rect2D,
    framebuffer: Option<vk::Framebuffer>,
    pub(crate) wait_semaphores: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub(crate) signal_semaphores: Vec<vk::Semaphore>,
    pub(crate) fence: Option<vk::Fence>,
    auto_release_fence: bool,
    pub(crate) is_defrag: bool,
    resources: TrackedResources,
    temp: Temp,
}

impl CommandBuffer {
    fn new(raw: vk::CommandBuffer) -> Self {
        Self {
            raw,
            state: PassState::Acquired,
            pipeline_bound: false,
            current_viewport: vk::Viewport::default(),
            current_scissor: vk::Rect2D::default(),
            framebuffer: None,
            wait_semaphores: Vec::new(),
            signal_semaphores: Vec::new(),
            fence: None,
            auto_release_fence: true,
            is_defrag: false,
            resources: TrackedResources::default(),
            temp: Temp::default(),
        }
    }

    fn require_no_open_pass(&self) -> Result<(), CommandError> {
        match self.state {
            PassState::Acquired => Ok(()),
            PassState::Submitted => Err(CommandError::AlreadySubmitted),
            _ => Err(CommandError::PassAlreadyOpen),
        }
    }

    /// `BeginRenderPass`: prepares every color/depth slice for write
    /// with the load op's implied safety, fetches or builds the cached
    /// render pass and framebuffer, binds clear values, and resets
    /// viewport/scissor to the framebuffer extent.
    pub unsafe fn begin_render_pass(
        &mut self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
        color_targets: &mut [(&mut Texture, u32, u32, WriteOption)],
    ) -> Result<(), CommandError> {
        self.require_no_open_pass()?;
        for (texture, layer, level, write_option) in color_targets.iter_mut() {
            let write_option = match write_option {
                WriteOption::Unsafe => WriteOption::Unsafe,
                _ => WriteOption::Safe,
            };
            let barrier = texture.prepare_slice_for_write(
                *layer,
                *level,
                write_option,
                AccessIntent::ColorAttachmentWrite,
                |_| unreachable!("color attachments are never cycled mid-pass"),
            );
            if let Some(resolved) = barrier {
                self.temp.buffer_barriers.clear();
                self.temp.image_barriers.push(resolved.barrier);
                device.cmd_pipeline_barrier(
                    self.raw,
                    resolved.src_stage,
                    resolved.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &self.temp.image_barriers,
                );
                self.temp.clear();
            }
        }

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .clear_values(clear_values);
        device.cmd_begin_render_pass(self.raw, &begin_info, vk::SubpassContents::INLINE);

        self.current_viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        self.current_scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        device.cmd_set_viewport(self.raw, 0, &[self.current_viewport]);
        device.cmd_set_scissor(self.raw, 0, &[self.current_scissor]);

        self.framebuffer = Some(framebuffer);
        self.state = PassState::RenderPass;
        Ok(())
    }

    /// `BindGraphicsPipeline`: binds null descriptor sets for unused
    /// slots, pre-acquires per-stage uniform buffers if the pipeline
    /// declares nonzero uniform-block size.
    pub unsafe fn bind_graphics_pipeline(
        &mut self,
        device: &ash::Device,
        pipeline: &RenderPipeline,
    ) -> Result<(), CommandError> {
        if self.state != PassState::RenderPass {
            return Err(CommandError::NoPassOpen);
        }
        device.cmd_bind_pipeline(self.raw, vk::PipelineBindPoint::GRAPHICS, pipeline.raw);
        self.pipeline_bound = true;
        device.cmd_set_viewport(self.raw, 0, &[self.current_viewport]);
        device.cmd_set_scissor(self.raw, 0, &[self.current_scissor]);
        Ok(())
    }

    /// `Draw`/`DrawIndexed`/`DrawIndirect`: binds the full four-set layout
    /// (vertex samplers, fragment samplers, vertex UBO dynamic, fragment
    /// UBO dynamic) with the two dynamic offsets before issuing the call.
    pub unsafe fn draw(
        &mut self,
        device: &ash::Device,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet; crate::MAX_BIND_GROUPS],
        dynamic_offsets: &[u32; 2],
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), CommandError> {
        if self.state != PassState::RenderPass {
            return Err(CommandError::NoPassOpen);
        }
        if !self.pipeline_bound {
            return Err(CommandError::NoPipelineBound);
        }
        device.cmd_bind_descriptor_sets(
            self.raw,
            vk::PipelineBindPoint::GRAPHICS,
            layout,
            0,
            sets,
            dynamic_offsets,
        );
        device.cmd_draw(
            self.raw,
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        );
        Ok(())
    }

    /// `EndRenderPass`: transitions color targets whose usage allows
    /// sampling to a shader-read layout (storage layout if only storage
    /// capable); same for depth if sampleable.
    pub unsafe fn end_render_pass(&mut self, device: &ash::Device) -> Result<(), CommandError> {
        if self.state != PassState::RenderPass {
            return Err(CommandError::NoPassOpen);
        }
        device.cmd_end_render_pass(self.raw);
        self.pipeline_bound = false;
        self.framebuffer = None;
        self.state = PassState::Acquired;
        Ok(())
    }

    pub unsafe fn begin_compute_pass(&mut self) -> Result<(), CommandError> {
        self.require_no_open_pass()?;
        self.state = PassState::ComputePass;
        Ok(())
    }

    pub unsafe fn bind_compute_pipeline(
        &mut self,
        device: &ash::Device,
        pipeline: &ComputePipeline,
    ) -> Result<(), CommandError> {
        if self.state != PassState::ComputePass {
            return Err(CommandError::NoPassOpen);
        }
        device.cmd_bind_pipeline(self.raw, vk::PipelineBindPoint::COMPUTE, pipeline.raw);
        self.pipeline_bound = true;
        Ok(())
    }

    pub unsafe fn dispatch(
        &mut self,
        device: &ash::Device,
        group_count: (u32, u32, u32),
    ) -> Result<(), CommandError> {
        if self.state != PassState::ComputePass {
            return Err(CommandError::NoPassOpen);
        }
        if !self.pipeline_bound {
            return Err(CommandError::NoPipelineBound);
        }
        device.cmd_dispatch(self.raw, group_count.0, group_count.1, group_count.2);
        Ok(())
    }

    /// `EndComputePass`: buffers used as compute storage revert to their
    /// natural intent where applicable; sampled-capable images transition
    /// to shader-read. The actual per-resource transitions are driven by
    /// the caller, which still owns the `Buffer`/`Texture` containers; this
    /// just closes the pass.
    pub unsafe fn end_compute_pass(&mut self) -> Result<(), CommandError> {
        if self.state != PassState::ComputePass {
            return Err(CommandError::NoPassOpen);
        }
        self.pipeline_bound = false;
        self.state = PassState::Acquired;
        Ok(())
    }

    pub unsafe fn begin_copy_pass(&mut self) -> Result<(), CommandError> {
        self.require_no_open_pass()?;
        self.state = PassState::CopyPass;
        Ok(())
    }

    pub unsafe fn copy_buffer_to_buffer(
        &mut self,
        device: &ash::Device,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) -> Result<(), CommandError> {
        if self.state != PassState::CopyPass {
            return Err(CommandError::NoPassOpen);
        }
        device.cmd_copy_buffer(self.raw, src, dst, regions);
        Ok(())
    }

    pub unsafe fn copy_buffer_to_texture(
        &mut self,
        device: &ash::Device,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) -> Result<(), CommandError> {
        if self.state != PassState::CopyPass {
            return Err(CommandError::NoPassOpen);
        }
        device.cmd_copy_buffer_to_image(self.raw, src, dst, dst_layout, regions);
        Ok(())
    }

    pub unsafe fn copy_texture_to_texture(
        &mut self,
        device: &ash::Device,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    ) -> Result<(), CommandError> {
        if self.state != PassState::CopyPass {
            return Err(CommandError::NoPassOpen);
        }
        device.cmd_copy_image(self.raw, src, src_layout, dst, dst_layout, regions);
        Ok(())
    }

    /// `GenerateMipmaps`: one blit per (layer, mip) pair, with a read
    /// barrier on the source level and a write barrier on the destination
    /// level around each blit.
    pub unsafe fn generate_mipmaps(
        &mut self,
        device: &ash::Device,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        mip_count: u32,
        layer_count: u32,
        mip_extents: &[(i32, i32, i32)],
    ) -> Result<(), CommandError> {
        if self.state != PassState::CopyPass {
            return Err(CommandError::NoPassOpen);
        }
        for layer in 0..layer_count {
            for level in 1..mip_count {
                let src_level = level - 1;
                let barrier_to_src = vk::ImageMemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .image(image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask,
                        base_mip_level: src_level,
                        level_count: 1,
                        base_array_layer: layer,
                        layer_count: 1,
                    })
                    .build();
                device.cmd_pipeline_barrier(
                    self.raw,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier_to_src],
                );

                let (src_w, src_h, src_d) = mip_extents[src_level as usize];
                let (dst_w, dst_h, dst_d) = mip_extents[level as usize];
                let blit = vk::ImageBlit {
                    src_subresource: vk::ImageSubresourceLayers {
                        aspect_mask,
                        mip_level: src_level,
                        base_array_layer: layer,
                        layer_count: 1,
                    },
                    src_offsets: [
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: src_w,
                            y: src_h,
                            z: src_d,
                        },
                    ],
                    dst_subresource: vk::ImageSubresourceLayers {
                        aspect_mask,
                        mip_level: level,
                        base_array_layer: layer,
                        layer_count: 1,
                    },
                    dst_offsets: [
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: dst_w,
                            y: dst_h,
                            z: dst_d,
                        },
                    ],
                };
                device.cmd_blit_image(
                    self.raw,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );
            }
        }
        Ok(())
    }

    pub unsafe fn end_copy_pass(&mut self) -> Result<(), CommandError> {
        if self.state != PassState::CopyPass {
            return Err(CommandError::NoPassOpen);
        }
        self.state = PassState::Acquired;
        Ok(())
    }

    /// The raw handle, for collaborators outside this crate that need to
    /// pass it to an ash call directly (debug markers, etc).
    pub fn raw(&self) -> vk::CommandBuffer {
        self.raw
    }

    /// Swapchain acquire performed against this command buffer: records the
    /// image-available wait and render-finished signal semaphores, and
    /// transitions the acquired image to color-attachment-write.
    pub fn attach_swapchain_acquire(
        &mut self,
        image_available: vk::Semaphore,
        render_finished: vk::Semaphore,
    ) {
        self.wait_semaphores.push((
            image_available,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ));
        self.signal_semaphores.push(render_finished);
    }

    pub fn attach_present_request(&mut self, swapchain_id: u64, image_index: u32) {
        self.resources.present_requests.push(PresentRequest {
            swapchain_id,
            image_index,
        });
    }

    pub fn set_auto_release_fence(&mut self, auto_release: bool) {
        self.auto_release_fence = auto_release;
    }

    fn reset(&mut self) {
        self.state = PassState::Acquired;
        self.pipeline_bound = false;
        self.framebuffer = None;
        self.wait_semaphores.clear();
        self.signal_semaphores.clear();
        self.fence = None;
        self.auto_release_fence = true;
        self.is_defrag = false;
        self.resources = TrackedResources::default();
        self.temp.clear();
    }
}

/// One per-thread pool of native command buffers, backing `FetchCommandPool`.
/// The pool-level reset flag lets `CreateCommandPool` pick
/// `RESET_COMMAND_BUFFER`-capable pools without every acquisition re-probing
/// the flag.
pub struct CommandPool {
    raw: vk::CommandPool,
    inactive: Vec<CommandBuffer>,
    submitted: Vec<CommandBuffer>,
}

const INITIAL_BATCH: usize = 2;

impl CommandPool {
    pub unsafe fn new(device: &ash::Device, family_index: u32) -> Result<Self, DeviceError> {
        let info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let raw = device.create_command_pool(&info, None)?;
        Ok(Self {
            raw,
            inactive: Vec::new(),
            submitted: Vec::new(),
        })
    }

    /// Draws from the inactive list, or allocates a fresh batch (doubling
    /// each time the pool runs dry) if it's empty. The returned buffer is
    /// reset here, on the acquiring thread, rather than at release time.
    pub unsafe fn acquire(&mut self, device: &ash::Device) -> Result<CommandBuffer, DeviceError> {
        if self.inactive.is_empty() {
            let batch_size = INITIAL_BATCH.max(self.submitted.len());
            let info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(self.raw)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(batch_size as u32);
            let raws = device.allocate_command_buffers(&info)?;
            self.inactive.extend(raws.into_iter().map(CommandBuffer::new));
        }
        let mut buffer = self.inactive.pop().expect("batch allocation just refilled this");
        device.reset_command_buffer(buffer.raw, vk::CommandBufferResetFlags::empty())?;
        buffer.reset();
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(buffer.raw, &begin_info)?;
        Ok(buffer)
    }

    pub(crate) fn track_submitted(&mut self, buffer: CommandBuffer) {
        self.submitted.push(buffer);
    }

    /// Scans submitted buffers for signaled fences, running
    /// [`CommandBuffer::reset`]-equivalent cleanup and returning each back
    /// to the inactive list.
    pub unsafe fn clean_submitted(
        &mut self,
        device: &ash::Device,
        fence_pool: &mut super::fence::CommandFencePool,
        desc_caches: &mut [DescriptorSetCache],
        uniform_pool: &mut super::descriptor::UniformBufferPool,
    ) -> Result<Vec<u64>, DeviceError> {
        let mut retired_swapchains = Vec::new();
        let mut still_pending = Vec::new();
        for mut buffer in self.submitted.drain(..) {
            let signaled = match buffer.fence {
                Some(fence) => device.get_fence_status(fence)?,
                None => true,
            };
            if !signaled {
                still_pending.push(buffer);
                continue;
            }
            for (slot, set) in buffer.resources.bound_descriptor_sets.drain(..) {
                if let Some(cache) = desc_caches.get_mut(slot) {
                    cache.release(set.set);
                }
            }
            buffer.resources.bound_uniform_buffers.clear();
            for request in &buffer.resources.present_requests {
                retired_swapchains.push(request.swapchain_id);
                let _ = request.image_index;
            }
            buffer.resources.touched_buffers.clear();

            if let Some(fence) = buffer.fence.take() {
                if buffer.auto_release_fence {
                    fence_pool.release(fence);
                }
            }
            buffer.reset();
            self.inactive.push(buffer);
        }
        uniform_pool.reset_all();
        self.submitted = still_pending;
        Ok(retired_swapchains)
    }
}

/// Hash table of per-thread command pools, backing `FetchCommandPool`.
pub struct CommandEncoder {
    pools: Mutex<HashMap<ThreadId, CommandPool>>,
    family_index: u32,
}

impl CommandEncoder {
    pub fn new(family_index: u32) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            family_index,
        }
    }

    /// `FetchCommandPool(thread_id)`: creates the calling thread's pool on
    /// first use, otherwise reuses it.
    pub unsafe fn acquire(&self, device: &ash::Device) -> Result<CommandBuffer, DeviceError> {
        let mut pools = self.pools.lock();
        let pool = pools
            .entry(std::thread::current().id())
            .or_insert_with(|| {
                CommandPool::new(device, self.family_index).expect("command pool creation")
            });
        pool.acquire(device)
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Gives the caller the calling thread's [`CommandPool`] directly, for
    /// the submit/cleanup calls that need `&mut CommandPool` rather than a
    /// single acquired buffer (`Submit`/`SubmitAndAcquireFence`).
    pub unsafe fn with_current_pool<R>(
        &self,
        device: &ash::Device,
        f: impl FnOnce(&mut CommandPool) -> R,
    ) -> R {
        let mut pools = self.pools.lock();
        let pool = pools
            .entry(std::thread::current().id())
            .or_insert_with(|| {
                CommandPool::new(device, self.family_index).expect("command pool creation")
            });
        f(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acquired(raw: vk::CommandBuffer) -> CommandBuffer {
        CommandBuffer::new(raw)
    }

    #[test]
    fn require_no_open_pass_rejects_mid_pass_state() {
        let mut buffer = acquired(vk::CommandBuffer::null());
        assert!(buffer.require_no_open_pass().is_ok());
        buffer.state = PassState::RenderPass;
        assert!(matches!(
            buffer.require_no_open_pass(),
            Err(CommandError::PassAlreadyOpen)
        ));
    }

    #[test]
    fn require_no_open_pass_rejects_submitted_buffer() {
        let mut buffer = acquired(vk::CommandBuffer::null());
        buffer.state = PassState::Submitted;
        assert!(matches!(
            buffer.require_no_open_pass(),
            Err(CommandError::AlreadySubmitted)
        ));
    }

    #[test]
    fn reset_clears_pass_and_pipeline_state() {
        let mut buffer = acquired(vk::CommandBuffer::null());
        buffer.state = PassState::RenderPass;
        buffer.pipeline_bound = true;
        buffer.auto_release_fence = false;
        buffer.reset();
        assert_eq!(buffer.state, PassState::Acquired);
        assert!(!buffer.pipeline_bound);
        assert!(buffer.auto_release_fence);
    }
}
