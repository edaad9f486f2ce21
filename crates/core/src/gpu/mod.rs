//! GPU-offload driver
//!
//! Runs the fill and search kernels in `kernels.wgsl` through wgpu. A single
//! host thread dispatches work; the device claims a result with an atomic
//! compare-exchange on a ticket word, the same single-winner rule the CPU
//! workers follow. Device failures are reported with the [`GpuPhase`] they
//! happened in.

use std::fmt::Write as _;
use std::sync::mpsc;
use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use log::{debug, info, warn};

use crate::driver::{CancelHandle, Driver, DriverKind, default_difficulty};
use crate::error::{Error, GpuPhase, Result};
use crate::params::{
    ENTRY_SIZE, GPU_DEFAULT_THREADS, GPU_STEPPING, GPU_WORKGROUP_SIZE, MAX_RHS, memory_to_entries,
    to_megabytes,
};
use crate::pow::{Nonce, Solution, fill_count, quick_mask, reverse};
use crate::slab::Slab;

/// Largest dispatch along one dimension
const MAX_WORKGROUPS: u32 = 65535;

/// Uniform block shared by both kernels
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct KernelParams {
    nonce: [u32; 4],
    difficulty: [u32; 4],
    quick_mask: [u32; 4],
    base_lo: u32,
    base_hi: u32,
    entries_mask: u32,
    stepping: u32,
    count: u32,
    _pad: [u32; 3],
}

/// Result block written by the search kernel
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
struct SearchResult {
    ticket: u32,
    lhs: u32,
    rhs_lo: u32,
    rhs_hi: u32,
}

const RESULT_SIZE: u64 = std::mem::size_of::<SearchResult>() as u64;

fn words(value: u128) -> [u32; 4] {
    [
        value as u32,
        (value >> 32) as u32,
        (value >> 64) as u32,
        (value >> 96) as u32,
    ]
}

fn nonce_words(nonce: Nonce) -> [u32; 4] {
    [
        nonce[0] as u32,
        (nonce[0] >> 32) as u32,
        nonce[1] as u32,
        (nonce[1] >> 32) as u32,
    ]
}

struct SlabBuffer {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    entries: u64,
}

/// One-line description of every adapter wgpu can see
pub fn adapters() -> Vec<String> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    instance
        .enumerate_adapters(wgpu::Backends::all())
        .iter()
        .enumerate()
        .map(|(index, adapter)| {
            let info = adapter.get_info();
            format!(
                "{}: {} ({:?}, {:?})",
                index, info.name, info.backend, info.device_type
            )
        })
        .collect()
}

pub struct GpuDriver {
    runtime: tokio::runtime::Runtime,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: wgpu::BindGroupLayout,
    fill_pipeline: wgpu::ComputePipeline,
    search_pipeline: wgpu::ComputePipeline,
    params_buffer: wgpu::Buffer,
    result_buffer: wgpu::Buffer,
    readback_buffer: wgpu::Buffer,
    slab: Option<SlabBuffer>,
    difficulty: u128,
    nonce: Nonce,
    threads: usize,
    fill_cursor: u64,
    search_cursor: u64,
    cancel: CancelHandle,
}

impl GpuDriver {
    /// Open adapter `index` (as listed by [`adapters`]) or the default
    /// high-performance adapter when `None`
    pub fn new(index: Option<usize>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| Error::device(GpuPhase::Init, e.to_string()))?;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = match index {
            Some(index) => instance
                .enumerate_adapters(wgpu::Backends::all())
                .into_iter()
                .nth(index)
                .ok_or_else(|| Error::device(GpuPhase::Init, format!("no adapter at index {}", index)))?,
            None => runtime
                .block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                }))
                .map_err(|e| Error::device(GpuPhase::Init, e.to_string()))?,
        };

        let info = adapter.get_info();
        info!("Using GPU adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = runtime
            .block_on(adapter.request_device(&wgpu::DeviceDescriptor {
                label: Some("nano-pow device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            }))
            .map_err(|e| Error::device(GpuPhase::Init, e.to_string()))?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("nano-pow kernels"),
            source: wgpu::ShaderSource::Wgsl(include_str!("kernels.wgsl").into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("nano-pow layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("nano-pow pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = |entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        };
        let fill_pipeline = pipeline("fill");
        let search_pipeline = pipeline("search");
        if let Some(err) = runtime.block_on(device.pop_error_scope()) {
            return Err(Error::device(GpuPhase::Build, err.to_string()));
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("nano-pow params"),
            size: std::mem::size_of::<KernelParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let result_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("nano-pow result"),
            size: RESULT_SIZE,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("nano-pow result readback"),
            size: RESULT_SIZE,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        if let Some(err) = runtime.block_on(device.pop_error_scope()) {
            return Err(Error::device(GpuPhase::Setup, err.to_string()));
        }

        Ok(Self {
            runtime,
            adapter,
            device,
            queue,
            layout,
            fill_pipeline,
            search_pipeline,
            params_buffer,
            result_buffer,
            readback_buffer,
            slab: None,
            difficulty: default_difficulty(),
            nonce: [0, 0],
            threads: GPU_DEFAULT_THREADS,
            fill_cursor: 0,
            search_cursor: 0,
            cancel: CancelHandle::new(),
        })
    }

    /// Largest table the device accepts, in bytes
    pub fn memory_limit(&self) -> usize {
        let limits = self.device.limits();
        let max = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        // Round down to a power of two
        let max = if max == 0 { 0 } else { 1u64 << (63 - max.leading_zeros()) };
        usize::try_from(max).unwrap_or(usize::MAX)
    }

    /// Run `f` inside validation and out-of-memory error scopes
    fn scoped<T>(&self, phase: GpuPhase, f: impl FnOnce() -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = self.runtime.block_on(self.device.pop_error_scope());
        let memory = self.runtime.block_on(self.device.pop_error_scope());
        match validation.or(memory) {
            Some(err) => Err(Error::device(phase, err.to_string())),
            None => Ok(value),
        }
    }

    fn params(&self, base: u64, count: u32) -> KernelParams {
        let entries = self.slab.as_ref().map_or(1, |slab| slab.entries);
        KernelParams {
            nonce: nonce_words(self.nonce),
            difficulty: words(self.difficulty),
            quick_mask: words(quick_mask(reverse(self.difficulty))),
            base_lo: base as u32,
            base_hi: (base >> 32) as u32,
            entries_mask: (entries - 1) as u32,
            stepping: GPU_STEPPING,
            count,
            _pad: [0; 3],
        }
    }

    /// Candidates covered by one dispatch
    fn per_dispatch(&self) -> u32 {
        (self.threads as u32).saturating_mul(GPU_STEPPING)
    }

    fn workgroups(count: u32) -> u32 {
        let invocations = count.div_ceil(GPU_STEPPING);
        invocations.div_ceil(GPU_WORKGROUP_SIZE).clamp(1, MAX_WORKGROUPS)
    }

    /// Encode and submit one kernel dispatch
    fn dispatch(
        &self,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        params: KernelParams,
        readback: bool,
    ) -> wgpu::SubmissionIndex {
        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("nano-pow encoder"),
            });
        if readback {
            encoder.clear_buffer(&self.result_buffer, 0, None);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(Self::workgroups(params.count), 1, 1);
        }
        if readback {
            encoder.copy_buffer_to_buffer(
                &self.result_buffer,
                0,
                &self.readback_buffer,
                0,
                RESULT_SIZE,
            );
        }
        self.queue.submit([encoder.finish()])
    }

    fn read_result(&self, phase: GpuPhase) -> Result<SearchResult> {
        let slice = self.readback_buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |status| {
            let _ = tx.send(status);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| Error::device(phase, e.to_string()))?;
        rx.recv()
            .map_err(|e| Error::device(phase, e.to_string()))?
            .map_err(|e| Error::device(phase, e.to_string()))?;

        let result = {
            let data = slice.get_mapped_range();
            bytemuck::pod_read_unaligned::<SearchResult>(&data[..RESULT_SIZE as usize])
        };
        self.readback_buffer.unmap();
        Ok(result)
    }
}

impl Driver for GpuDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Gpu
    }

    fn difficulty_set(&mut self, difficulty: u128) {
        self.difficulty = difficulty;
    }

    fn difficulty_get(&self) -> u128 {
        self.difficulty
    }

    /// Global work size, rounded up to whole workgroups
    fn threads_set(&mut self, threads: usize) {
        let group = GPU_WORKGROUP_SIZE as usize;
        let max = group * MAX_WORKGROUPS as usize;
        self.threads = threads.max(1).div_ceil(group).saturating_mul(group).min(max);
    }

    fn threads_get(&self) -> usize {
        self.threads
    }

    fn memory_set(&mut self, bytes: usize) -> Result<()> {
        Slab::validate(bytes)?;
        let max = self.memory_limit();
        if bytes > max {
            return Err(Error::MemoryTooLarge { bytes, max });
        }
        self.slab = None;

        let buffer = self.scoped(GpuPhase::MemorySet, || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("nano-pow slab"),
                size: bytes as u64,
                usage: wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        })?;
        let bind_group = self.scoped(GpuPhase::MemorySet, || {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("nano-pow bind group"),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.params_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.result_buffer.as_entire_binding(),
                    },
                ],
            })
        })?;

        let entries = memory_to_entries(bytes) as u64;
        info!("GPU memory set to {} MB ({} entries)", to_megabytes(bytes), entries);
        self.slab = Some(SlabBuffer {
            buffer,
            bind_group,
            entries,
        });
        Ok(())
    }

    fn memory_get(&self) -> usize {
        self.slab
            .as_ref()
            .map_or(0, |slab| slab.buffer.size() as usize)
    }

    fn prepare(&mut self, nonce: Nonce) {
        self.nonce = nonce;
        self.fill_cursor = 0;
        self.search_cursor = 0;
    }

    fn fill(&mut self) -> Result<()> {
        let slab = self.slab.as_ref().ok_or(Error::NoMemory)?;
        let budget = fill_count(slab.entries, reverse(self.difficulty));
        let per_dispatch = self.per_dispatch() as u64;
        let start = Instant::now();

        let mut done = 0u64;
        while done < budget && !self.cancel.is_cancelled() {
            let count = (budget - done).min(per_dispatch) as u32;
            let params = self.params(self.fill_cursor.wrapping_add(done), count);
            self.scoped(GpuPhase::Fill, || {
                self.dispatch(&self.fill_pipeline, &slab.bind_group, params, false);
            })?;
            done += count as u64;
        }
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| Error::device(GpuPhase::Fill, e.to_string()))?;

        self.fill_cursor = self.fill_cursor.wrapping_add(budget);
        debug!("Filled {} items in {} ms", budget, start.elapsed().as_millis());
        Ok(())
    }

    fn search(&mut self) -> Result<Solution> {
        let slab = self.slab.as_ref().ok_or(Error::NoMemory)?;
        let per_dispatch = self.per_dispatch();
        let start = Instant::now();

        while !self.cancel.is_cancelled() {
            if self.search_cursor > MAX_RHS {
                // Candidate space exhausted for this fill; refill and restart
                self.search_cursor = 0;
                break;
            }
            let params = self.params(self.search_cursor, per_dispatch);
            self.scoped(GpuPhase::Search, || {
                self.dispatch(&self.search_pipeline, &slab.bind_group, params, true);
            })?;
            let result = self.read_result(GpuPhase::Search)?;
            self.search_cursor += per_dispatch as u64;

            if result.ticket != 0 {
                let solution = Solution::new(
                    result.lhs as u64,
                    result.rhs_lo as u64 | (result.rhs_hi as u64) << 32,
                );
                debug!(
                    "Searched {} candidates in {} ms",
                    self.search_cursor,
                    start.elapsed().as_millis()
                );
                return Ok(solution);
            }
        }
        if self.cancel.is_cancelled() {
            warn!("GPU search cancelled after {} candidates", self.search_cursor);
        }
        Ok(Solution::EMPTY)
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn dump(&self) -> String {
        let info = self.adapter.get_info();
        let mut out = String::new();
        for line in adapters() {
            let _ = writeln!(out, "Adapter {}", line);
        }
        let _ = writeln!(out, "Selected: {} ({:?}, driver {})", info.name, info.backend, info.driver);
        let _ = writeln!(out, "Max table: {} MB", to_megabytes(self.memory_limit()));
        let _ = writeln!(out, "Global work size: {}", self.threads);
        let _ = write!(
            out,
            "Memory: {} MB ({} byte entries)",
            to_megabytes(self.memory_get()),
            ENTRY_SIZE
        );
        out
    }

    fn recommended_threads(&self) -> usize {
        GPU_DEFAULT_THREADS
    }
}
