//! C ABI for foreign callers
//!
//! Opaque handles for a context (error state), a driver and a work item.
//! Every call resets the context error first; callers check `np_failed`
//! afterwards. Multithreaded clients need one context per thread.

use std::ffi::c_char;
use std::ptr;

use crate::cpu_driver::CpuDriver;
use crate::driver::{CancelHandle, Driver};
use crate::error::{Error, ErrorCategory};
use crate::pow::{Nonce, Solution, difficulty, difficulty_128_to_64, passes_64};

/// Error category reported through the C ABI
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpErrorCategory {
    Success = 0,
    Generic = 1,
    Device = 2,
}

/// Generic error codes, based high so they never collide with device codes
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpErrorCode {
    Base = 0x8000_0000,
    InvalidIndex,
    DriverInvalid,
    DriverInvalidType,
    DeviceInvalid,
    DeviceNotFound,
    DeviceListInvalid,
    ThreadInvalidCount,
    DifficultyInvalid,
    WorkInvalidMemorySize,
    Allocation,
    WorkInvalid,
}

/// Code reported for errors without a specific code
const UNSPECIFIED: i64 = i64::MAX;

struct ContextError {
    category: NpErrorCategory,
    code: i64,
    message: String,
}

/// Per-client error state
pub struct NpContext {
    error: Option<ContextError>,
}

impl NpContext {
    fn reset(&mut self) {
        self.error = None;
    }

    fn set_generic(&mut self, code: NpErrorCode, message: impl Into<String>) {
        self.error = Some(ContextError {
            category: NpErrorCategory::Generic,
            code: code as i64,
            message: message.into(),
        });
    }

    fn set(&mut self, err: &Error) {
        let (category, code) = match err.category() {
            ErrorCategory::Device => (
                NpErrorCategory::Device,
                err.gpu_phase().map_or(UNSPECIFIED, |phase| phase as i64),
            ),
            ErrorCategory::Resource => (NpErrorCategory::Generic, NpErrorCode::Allocation as i64),
            ErrorCategory::Configuration => {
                let code = match err {
                    Error::InvalidDifficultyBits { .. } => NpErrorCode::DifficultyInvalid,
                    Error::InvalidLookup { .. } => NpErrorCode::InvalidIndex,
                    _ => NpErrorCode::WorkInvalidMemorySize,
                };
                (NpErrorCategory::Generic, code as i64)
            }
        };
        self.error = Some(ContextError {
            category,
            code,
            message: err.to_string(),
        });
    }
}

/// Opaque driver handle
pub struct NpDriver {
    inner: Box<dyn Driver>,
    // Reached through a shared reference only, while `inner` may be borrowed by `np_solve`
    cancel: CancelHandle,
}

impl NpDriver {
    fn new(inner: Box<dyn Driver>) -> Self {
        let cancel = inner.cancel_handle();
        Self { inner, cancel }
    }
}

/// Opaque work item: nonce, solution, 64-bit difficulty and table size
#[derive(Default)]
pub struct NpWork {
    nonce: Nonce,
    solution: [u64; 2],
    difficulty: u64,
    table_size: u64,
}

/// Reset the error state of `ctx`; a null context is ignored
fn reset<'a>(ctx: *mut NpContext) -> Option<&'a mut NpContext> {
    if ctx.is_null() {
        return None;
    }
    let ctx = unsafe { &mut *ctx };
    ctx.reset();
    Some(ctx)
}

/// Copy `text` into a caller buffer of `len` bytes, zero terminated
fn copy_string(text: &str, buffer: *mut c_char, len: usize) {
    if buffer.is_null() || len == 0 {
        return;
    }
    let bytes = text.as_bytes();
    let count = bytes.len().min(len - 1);
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, buffer, count);
        *buffer.add(count) = 0;
    }
}

/// Create a new context (caller must free with np_context_destroy)
#[unsafe(no_mangle)]
pub extern "C" fn np_context_create() -> *mut NpContext {
    Box::into_raw(Box::new(NpContext { error: None }))
}

#[unsafe(no_mangle)]
pub extern "C" fn np_context_destroy(ctx: *mut NpContext) {
    if !ctx.is_null() {
        unsafe {
            let _ = Box::from_raw(ctx);
        }
    }
}

/// True if the last call on `ctx` failed
#[unsafe(no_mangle)]
pub extern "C" fn np_failed(ctx: *mut NpContext) -> bool {
    if ctx.is_null() {
        return false;
    }
    unsafe { (*ctx).error.is_some() }
}

/// Code of the last error, or 0
#[unsafe(no_mangle)]
pub extern "C" fn np_error_code(ctx: *mut NpContext) -> i64 {
    if ctx.is_null() {
        return 0;
    }
    unsafe { (*ctx).error.as_ref().map_or(0, |e| e.code) }
}

#[unsafe(no_mangle)]
pub extern "C" fn np_error_category(ctx: *mut NpContext) -> NpErrorCategory {
    if ctx.is_null() {
        return NpErrorCategory::Success;
    }
    unsafe {
        (*ctx)
            .error
            .as_ref()
            .map_or(NpErrorCategory::Success, |e| e.category)
    }
}

/// Copy the last error message into `buffer`
#[unsafe(no_mangle)]
pub extern "C" fn np_error_string(ctx: *mut NpContext, buffer: *mut c_char, len: usize) {
    if ctx.is_null() {
        return;
    }
    let text = match unsafe { &(*ctx).error } {
        None => "success",
        Some(e) if e.message.is_empty() => "Unknown error",
        Some(e) => e.message.as_str(),
    };
    copy_string(text, buffer, len);
}

/// Copy the name of the last error category into `buffer`
#[unsafe(no_mangle)]
pub extern "C" fn np_error_category_string(ctx: *mut NpContext, buffer: *mut c_char, len: usize) {
    let category = np_error_category(ctx);
    let text = match category {
        NpErrorCategory::Success => "success",
        NpErrorCategory::Generic => "generic",
        NpErrorCategory::Device => "device",
    };
    copy_string(text, buffer, len);
}

#[unsafe(no_mangle)]
pub extern "C" fn np_work_create(ctx: *mut NpContext) -> *mut NpWork {
    reset(ctx);
    Box::into_raw(Box::default())
}

#[unsafe(no_mangle)]
pub extern "C" fn np_work_destroy(ctx: *mut NpContext, work: *mut NpWork) {
    reset(ctx);
    if !work.is_null() {
        unsafe {
            let _ = Box::from_raw(work);
        }
    }
}

/// Run `f` on a work item, flagging a null pointer on the context
fn with_work(ctx: *mut NpContext, work: *mut NpWork, f: impl FnOnce(&mut NpWork)) {
    let ctx = reset(ctx);
    if work.is_null() {
        if let Some(ctx) = ctx {
            ctx.set_generic(NpErrorCode::WorkInvalid, "Invalid work");
        }
        return;
    }
    f(unsafe { &mut *work });
}

#[unsafe(no_mangle)]
pub extern "C" fn np_work_set_nonce(ctx: *mut NpContext, work: *mut NpWork, nonce_hi: u64, nonce_lo: u64) {
    with_work(ctx, work, |w| w.nonce = [nonce_hi, nonce_lo]);
}

#[unsafe(no_mangle)]
pub extern "C" fn np_work_set_solution(
    ctx: *mut NpContext,
    work: *mut NpWork,
    solution_hi: u64,
    solution_lo: u64,
) {
    with_work(ctx, work, |w| w.solution = [solution_hi, solution_lo]);
}

#[unsafe(no_mangle)]
pub extern "C" fn np_work_set_table_size(ctx: *mut NpContext, work: *mut NpWork, size_bytes: u64) {
    with_work(ctx, work, |w| w.table_size = size_bytes);
}

#[unsafe(no_mangle)]
pub extern "C" fn np_work_set_difficulty(ctx: *mut NpContext, work: *mut NpWork, value: u64) {
    with_work(ctx, work, |w| w.difficulty = value);
}

#[unsafe(no_mangle)]
pub extern "C" fn np_work_get_solution(
    ctx: *mut NpContext,
    work: *mut NpWork,
    solution_hi: *mut u64,
    solution_lo: *mut u64,
) {
    with_work(ctx, work, |w| unsafe {
        if !solution_hi.is_null() {
            *solution_hi = w.solution[0];
        }
        if !solution_lo.is_null() {
            *solution_lo = w.solution[1];
        }
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn np_work_get_difficulty(ctx: *mut NpContext, work: *mut NpWork, value: *mut u64) {
    with_work(ctx, work, |w| {
        if !value.is_null() {
            unsafe { *value = w.difficulty };
        }
    });
}

/// Solve `work` with `driver`
///
/// Applies the work's 64-bit difficulty and table size, solves, and stores
/// the solution and its achieved difficulty back into `work`.
#[unsafe(no_mangle)]
pub extern "C" fn np_solve(ctx: *mut NpContext, driver: *mut NpDriver, work: *mut NpWork) {
    let Some(ctx) = reset(ctx) else {
        return;
    };
    if driver.is_null() {
        ctx.set_generic(NpErrorCode::DriverInvalid, "Invalid driver");
        return;
    }
    if work.is_null() {
        ctx.set_generic(NpErrorCode::WorkInvalid, "Invalid work");
        return;
    }
    let driver = unsafe { &mut (*driver).inner };
    let work = unsafe { &mut *work };

    if work.table_size == 0 {
        ctx.set_generic(NpErrorCode::WorkInvalidMemorySize, "Invalid lookup table size");
        return;
    }
    let Ok(bytes) = usize::try_from(work.table_size) else {
        ctx.set_generic(NpErrorCode::WorkInvalidMemorySize, "Invalid lookup table size");
        return;
    };

    driver.difficulty_set_64(work.difficulty);
    if let Err(err) = driver.memory_set(bytes) {
        ctx.set(&err);
        return;
    }
    match driver.solve(work.nonce) {
        Ok(solution) => {
            work.solution = solution.into();
            if !solution.is_empty() {
                work.difficulty = difficulty_128_to_64(difficulty(work.nonce, solution));
            }
        }
        Err(err) => ctx.set(&err),
    }
}

/// True if the work's solution meets its 64-bit difficulty
#[unsafe(no_mangle)]
pub extern "C" fn np_validate(ctx: *mut NpContext, work: *mut NpWork) -> bool {
    let mut valid = false;
    with_work(ctx, work, |w| {
        valid = passes_64(w.nonce, Solution::from(w.solution), w.difficulty);
    });
    valid
}

/// Create a CPU driver with one worker per logical CPU
#[unsafe(no_mangle)]
pub extern "C" fn np_driver_cpu_create(ctx: *mut NpContext) -> *mut NpDriver {
    reset(ctx);
    Box::into_raw(Box::new(NpDriver::new(Box::new(CpuDriver::new()))))
}

/// Create a GPU-offload driver on adapter `index`; null on failure
#[cfg(feature = "gpu")]
#[unsafe(no_mangle)]
pub extern "C" fn np_driver_gpu_create(ctx: *mut NpContext, index: u16) -> *mut NpDriver {
    let ctx = reset(ctx);
    match crate::gpu::GpuDriver::new(Some(index as usize)) {
        Ok(driver) => Box::into_raw(Box::new(NpDriver::new(Box::new(driver)))),
        Err(err) => {
            if let Some(ctx) = ctx {
                ctx.set(&err);
            }
            ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn np_driver_destroy(ctx: *mut NpContext, driver: *mut NpDriver) {
    reset(ctx);
    if !driver.is_null() {
        unsafe {
            let _ = Box::from_raw(driver);
        }
    }
}

/// Run `f` on a driver, flagging a null pointer on the context
fn with_driver<T: Default>(
    ctx: *mut NpContext,
    driver: *mut NpDriver,
    f: impl FnOnce(&mut NpContext, &mut dyn Driver) -> T,
) -> T {
    let Some(ctx) = reset(ctx) else {
        return T::default();
    };
    if driver.is_null() {
        ctx.set_generic(NpErrorCode::DriverInvalid, "Invalid driver");
        return T::default();
    }
    let driver = unsafe { &mut (*driver).inner };
    f(ctx, driver.as_mut())
}

/// Copy the driver's diagnostic description into `buffer`
#[unsafe(no_mangle)]
pub extern "C" fn np_driver_dump(
    ctx: *mut NpContext,
    driver: *mut NpDriver,
    buffer: *mut c_char,
    len: usize,
) {
    with_driver(ctx, driver, |_, d| copy_string(&d.dump(), buffer, len));
}

/// Request cancellation of a solve running on another thread
///
/// Only the driver's cancel flag is touched, so this may race with `np_solve`
/// on the same driver. `ctx` must belong to the calling thread.
#[unsafe(no_mangle)]
pub extern "C" fn np_driver_cancel(ctx: *mut NpContext, driver: *const NpDriver) {
    let Some(ctx) = reset(ctx) else {
        return;
    };
    if driver.is_null() {
        ctx.set_generic(NpErrorCode::DriverInvalid, "Invalid driver");
        return;
    }
    let cancel = unsafe { &(*driver).cancel };
    cancel.cancel();
}

#[unsafe(no_mangle)]
pub extern "C" fn np_driver_recommended_threads(ctx: *mut NpContext, driver: *mut NpDriver) -> u32 {
    with_driver(ctx, driver, |_, d| {
        u32::try_from(d.recommended_threads()).unwrap_or(u32::MAX)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn np_driver_threads_get(ctx: *mut NpContext, driver: *mut NpDriver) -> u32 {
    with_driver(ctx, driver, |ctx, d| match u32::try_from(d.threads_get()) {
        Ok(threads) => threads,
        Err(_) => {
            ctx.set_generic(NpErrorCode::ThreadInvalidCount, "Invalid thread count");
            0
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn np_driver_threads_set(ctx: *mut NpContext, driver: *mut NpDriver, threads: u32) {
    with_driver(ctx, driver, |ctx, d| {
        if threads == 0 {
            ctx.set_generic(NpErrorCode::ThreadInvalidCount, "Invalid thread count");
        } else {
            d.threads_set(threads as usize);
        }
    });
}

/// Recommended lookup scale for `difficulty` bits of 64-bit difficulty
#[unsafe(no_mangle)]
pub extern "C" fn np_driver_recommended_lookup(
    ctx: *mut NpContext,
    driver: *mut NpDriver,
    difficulty: u8,
) -> u8 {
    with_driver(ctx, driver, |ctx, d| {
        if difficulty == 0 || difficulty >= 64 {
            ctx.set_generic(NpErrorCode::DifficultyInvalid, "Invalid difficulty");
            return 0;
        }
        d.recommended_lookup(difficulty as u32) as u8
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn np_driver_difficulty_get(ctx: *mut NpContext, driver: *mut NpDriver) -> u64 {
    with_driver(ctx, driver, |_, d| d.difficulty_get_64())
}

#[unsafe(no_mangle)]
pub extern "C" fn np_driver_difficulty_set(ctx: *mut NpContext, driver: *mut NpDriver, difficulty: u64) {
    with_driver(ctx, driver, |_, d| d.difficulty_set_64(difficulty));
}
