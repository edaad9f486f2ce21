use std::ffi::CStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::ffi::*;
use crate::{
    CpuDriver, Driver, DriverKind, Error, ErrorCategory, Generator, MAX_RHS, STEPPING,
    SearchContext, Slab, Solution, SolveStrategy, bit_difficulty, bit_difficulty_64,
    difficulty, difficulty_64_to_128, difficulty_128_to_64, fill_count, fill_shard, h0, h1,
    passes, passes_64, passes_quick, passes_sum, quick_mask, reverse, reverse_64, reverse_128,
    siphash24_64, siphash24_128, siphash24_128_u64, slot, sum, try_bit_difficulty,
    try_bit_difficulty_64,
};

const REFERENCE_KEY: [u64; 2] = [0x0706_0504_0302_0100, 0x0f0e_0d0c_0b0a_0908];

fn driver(threads: usize, strategy: SolveStrategy, bytes: usize, bits: u32) -> CpuDriver {
    let mut driver = CpuDriver::with_threads(threads);
    driver.strategy_set(strategy);
    driver.difficulty_set(bit_difficulty(bits));
    driver.memory_set(bytes).unwrap();
    driver
}

#[test]
fn test_siphash64_reference_vectors() {
    assert_eq!(siphash24_64(REFERENCE_KEY, b""), 0x726f_db47_dd0e_0e31);
    assert_eq!(siphash24_64(REFERENCE_KEY, &[0x00]), 0x74f8_39c5_93dc_67fd);
}

#[test]
fn test_siphash128_reference_vector() {
    // Digest bytes in output order
    let bytes: [u8; 16] = hex::decode("a3817f04ba25a8e66df67214c7550293")
        .unwrap()
        .try_into()
        .unwrap();
    assert_eq!(siphash24_128(REFERENCE_KEY, b""), u128::from_le_bytes(bytes));
}

#[test]
fn test_item_hash_matches_byte_hash() {
    let keys = [[0, 0], REFERENCE_KEY, [u64::MAX, 1 << 63]];
    let items = [0u64, 1, 0xdead_beef, MAX_RHS, u64::MAX];
    for key in keys {
        for item in items {
            assert_eq!(
                siphash24_128_u64(key, item),
                siphash24_128(key, &item.to_le_bytes()),
                "item {:#x} key {:x?}",
                item,
                key
            );
        }
    }
}

#[test]
fn test_domains_are_separated() {
    let nonce = [0x0123_4567_89ab_cdef, 0xfedc_ba98_7654_3210];
    assert_ne!(h0(nonce, 42), h1(nonce, 42));

    // Only the domain bit of the first nonce word differs between keys
    let flipped = [nonce[0] ^ (1 << 63), nonce[1]];
    assert_eq!(h0(nonce, 42), h0(flipped, 42));
    assert_eq!(h1(nonce, 42), h1(flipped, 42));
}

#[test]
fn test_reverse_matches_std() {
    let samples = [0u128, 1, 0xff, 1 << 127, 0x0123_4567_89ab_cdef_fedc_ba98_7654_3210];
    for value in samples {
        assert_eq!(reverse_128(value), value.reverse_bits());
        assert_eq!(reverse(value), value.reverse_bits());
        assert_eq!(reverse_64(value as u64), (value as u64).reverse_bits());
        assert_eq!(reverse(reverse(value)), value);
    }
}

#[test]
fn test_bit_difficulty() {
    assert_eq!(bit_difficulty(1), 1 << 127);
    assert_eq!(bit_difficulty(8), 0xffu128 << 120);
    assert_eq!(bit_difficulty(127), u128::MAX << 1);
    assert_eq!(bit_difficulty_64(4), bit_difficulty(36));
    assert_eq!(difficulty_128_to_64(bit_difficulty_64(4)), 0xf000_0000_0000_0000);
}

#[test]
#[should_panic(expected = "Difficulty must be greater than 0")]
fn test_bit_difficulty_rejects_zero() {
    bit_difficulty(0);
}

#[test]
fn test_try_bit_difficulty() {
    assert_eq!(try_bit_difficulty(16).unwrap(), bit_difficulty(16));
    assert_eq!(try_bit_difficulty_64(16).unwrap(), bit_difficulty_64(16));

    for bits in [0, 128, 200] {
        let err = try_bit_difficulty(bits).unwrap_err();
        assert!(matches!(err, Error::InvalidDifficultyBits { max: 128, .. }));
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }
    assert!(matches!(
        try_bit_difficulty_64(64),
        Err(Error::InvalidDifficultyBits { bits: 64, max: 64 })
    ));
}

#[test]
fn test_difficulty_width_conversion() {
    for value in [0u64, 1, 0xffff_ffff, 0xffff_fc00_0000_0000, u64::MAX] {
        let wide = difficulty_64_to_128(value);
        assert_eq!(wide >> 96, 0xffff_ffff, "implicit leading ones");
        assert_eq!(difficulty_128_to_64(wide), value);
    }
}

#[test]
fn test_quick_mask() {
    for bits in 1..128 {
        let inv = reverse(bit_difficulty(bits));
        assert_eq!(quick_mask(inv), inv, "bits {}", bits);
        assert_eq!(quick_mask(inv), (1u128 << bits) - 1);
    }
    assert_eq!(quick_mask(0), 0);
    // No leading ones in the threshold, so the pre-filter is disabled
    assert_eq!(quick_mask(reverse(u128::MAX >> 1)), 0);
    // Leading ones interrupted by a zero only count up to the gap
    assert_eq!(quick_mask(0b1011), 0b11);
}

#[test]
fn test_quick_path_is_necessary() {
    for bits in [1, 4, 8, 12] {
        let threshold = bit_difficulty(bits);
        let mask = quick_mask(reverse(threshold));
        for item in 0..4096u64 {
            let value = h0([item, bits as u64], item) << (item % 16);
            if passes_sum(value, threshold) {
                assert!(
                    passes_quick(value, mask),
                    "quick test rejected a passing sum {:#x}",
                    value
                );
            }
        }
    }
}

#[test]
fn test_slot_is_modulo() {
    for shift in [0u32, 1, 10, 20, 32] {
        let size = 1u64 << shift;
        for item in [0u64, 1, 0x1234_5678, u64::MAX, 0u64.wrapping_sub(77)] {
            assert_eq!(slot(size, item), item % size);
        }
    }
}

#[test]
fn test_fill_count() {
    // 16^2 covers an inverse difficulty of 255: single pass
    assert_eq!(fill_count(16, 255), 16);
    // 8^2 does not: the table is churned three times
    assert_eq!(fill_count(8, 255), 24);
    // The churn budget is capped to 32-bit item space
    assert_eq!(fill_count(1 << 31, u128::MAX), 4_294_967_295);
    assert_eq!(fill_count(1 << 14, reverse(bit_difficulty(8))), 1 << 14);
}

#[test]
fn test_fill_shard_tiles_epoch() {
    let budget = 1000u64;
    let total = 3;
    let mut next = 2 * budget as u32;
    let mut covered = 0;
    for thread in 0..total {
        let (begin, count) = fill_shard(2, thread, total, budget);
        assert_eq!(begin, next, "shards must be contiguous");
        next = begin.wrapping_add(count as u32);
        covered += count;
    }
    assert_eq!(covered, budget);
    assert_eq!(fill_shard(0, 0, 1, budget), (0, budget));
}

#[test]
fn test_solution_range() {
    let nonce = [1, 2];
    assert!(Solution::EMPTY.is_empty());
    assert!(Solution::new(0, 1).in_range());
    assert!(!Solution::new(1 << 32, 1).in_range());
    assert!(!Solution::new(0, MAX_RHS + 1).in_range());
    assert!(!passes(nonce, Solution::new(1 << 32, 1), 0));
    assert_eq!(<[u64; 2]>::from(Solution::new(3, 4)), [3, 4]);
}

#[test]
fn test_search_is_deterministic() {
    let nonce = [0xabcd, 0x1234];
    let threshold = bit_difficulty(10);
    let never = AtomicBool::new(false);

    let results: Vec<Option<Solution>> = (0..2)
        .map(|_| {
            let slab = Slab::allocate(1 << 14).unwrap();
            let context = SearchContext::new(&slab, nonce, threshold);
            assert!(context.fill(0, slab.size(), &never));
            context.search(1, 1 << 16)
        })
        .collect();

    assert_eq!(results[0], results[1]);
    let solution = results[0].expect("a 10 bit solution within 65536 candidates");
    assert!(passes(nonce, solution, threshold));
}

#[test]
fn test_single_winner() {
    let nonce = [7, 9];
    let threshold = bit_difficulty(12);
    let slab = Slab::allocate(1 << 14).unwrap();
    let budget = fill_count(slab.size(), reverse(threshold));
    let generator = Generator::new();
    let ticket = generator.reset();
    let never = AtomicBool::new(false);
    let total = 4;

    let winners: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..total)
            .map(|thread| {
                let (generator, slab, never) = (&generator, &slab, &never);
                s.spawn(move || {
                    let context = SearchContext::new(slab, nonce, threshold);
                    generator.find(&context, budget, ticket, thread, total, never)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap() as usize).sum()
    });

    assert_eq!(winners, 1, "exactly one worker commits per ticket");
    assert_eq!(generator.ticket(), ticket + 1);
    let solution = generator.result(ticket);
    assert!(passes(nonce, solution, threshold));
    assert!(!generator.commit(ticket, Solution::new(1, 1)), "stale ticket");
}

#[test]
fn test_round_trip_both_strategies() {
    let nonce = [0, 0];
    for strategy in [SolveStrategy::Cooperative, SolveStrategy::Phased] {
        let mut driver = driver(4, strategy, 1 << 16, 8);
        let solution = driver.solve(nonce).unwrap();

        assert!(!solution.is_empty(), "{} solve returned empty", strategy);
        assert!(solution.in_range());
        assert_eq!(difficulty(nonce, solution) >> 120, 0xff);
        assert!(passes(nonce, solution, bit_difficulty(8)));
        assert!(!passes(nonce, solution, bit_difficulty(32)));
        assert_eq!(
            sum(nonce, solution),
            h0(nonce, solution.lhs).wrapping_add(h1(nonce, solution.rhs))
        );
    }
}

#[test]
fn test_solve_inline_without_workers() {
    let nonce = [0x5555, 0xaaaa];
    let mut driver = driver(0, SolveStrategy::Cooperative, 1 << 16, 12);
    assert_eq!(driver.threads_get(), 0);

    let first = driver.solve(nonce).unwrap();
    let second = driver.solve(nonce).unwrap();
    assert!(passes(nonce, first, bit_difficulty(12)));
    assert_eq!(first, second, "single caller thread solves are repeatable");
}

#[test]
fn test_repeated_solves_are_valid() {
    let mut driver = driver(3, SolveStrategy::Cooperative, 1 << 16, 12);
    for i in 0..8u64 {
        let nonce = [i, i.wrapping_mul(0x9e37_79b9_7f4a_7c15)];
        let solution = driver.solve(nonce).unwrap();
        assert!(passes(nonce, solution, bit_difficulty(12)), "nonce {:x?}", nonce);
    }
    driver.strategy_set(SolveStrategy::Phased);
    for i in 0..4u64 {
        let nonce = [i, !i];
        let solution = driver.solve(nonce).unwrap();
        assert!(passes(nonce, solution, bit_difficulty(12)), "nonce {:x?}", nonce);
    }
}

#[test]
fn test_cancel_returns_empty() {
    for strategy in [SolveStrategy::Cooperative, SolveStrategy::Phased] {
        let mut driver = CpuDriver::with_threads(2);
        driver.strategy_set(strategy);
        driver.memory_set(1 << 16).unwrap();
        driver.difficulty_set(u128::MAX);
        let handle = driver.cancel_handle();

        let worker = thread::spawn(move || {
            let result = driver.solve([1, 1]);
            (driver, result)
        });
        while !worker.is_finished() {
            handle.cancel();
            thread::sleep(Duration::from_millis(10));
        }
        let (mut driver, result) = worker.join().unwrap();
        assert!(result.unwrap().is_empty(), "{} cancel must yield empty", strategy);

        // The flag is cleared on the next solve
        driver.difficulty_set(bit_difficulty(8));
        let solution = driver.solve([1, 1]).unwrap();
        assert!(passes([1, 1], solution, bit_difficulty(8)));
    }
}

#[test]
fn test_solve_without_memory() {
    let mut driver = CpuDriver::with_threads(1);
    assert_eq!(driver.memory_get(), 0);
    let err = driver.solve([1, 2]).unwrap_err();
    assert!(matches!(err, Error::NoMemory));
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_memory_set_validation() {
    let mut driver = CpuDriver::with_threads(1);
    driver.memory_set(1 << 12).unwrap();
    assert_eq!(driver.memory_get(), 1 << 12);

    for bytes in [0usize, 3, (1 << 16) + 1] {
        let err = driver.memory_set(bytes).unwrap_err();
        assert!(matches!(err, Error::MemoryNotPowerOfTwo(b) if b == bytes));
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }
    assert!(matches!(
        driver.memory_set(2),
        Err(Error::MemoryTooSmall { bytes: 2, min: 4 })
    ));
    #[cfg(target_pointer_width = "64")]
    assert!(matches!(
        driver.memory_set(1 << 35),
        Err(Error::MemoryTooLarge { .. })
    ));

    assert_eq!(driver.memory_get(), 1 << 12, "rejected sizes keep the table");
    driver.memory_reset();
    assert_eq!(driver.memory_get(), 0);
}

#[test]
fn test_driver_thread_resize() {
    let mut driver = CpuDriver::with_threads(1);
    for threads in [4, 2, 8, 0, 3] {
        driver.threads_set(threads);
        assert_eq!(driver.threads_get(), threads);
    }
}

#[test]
fn test_driver_settings() {
    let mut driver = CpuDriver::with_threads(1);
    assert_eq!(driver.kind(), DriverKind::Cpu);
    assert_eq!(driver.kind().to_string(), "cpu");
    assert_eq!(driver.difficulty_get(), bit_difficulty(8));

    driver.difficulty_set_64(0xfff0_0000_0000_0000);
    assert_eq!(driver.difficulty_get_64(), 0xfff0_0000_0000_0000);
    assert_eq!(driver.difficulty_get(), difficulty_64_to_128(0xfff0_0000_0000_0000));

    assert_eq!(driver.recommended_lookup(40), 20);
    assert_eq!(driver.recommended_lookup(0), 1);
    assert_eq!(driver.recommended_lookup(200), crate::MAX_LOOKUP);
    assert!(driver.recommended_threads() >= 1);

    driver.memory_set(1 << 20).unwrap();
    let dump = driver.dump();
    assert!(dump.contains("Worker threads: 1"), "{}", dump);
    assert!(dump.contains("Memory: 1 MB"), "{}", dump);
}

#[test]
fn test_stepping_fits_epoch() {
    assert_eq!((1u64 << 32) % STEPPING, 0);
}

#[test]
fn test_ffi_solve_and_validate() {
    let ctx = np_context_create();
    let driver = np_driver_cpu_create(ctx);
    let work = np_work_create(ctx);
    assert!(!np_failed(ctx));

    np_driver_threads_set(ctx, driver, 2);
    assert_eq!(np_driver_threads_get(ctx, driver), 2);

    np_work_set_nonce(ctx, work, 0x0123_4567, 0x89ab_cdef);
    np_work_set_table_size(ctx, work, 1 << 20);
    np_work_set_difficulty(ctx, work, 0);
    np_solve(ctx, driver, work);
    assert!(!np_failed(ctx), "solve failed with code {:#x}", np_error_code(ctx));
    assert!(np_validate(ctx, work));

    let (mut hi, mut lo) = (0u64, 0u64);
    np_work_get_solution(ctx, work, &mut hi, &mut lo);
    assert!(passes_64(
        [0x0123_4567, 0x89ab_cdef],
        Solution::new(hi, lo),
        0
    ));

    // Achieved difficulty is written back and still validates
    let mut achieved = 0u64;
    np_work_get_difficulty(ctx, work, &mut achieved);
    let nonce = [0x0123_4567, 0x89ab_cdef];
    let solution = Solution::new(hi, lo);
    assert!(difficulty_64_to_128(achieved) <= difficulty(nonce, solution));
    assert!(passes_64(nonce, solution, achieved.wrapping_sub(1)));
    assert!(np_validate(ctx, work));
    np_work_set_difficulty(ctx, work, u64::MAX);
    assert!(!np_validate(ctx, work));

    np_work_destroy(ctx, work);
    np_driver_destroy(ctx, driver);
    np_context_destroy(ctx);
}

#[test]
fn test_ffi_cancel_from_another_thread() {
    let ctx = np_context_create();
    let driver = np_driver_cpu_create(ctx);
    let work = np_work_create(ctx);
    np_driver_threads_set(ctx, driver, 2);
    np_work_set_nonce(ctx, work, 5, 6);
    np_work_set_table_size(ctx, work, 1 << 16);
    // Needs the top 96 bits of the difficulty set, never found in practice
    np_work_set_difficulty(ctx, work, u64::MAX);

    let done = AtomicBool::new(false);
    let shared = driver as usize;
    thread::scope(|s| {
        s.spawn(|| {
            let ctx = np_context_create();
            // The solve clears the flag when it starts, so keep signalling
            while !done.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(10));
                np_driver_cancel(ctx, shared as *const NpDriver);
                assert!(!np_failed(ctx));
            }
            np_context_destroy(ctx);
        });
        np_solve(ctx, driver, work);
        done.store(true, Ordering::Relaxed);
    });
    assert!(!np_failed(ctx), "solve failed with code {:#x}", np_error_code(ctx));

    let (mut hi, mut lo) = (u64::MAX, u64::MAX);
    np_work_get_solution(ctx, work, &mut hi, &mut lo);
    assert!(Solution::new(hi, lo).is_empty());

    np_driver_cancel(ctx, std::ptr::null());
    assert_eq!(np_error_code(ctx), NpErrorCode::DriverInvalid as i64);

    np_work_destroy(ctx, work);
    np_driver_destroy(ctx, driver);
    np_context_destroy(ctx);
}

#[test]
fn test_ffi_errors() {
    let ctx = np_context_create();
    let work = np_work_create(ctx);

    np_solve(ctx, std::ptr::null_mut(), work);
    assert!(np_failed(ctx));
    assert_eq!(np_error_category(ctx), NpErrorCategory::Generic);
    assert_eq!(np_error_code(ctx), NpErrorCode::DriverInvalid as i64);

    let driver = np_driver_cpu_create(ctx);
    assert!(!np_failed(ctx), "a successful call clears the error");
    np_work_set_table_size(ctx, work, 3);
    np_solve(ctx, driver, work);
    assert_eq!(np_error_code(ctx), NpErrorCode::WorkInvalidMemorySize as i64);

    let mut buffer = [0 as std::ffi::c_char; 128];
    np_error_string(ctx, buffer.as_mut_ptr(), buffer.len());
    let message = unsafe { CStr::from_ptr(buffer.as_ptr()) }.to_str().unwrap();
    assert!(message.contains("power of two"), "{}", message);

    np_work_destroy(ctx, work);
    np_driver_destroy(ctx, driver);
    np_context_destroy(ctx);
}
