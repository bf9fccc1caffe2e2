//! CPU arithmetic workload

use std::hint::black_box;

use stress_herd_core::{ExitStatus, StressClass, StressContext, Stressor};

/// Cycles through a handful of arithmetic kernels, verifying each result
#[derive(Debug, Default, Clone, Copy)]
pub struct Cpu;

type Method = fn() -> bool;

const METHODS: &[(&str, Method)] = &[
    ("fibonacci", fibonacci),
    ("sqrt", sqrt),
    ("int64", int64),
    ("prime", prime),
    ("gcd", gcd),
];

fn fibonacci() -> bool {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..90 {
        let next = a + b;
        a = black_box(b);
        b = next;
    }
    a == 2_880_067_194_370_816_120
}

fn sqrt() -> bool {
    (1..1024u32).all(|i| {
        let x = f64::from(black_box(i));
        let r = x.sqrt();
        (r * r - x).abs() < 1e-9
    })
}

fn int64() -> bool {
    let mut acc: u64 = 0x0123_4567_89ab_cdef;
    for i in 0..1000u64 {
        acc = acc.rotate_left(7) ^ black_box(i).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    }
    // Same fold run twice must agree.
    let mut check: u64 = 0x0123_4567_89ab_cdef;
    for i in 0..1000u64 {
        check = check.rotate_left(7) ^ i.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    }
    acc == check
}

fn prime() -> bool {
    const N: usize = 10_000;
    let mut sieve = vec![true; N + 1];
    sieve[0] = false;
    sieve[1] = false;
    let mut i = 2;
    while i * i <= N {
        if sieve[i] {
            for j in (i * i..=N).step_by(i) {
                sieve[j] = false;
            }
        }
        i += 1;
    }
    black_box(&sieve).iter().filter(|&&p| p).count() == 1229
}

fn gcd() -> bool {
    fn euclid(mut a: u64, mut b: u64) -> u64 {
        while b != 0 {
            (a, b) = (b, a % b);
        }
        a
    }
    (1..500u64).all(|i| euclid(black_box(i * 6), i * 4) == i * 2)
}

impl Stressor for Cpu {
    fn name(&self) -> &str {
        "cpu"
    }

    fn class(&self) -> StressClass {
        StressClass::CPU
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        let mut next = 0;
        while ctx.keep_stressing() {
            let (method, kernel) = METHODS[next];
            if !kernel() {
                tracing::error!(worker = %ctx.name, method, "cpu method produced a wrong result");
                return ExitStatus::NotSuccess;
            }
            next = (next + 1) % METHODS.len();
            ctx.inc();
        }
        ExitStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::run_bounded;

    #[test]
    fn test_every_method_verifies() {
        for (name, kernel) in METHODS {
            assert!(kernel(), "{name}");
        }
    }

    #[test]
    fn test_cpu_honours_budget() {
        let (status, ops) = run_bounded(&Cpu, 25);
        assert_eq!(status, ExitStatus::Success);
        assert_eq!(ops, 25);
    }
}
