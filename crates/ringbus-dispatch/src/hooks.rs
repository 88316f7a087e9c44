//! Host-supplied clock, RNG and CPU topology.
//!
//! The dispatcher never probes CPUID or reads sysfs itself; the host
//! injects whatever it knows through [`HostHooks`]. Tests inject a seeded
//! RNG and a synthetic topology to make steal order and timeouts
//! deterministic.

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use std::sync::Mutex;
use std::time::Instant;

/// CPU class reported by the host's probe module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreType {
    /// Performance core; eligible for CRITICAL/HIGH work.
    Performance,
    /// Efficiency core; eligible for NORMAL and below.
    Efficiency,
    /// Topology unknown; the dispatcher partitions by index.
    Unknown,
}

/// Clock, randomness and topology callbacks the fabric consumes.
pub trait HostHooks: Send + Sync {
    /// Monotonic nanoseconds.
    fn now_ns(&self) -> u64;

    /// Uniform random word, used for steal order and timeout jitter.
    fn random_u64(&self) -> u64;

    /// Class of the given CPU index.
    fn core_type(&self, cpu: usize) -> CoreType;

    /// CPUs this process may run on.
    fn available_cpus(&self) -> Vec<usize>;
}

/// Default hooks: `Instant`-based clock, seeded `SmallRng`, and an
/// unknown topology that leaves partitioning to the dispatcher.
pub struct SystemHooks {
    epoch: Instant,
    rng: Mutex<SmallRng>,
}

impl SystemHooks {
    /// Hooks seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            rng: Mutex::new(SmallRng::from_entropy()),
        }
    }

    /// Hooks with a fixed RNG seed for deterministic tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            epoch: Instant::now(),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }
}

impl Default for SystemHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl HostHooks for SystemHooks {
    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn random_u64(&self) -> u64 {
        self.rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .next_u64()
    }

    fn core_type(&self, _cpu: usize) -> CoreType {
        CoreType::Unknown
    }

    fn available_cpus(&self) -> Vec<usize> {
        let n = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        (0..n).collect()
    }
}

/// Pin the calling thread to one CPU.
///
/// Failure is reported, not fatal: the dispatcher downgrades to an
/// unpinned worker with a warning.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpu: usize) -> Result<(), std::io::Error> {
    // SAFETY: cpu_set_t is plain data; the zeroed pattern is its empty set.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Non-Linux hosts run unpinned.
#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_cpu: usize) -> Result<(), std::io::Error> {
    Ok(())
}
