//! Virtual X displays.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use super::command::CommandSpec;
use crate::domain::QualityPreset;

/// Produces the command that starts a display server on `:N`.
pub trait DisplayBackend: Send + Sync {
    fn command(&self, display: u32, preset: &QualityPreset) -> CommandSpec;
}

/// Xvfb framebuffer server.
#[derive(Debug, Clone)]
pub struct XvfbDisplay {
    binary_path: String,
}

impl XvfbDisplay {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

impl DisplayBackend for XvfbDisplay {
    fn command(&self, display: u32, preset: &QualityPreset) -> CommandSpec {
        CommandSpec::new(&self.binary_path)
            .arg(format!(":{display}"))
            .args(["-screen", "0"])
            .arg(format!("{}x24", preset.resolution()))
            .args(["-ac", "-nolisten", "tcp"])
    }
}

/// Hands out unique display numbers to concurrently running pipelines.
#[derive(Debug)]
pub struct DisplayAllocator {
    base: u32,
    in_use: Mutex<BTreeSet<u32>>,
}

impl DisplayAllocator {
    pub fn new(base: u32) -> Arc<Self> {
        Arc::new(Self {
            base,
            in_use: Mutex::new(BTreeSet::new()),
        })
    }

    /// Lowest free number at or above the base. Numbers with an X lock file
    /// belong to a foreign server and are skipped.
    pub fn acquire(self: &Arc<Self>) -> DisplayLease {
        let mut in_use = self.in_use.lock();
        let mut number = self.base;
        while in_use.contains(&number) || x_lock_exists(number) {
            number += 1;
        }
        in_use.insert(number);
        DisplayLease {
            number,
            allocator: Arc::clone(self),
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.lock().len()
    }

    fn release(&self, number: u32) {
        self.in_use.lock().remove(&number);
    }
}

fn x_lock_exists(number: u32) -> bool {
    Path::new(&format!("/tmp/.X{number}-lock")).exists()
}

/// A reserved display number, returned to the allocator on drop.
#[derive(Debug)]
pub struct DisplayLease {
    number: u32,
    allocator: Arc<DisplayAllocator>,
}

impl DisplayLease {
    pub fn number(&self) -> u32 {
        self.number
    }
}

impl Drop for DisplayLease {
    fn drop(&mut self) {
        self.allocator.release(self.number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QualityTier;

    #[test]
    fn test_xvfb_command() {
        let spec = XvfbDisplay::new("Xvfb").command(100, &QualityTier::Medium.preset(false));
        assert_eq!(spec.program, "Xvfb");
        assert_eq!(
            spec.args,
            vec![":100", "-screen", "0", "1280x720x24", "-ac", "-nolisten", "tcp"]
        );
    }

    #[test]
    fn test_leases_are_unique_and_released() {
        let allocator = DisplayAllocator::new(4200);
        let a = allocator.acquire();
        let b = allocator.acquire();
        assert_ne!(a.number(), b.number());
        assert!(a.number() >= 4200);
        assert_eq!(allocator.in_use(), 2);

        let freed = a.number();
        drop(a);
        assert_eq!(allocator.in_use(), 1);

        let c = allocator.acquire();
        assert_eq!(c.number(), freed);
    }
}
