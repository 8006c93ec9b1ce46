use crate::error::InternalError;
use log::trace;
use std::fmt;

pub const SCRATCH_BASE: u8 = 8;
pub const SCRATCH_COUNT: usize = 8;
pub const ARG_COUNT: usize = 8;

/// A general-purpose register viewed at 32 (`w`) or 64 (`x`) bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg {
    pub index: u8,
    pub wide: bool,
}

impl Reg {
    pub fn new(index: u8, wide: bool) -> Reg {
        Reg { index, wide }
    }

    /// Argument register `index`; argument 0 doubles as the return register.
    pub fn arg(index: usize, wide: bool) -> Reg {
        Reg::new(index as u8, wide)
    }

    pub fn ret(wide: bool) -> Reg {
        Reg::arg(0, wide)
    }

    pub fn narrow(self) -> Reg {
        Reg::new(self.index, false)
    }

    pub fn wide(self) -> Reg {
        Reg::new(self.index, true)
    }

    pub fn with_width(self, wide: bool) -> Reg {
        Reg::new(self.index, wide)
    }

    fn slot(self) -> Option<usize> {
        let slot = self.index.checked_sub(SCRATCH_BASE)? as usize;
        (slot < SCRATCH_COUNT).then_some(slot)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", if self.wide { 'x' } else { 'w' }, self.index)
    }
}

/// Stack-discipline pool over x8-x15. Every `get` must be paired with a
/// `free` before the owning procedure ends.
#[derive(Debug, Clone)]
pub struct RegPool {
    in_use: [bool; SCRATCH_COUNT],
    acquired: usize,
    released: usize,
}

impl Default for RegPool {
    fn default() -> Self {
        RegPool::new()
    }
}

impl RegPool {
    pub fn new() -> RegPool {
        RegPool {
            in_use: [false; SCRATCH_COUNT],
            acquired: 0,
            released: 0,
        }
    }

    pub fn get(&mut self, wide: bool) -> Result<Reg, InternalError> {
        let slot = self
            .in_use
            .iter()
            .position(|used| !used)
            .ok_or(InternalError::RegistersExhausted)?;
        self.in_use[slot] = true;
        self.acquired += 1;
        let reg = Reg::new(SCRATCH_BASE + slot as u8, wide);
        trace!("acquire {}", reg);
        Ok(reg)
    }

    pub fn free(&mut self, reg: Reg) -> Result<(), InternalError> {
        match reg.slot() {
            Some(slot) if self.in_use[slot] => {
                self.in_use[slot] = false;
                self.released += 1;
                trace!("release {}", reg);
                Ok(())
            }
            _ => Err(InternalError::ForeignRegister(reg.to_string())),
        }
    }

    /// Registers currently handed out, in their 64-bit form.
    pub fn live(&self) -> Vec<Reg> {
        self.in_use
            .iter()
            .enumerate()
            .filter(|(_, used)| **used)
            .map(|(slot, _)| Reg::new(SCRATCH_BASE + slot as u8, true))
            .collect()
    }

    pub fn available(&self) -> usize {
        self.in_use.iter().filter(|used| !**used).count()
    }

    pub fn acquired(&self) -> usize {
        self.acquired
    }

    pub fn released(&self) -> usize {
        self.released
    }

    /// Fails unless every acquired register has been released.
    pub fn check_balanced(&self, proc_name: &str) -> Result<(), InternalError> {
        if self.acquired == self.released && self.available() == SCRATCH_COUNT {
            Ok(())
        } else {
            Err(InternalError::RegisterLeak {
                proc_name: proc_name.to_string(),
                acquired: self.acquired,
                released: self.released,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(Reg::new(8, false).to_string(), "w8");
        assert_eq!(Reg::new(15, true).to_string(), "x15");
        assert_eq!(Reg::arg(3, true).narrow().to_string(), "w3");
        assert_eq!(Reg::ret(false).wide().to_string(), "x0");
    }

    #[test]
    fn first_free_register_is_taken() {
        let mut pool = RegPool::new();
        let a = pool.get(false).unwrap();
        let b = pool.get(true).unwrap();
        assert_eq!(a.to_string(), "w8");
        assert_eq!(b.to_string(), "x9");
        assert_eq!(pool.live(), vec![Reg::new(8, true), Reg::new(9, true)]);
        pool.free(a).unwrap();
        assert_eq!(pool.live(), vec![Reg::new(9, true)]);
        assert_eq!(pool.get(false).unwrap().index, 8);
        assert_eq!(pool.available(), SCRATCH_COUNT - 2);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut pool = RegPool::new();
        for _ in 0..SCRATCH_COUNT {
            pool.get(false).unwrap();
        }
        assert_eq!(pool.get(false), Err(InternalError::RegistersExhausted));
    }

    #[test]
    fn foreign_and_double_free() {
        let mut pool = RegPool::new();
        assert!(matches!(
            pool.free(Reg::arg(0, false)),
            Err(InternalError::ForeignRegister(_))
        ));
        let reg = pool.get(false).unwrap();
        pool.free(reg).unwrap();
        assert!(pool.free(reg).is_err());
    }

    #[test]
    fn leak_detection() {
        let mut pool = RegPool::new();
        let reg = pool.get(true).unwrap();
        assert!(matches!(
            pool.check_balanced("main"),
            Err(InternalError::RegisterLeak { acquired: 1, released: 0, .. })
        ));
        pool.free(reg).unwrap();
        assert!(pool.check_balanced("main").is_ok());
        assert_eq!(pool.acquired(), pool.released());
    }
}
