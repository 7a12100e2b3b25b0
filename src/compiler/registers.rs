//! Virtual-register pool
//!
//! A fixed-size array of slots mirroring the VM register file. Register 0
//! is the VM's return-value register and is never handed out; slots
//! `1..count` are claimed by a linear first-fit scan. A [`Register`] handle
//! is not clonable, so a double free is unrepresentable; freeing consumes
//! the handle and releasing an already-free slot is still checked as a
//! broken invariant.

use crate::error::{Error, Result};

/// Handle to one allocated register
///
/// Holding the handle is what keeps the slot alive; dropping it without
/// [`RegisterPool::dealloc`] leaks the slot, which
/// [`RegisterPool::verify_empty`] reports at method end.
#[derive(Debug)]
pub struct Register {
    index: u8,
    alias: Option<String>,
}

impl Register {
    /// Register file index
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Alias bound at allocation, if any
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Operand form used in assembly text
    pub fn operand(&self) -> String {
        format!("r{}", self.index)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    owner: String,
    alias: Option<String>,
}

/// First-fit pool over the VM register file
#[derive(Debug)]
pub struct RegisterPool {
    slots: Vec<Option<Slot>>,
}

impl RegisterPool {
    /// Creates a pool over a register file of `count` slots
    pub fn new(count: usize) -> Self {
        RegisterPool {
            slots: vec![None; count],
        }
    }

    /// Claim the first free register
    ///
    /// `owner` names the AST node the slot is working for, for diagnostics.
    /// When an alias is given it must be unique among live slots; a
    /// collision is a shape error at `line`.
    pub fn alloc(
        &mut self,
        owner: impl Into<String>,
        alias: Option<&str>,
        line: usize,
    ) -> Result<Register> {
        if let Some(alias) = alias {
            if self.alias_live(alias) {
                return Err(Error::shape(
                    line,
                    1,
                    format!("alias already exists: '{}'", alias),
                ));
            }
        }
        for index in 1..self.slots.len() {
            if self.slots[index].is_none() {
                self.slots[index] = Some(Slot {
                    owner: owner.into(),
                    alias: alias.map(str::to_string),
                });
                return Ok(Register {
                    index: index as u8,
                    alias: alias.map(str::to_string),
                });
            }
        }
        Err(Error::internal("register pool exhausted"))
    }

    /// Claim `count` consecutive registers for a call argument window
    pub fn alloc_span(&mut self, owner: impl Into<String>, count: usize) -> Result<Vec<Register>> {
        let owner = owner.into();
        if count == 0 {
            return Ok(Vec::new());
        }
        for start in 1..self.slots.len() {
            if start + count > self.slots.len() {
                break;
            }
            if self.slots[start..start + count].iter().all(|s| s.is_none()) {
                let mut registers = Vec::with_capacity(count);
                for (offset, index) in (start..start + count).enumerate() {
                    self.slots[index] = Some(Slot {
                        owner: format!("{} [{}]", owner, offset),
                        alias: None,
                    });
                    registers.push(Register {
                        index: index as u8,
                        alias: None,
                    });
                }
                return Ok(registers);
            }
        }
        Err(Error::internal("register pool exhausted"))
    }

    /// Release a register, consuming the handle
    pub fn dealloc(&mut self, register: Register) -> Result<()> {
        let slot = &mut self.slots[register.index as usize];
        if slot.is_none() {
            return Err(Error::internal(format!(
                "register r{} already free",
                register.index
            )));
        }
        *slot = None;
        Ok(())
    }

    /// Number of live slots
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Require the pool to be fully free, as it must be at method end
    pub fn verify_empty(&self) -> Result<()> {
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                return Err(Error::internal(format!(
                    "register r{} not deallocated (owner: {})",
                    index, slot.owner
                )));
            }
        }
        Ok(())
    }

    fn alias_live(&self, alias: &str) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|slot| slot.alias.as_deref() == Some(alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fit_skips_reserved_zero() {
        let mut pool = RegisterPool::new(8);
        let a = pool.alloc("a", None, 1).unwrap();
        let b = pool.alloc("b", None, 1).unwrap();
        assert_eq!(a.index(), 1);
        assert_eq!(b.index(), 2);
        pool.dealloc(a).unwrap();
        let c = pool.alloc("c", None, 1).unwrap();
        assert_eq!(c.index(), 1);
        pool.dealloc(b).unwrap();
        pool.dealloc(c).unwrap();
        pool.verify_empty().unwrap();
    }

    #[test]
    fn test_alias_collision_is_shape_error() {
        let mut pool = RegisterPool::new(8);
        let a = pool.alloc("local x", Some("x"), 3).unwrap();
        let err = pool.alloc("local x", Some("x"), 4).unwrap_err();
        assert!(matches!(err, Error::Shape { .. }));
        assert!(err.to_string().contains("alias already exists"));
        // Once the first slot dies the alias can be reused.
        pool.dealloc(a).unwrap();
        let b = pool.alloc("local x", Some("x"), 5).unwrap();
        pool.dealloc(b).unwrap();
    }

    #[test]
    fn test_leak_is_reported_with_register_name() {
        let mut pool = RegisterPool::new(8);
        let _leaked = pool.alloc("literal", None, 1).unwrap();
        let err = pool.verify_empty().unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(err.to_string().contains("register r1 not deallocated"));
    }

    #[test]
    fn test_exhaustion_is_internal_error() {
        let mut pool = RegisterPool::new(4);
        let _a = pool.alloc("a", None, 1).unwrap();
        let _b = pool.alloc("b", None, 1).unwrap();
        let _c = pool.alloc("c", None, 1).unwrap();
        let err = pool.alloc("d", None, 1).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_span_is_consecutive() {
        let mut pool = RegisterPool::new(16);
        let a = pool.alloc("a", None, 1).unwrap();
        let b = pool.alloc("b", None, 1).unwrap();
        pool.dealloc(a).unwrap();
        // r1 is free but a 3-wide span cannot fit there next to live r2.
        let span = pool.alloc_span("args", 3).unwrap();
        let indices: Vec<u8> = span.iter().map(|r| r.index()).collect();
        assert_eq!(indices, vec![3, 4, 5]);
        for register in span {
            pool.dealloc(register).unwrap();
        }
        pool.dealloc(b).unwrap();
        pool.verify_empty().unwrap();
    }

    #[test]
    fn test_double_free_is_checked() {
        let mut pool = RegisterPool::new(4);
        let a = pool.alloc("a", None, 1).unwrap();
        let index = a.index();
        pool.dealloc(a).unwrap();
        // Forge a stale handle the type system would normally forbid.
        let stale = Register {
            index,
            alias: None,
        };
        let err = pool.dealloc(stale).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
