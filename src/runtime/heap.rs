// src/runtime/heap.rs
//! Per-actor heap and identity hashes
//!
//! Cells are never freed during an actor's lifetime; the heap only grows up
//! to its slot limit, where each object or closure takes one slot and each
//! array takes one slot plus its length.

use crate::instrumentation::rewriter::{ClassId, MethodId};
use crate::runtime::fault::ProgramFault;
use crate::runtime::value::{HeapRef, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Object {
        class: ClassId,
        fields: BTreeMap<Arc<str>, Value>,
    },
    Array(Vec<Value>),
    Closure {
        method: MethodId,
        captured: Vec<Value>,
    },
}

impl Cell {
    fn slots(&self) -> usize {
        match self {
            Cell::Array(items) => 1 + items.len(),
            _ => 1,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Cell::Object { .. } => "object",
            Cell::Array(_) => "array",
            Cell::Closure { .. } => "closure",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Heap {
    cells: Vec<Cell>,
    used_slots: usize,
    max_slots: usize,
}

impl Heap {
    pub fn new(max_slots: usize) -> Self {
        Self {
            cells: Vec::new(),
            used_slots: 0,
            max_slots,
        }
    }

    pub fn alloc(&mut self, cell: Cell) -> Result<HeapRef, ProgramFault> {
        let slots = cell.slots();
        if self.used_slots.saturating_add(slots) > self.max_slots || self.cells.len() >= u32::MAX as usize {
            return Err(ProgramFault::HeapExhausted);
        }
        let index = self.cells.len() as u32;
        self.cells.push(cell);
        self.used_slots += slots;
        Ok(HeapRef(index))
    }

    /// Allocate a unit-filled array, checking the slot limit before building it
    pub fn alloc_array(&mut self, len: i64) -> Result<HeapRef, ProgramFault> {
        if len < 0 {
            return Err(ProgramFault::IllegalArraySize { size: len });
        }
        let len = usize::try_from(len).map_err(|_| ProgramFault::HeapExhausted)?;
        if self.used_slots.saturating_add(len).saturating_add(1) > self.max_slots {
            return Err(ProgramFault::HeapExhausted);
        }
        self.alloc(Cell::Array(vec![Value::Unit; len]))
    }

    pub fn get(&self, r: HeapRef) -> Result<&Cell, ProgramFault> {
        self.cells
            .get(r.0 as usize)
            .ok_or(ProgramFault::InvalidReference)
    }

    pub fn get_mut(&mut self, r: HeapRef) -> Result<&mut Cell, ProgramFault> {
        self.cells
            .get_mut(r.0 as usize)
            .ok_or(ProgramFault::InvalidReference)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn used_slots(&self) -> usize {
        self.used_slots
    }

    /// Visit every value stored in any cell
    pub fn for_each_value(&self, mut f: impl FnMut(&Value)) {
        for cell in &self.cells {
            match cell {
                Cell::Object { fields, .. } => fields.values().for_each(&mut f),
                Cell::Array(items) => items.iter().for_each(&mut f),
                Cell::Closure { captured, .. } => captured.iter().for_each(&mut f),
            }
        }
    }
}

/// Hands out identity hash codes in first-request order from a seeded stream
#[derive(Debug, Clone)]
pub struct IdentityHasher {
    rng: StdRng,
    codes: HashMap<HeapRef, i32>,
}

impl IdentityHasher {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            codes: HashMap::new(),
        }
    }

    pub fn code(&mut self, r: HeapRef) -> i32 {
        let rng = &mut self.rng;
        *self
            .codes
            .entry(r)
            .or_insert_with(|| rng.gen_range(1..=i32::MAX))
    }
}

/// Mix a match seed with an actor's identity into a per-actor seed
pub fn actor_seed(match_seed: u64, team_index: usize, actor_id: u32) -> u64 {
    let mixed = match_seed
        ^ ((team_index as u64) << 32).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (actor_id as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    splitmix64(mixed)
}

pub fn splitmix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
