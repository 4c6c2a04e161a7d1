use core::fmt;
use std::{cell::RefCell, ops::Index, rc::Rc};

use indexmap::IndexMap;
use log::{debug, trace, warn};

use crate::error::{EvaluationResult, LispError};

pub type PrimitiveFn = fn(Value, &mut Heap) -> EvaluationResult;

/// Handle to an object in the heap.
///
/// A handle is only an index plus the generation of the slot at the time of
/// allocation, so it is `Copy` and does not keep anything alive by itself.
/// Whatever it points to survives a collection only while it is reachable
/// from the symbol table, the global environment or a [`Pinned`] guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value {
    index: u32,
    generation: u32,
}

impl Value {
    /// Nil always lives in the first slot and is never swept.
    pub(crate) const NIL: Value = Value { index: 0, generation: 0 };

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Symbol,
    Fixnum,
    String,
    Cell,
    Primitive,
    Proc,
}

impl Kind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Symbol => "symbol",
            Self::Fixnum => "fixnum",
            Self::String => "string",
            Self::Cell => "cell",
            Self::Primitive => "primitive",
            Self::Proc => "procedure",
        }
    }
}

#[derive(Clone)]
pub enum Object {
    Symbol(String),
    Fixnum(i64),
    Str(String),
    Cell(Value, Value),
    Primitive(PrimitiveFn),
    Proc { vars: Value, body: Value, env: Value },
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Symbol(_) => Kind::Symbol,
            Self::Fixnum(_) => Kind::Fixnum,
            Self::Str(_) => Kind::String,
            Self::Cell(..) => Kind::Cell,
            Self::Primitive(_) => Kind::Primitive,
            Self::Proc { .. } => Kind::Proc,
        }
    }

    /// Outgoing edges followed by the collector.
    pub(crate) fn references(&self) -> impl Iterator<Item = Value> {
        let (edges, len) = match *self {
            Self::Cell(first, rest) => ([first, rest, rest], 2),
            Self::Proc { vars, body, env } => ([vars, body, env], 3),
            _ => ([Value::NIL; 3], 0),
        };
        edges.into_iter().take(len)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symbol(name) => write!(f, "Symbol({})", name),
            Self::Fixnum(value) => write!(f, "Fixnum({})", value),
            Self::Str(text) => write!(f, "Str({:?})", text),
            Self::Cell(first, rest) => write!(f, "Cell(#{}, #{})", first.index, rest.index),
            Self::Primitive(_) => write!(f, "Primitive"),
            Self::Proc { vars, body, env } => {
                write!(f, "Proc(#{}, #{}, #{})", vars.index, body.index, env.index)
            }
        }
    }
}

pub(crate) struct Slot {
    pub(crate) object: Option<Object>,
    pub(crate) generation: u32,
    pub(crate) mark: u32,
}

/// Symbols the evaluator dispatches on, interned when the heap is created.
#[derive(Debug, Clone, Copy)]
pub struct Keywords {
    pub nil: Value,
    pub t: Value,
    pub quote: Value,
    pub if_: Value,
    pub define: Value,
    pub setq: Value,
    pub lambda: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialForm {
    Quote,
    If,
    Define,
    Setq,
    Lambda,
}

impl Keywords {
    pub fn special_form(&self, head: Value) -> Option<SpecialForm> {
        match head {
            head if head == self.quote => Some(SpecialForm::Quote),
            head if head == self.if_ => Some(SpecialForm::If),
            head if head == self.define => Some(SpecialForm::Define),
            head if head == self.setq => Some(SpecialForm::Setq),
            head if head == self.lambda => Some(SpecialForm::Lambda),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub capacity: usize,
    pub free: usize,
    pub active: usize,
    pub collections: usize,
}

type PinSlots = Rc<RefCell<Vec<Value>>>;

/// Scope-bound registration of a temporary root.
///
/// Creating the guard pushes its value on the heap's pin stack; dropping it
/// pops the value again. Guards must be dropped in reverse order of creation,
/// which is what Rust does for locals of one scope.
pub struct Pinned {
    stack: PinSlots,
    depth: usize,
}

impl Pinned {
    pub fn get(&self) -> Value {
        self.stack.borrow()[self.depth]
    }

    /// Retargets the guard, for variables reassigned while pinned.
    pub fn set(&self, value: Value) {
        self.stack.borrow_mut()[self.depth] = value;
    }
}

impl Drop for Pinned {
    fn drop(&mut self) {
        let mut stack = self.stack.borrow_mut();
        debug_assert_eq!(stack.len(), self.depth + 1, "root pins released out of order");
        trace!("unpin #{} at depth {}", stack[self.depth].index, self.depth);
        stack.truncate(self.depth);
    }
}

/// Fixed-capacity object arena.
///
/// Slots are either free (listed in `free`) or active (holding an object).
/// Allocation takes a free slot; when none is left the collector runs once
/// before giving up with [`LispError::OutOfMemory`].
pub struct Heap {
    pub(crate) slots: Vec<Slot>,
    pub(crate) free: Vec<u32>,
    pub(crate) symbols: IndexMap<String, Value>,
    pub(crate) global_env: Option<Value>,
    pub(crate) pins: PinSlots,
    pub(crate) epoch: u32,
    pub(crate) collections: usize,
    keywords: Keywords,
}

impl Heap {
    pub fn new(capacity: usize) -> EvaluationResult<Self> {
        let capacity = capacity.min(u32::MAX as usize);
        if capacity == 0 {
            return Err(LispError::OutOfMemory);
        }

        let nil = Value::NIL;
        let mut slots: Vec<Slot> = (0..capacity)
            .map(|_| Slot { object: None, generation: 0, mark: 0 })
            .collect();
        slots[0].object = Some(Object::Symbol("nil".to_owned()));

        let mut heap = Self {
            slots,
            free: (1..capacity as u32).rev().collect(),
            symbols: IndexMap::from([("nil".to_owned(), nil)]),
            global_env: None,
            pins: PinSlots::default(),
            epoch: 0,
            collections: 0,
            keywords: Keywords {
                nil,
                t: nil,
                quote: nil,
                if_: nil,
                define: nil,
                setq: nil,
                lambda: nil,
            },
        };

        heap.keywords = Keywords {
            nil,
            t: heap.intern("t")?,
            quote: heap.intern("quote")?,
            if_: heap.intern("if")?,
            define: heap.intern("define")?,
            setq: heap.intern("setq")?,
            lambda: heap.intern("lambda")?,
        };
        Ok(heap)
    }

    pub fn keywords(&self) -> &Keywords {
        &self.keywords
    }

    pub fn nil(&self) -> Value {
        self.keywords.nil
    }

    pub fn t(&self) -> Value {
        self.keywords.t
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> HeapStats {
        let active = self.slots.iter().filter(|slot| slot.object.is_some()).count();
        HeapStats {
            capacity: self.slots.len(),
            free: self.free.len(),
            active,
            collections: self.collections,
        }
    }

    /// Registers the environment the collector treats as a root.
    pub fn set_global_env(&mut self, env: Value) {
        self.global_env = Some(env);
    }

    pub fn global_env(&self) -> Option<Value> {
        self.global_env
    }

    pub fn pin(&self, value: Value) -> Pinned {
        let mut stack = self.pins.borrow_mut();
        trace!("pin #{} at depth {}", value.index, stack.len());
        stack.push(value);
        Pinned {
            stack: Rc::clone(&self.pins),
            depth: stack.len() - 1,
        }
    }

    pub fn pinned_count(&self) -> usize {
        self.pins.borrow().len()
    }

    pub fn try_get(&self, value: Value) -> Option<&Object> {
        self.slots
            .get(value.index())
            .filter(|slot| slot.generation == value.generation)
            .and_then(|slot| slot.object.as_ref())
    }

    pub fn is_live(&self, value: Value) -> bool {
        self.try_get(value).is_some()
    }

    fn allocate(&mut self, object: Object) -> EvaluationResult {
        debug_assert!(
            object.references().all(|edge| self.is_live(edge)),
            "storing a dangling handle in {:?}",
            object
        );

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                // The object under construction is not linked anywhere yet, so its
                // children are roots for this cycle.
                let edges: Vec<Value> = object.references().collect();
                self.collect_with(&edges);
                self.free.pop().ok_or_else(|| {
                    warn!("heap exhausted: all {} slots are live", self.slots.len());
                    LispError::OutOfMemory
                })?
            }
        };

        let slot = &mut self.slots[index as usize];
        trace!("allocate #{} {:?}", index, object);
        slot.object = Some(object);
        slot.mark = 0;
        Ok(Value { index, generation: slot.generation })
    }

    pub fn cons(&mut self, first: Value, rest: Value) -> EvaluationResult {
        self.allocate(Object::Cell(first, rest))
    }

    pub fn fixnum(&mut self, value: i64) -> EvaluationResult {
        self.allocate(Object::Fixnum(value))
    }

    pub fn string(&mut self, text: &str) -> EvaluationResult {
        self.allocate(Object::Str(text.to_owned()))
    }

    pub fn primitive(&mut self, function: PrimitiveFn) -> EvaluationResult {
        self.allocate(Object::Primitive(function))
    }

    pub fn procedure(&mut self, vars: Value, body: Value, env: Value) -> EvaluationResult {
        self.allocate(Object::Proc { vars, body, env })
    }

    /// Finds or creates the unique symbol called `name`.
    pub fn intern(&mut self, name: &str) -> EvaluationResult {
        if let Some(&symbol) = self.symbols.get(name) {
            return Ok(symbol);
        }
        let symbol = self.allocate(Object::Symbol(name.to_owned()))?;
        debug!("interned symbol {} as #{}", name, symbol.index);
        self.symbols.insert(name.to_owned(), symbol);
        Ok(symbol)
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn kind(&self, value: Value) -> Kind {
        self[value].kind()
    }

    pub fn is_nil(&self, value: Value) -> bool {
        value == self.keywords.nil
    }

    pub fn is_cell(&self, value: Value) -> bool {
        matches!(self[value], Object::Cell(..))
    }

    pub fn car(&self, value: Value) -> Value {
        match self[value] {
            Object::Cell(first, _) => first,
            _ => self.keywords.nil,
        }
    }

    pub fn cdr(&self, value: Value) -> Value {
        match self[value] {
            Object::Cell(_, rest) => rest,
            _ => self.keywords.nil,
        }
    }

    /// Returns `false` when `cell` is not a cell.
    pub fn set_car(&mut self, cell: Value, value: Value) -> bool {
        let nil = self.keywords.nil;
        match self.cell_mut(cell) {
            Some((first, _)) => {
                relink(cell, first, value, nil);
                true
            }
            None => false,
        }
    }

    /// Returns `false` when `cell` is not a cell.
    pub fn set_cdr(&mut self, cell: Value, value: Value) -> bool {
        let nil = self.keywords.nil;
        match self.cell_mut(cell) {
            Some((_, rest)) => {
                relink(cell, rest, value, nil);
                true
            }
            None => false,
        }
    }

    fn cell_mut(&mut self, cell: Value) -> Option<(&mut Value, &mut Value)> {
        let slot = self
            .slots
            .get_mut(cell.index())
            .filter(|slot| slot.generation == cell.generation)?;
        match slot.object.as_mut() {
            Some(Object::Cell(first, rest)) => Some((first, rest)),
            _ => None,
        }
    }

    pub fn as_fixnum(&self, value: Value) -> Option<i64> {
        match self[value] {
            Object::Fixnum(number) => Some(number),
            _ => None,
        }
    }

    pub fn symbol_name(&self, value: Value) -> Option<&str> {
        match &self[value] {
            Object::Symbol(name) => Some(name),
            _ => None,
        }
    }

    /// Elements of a list, stopping at the first non-cell tail.
    pub fn iter_list(&self, list: Value) -> ListIter<'_> {
        ListIter { heap: self, current: list }
    }
}

fn relink(cell: Value, target: &mut Value, value: Value, nil: Value) {
    if *target != nil && *target != value {
        debug!("relink #{}: #{} -> #{}", cell.index, target.index, value.index);
    }
    *target = value;
}

impl Index<Value> for Heap {
    type Output = Object;

    fn index(&self, value: Value) -> &Object {
        match self.try_get(value) {
            Some(object) => object,
            None => panic!("stale handle #{} (generation {})", value.index, value.generation),
        }
    }
}

pub struct ListIter<'h> {
    heap: &'h Heap,
    current: Value,
}

impl Iterator for ListIter<'_> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self.heap[self.current] {
            Object::Cell(first, rest) => {
                self.current = rest;
                Some(first)
            }
            _ => None,
        }
    }
}
