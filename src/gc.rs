use log::{debug, trace};

use crate::heap::{Heap, Object, Value};

impl Heap {
    /// Runs one mark-sweep cycle over the whole heap.
    ///
    /// Roots are the symbol table, the global environment and the pin stack.
    pub fn collect(&mut self) {
        self.collect_with(&[]);
    }

    /// Like [`Heap::collect`], also treating `extra` as roots.
    pub(crate) fn collect_with(&mut self, extra: &[Value]) {
        self.epoch = self.epoch.wrapping_add(1);
        if self.epoch == 0 {
            // Stale stamps from four billion cycles ago would read as marked.
            self.slots.iter_mut().for_each(|slot| slot.mark = 0);
            self.epoch = 1;
        }

        let mut worklist: Vec<Value> = self.symbols.values().copied().collect();
        worklist.extend(self.global_env);
        worklist.extend(self.pins.borrow().iter().copied());
        worklist.extend_from_slice(extra);

        let marked = self.mark(worklist);
        let (kept, swept) = self.sweep();
        self.collections += 1;

        debug!(
            "collection {} (epoch {}): marked {}, kept {}, swept {}, free {}",
            self.collections,
            self.epoch,
            marked,
            kept,
            swept,
            self.free.len()
        );
        debug_assert_eq!(
            self.free.len() + kept,
            self.slots.len(),
            "free and active slots must partition the heap"
        );
    }

    /// Marks everything reachable from `worklist`, returning the number of
    /// objects marked this cycle.
    fn mark(&mut self, mut worklist: Vec<Value>) -> usize {
        let nil = self.nil();
        let epoch = self.epoch;
        let mut marked = 0;

        while let Some(value) = worklist.pop() {
            if value == nil {
                continue;
            }
            let Some(slot) = self
                .slots
                .get_mut(value.index())
                .filter(|slot| slot.generation == value.generation())
            else {
                debug_assert!(false, "stale handle #{} reached during mark", value.index());
                continue;
            };
            if slot.mark == epoch {
                continue;
            }
            slot.mark = epoch;
            marked += 1;

            match &slot.object {
                Some(Object::Cell(first, rest)) => worklist.extend([*first, *rest]),
                Some(Object::Proc { vars, body, env }) => worklist.extend([*vars, *body, *env]),
                _ => {}
            }
        }

        // Nil is a root of its own: every structure ends in it.
        self.slots[nil.index()].mark = epoch;
        marked
    }

    /// Frees every active slot not stamped with the current epoch.
    fn sweep(&mut self) -> (usize, usize) {
        let epoch = self.epoch;
        let (mut kept, mut swept) = (0, 0);

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_none() {
                continue;
            }
            if slot.mark == epoch {
                kept += 1;
                continue;
            }

            if let Some(object) = slot.object.take() {
                trace!("sweep #{} {:?}", index, object);
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
            swept += 1;
        }

        (kept, swept)
    }
}
