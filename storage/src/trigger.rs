//! Before/after insert / store / delete / load hooks a caller can attach
//! to a `Storage<T>` (spec §4.4 `add_trigger`/`remove_trigger`: "dispatching
//! before/after insert/update/delete/load"). Kept as plain boxed closures
//! behind a mutex rather than an async-event-bus — triggers run
//! synchronously, inline with the operation that fired them, and a
//! `Before*` hook may return an error to veto it. `After*` and `AfterLoad`
//! hooks run once the operation has already taken effect and their errors
//! still propagate to the caller, but can no longer undo anything.

use parking_lot::Mutex;

use common::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerId(pub u64);

pub enum TriggerEvent<'a, T> {
    BeforeInsert(&'a T),
    AfterInsert(&'a T),
    BeforeStore { old: Option<&'a T>, new: &'a T },
    AfterStore { old: Option<&'a T>, new: &'a T },
    BeforeDelete(&'a T),
    AfterDelete(&'a T),
    BeforeLoad { key: &'a [u8] },
    AfterLoad { key: &'a [u8], value: &'a T },
}

pub type TriggerFn<T> = Box<dyn Fn(&TriggerEvent<'_, T>) -> StoreResult<()> + Send + Sync>;

pub struct Triggers<T> {
    next_id: Mutex<u64>,
    hooks: Mutex<Vec<(TriggerId, TriggerFn<T>)>>,
}

impl<T> Default for Triggers<T> {
    fn default() -> Self {
        Self {
            next_id: Mutex::new(1),
            hooks: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Triggers<T> {
    pub fn add(&self, hook: TriggerFn<T>) -> TriggerId {
        let mut next = self.next_id.lock();
        let id = TriggerId(*next);
        *next += 1;
        self.hooks.lock().push((id, hook));
        id
    }

    pub fn remove(&self, id: TriggerId) -> bool {
        let mut hooks = self.hooks.lock();
        let before = hooks.len();
        hooks.retain(|(hid, _)| *hid != id);
        hooks.len() != before
    }

    pub fn fire(&self, event: &TriggerEvent<'_, T>) -> StoreResult<()> {
        for (_, hook) in self.hooks.lock().iter() {
            hook(event)?;
        }
        Ok(())
    }
}
