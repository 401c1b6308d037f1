//! # Handler arena
//!
//! Every typed handle points at a record in its file's arena. A record knows
//! its parent record, the description it was created for and its ordinal
//! among siblings of that description, which together form its logical
//! path. Records are found again either through the tree node's cache slot
//! or through the path map.
//!
//! Invalidated records are retired and their slots handed out again later.
//! A slot's generation moves on each time it is reused, so an id taken
//! before that no longer resolves.

use crate::declaration::TypeKey;
use crate::description::{ChildDescription, DescriptionKey};
use crate::dynamic::DynamicGenericInfo;
use crate::name::EvaluatedXmlName;
use crate::strategy::ParentStrategy;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId {
    index: u32,
    generation: u32,
}

impl HandlerId {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Packed into a tree node's cache slot: generation high, index low
    pub(crate) fn to_slot(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub(crate) fn from_slot(slot: u64) -> Self {
        Self {
            index: slot as u32,
            generation: (slot >> 32) as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Root,
    Element,
    Attribute,
}

/// File state a record was last reconciled with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Stamp {
    pub modification_count: u64,
    pub tree_epoch: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ChildKey {
    pub parent: HandlerId,
    pub description: DescriptionKey,
    pub ordinal: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct HandlerRecord {
    pub kind: HandlerKind,
    /// Declared type; attribute handles have none
    pub type_key: Option<TypeKey>,
    pub parent: Option<HandlerId>,
    pub description: Option<Arc<ChildDescription>>,
    pub name: EvaluatedXmlName,
    pub ordinal: usize,
    pub strategy: ParentStrategy,
    pub stamp: Stamp,
    /// Set once the handle can never become valid again
    pub invalid: Option<String>,
    pub dynamic: Option<Arc<DynamicGenericInfo>>,
}

impl HandlerRecord {
    pub fn description_key(&self) -> Option<DescriptionKey> {
        self.description.as_ref().map(|d| d.key())
    }

    pub fn child_key(&self) -> Option<ChildKey> {
        Some(ChildKey {
            parent: self.parent?,
            description: self.description_key()?,
            ordinal: self.ordinal,
        })
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    vacant: bool,
    record: HandlerRecord,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct HandlerArena {
    slots: Vec<Slot>,
    by_path: HashMap<ChildKey, HandlerId>,
    retired: Vec<HandlerId>,
    free: Vec<u32>,
}

impl HandlerArena {
    pub fn insert(&mut self, record: HandlerRecord) -> HandlerId {
        let key = record.child_key();
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.vacant = false;
                slot.record = record;
                HandlerId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    vacant: false,
                    record,
                });
                HandlerId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        if let Some(key) = key {
            self.by_path.insert(key, id);
        }
        id
    }

    fn slot(&self, id: HandlerId) -> Option<&Slot> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation && !slot.vacant)
    }

    pub fn get(&self, id: HandlerId) -> Option<&HandlerRecord> {
        self.slot(id).map(|slot| &slot.record)
    }

    pub fn get_mut(&mut self, id: HandlerId) -> Option<&mut HandlerRecord> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation && !slot.vacant)
            .map(|slot| &mut slot.record)
    }

    /// Whether `id` pointed at a record whose slot has since been reclaimed
    pub fn is_discarded(&self, id: HandlerId) -> bool {
        id.index() < self.slots.len() && self.slot(id).is_none()
    }

    pub fn by_path(&self, key: &ChildKey) -> Option<HandlerId> {
        self.by_path.get(key).copied()
    }

    /// Move a record to a new ordinal, keeping the path map in step
    pub fn set_ordinal(&mut self, id: HandlerId, ordinal: usize) {
        let Some(record) = self.get_mut(id) else {
            return;
        };
        record.ordinal = ordinal;
        if let Some(key) = record.child_key() {
            self.by_path.insert(key, id);
        }
    }

    /// Drop the path entry of an invalidated record, if it still owns it
    pub fn forget_path(&mut self, id: HandlerId) {
        let Some(key) = self.get(id).and_then(|r| r.child_key()) else {
            return;
        };
        if self.by_path.get(&key) == Some(&id) {
            self.by_path.remove(&key);
        }
    }

    /// Queue an invalidated record for reclamation
    pub fn retire(&mut self, id: HandlerId) {
        self.retired.push(id);
    }

    pub fn take_retired(&mut self) -> Vec<HandlerId> {
        std::mem::take(&mut self.retired)
    }

    /// Live records whose parent is one of `parents`
    pub fn children_of_any(&self, parents: &[HandlerId]) -> Vec<HandlerId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.vacant)
            .filter(|(_, slot)| slot.record.parent.is_some_and(|p| parents.contains(&p)))
            .map(|(index, slot)| HandlerId {
                index: index as u32,
                generation: slot.generation,
            })
            .filter(|id| !parents.contains(id))
            .collect()
    }

    /// Hand a retired record's slot back for reuse
    pub fn release(&mut self, id: HandlerId) {
        let Some(slot) = self.slots.get_mut(id.index()) else {
            return;
        };
        if slot.generation == id.generation && !slot.vacant {
            slot.vacant = true;
            self.free.push(id.index);
        }
    }

    /// Slots in the arena, reclaimed ones included
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::XmlName;

    fn record(parent: Option<HandlerId>) -> HandlerRecord {
        HandlerRecord {
            kind: HandlerKind::Element,
            type_key: Some(TypeKey::new("Item")),
            parent,
            description: None,
            name: EvaluatedXmlName::evaluate(XmlName::new("item"), None),
            ordinal: 0,
            strategy: ParentStrategy::Virtual,
            stamp: Stamp::default(),
            invalid: None,
            dynamic: None,
        }
    }

    #[test]
    fn test_released_slot_is_reused_under_new_generation() {
        let mut arena = HandlerArena::default();
        let root = arena.insert(record(None));
        let child = arena.insert(record(Some(root)));

        arena.release(child);
        assert!(arena.is_discarded(child));
        assert!(arena.get(child).is_none());

        let reused = arena.insert(record(Some(root)));
        assert_eq!(reused.index(), child.index());
        assert_ne!(reused, child);
        assert!(arena.get(reused).is_some());
        assert!(arena.get(child).is_none());
        assert_eq!(arena.len(), 2);
        assert_eq!(HandlerId::from_slot(reused.to_slot()), reused);
    }

    #[test]
    fn test_children_of_released_parents() {
        let mut arena = HandlerArena::default();
        let root = arena.insert(record(None));
        let child = arena.insert(record(Some(root)));
        let grandchild = arena.insert(record(Some(child)));

        assert_eq!(arena.children_of_any(&[child]), vec![grandchild]);
        assert_eq!(arena.children_of_any(&[child, grandchild]), Vec::<HandlerId>::new());
        assert!(!arena.is_discarded(root));
    }
}
