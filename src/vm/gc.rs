// Cycle collector for reference-counted heap objects
//
// Values are freed by `Rc` as soon as nothing points at them. What
// reference counting cannot reclaim is a cycle (an array that contains
// itself, a block stored in a local of the environment it closes over,
// two objects pointing at each other). The heap keeps a weak handle to
// every container that can take part in a cycle; a collection marks
// everything reachable from the roots and empties the containers that
// are still alive but unreachable, which lets their counts drop to zero.

use super::value::{Class, Env, Method, Object, ProcBody, RHash, Value};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

const INITIAL_THRESHOLD: usize = 10000;
const HEAP_GROW_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Containers ever registered
    pub total_tracked: usize,
    /// Unreachable containers emptied
    pub cycles_broken: usize,
    /// Containers registered right now, dead ones included until the next cleanup
    pub tracked_count: usize,
    pub collections: usize,
}

/// Address of the tracked allocation
pub type ObjectId = usize;

#[derive(Clone)]
pub enum TrackedObject {
    Array(Weak<RefCell<Vec<Value>>>),
    Hash(Weak<RefCell<RHash>>),
    Object(Weak<RefCell<Object>>),
    Env(Weak<Env>),
}

impl TrackedObject {
    pub fn is_alive(&self) -> bool {
        match self {
            TrackedObject::Array(w) => w.strong_count() > 0,
            TrackedObject::Hash(w) => w.strong_count() > 0,
            TrackedObject::Object(w) => w.strong_count() > 0,
            TrackedObject::Env(w) => w.strong_count() > 0,
        }
    }

    /// Drop every reference held by the container
    pub fn clear_contents(&self) {
        match self {
            TrackedObject::Array(w) => {
                if let Some(rc) = w.upgrade() {
                    rc.borrow_mut().clear();
                }
            }
            TrackedObject::Hash(w) => {
                if let Some(rc) = w.upgrade() {
                    let mut hash = rc.borrow_mut();
                    hash.clear();
                    hash.default = Value::Nil;
                }
            }
            TrackedObject::Object(w) => {
                if let Some(rc) = w.upgrade() {
                    rc.borrow_mut().ivars.clear();
                }
            }
            TrackedObject::Env(w) => {
                if let Some(env) = w.upgrade() {
                    for slot in env.slots.borrow_mut().iter_mut() {
                        *slot = Value::Nil;
                    }
                }
            }
        }
    }
}

/// Something the mutator holds directly
#[derive(Clone)]
pub enum Root {
    Value(Value),
    Env(Rc<Env>),
    Class(Rc<Class>),
}

pub struct GcHeap {
    tracked: FxHashMap<ObjectId, TrackedObject>,
    threshold: usize,
    pub stats: GcStats,
}

impl GcHeap {
    pub fn new() -> Self {
        Self {
            tracked: FxHashMap::default(),
            threshold: INITIAL_THRESHOLD,
            stats: GcStats::default(),
        }
    }

    pub fn should_collect(&self) -> bool {
        self.tracked.len() > self.threshold
    }

    fn track(&mut self, id: ObjectId, object: TrackedObject) {
        if self.tracked.get(&id).is_some_and(TrackedObject::is_alive) {
            return;
        }
        self.tracked.insert(id, object);
        self.stats.total_tracked += 1;
        self.stats.tracked_count = self.tracked.len();
    }

    pub fn track_array(&mut self, array: &Rc<RefCell<Vec<Value>>>) {
        let id = Rc::as_ptr(array) as *const () as ObjectId;
        self.track(id, TrackedObject::Array(Rc::downgrade(array)));
    }

    pub fn track_hash(&mut self, hash: &Rc<RefCell<RHash>>) {
        let id = Rc::as_ptr(hash) as *const () as ObjectId;
        self.track(id, TrackedObject::Hash(Rc::downgrade(hash)));
    }

    pub fn track_object(&mut self, object: &Rc<RefCell<Object>>) {
        let id = Rc::as_ptr(object) as *const () as ObjectId;
        self.track(id, TrackedObject::Object(Rc::downgrade(object)));
    }

    pub fn track_env(&mut self, env: &Rc<Env>) {
        let id = Rc::as_ptr(env) as *const () as ObjectId;
        self.track(id, TrackedObject::Env(Rc::downgrade(env)));
    }

    /// Run a full collection; returns the number of containers emptied
    pub fn collect(&mut self, roots: Vec<Root>) -> usize {
        self.cleanup_dead();
        let reachable = mark_from_roots(roots);

        let mut broken = 0;
        for (id, object) in &self.tracked {
            if !reachable.contains(id) && object.is_alive() {
                object.clear_contents();
                broken += 1;
            }
        }

        self.stats.cycles_broken += broken;
        self.cleanup_dead();
        self.stats.collections += 1;

        let new_threshold = (self.tracked.len() as f64 * HEAP_GROW_FACTOR) as usize;
        self.threshold = new_threshold.max(INITIAL_THRESHOLD);
        broken
    }

    /// Forget containers that reference counting already freed
    fn cleanup_dead(&mut self) {
        self.tracked.retain(|_, obj| obj.is_alive());
        self.stats.tracked_count = self.tracked.len();
    }

    /// Empty every live container; used when the owning context shuts down
    pub fn clear_all(&mut self) {
        for object in self.tracked.values() {
            object.clear_contents();
        }
        self.tracked.clear();
        self.stats.tracked_count = 0;
    }

    pub fn get_stats(&self) -> GcStats {
        self.stats
    }
}

impl Default for GcHeap {
    fn default() -> Self {
        Self::new()
    }
}

/// Addresses of everything reachable from the roots
fn mark_from_roots(roots: Vec<Root>) -> FxHashSet<ObjectId> {
    let mut reachable = FxHashSet::default();
    let mut worklist = roots;

    while let Some(root) = worklist.pop() {
        match root {
            Root::Value(value) => mark_value(value, &mut reachable, &mut worklist),
            Root::Env(env) => {
                if !reachable.insert(Rc::as_ptr(&env) as *const () as ObjectId) {
                    continue;
                }
                for slot in env.slots.borrow().iter() {
                    worklist.push(Root::Value(slot.clone()));
                }
                if let Some(parent) = &env.parent {
                    worklist.push(Root::Env(parent.clone()));
                }
            }
            Root::Class(class) => {
                if !reachable.insert(Rc::as_ptr(&class) as *const () as ObjectId) {
                    continue;
                }
                mark_class(&class, &mut worklist);
            }
        }
    }

    reachable
}

fn mark_value(value: Value, reachable: &mut FxHashSet<ObjectId>, worklist: &mut Vec<Root>) {
    if let Value::Class(class) = value {
        worklist.push(Root::Class(class));
        return;
    }
    let id = value.identity();
    if id == 0 || !reachable.insert(id) {
        return;
    }
    match value {
        Value::Array(items) => {
            worklist.extend(items.borrow().iter().cloned().map(Root::Value));
        }
        Value::Hash(hash) => {
            let hash = hash.borrow();
            for (key, value) in hash.iter() {
                worklist.push(Root::Value(key.clone()));
                worklist.push(Root::Value(value.clone()));
            }
            worklist.push(Root::Value(hash.default.clone()));
        }
        Value::Object(object) => {
            let object = object.borrow();
            worklist.push(Root::Class(object.class.clone()));
            worklist.extend(object.ivars.values().cloned().map(Root::Value));
        }
        Value::Proc(proc) => {
            if let ProcBody::Block {
                env,
                self_value,
                cref,
                outer_block,
                ..
            } = &proc.body
            {
                worklist.push(Root::Env(env.clone()));
                worklist.push(Root::Value(self_value.clone()));
                worklist.push(Root::Value(outer_block.clone()));
                worklist.push(Root::Class(cref.class.clone()));
            }
        }
        _ => {}
    }
}

fn mark_class(class: &Rc<Class>, worklist: &mut Vec<Root>) {
    worklist.extend(class.constants.borrow().values().cloned().map(Root::Value));
    worklist.extend(class.ivars.borrow().values().cloned().map(Root::Value));
    for table in [&class.methods, &class.singleton_methods] {
        for method in table.borrow().values() {
            if let Method::User { cref, .. } = method {
                worklist.push(Root::Class(cref.class.clone()));
            }
        }
    }
    for module in class.includes.borrow().iter().chain(class.extends.borrow().iter()) {
        worklist.push(Root::Class(module.clone()));
    }
    if let Some(superclass) = &class.superclass {
        worklist.push(Root::Class(superclass.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(values: Vec<Value>) -> Rc<RefCell<Vec<Value>>> {
        Rc::new(RefCell::new(values))
    }

    #[test]
    fn test_gc_new() {
        let gc = GcHeap::new();
        assert_eq!(gc.stats.total_tracked, 0);
        assert_eq!(gc.stats.collections, 0);
        assert!(!gc.should_collect());
    }

    #[test]
    fn test_gc_cleanup_dead() {
        let mut gc = GcHeap::new();
        {
            let arr = array(Vec::new());
            gc.track_array(&arr);
        }
        assert_eq!(gc.tracked.len(), 1);
        gc.cleanup_dead();
        assert_eq!(gc.tracked.len(), 0);
    }

    #[test]
    fn test_collect_breaks_unreachable_cycle() {
        let mut gc = GcHeap::new();
        let arr = array(Vec::new());
        arr.borrow_mut().push(Value::Array(arr.clone()));
        gc.track_array(&arr);
        let weak = Rc::downgrade(&arr);
        drop(arr);
        assert!(weak.upgrade().is_some());

        let broken = gc.collect(Vec::new());
        assert_eq!(broken, 1);
        assert!(weak.upgrade().is_none());
        assert_eq!(gc.stats.collections, 1);
        assert_eq!(gc.stats.tracked_count, 0);
    }

    #[test]
    fn test_collect_keeps_rooted_cycle() {
        let mut gc = GcHeap::new();
        let arr = array(Vec::new());
        arr.borrow_mut().push(Value::Array(arr.clone()));
        gc.track_array(&arr);

        let broken = gc.collect(vec![Root::Value(Value::Array(arr.clone()))]);
        assert_eq!(broken, 0);
        assert_eq!(arr.borrow().len(), 1);
        arr.borrow_mut().clear();
    }

    #[test]
    fn test_values_reachable_through_env_survive() {
        let mut gc = GcHeap::new();
        let inner = array(vec![Value::Integer(1)]);
        gc.track_array(&inner);
        let env = Rc::new(Env::new(1, None));
        env.slots.borrow_mut()[0] = Value::Array(inner.clone());
        gc.track_env(&env);

        gc.collect(vec![Root::Env(env.clone())]);
        assert_eq!(inner.borrow().len(), 1);
    }
}
