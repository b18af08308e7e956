//! # Shared Ownership Tests
//!
//! Release timing of `SharedPointer` aliases and manual counting on
//! `ReferenceCounter`, as the engine's intrusive structures use them.
//!
//! Run with: cargo test --package kiln_core --test shared_pointer_test

use std::cell::RefCell;
use std::rc::Rc;

use kiln_core::{List, MemoryError, ReferenceCounter, SharedPointer};

#[test]
fn release_runs_once_after_last_alias() {
    let released = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&released);

    let first = SharedPointer::with_release("atlas".to_string(), move |name| {
        sink.borrow_mut().push(name);
    });
    let second = first.clone();
    let third = second.clone();
    assert_eq!(first.ref_count(), 3);

    drop(first);
    drop(third);
    assert!(released.borrow().is_empty());

    drop(second);
    assert_eq!(*released.borrow(), vec!["atlas".to_string()]);
}

#[test]
fn lazy_slot_materialized_by_reseat() {
    let slot: SharedPointer<List<u32>> = SharedPointer::empty();
    let reader = slot.clone();
    assert_eq!(reader.get().err(), Some(MemoryError::NullDereference));

    let previous = slot.reseat((1..=3).collect()).unwrap();
    assert!(previous.is_none());
    assert_eq!(reader.get().unwrap().as_slice(), &[1, 2, 3]);

    reader.get_mut().unwrap().push_back(4);
    assert_eq!(slot.get().unwrap().count(), 4);
}

#[test]
fn reset_only_releases_sole_owner() {
    let released = Rc::new(RefCell::new(0));

    let counter = Rc::clone(&released);
    let mut owner = SharedPointer::with_release(1u8, move |_| *counter.borrow_mut() += 1);
    let alias = owner.clone();

    owner.reset(2);
    assert_eq!(*released.borrow(), 0);
    assert_eq!(*alias.get().unwrap(), 1);
    assert!(alias.is_unique());

    drop(alias);
    assert_eq!(*released.borrow(), 1);
    assert_eq!(*owner.get().unwrap(), 2);
}

/// An event node held both by a handler list and by an outside handle; it
/// stays alive until both let go.
#[test]
fn intrusive_counting() {
    let node = ReferenceCounter::new();
    let handle = node.clone();
    assert_eq!(node.count(), 2);

    // The handler list takes an extra, non-handle reference.
    node.increment();
    assert_eq!(handle.count(), 3);

    assert_eq!(node.decrement(), Ok(2));
    drop(handle);
    assert_eq!(node.count(), 1);
    assert!(node.is_unique());

    assert_eq!(node.decrement(), Ok(0));
    assert_eq!(node.decrement(), Err(MemoryError::CounterUnderflow));
}
