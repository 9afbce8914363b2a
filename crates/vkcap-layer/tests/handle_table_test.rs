//! Handle table tests: create/lookup/erase symmetry, desync detection,
//! idempotent queries, creation ordering and concurrent access.

use std::sync::Arc;
use std::thread;

use ash::vk;
use ash::vk::Handle;
use vkcap_core::{HandleKey, HandleType};
use vkcap_layer::{key_of, HandleTable, ObjectState, TrackingError};

fn buffer(raw: u64) -> HandleKey {
    HandleKey::new(HandleType::Buffer, raw)
}

#[test]
fn test_create_lookup_erase() {
    let table = HandleTable::new();
    let device = HandleKey::new(HandleType::Device, 0xd0);

    table.create(buffer(0x10), Some(device)).unwrap();
    assert!(table.contains(buffer(0x10)));
    assert_eq!(table.len(), 1);

    {
        let shadow = table.lookup(buffer(0x10)).unwrap();
        assert_eq!(shadow.value().key(), buffer(0x10));
        assert_eq!(shadow.handle_type(), HandleType::Buffer);
        assert_eq!(shadow.parent(), Some(device));
        assert!(shadow.create_info().is_none());
    }

    let erased = table.erase(buffer(0x10)).unwrap();
    assert_eq!(erased.raw(), 0x10);
    assert!(table.lookup(buffer(0x10)).is_none());
    assert!(table.is_empty());
}

#[test]
fn test_same_raw_value_different_types() {
    let table = HandleTable::new();
    table.create(buffer(0x42), None).unwrap();
    table
        .create(HandleKey::new(HandleType::Image, 0x42), None)
        .unwrap();

    assert_eq!(table.len(), 2);
    assert_eq!(table.count_of(HandleType::Buffer), 1);
    assert_eq!(table.count_of(HandleType::Image), 1);
}

#[test]
fn test_double_create_is_rejected() {
    let table = HandleTable::new();
    table.create(buffer(0x10), None).unwrap();

    let err = table.create(buffer(0x10), None).err().unwrap();
    assert_eq!(
        err,
        TrackingError::AlreadyTracked {
            key: buffer(0x10),
            op: "create"
        }
    );
    assert_eq!(table.len(), 1);
}

#[test]
fn test_erase_missing_is_rejected() {
    let table = HandleTable::new();
    let err = table.erase(buffer(0x99)).unwrap_err();
    assert_eq!(
        err,
        TrackingError::NotTracked {
            key: buffer(0x99),
            op: "erase"
        }
    );
    assert_eq!(err.with_op("destroy_buffer").to_string(), "destroy_buffer: buffer(0x99) is not tracked");
}

#[test]
fn test_get_or_create_is_idempotent() {
    let table = HandleTable::new();
    let queue = HandleKey::new(HandleType::Queue, 0x50);

    let first = {
        let mut shadow = table.get_or_create(queue, None);
        shadow.set_state(ObjectState::Queue {
            family_index: 0,
            queue_index: 1,
        });
        shadow.id()
    };
    let second = table.get_or_create(queue, None).id();

    assert_eq!(first, second);
    assert_eq!(table.len(), 1);
    assert_eq!(
        *table.lookup(queue).unwrap().state(),
        ObjectState::Queue {
            family_index: 0,
            queue_index: 1
        }
    );
}

#[test]
fn test_creation_order_and_children() {
    let table = HandleTable::new();
    let pool = HandleKey::new(HandleType::CommandPool, 0x7);

    for raw in [0x30, 0x10, 0x20] {
        table
            .create(HandleKey::new(HandleType::CommandBuffer, raw), Some(pool))
            .unwrap();
    }
    table.create(buffer(0x5), Some(pool)).unwrap();

    let children = table.children_of(pool, HandleType::CommandBuffer);
    let raws: Vec<u64> = children.iter().map(|k| k.raw).collect();
    assert_eq!(raws, vec![0x30, 0x10, 0x20]);

    assert_eq!(table.dependents_of(pool).len(), 4);

    let ids: Vec<u64> = table.live_objects().iter().map(|r| r.id.0).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_lookup_by_typed_handle() {
    let table = HandleTable::new();
    let fence = vk::Fence::from_raw(0xfe);
    table.create(key_of(fence), None).unwrap();

    assert!(table.contains_handle(fence));
    assert!(!table.contains_handle(vk::Semaphore::from_raw(0xfe)));
    assert_eq!(table.lookup_handle(fence).unwrap().raw(), 0xfe);
}

#[test]
fn test_concurrent_create_and_erase() {
    let table = Arc::new(HandleTable::new());
    let threads: Vec<_> = (0..8u64)
        .map(|t| {
            let table = table.clone();
            thread::spawn(move || {
                for i in 0..500u64 {
                    let key = buffer(t * 10_000 + i + 1);
                    table.create(key, None).unwrap();
                    assert!(table.lookup(key).is_some());
                    if i % 2 == 0 {
                        table.erase(key).unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    assert_eq!(table.len(), 8 * 250);
    assert_eq!(table.keys_of(HandleType::Buffer).len(), 8 * 250);
}

#[test]
fn test_racing_creates_of_one_key() {
    let table = Arc::new(HandleTable::new());
    let key = buffer(0xabc);
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let table = table.clone();
            thread::spawn(move || table.create(key, None).is_ok())
        })
        .collect();
    let winners = threads
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();

    assert_eq!(winners, 1);
    assert_eq!(table.len(), 1);
}
