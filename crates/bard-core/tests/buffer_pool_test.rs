use bard_core::{BufferPool, PoolError};
use bard_ports::types::{BufferId, PcmBuffer};
use pretty_assertions::assert_eq;

fn assert_balanced(pool: &BufferPool) {
    assert_eq!(pool.available() + pool.checked_out(), pool.capacity());
}

#[test]
fn warm_pool_hands_out_every_buffer_once() {
    let mut pool = BufferPool::new(4, 128, 2, 44_100);
    assert_eq!(pool.available(), 4);
    assert_balanced(&pool);

    let mut taken = Vec::new();
    while let Some(buffer) = pool.acquire() {
        assert_eq!(buffer.len(), 256);
        assert_eq!(buffer.channels(), 2);
        taken.push(buffer);
        assert_balanced(&pool);
    }

    assert_eq!(taken.len(), 4);
    assert!(pool.acquire().is_none());
    let mut slots: Vec<usize> = taken.iter().map(|buffer| buffer.id().slot).collect();
    slots.sort_unstable();
    assert_eq!(slots, vec![0, 1, 2, 3]);

    for buffer in taken {
        pool.release(buffer).expect("release checked-out buffer");
        assert_balanced(&pool);
    }
    assert_eq!(pool.available(), 4);
}

#[test]
fn releasing_a_buffer_twice_fails() {
    let mut pool = BufferPool::new(2, 16, 1, 44_100);
    let buffer = pool.acquire().expect("buffer");
    let id = buffer.id();
    pool.release(buffer).expect("first release");

    let forged = PcmBuffer::new(id, 16, 1, 44_100);
    assert_eq!(
        pool.release(forged),
        Err(PoolError::DoubleRelease {
            pool: id.pool,
            slot: id.slot
        })
    );
    assert_eq!(pool.available(), 2);
    assert_balanced(&pool);
}

#[test]
fn release_without_acquire_fails() {
    let mut pool = BufferPool::new(2, 16, 1, 44_100);
    let stranger = PcmBuffer::new(
        BufferId {
            pool: pool.id(),
            slot: 0,
        },
        16,
        1,
        44_100,
    );
    assert!(matches!(
        pool.release(stranger),
        Err(PoolError::DoubleRelease { .. })
    ));
    assert_balanced(&pool);
}

#[test]
fn buffers_from_another_pool_are_rejected() {
    let mut a = BufferPool::new(1, 8, 2, 44_100);
    let mut b = BufferPool::new(1, 8, 2, 44_100);
    assert_ne!(a.id(), b.id());

    let from_a = a.acquire().expect("buffer from a");
    let _from_b = b.acquire().expect("buffer from b");
    assert!(matches!(
        b.release(from_a),
        Err(PoolError::DoubleRelease { .. })
    ));
    assert_eq!(a.checked_out(), 1);
    assert_eq!(b.checked_out(), 1);
    assert_balanced(&a);
    assert_balanced(&b);
}
