mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use anyhow::Result;
use common::{embedding_of, frame, frontal, World};
use facetrack::{Embedding, Error, IdentityStore};

const THREADS: usize = 16;

#[test]
fn concurrent_match_or_add_creates_one_identity() {
    let store = Arc::new(IdentityStore::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // All within 0.6 of each other.
                let probe = Embedding::from_vec(vec![1.0, i as f32 * 0.01, 0.0]);
                barrier.wait();
                store.match_or_add(probe, "unknown", 0.6).unwrap()
            })
        })
        .collect();

    let resolutions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(store.len(), 1);
    assert_eq!(resolutions.iter().filter(|r| r.is_created()).count(), 1);
    let id = resolutions[0].identity().id;
    assert!(resolutions.iter().all(|r| r.identity().id == id));
}

#[test]
fn concurrent_enrollment_of_one_face() {
    let world = World::new(vec![vec![frontal(1, 100.0, 100.0)]]);
    let engine = Arc::new(world.engine());
    let barrier = Arc::new(Barrier::new(THREADS));

    let results: Vec<_> = (0..THREADS)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.enroll(&frame(0), &format!("user-{}", i))
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, Error::AlreadyRegistered { .. })));
    assert_eq!(engine.identity_count(), 1);
}

#[test]
fn sessions_share_one_catalog() -> Result<()> {
    // Scene i shows person i+1 alone; every session watches every scene.
    let scenes = (0..4u8)
        .map(|i| vec![frontal(i + 1, 100.0 + 200.0 * i as f32, 100.0)])
        .collect();
    let world = World::new(scenes);
    let engine = Arc::new(world.engine());

    thread::scope(|s| {
        for session in 0..THREADS {
            let engine = Arc::clone(&engine);
            s.spawn(move || {
                let id = format!("cam-{}", session);
                for scene in 0..4u8 {
                    let faces = engine.process_frame(&id, &frame(scene)).unwrap();
                    assert_eq!(faces.len(), 1);
                    assert!(faces[0].identity_id.is_some());
                }
            });
        }
    });

    assert_eq!(engine.identity_count(), 4);
    for person in 1..=4u8 {
        assert!(engine
            .store()
            .find(&embedding_of(person), 0.6)?
            .is_some());
    }
    Ok(())
}

#[test]
fn readers_see_consistent_catalog_during_writes() {
    let store = Arc::new(IdentityStore::new());
    store.add(Embedding::from_vec(vec![0.0, 0.0]), "seed").unwrap();

    thread::scope(|s| {
        for w in 0..4 {
            let store = Arc::clone(&store);
            s.spawn(move || {
                for k in 0..25 {
                    let v = Embedding::from_vec(vec![10.0 + w as f32 * 100.0 + k as f32, 0.0]);
                    store.add(v, "writer").unwrap();
                }
            });
        }
        for _ in 0..4 {
            let store = Arc::clone(&store);
            s.spawn(move || {
                for _ in 0..100 {
                    let seed = store
                        .find(&Embedding::from_vec(vec![0.0, 0.0]), 0.0)
                        .unwrap()
                        .expect("seed is always present");
                    assert_eq!(seed.name, "seed");
                }
            });
        }
    });

    assert_eq!(store.len(), 101);
}
