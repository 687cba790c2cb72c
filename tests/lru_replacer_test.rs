use stratadb::storage::buffer::LruReplacer;

#[test]
fn test_sample_scenario() {
    let replacer = LruReplacer::new(7);

    // unpin six frames, i.e. add them to the replacer
    replacer.unpin(1);
    replacer.unpin(2);
    replacer.unpin(3);
    replacer.unpin(4);
    replacer.unpin(5);
    replacer.unpin(6);
    // re-unpinning is a no-op
    replacer.unpin(1);
    assert_eq!(6, replacer.size());

    // three victims come out oldest first
    assert_eq!(Some(1), replacer.victim());
    assert_eq!(Some(2), replacer.victim());
    assert_eq!(Some(3), replacer.victim());

    // 3 has already been victimized, so pinning it has no effect
    replacer.pin(3);
    replacer.pin(4);
    assert_eq!(2, replacer.size());

    replacer.unpin(4);

    assert_eq!(Some(5), replacer.victim());
    assert_eq!(Some(6), replacer.victim());
    assert_eq!(Some(4), replacer.victim());

    // the replacer is drained
    assert_eq!(None, replacer.victim());
}

#[test]
fn test_overflow() {
    let replacer = LruReplacer::new(2);

    replacer.unpin(0);
    replacer.unpin(1);
    // frame 3 is out of range for a 2-frame pool
    replacer.unpin(3);

    assert_eq!(2, replacer.size());
}

#[test]
fn test_invalid_ids_ignored() {
    let replacer = LruReplacer::new(3);
    replacer.unpin(1);
    replacer.unpin(3);

    assert_eq!(1, replacer.size());

    replacer.pin(0);
    replacer.pin(3);
    replacer.pin(1);

    assert_eq!(0, replacer.size());
}

#[test]
fn test_multi_thread_pin_unpin() {
    use std::sync::Arc;

    let replacer = Arc::new(LruReplacer::new(1024));

    let unpinners: Vec<_> = (0..4)
        .map(|chunk| {
            let replacer = replacer.clone();
            std::thread::spawn(move || {
                for frame_id in (chunk * 256)..((chunk + 1) * 256) {
                    replacer.unpin(frame_id);
                }
            })
        })
        .collect();
    for thread in unpinners {
        thread.join().unwrap();
    }
    assert_eq!(1024, replacer.size());

    let pinners: Vec<_> = (0..4)
        .map(|chunk| {
            let replacer = replacer.clone();
            std::thread::spawn(move || {
                for frame_id in (chunk * 256)..((chunk + 1) * 256) {
                    replacer.pin(frame_id);
                }
            })
        })
        .collect();
    for thread in pinners {
        thread.join().unwrap();
    }
    assert_eq!(0, replacer.size());

    // victims drain an empty replacer to None
    assert_eq!(None, replacer.victim());
}
