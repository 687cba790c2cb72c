use std::sync::Arc;

use anyhow::Result;
use rand::Rng;

use stratadb::index::hash::ExtendibleHashIndex;

mod common;
use common::{create_test_buffer_pool, init_logging};

// based on the size of a (i32, i32) bucket page
const MAX_ELEMENTS_PER_BUCKET: usize = 496;

#[test]
fn test_insert_and_get() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let index = ExtendibleHashIndex::<i32, i32>::new(buffer_pool)?;

    // insert a few values
    for i in 0..5 {
        assert!(index.insert(None, &i, &i)?);
        let mut result = Vec::new();
        assert!(index.get_value(None, &i, &mut result)?);
        assert_eq!(vec![i], result);
    }

    index.verify_integrity()?;

    // check that the inserted values are all there
    for i in 0..5 {
        let mut result = Vec::new();
        assert!(index.get_value(None, &i, &mut result)?);
        assert_eq!(vec![i], result);
    }

    // insert one more value for each key
    for i in 0..5 {
        if i == 0 {
            // duplicate values for the same key are not allowed
            assert!(!index.insert(None, &i, &(2 * i))?);
        } else {
            assert!(index.insert(None, &i, &(2 * i))?);
        }
        let mut result = Vec::new();
        index.get_value(None, &i, &mut result)?;
        if i == 0 {
            assert_eq!(vec![0], result);
        } else {
            result.sort();
            assert_eq!(vec![i, 2 * i], result);
        }
    }

    index.verify_integrity()?;

    // look for a key that does not exist
    let mut result = Vec::new();
    assert!(!index.get_value(None, &20, &mut result)?);
    assert!(result.is_empty());

    // delete some values
    for i in 0..5 {
        assert!(index.remove(None, &i, &i)?);
        let mut result = Vec::new();
        index.get_value(None, &i, &mut result)?;
        if i == 0 {
            // (0, 0) was the only pair under key 0
            assert!(result.is_empty());
        } else {
            assert_eq!(vec![2 * i], result);
        }
    }

    index.verify_integrity()?;

    // delete the rest
    for i in 0..5 {
        if i == 0 {
            // (0, 0) has already been removed
            assert!(!index.remove(None, &i, &(2 * i))?);
        } else {
            assert!(index.remove(None, &i, &(2 * i))?);
        }
    }

    index.verify_integrity()?;
    Ok(())
}

#[test]
fn test_split_insert_and_merge() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let index = ExtendibleHashIndex::<i32, i32>::new(buffer_pool)?;

    // insert 5x the bucket capacity, which must split at least twice
    let factor = 5;
    let mut key = 0i32;
    for round in 0..factor {
        for _ in 0..MAX_ELEMENTS_PER_BUCKET {
            assert!(index.insert(None, &key, &key)?);
            key += 1;
        }
        let stats = index.verify_integrity()?;
        assert_eq!((round + 1) * MAX_ELEMENTS_PER_BUCKET, stats.size);
    }
    assert!(index.global_depth()? >= 3);

    // spot-check reads after all the splitting
    for probe in [0, 7, 495, 496, 1000, factor as i32 * 496 - 1] {
        let mut result = Vec::new();
        assert!(index.get_value(None, &probe, &mut result)?);
        assert_eq!(vec![probe], result);
    }

    // remove everything again
    for round in 0..factor {
        for _ in 0..MAX_ELEMENTS_PER_BUCKET {
            key -= 1;
            assert!(index.remove(None, &key, &key)?);
        }
        let stats = index.verify_integrity()?;
        assert_eq!(
            (factor - round - 1) * MAX_ELEMENTS_PER_BUCKET,
            stats.size
        );
    }

    // the table goes back to its initial form
    assert_eq!(0, index.global_depth()?);
    let stats = index.verify_integrity()?;
    assert_eq!(0, stats.size);
    assert_eq!(1, stats.num_buckets);
    Ok(())
}

#[test]
fn test_directory_saturation() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(256)?;
    let index = ExtendibleHashIndex::<i32, i32>::new(buffer_pool)?;

    // insert until the directory is full and a split is refused
    let mut key = 0i32;
    loop {
        if !index.insert(None, &key, &key)? {
            break;
        }
        key += 1;
        if key as usize % 30000 == 0 {
            index.verify_integrity()?;
        }
    }
    let inserted = key;
    assert!(inserted as usize > MAX_ELEMENTS_PER_BUCKET);
    index.verify_integrity()?;

    // remove every key again
    for i in (0..inserted).rev() {
        assert!(index.remove(None, &i, &i)?);
    }

    // the table goes back to its initial form with one bucket left
    assert_eq!(0, index.global_depth()?);
    let stats = index.verify_integrity()?;
    assert_eq!(0, stats.size);
    assert_eq!(1, stats.num_buckets);
    Ok(())
}

#[test]
fn test_multi_thread_mixed_workload() -> Result<()> {
    init_logging();
    let (buffer_pool, _temp_file) = create_test_buffer_pool(128)?;
    let index = Arc::new(ExtendibleHashIndex::<i32, i32>::new(buffer_pool)?);

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let index = index.clone();
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for i in 0..10_000 {
                    let key = rng.gen_range(0..20_000);
                    if rng.gen_bool(0.5) {
                        let _ = index.insert(None, &key, &key).unwrap();
                    } else {
                        let _ = index.remove(None, &key, &key).unwrap();
                    }
                    if (i + 1) % 5_000 == 0 {
                        index.verify_integrity().unwrap();
                    }
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    index.verify_integrity()?;
    Ok(())
}

#[test]
fn test_thrashing_buffer_pool() -> Result<()> {
    init_logging();
    // a tiny pool forces the index through its retry path
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;

    let mut pranker_ids = Vec::new();
    for _ in 0..2 {
        let (_, page_id) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(page_id, false)?;
        pranker_ids.push(page_id);
    }

    let prankers: Vec<_> = pranker_ids
        .into_iter()
        .map(|page_id| {
            let buffer_pool = buffer_pool.clone();
            std::thread::spawn(move || {
                for _ in 0..8 {
                    let page = match buffer_pool.fetch_page(page_id) {
                        Ok(page) => page,
                        Err(_) => continue,
                    };
                    assert_eq!(page_id, page.id());
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    buffer_pool.unpin_page(page_id, false).unwrap();
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
            })
        })
        .collect();

    let index = ExtendibleHashIndex::<i32, i32>::new(buffer_pool.clone())?;
    for i in 0..8 {
        if i % 2 == 0 {
            let _ = index.insert(None, &i, &i)?;
        } else {
            let _ = index.remove(None, &i, &i)?;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    for pranker in prankers {
        pranker.join().unwrap();
    }
    index.verify_integrity()?;
    Ok(())
}
