//! Live heap usage across repeated generation. Kept in its own test binary
//! so no other test allocates concurrently.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicIsize, Ordering};

use lbmgen::solver::GeneratorConfig;
use lbmgen_ir::{BoundarySpec, StreamingSpec};

struct Counting;

static LIVE: AtomicIsize = AtomicIsize::new(0);

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        LIVE.fetch_add(layout.size() as isize, Ordering::SeqCst);
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        LIVE.fetch_sub(layout.size() as isize, Ordering::SeqCst);
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static ALLOCATOR: Counting = Counting;

#[test]
fn repeated_generation_releases_its_trees() {
    let config = GeneratorConfig {
        boundaries: vec![
            BoundarySpec::bounce_back(1).unwrap(),
            BoundarySpec::outlet(vec![1, 0]).unwrap(),
            BoundarySpec::outlet(vec![0, -1]).unwrap(),
        ],
        streaming: StreamingSpec::standard_masked(),
        ..GeneratorConfig::default()
    };
    let generator = config.build().unwrap();
    let first = generator.generate().unwrap();
    drop(first);

    let before = LIVE.load(Ordering::SeqCst);
    for _ in 0..50 {
        let buffers = generator.generate().unwrap();
        assert!(!buffers["node"].is_empty());
    }
    let after = LIVE.load(Ordering::SeqCst);
    assert!(
        after - before < 4096,
        "live heap grew by {} bytes over 50 generations",
        after - before
    );
}
