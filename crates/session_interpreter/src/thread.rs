use threadpool::ThreadPool;

/// The worker pool an engine owns for its whole lifetime.
pub struct ThreadCtx {
    pub tp: ThreadPool,
}

pub struct Scope<'a> {
    tp: &'a ThreadPool,
}

impl<'a> Scope<'a> {
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'a,
    {
        // SAFETY: `ThreadCtx::scope` joins the pool before returning, so nothing spawned here
        // outlives the borrows it captures.
        let f = unsafe {
            std::mem::transmute::<Box<dyn FnOnce() + Send + 'a>, Box<dyn FnOnce() + Send + 'static>>(
                Box::new(f),
            )
        };
        self.tp.execute(f)
    }
}

impl ThreadCtx {
    pub fn new() -> Self {
        Self::new_with_num_threads(1)
    }

    pub fn new_with_num_threads(n: usize) -> Self {
        Self {
            tp: ThreadPool::new(n.max(1)),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.tp.max_count()
    }

    /// Runs `f`, then blocks until every task it spawned has finished.
    pub fn scope<F>(&self, mut f: F)
    where
        F: FnMut(&Scope),
    {
        let scope = Scope { tp: &self.tp };
        f(&scope);
        self.tp.join();
    }

    /// Splits `len` items into at most `num_threads()` contiguous chunks.
    pub fn chunk_len(&self, len: usize) -> usize {
        ((len + self.num_threads() - 1) / self.num_threads()).max(1)
    }
}

impl Default for ThreadCtx {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn scope_joins_all_tasks() {
    let tctx = ThreadCtx::new_with_num_threads(4);
    let mut data = vec![0usize; 1000];
    let chunk = tctx.chunk_len(data.len());
    tctx.scope(|scope| {
        for (i, part) in data.chunks_mut(chunk).enumerate() {
            scope.spawn(move || part.iter_mut().for_each(|x| *x = i + 1));
        }
    });
    assert!(data.iter().all(|&x| x > 0));
    assert_eq!(tctx.num_threads(), 4);
    assert_eq!(tctx.chunk_len(0), 1);
}
