//! Splits one byte stream into two independently consumable branches.
//!
//! Whichever branch polls the upstream first receives the chunk and queues a
//! copy for its sibling. A branch that is dropped stops receiving copies; the
//! upstream is released once both branches are gone.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Wake, Waker};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::{ByteStream, FetchError};

type Chunk = Result<Bytes, FetchError>;

struct TeeState {
    upstream: Option<ByteStream>,
    queues: [VecDeque<Chunk>; 2],
    alive: [bool; 2],
}

/// Wakes every parked branch when the upstream makes progress.
#[derive(Default)]
struct BranchWakers {
    slots: Mutex<[Option<Waker>; 2]>,
}

impl BranchWakers {
    fn register(&self, index: usize, waker: &Waker) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match &slots[index] {
            Some(existing) if existing.will_wake(waker) => {}
            _ => slots[index] = Some(waker.clone()),
        }
    }

    fn wake_one(&self, index: usize) {
        let waker = self.slots.lock().unwrap_or_else(PoisonError::into_inner)[index].take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn clear(&self, index: usize) {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = None;
    }
}

impl Wake for BranchWakers {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let wakers: Vec<Waker> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        for waker in wakers {
            waker.wake();
        }
    }
}

struct TeeShared {
    state: Mutex<TeeState>,
    wakers: Arc<BranchWakers>,
}

struct Branch {
    shared: Arc<TeeShared>,
    index: usize,
}

impl Stream for Branch {
    type Item = Chunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let index = self.index;
        let sibling = 1 - index;
        let shared = &self.shared;
        let mut state = shared.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(chunk) = state.queues[index].pop_front() {
            return Poll::Ready(Some(chunk));
        }
        let Some(upstream) = state.upstream.as_mut() else {
            return Poll::Ready(None);
        };

        shared.wakers.register(index, cx.waker());
        let tee_waker = Waker::from(Arc::clone(&shared.wakers));
        let mut tee_cx = Context::from_waker(&tee_waker);

        match upstream.poll_next_unpin(&mut tee_cx) {
            Poll::Ready(Some(chunk)) => {
                if state.alive[sibling] {
                    state.queues[sibling].push_back(chunk.clone());
                    drop(state);
                    shared.wakers.wake_one(sibling);
                }
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => {
                state.upstream = None;
                drop(state);
                shared.wakers.wake_one(sibling);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Branch {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.alive[self.index] = false;
        state.queues[self.index].clear();
        if !state.alive[1 - self.index] {
            state.upstream = None;
        }
        drop(state);
        self.shared.wakers.clear(self.index);
    }
}

/// Splits `upstream` into two branches that each observe every chunk.
pub(crate) fn tee(upstream: ByteStream) -> (ByteStream, ByteStream) {
    let shared = Arc::new(TeeShared {
        state: Mutex::new(TeeState {
            upstream: Some(upstream),
            queues: [VecDeque::new(), VecDeque::new()],
            alive: [true, true],
        }),
        wakers: Arc::new(BranchWakers::default()),
    });
    let left = Branch {
        shared: Arc::clone(&shared),
        index: 0,
    };
    let right = Branch { shared, index: 1 };
    (left.boxed(), right.boxed())
}
