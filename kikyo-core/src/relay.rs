//! スレッド間コール中継
//!
//! ネイティブデバッグインターフェースは1つの所有スレッドからしか呼べません。
//! 他のスレッド（UIやワーカー、ネイティブの監視スレッド）はこのキューに処理を積み、
//! 所有スレッドが `wait_for_call` / `perform_all_calls` で順番に実行します。
//!
//! キューは FIFO なので、`call` で積んだ処理はそれより前に届いた
//! ネイティブコールバックがすべて処理されてから実行されます。

use crate::{DebuggerError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

type Call<T> = Box<dyn FnOnce(&mut T) + Send>;

struct Queue<T> {
    calls: VecDeque<Call<T>>,
    closed: bool,
}

/// 所有スレッド上の `T` に対する処理を中継するキュー
pub struct CallRelay<T> {
    queue: Mutex<Queue<T>>,
    available: Condvar,
    owner: ThreadId,
}

impl<T> CallRelay<T> {
    /// 現在のスレッドを所有スレッドとして中継を作る
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                calls: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            owner: thread::current().id(),
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_owning_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// 処理を積んで戻る（結果は待たない）
    pub fn async_call<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        let mut queue = self.queue.lock();
        if queue.closed {
            return Err(DebuggerError::RelayClosed);
        }
        queue.calls.push_back(Box::new(f));
        drop(queue);
        self.available.notify_all();
        Ok(())
    }

    /// 処理を積み、所有スレッドが実行し終えるまで待って結果を返す
    ///
    /// 所有スレッド自身から呼ぶと決して実行されないのでエラーにする。
    pub fn call<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_owning_thread() {
            return Err(DebuggerError::CalledFromOwningThread);
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.async_call(move |target| {
            let _ = tx.send(f(target));
        })?;
        // 実行されずに捨てられた場合は送信側が落ちる
        rx.recv().map_err(|_| DebuggerError::RelayClosed)
    }

    /// 処理が1つ以上積まれるまで待つ
    ///
    /// 中継が閉じられた場合は `false` を返す。
    pub fn wait_for_call(&self) -> bool {
        let mut queue = self.queue.lock();
        while queue.calls.is_empty() && !queue.closed {
            self.available.wait(&mut queue);
        }
        !queue.calls.is_empty()
    }

    /// 時間制限付きの `wait_for_call`。時間切れはエラーではなく `false`
    pub fn wait_for_call_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();
        while queue.calls.is_empty() && !queue.closed {
            if self.available.wait_until(&mut queue, deadline).timed_out() {
                break;
            }
        }
        !queue.calls.is_empty()
    }

    /// 積まれている処理をすべて実行する。実行中に積まれたものも含む
    pub fn perform_all_calls(&self, target: &mut T) -> usize {
        let mut performed = 0;
        loop {
            // ロックを持ったまま実行すると中で積めなくなる
            let call = self.queue.lock().calls.pop_front();
            match call {
                Some(call) => {
                    call(target);
                    performed += 1;
                }
                None => break,
            }
        }
        performed
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().calls.len()
    }

    /// 中継を閉じる。積まれていた処理は捨てられ、待っている呼び出し側はエラーになる
    pub fn close(&self) {
        let dropped = {
            let mut queue = self.queue.lock();
            queue.closed = true;
            std::mem::take(&mut queue.calls)
        };
        self.available.notify_all();
        if !dropped.is_empty() {
            tracing::debug!("relay closed with {} pending call(s)", dropped.len());
        }
    }
}

impl<T> Default for CallRelay<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_calls_run_in_order() {
        let relay = CallRelay::<Vec<u32>>::new();
        for i in 0..3 {
            relay.async_call(move |v| v.push(i)).unwrap();
        }
        let mut target = Vec::new();
        assert_eq!(relay.perform_all_calls(&mut target), 3);
        assert_eq!(target, vec![0, 1, 2]);
        assert_eq!(relay.pending(), 0);
    }

    #[test]
    fn test_call_from_owner_is_rejected() {
        let relay = CallRelay::<u32>::new();
        assert!(matches!(
            relay.call(|v| *v),
            Err(DebuggerError::CalledFromOwningThread)
        ));
    }

    #[test]
    fn test_call_from_other_thread_returns_result() {
        let relay = Arc::new(CallRelay::<u32>::new());
        let caller = {
            let relay = relay.clone();
            thread::spawn(move || relay.call(|v| *v * 2))
        };

        let mut target = 21;
        while relay.pending() == 0 {
            relay.wait_for_call_timeout(Duration::from_millis(50));
        }
        relay.perform_all_calls(&mut target);
        assert_eq!(caller.join().unwrap().unwrap(), 42);
    }

    #[test]
    fn test_wait_timeout_without_calls() {
        let relay = CallRelay::<u32>::new();
        let start = Instant::now();
        assert!(!relay.wait_for_call_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_close_fails_waiting_callers() {
        let relay = Arc::new(CallRelay::<u32>::new());
        let caller = {
            let relay = relay.clone();
            thread::spawn(move || relay.call(|v| *v))
        };
        while relay.pending() == 0 {
            relay.wait_for_call_timeout(Duration::from_millis(50));
        }
        relay.close();
        assert!(matches!(
            caller.join().unwrap(),
            Err(DebuggerError::RelayClosed)
        ));
        assert!(relay.async_call(|_| {}).is_err());
        assert!(!relay.wait_for_call());
    }
}
