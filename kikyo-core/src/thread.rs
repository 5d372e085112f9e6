//! スレッド管理

use crate::tracker::Tracker;
use kikyo_target::{StepperToken, ThreadToken};

/// デバッグ対象のスレッド
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    token: ThreadToken,
    /// ユーザーが止めたスレッドは既定の実行集合から外れる
    suspended: bool,
    current_step: Option<StepperToken>,
}

impl Thread {
    pub fn new(token: ThreadToken) -> Self {
        Self {
            token,
            suspended: false,
            current_step: None,
        }
    }

    pub fn token(&self) -> ThreadToken {
        self.token
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub(crate) fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    /// 進行中のステップ操作
    pub fn current_step(&self) -> Option<StepperToken> {
        self.current_step
    }

    pub(crate) fn set_current_step(&mut self, stepper: Option<StepperToken>) {
        self.current_step = stepper;
    }
}

pub type ThreadCollection = Tracker<ThreadToken, Thread>;

impl Tracker<ThreadToken, Thread> {
    /// スレッドを引く。未登録なら登録してから返す
    ///
    /// ネイティブ側はスレッド生成を報告し損ねることがあるため、
    /// スレッドだけは見つからなくても失敗させない。
    pub(crate) fn get_or_synthesize(&mut self, token: ThreadToken) -> &mut Thread {
        let (thread, inserted) = self.get_or_insert_with(token, || Thread::new(token));
        if inserted {
            tracing::warn!("thread {} was never reported; registering it now", token);
        }
        thread
    }

    /// ユーザーが止めていないスレッド
    pub fn unsuspended(&self) -> Vec<ThreadToken> {
        self.values()
            .filter(|t| !t.is_suspended())
            .map(|t| t.token())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_synthesizes_missing_thread() {
        let mut threads = ThreadCollection::new("thread");
        threads.insert(ThreadToken(1), Thread::new(ThreadToken(1)));

        let thread = threads.get_or_synthesize(ThreadToken(7));
        assert_eq!(thread.token(), ThreadToken(7));
        assert_eq!(threads.len(), 2);

        // 既存のものはそのまま
        threads.get_mut(ThreadToken(1)).unwrap().set_suspended(true);
        assert!(threads.get_or_synthesize(ThreadToken(1)).is_suspended());
        assert_eq!(threads.len(), 2);
    }

    #[test]
    fn test_unsuspended_threads() {
        let mut threads = ThreadCollection::new("thread");
        for t in 1..=3 {
            threads.insert(ThreadToken(t), Thread::new(ThreadToken(t)));
        }
        threads.get_mut(ThreadToken(2)).unwrap().set_suspended(true);
        assert_eq!(threads.unsuspended(), vec![ThreadToken(1), ThreadToken(3)]);
    }
}
