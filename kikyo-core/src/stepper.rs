//! ステッパー管理

use crate::tracker::Tracker;
use kikyo_target::{StepKind, StepperToken, ThreadToken};

/// 進行中のステップ操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stepper {
    token: StepperToken,
    thread: ThreadToken,
    kind: StepKind,
    /// 停止で上書きされたステップ。完了しても停止しない
    ignore: bool,
}

impl Stepper {
    pub fn new(token: StepperToken, thread: ThreadToken, kind: StepKind) -> Self {
        Self {
            token,
            thread,
            kind,
            ignore: false,
        }
    }

    pub fn token(&self) -> StepperToken {
        self.token
    }

    pub fn thread(&self) -> ThreadToken {
        self.thread
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn is_ignored(&self) -> bool {
        self.ignore
    }
}

pub type StepperCollection = Tracker<StepperToken, Stepper>;

impl Tracker<StepperToken, Stepper> {
    /// すべてのステッパーを無視対象にし、無視対象になったトークンを返す
    pub(crate) fn ignore_all(&mut self) -> Vec<StepperToken> {
        self.values_mut()
            .filter(|s| !s.ignore)
            .map(|s| {
                s.ignore = true;
                s.token
            })
            .collect()
    }

    /// スレッドに紐づくステッパーを取り除く
    pub(crate) fn remove_for_thread(&mut self, thread: ThreadToken) -> Vec<Stepper> {
        let tokens: Vec<StepperToken> = self
            .values()
            .filter(|s| s.thread == thread)
            .map(|s| s.token)
            .collect();
        tokens
            .into_iter()
            .filter_map(|token| self.remove(token).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_all_marks_once() {
        let mut steppers = StepperCollection::new("stepper");
        steppers.insert(
            StepperToken(1),
            Stepper::new(StepperToken(1), ThreadToken(1), StepKind::Over),
        );
        steppers.insert(
            StepperToken(2),
            Stepper::new(StepperToken(2), ThreadToken(2), StepKind::Into),
        );

        assert_eq!(steppers.ignore_all(), vec![StepperToken(1), StepperToken(2)]);
        assert!(steppers.ignore_all().is_empty());
        assert!(steppers.get(StepperToken(1)).unwrap().is_ignored());
    }

    #[test]
    fn test_remove_for_thread() {
        let mut steppers = StepperCollection::new("stepper");
        steppers.insert(
            StepperToken(1),
            Stepper::new(StepperToken(1), ThreadToken(5), StepKind::Out),
        );
        let removed = steppers.remove_for_thread(ThreadToken(5));
        assert_eq!(removed.len(), 1);
        assert!(steppers.is_empty());
    }
}
