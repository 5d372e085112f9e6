//! 関数評価の追跡

use crate::tracker::Tracker;
use kikyo_target::{EvalToken, ThreadToken};

/// 評価の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalOutcome {
    /// 戻り値の生バイト列
    Value(Vec<u8>),
    /// 評価中に例外が起きた
    Exception(String),
}

/// 実行中の評価
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    token: EvalToken,
    thread: ThreadToken,
    outcome: Option<EvalOutcome>,
}

impl Evaluation {
    pub fn new(token: EvalToken, thread: ThreadToken) -> Self {
        Self {
            token,
            thread,
            outcome: None,
        }
    }

    pub fn token(&self) -> EvalToken {
        self.token
    }

    pub fn thread(&self) -> ThreadToken {
        self.thread
    }

    pub fn outcome(&self) -> Option<&EvalOutcome> {
        self.outcome.as_ref()
    }

    pub(crate) fn complete(&mut self, outcome: EvalOutcome) {
        self.outcome = Some(outcome);
    }
}

pub type EvalCollection = Tracker<EvalToken, Evaluation>;

impl Tracker<EvalToken, Evaluation> {
    /// 完了していない評価があるか
    pub fn is_evaluating(&self) -> bool {
        self.values().any(|e| e.outcome.is_none())
    }
}
