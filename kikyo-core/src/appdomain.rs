//! AppDomain 管理

use crate::tracker::Tracker;
use kikyo_target::AppDomainToken;

/// モジュールをまとめる実行ドメイン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDomain {
    token: AppDomainToken,
    name: String,
    /// モジュールがロードされるたびに進む。キャッシュした解析結果の世代に使う
    compilation_generation: u64,
}

impl AppDomain {
    pub fn new(token: AppDomainToken, name: String) -> Self {
        Self {
            token,
            name,
            compilation_generation: 0,
        }
    }

    pub fn token(&self) -> AppDomainToken {
        self.token
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compilation_generation(&self) -> u64 {
        self.compilation_generation
    }

    /// キャッシュしたコンパイル単位を無効にする
    pub(crate) fn invalidate_compilation(&mut self) {
        self.compilation_generation += 1;
    }
}

pub type AppDomainCollection = Tracker<AppDomainToken, AppDomain>;
