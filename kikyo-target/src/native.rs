//! ネイティブデバッグインターフェースの境界
//!
//! デバッガエンジンはOSのデバッグ機能をこのトレイト群を通してだけ使います。
//! ネイティブオブジェクトの同一性は安定した整数トークンで表し、
//! コールバックは [`EventSink`] に渡される [`NativeEvent`] として届きます。

use crate::NativeResult;
use kikyo_dwarf::SymbolReader;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

macro_rules! native_token {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

native_token!(
    /// モジュールの同一性
    ModuleToken
);
native_token!(
    /// スレッドの同一性（ptraceではtid）
    ThreadToken
);
native_token!(
    /// アプリケーションドメインの同一性
    AppDomainToken
);
native_token!(
    /// ステップ操作の同一性
    StepperToken
);
native_token!(
    /// 評価の同一性
    EvalToken
);
native_token!(
    /// ネイティブブレークポイントの同一性
    NativeBreakpointToken
);

/// ネイティブインターフェースのプロトコルバージョン
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// メジャーバージョン1と2のランタイム向け
    V2,
    /// メジャーバージョン4以降のランタイム向け
    V4,
}

impl ProtocolVersion {
    /// ランタイムのバージョン文字列（例: "v2.0.50727"）からプロトコルを選ぶ
    ///
    /// メジャーバージョンが読めない場合は新しい方を使います。
    pub fn for_runtime(version: &str) -> Self {
        let major = version
            .trim()
            .trim_start_matches(|c: char| c == 'v' || c == 'V')
            .split('.')
            .next()
            .and_then(|m| m.parse::<u32>().ok());

        match major {
            Some(1) | Some(2) => ProtocolVersion::V2,
            _ => ProtocolVersion::V4,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V2 => write!(f, "v2.0"),
            ProtocolVersion::V4 => write!(f, "v4.0"),
        }
    }
}

/// 次の continue でスレッドを走らせるかどうか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Run,
    Suspend,
}

/// ステップの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// 1命令
    Instruction,
    /// 呼び出しの中に入る
    Into,
    /// 呼び出しを飛び越える
    Over,
    /// 現在の関数から抜ける
    Out,
}

/// プロセス起動要求
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub working_dir: PathBuf,
    pub args: Vec<String>,
}

/// 関数評価の要求（評価の意味論はバックエンドに任せる）
#[derive(Debug, Clone, Default)]
pub struct EvalRequest {
    pub function: u64,
    pub args: Vec<u64>,
}

/// ネイティブコールバック
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    ProcessCreated,
    AppDomainCreated {
        appdomain: AppDomainToken,
        name: String,
    },
    AppDomainExited {
        appdomain: AppDomainToken,
    },
    ModuleLoaded {
        module: ModuleToken,
        appdomain: AppDomainToken,
        name: String,
        path: Option<PathBuf>,
        base: u64,
    },
    ModuleUnloaded {
        module: ModuleToken,
    },
    ThreadCreated {
        thread: ThreadToken,
    },
    ThreadExited {
        thread: ThreadToken,
    },
    BreakpointHit {
        thread: ThreadToken,
        breakpoint: NativeBreakpointToken,
    },
    StepComplete {
        thread: ThreadToken,
        stepper: StepperToken,
    },
    Exception {
        thread: ThreadToken,
        description: String,
        unhandled: bool,
    },
    /// デバッグ対象が自分で停止を要求した
    Break {
        thread: ThreadToken,
    },
    LogMessage {
        level: i32,
        category: String,
        message: String,
    },
    EvalComplete {
        eval: EvalToken,
        value: Vec<u8>,
    },
    EvalException {
        eval: EvalToken,
        description: String,
    },
    /// OS側で状態が変わった。詳細は [`NativeProcess::collect_events`] で取り出す
    StateChanged,
    ProcessExited {
        exit_code: i32,
    },
}

/// コールバックの配送先
///
/// バックエンドは任意のスレッドからイベントを投げてよい。
/// 受け取った側（エンジン）が所有スレッドへ中継する。
#[derive(Clone)]
pub struct EventSink(Arc<dyn Fn(u32, NativeEvent) + Send + Sync>);

impl EventSink {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(u32, NativeEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// プロセス `pid` のイベントを配送する
    pub fn post(&self, pid: u32, event: NativeEvent) {
        (self.0)(pid, event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}

/// ネイティブデバッグインターフェース（セッションにつき1つ開く）
pub trait NativeDebugInterface {
    /// カーネルレベルのデバッガが有効か
    fn kernel_debugger_enabled(&self) -> bool;

    /// 実行ファイルが要求するランタイムのバージョン
    fn runtime_version(&self, program: &Path) -> Option<String>;

    /// 実行ファイルからバージョンが分からないときに仮定するバージョン
    fn default_runtime_version(&self) -> String;

    /// 実行中プロセスのメイン実行ファイル
    fn executable_of(&self, pid: u32) -> Option<PathBuf>;

    fn initialize(
        &mut self,
        protocol: ProtocolVersion,
        runtime_version: &str,
        sink: EventSink,
    ) -> NativeResult<()>;

    fn terminate(&mut self) -> NativeResult<()>;

    /// 一時停止状態でプロセスを起動する
    fn create_process(&mut self, request: &LaunchRequest) -> NativeResult<Box<dyn NativeProcess>>;

    fn attach(&mut self, pid: u32) -> NativeResult<Box<dyn NativeProcess>>;
}

/// ネイティブプロセス
///
/// 所有スレッドからだけ呼ばれる。
pub trait NativeProcess {
    fn id(&self) -> u32;

    /// 即座に停止させる（停止するまで戻らない）
    fn stop(&mut self) -> NativeResult<()>;

    /// 実行を再開する。保留中のコールバックがあれば再開せずにそれを配送する
    fn resume(&mut self) -> NativeResult<()>;

    /// 終了させる。終了は `ProcessExited` コールバックで通知される
    fn terminate(&mut self, exit_code: i32) -> NativeResult<()>;

    fn detach(&mut self) -> NativeResult<()>;

    /// 読めた分だけ `buffer` に書き、そのバイト数を返す
    fn read_memory(&mut self, address: u64, buffer: &mut [u8]) -> NativeResult<usize>;

    /// 書けたバイト数を返す
    fn write_memory(&mut self, address: u64, data: &[u8]) -> NativeResult<usize>;

    fn set_thread_state(&mut self, thread: ThreadToken, state: ThreadState) -> NativeResult<()>;

    /// 無効状態のブレークポイントを作る
    fn create_breakpoint(
        &mut self,
        module: ModuleToken,
        address: u64,
    ) -> NativeResult<NativeBreakpointToken>;

    fn activate_breakpoint(&mut self, breakpoint: NativeBreakpointToken, active: bool)
        -> NativeResult<()>;

    fn create_stepper(&mut self, thread: ThreadToken, kind: StepKind) -> NativeResult<StepperToken>;

    fn is_stepper_active(&self, stepper: StepperToken) -> bool;

    fn deactivate_stepper(&mut self, stepper: StepperToken) -> NativeResult<()>;

    /// 評価を開始する。結果は `EvalComplete`/`EvalException` で届く
    fn create_eval(&mut self, thread: ThreadToken, request: &EvalRequest) -> NativeResult<EvalToken>;

    /// モジュールのシンボルを読み込む（無ければ `None`）
    fn load_symbols(
        &mut self,
        module: ModuleToken,
        search_paths: &[PathBuf],
    ) -> Option<Box<dyn SymbolReader>>;

    /// `StateChanged` を受けたときに呼ばれ、配送すべきコールバックを返す
    fn collect_events(&mut self) -> NativeResult<Vec<NativeEvent>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_for_runtime() {
        assert_eq!(ProtocolVersion::for_runtime("v1.1.4322"), ProtocolVersion::V2);
        assert_eq!(ProtocolVersion::for_runtime("v2.0.50727"), ProtocolVersion::V2);
        assert_eq!(ProtocolVersion::for_runtime("v4.0.30319"), ProtocolVersion::V4);
        assert_eq!(ProtocolVersion::for_runtime("v10.0"), ProtocolVersion::V4);
        assert_eq!(ProtocolVersion::for_runtime("2.1"), ProtocolVersion::V2);
        assert_eq!(ProtocolVersion::for_runtime(""), ProtocolVersion::V4);
    }

    #[test]
    fn test_event_sink_forwards() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            EventSink::new(move |pid, event| seen.lock().push((pid, event)))
        };
        sink.post(7, NativeEvent::ProcessCreated);
        assert_eq!(seen.lock().as_slice(), &[(7, NativeEvent::ProcessCreated)]);
    }
}
