//! デバッガコマンド

use crate::breakpoint::BreakpointId;
use crate::parse::{parse_address, parse_location, parse_number, Location, ParseError};
use kikyo_target::StepKind;

/// デバッガコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// ブレークポイントを設定
    Break(Location),
    /// ブレークポイントを削除
    Delete(BreakpointId),
    /// ブレークポイントを有効化
    Enable(BreakpointId),
    /// ブレークポイントを無効化
    Disable(BreakpointId),
    /// 実行継続
    Continue,
    /// 実行中のプロセスを止める
    Pause,
    /// ステップ実行
    Step(StepKind),
    /// 指定位置まで実行
    RunTo(Location),
    /// スレッド一覧表示
    Threads,
    /// モジュール一覧表示
    Modules,
    /// ブレークポイント一覧表示
    Breakpoints,
    /// メモリ表示
    Examine { address: u64, len: usize },
    /// デタッチ
    Detach,
    /// プロセスを終了させる
    Kill,
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Command {
    /// コマンド文字列をパースする
    ///
    /// 空行や知らないコマンドは `Ok(None)`、引数が不正なら `Err`。
    pub fn parse(input: &str) -> Result<Option<Self>, ParseError> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        let Some(&name) = parts.first() else {
            return Ok(None);
        };
        let arg = |i: usize| parts.get(i).copied().unwrap_or("");

        let command = match name {
            "break" | "b" => {
                if parts.len() < 2 {
                    return Ok(None);
                }
                Command::Break(parse_location(&parts[1..].join(" "))?)
            }
            "delete" | "d" => Command::Delete(parse_number(arg(1))?),
            "enable" => Command::Enable(parse_number(arg(1))?),
            "disable" => Command::Disable(parse_number(arg(1))?),
            "continue" | "c" => Command::Continue,
            "pause" | "interrupt" => Command::Pause,
            "step" | "s" => match arg(1) {
                "" | "in" | "into" => Command::Step(StepKind::Into),
                "over" => Command::Step(StepKind::Over),
                "out" => Command::Step(StepKind::Out),
                "insn" | "i" => Command::Step(StepKind::Instruction),
                _ => return Ok(None),
            },
            "next" | "n" => Command::Step(StepKind::Over),
            "finish" | "f" => Command::Step(StepKind::Out),
            "runto" | "until" => Command::RunTo(parse_location(arg(1))?),
            "threads" => Command::Threads,
            "modules" => Command::Modules,
            "bps" | "breakpoints" => Command::Breakpoints,
            "x" => Command::Examine {
                address: parse_address(arg(1))?,
                len: if parts.len() > 2 { parse_number(arg(2))? } else { 16 },
            },
            "detach" => Command::Detach,
            "kill" => Command::Kill,
            "help" | "h" | "?" => Command::Help,
            "quit" | "q" | "exit" => Command::Quit,
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("continue"), Ok(Some(Command::Continue)));
        assert_eq!(Command::parse("c"), Ok(Some(Command::Continue)));
        assert_eq!(Command::parse("pause"), Ok(Some(Command::Pause)));
        assert_eq!(Command::parse("step"), Ok(Some(Command::Step(StepKind::Into))));
        assert_eq!(Command::parse("step over"), Ok(Some(Command::Step(StepKind::Over))));
        assert_eq!(Command::parse("s insn"), Ok(Some(Command::Step(StepKind::Instruction))));
        assert_eq!(Command::parse("quit"), Ok(Some(Command::Quit)));
        assert_eq!(Command::parse("   "), Ok(None));
        assert_eq!(Command::parse("frobnicate"), Ok(None));
    }

    #[test]
    fn test_parse_breakpoint_commands() {
        assert_eq!(
            Command::parse("b main.rs:10"),
            Ok(Some(Command::Break(Location {
                file: "main.rs".to_string(),
                line: 10,
                column: 0
            })))
        );
        assert_eq!(Command::parse("delete 3"), Ok(Some(Command::Delete(3))));
        assert_eq!(Command::parse("disable 2"), Ok(Some(Command::Disable(2))));
        assert!(Command::parse("enable x").is_err());
        assert!(Command::parse("break main.rs").is_err());
    }

    #[test]
    fn test_parse_examine() {
        assert_eq!(
            Command::parse("x 0x1000 8"),
            Ok(Some(Command::Examine {
                address: 0x1000,
                len: 8
            }))
        );
        assert_eq!(
            Command::parse("x 0x20"),
            Ok(Some(Command::Examine {
                address: 0x20,
                len: 16
            }))
        );
        assert!(Command::parse("x").is_err());
    }
}
