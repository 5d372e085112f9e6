//! kikyo でデバッグするための簡単なサンプルプログラム
//! ブレークポイント、ステップ実行、スレッド一覧の確認に使います。

use std::thread;
use std::time::Duration;

/// 数値を2倍にする
fn double(x: i32) -> i32 {
    let result = x * 2;
    println!("double({}) = {}", x, result);
    result
}

/// 2つの値を加算する
fn add(a: i32, b: i32) -> i32 {
    let result = a + b;
    println!("add({}, {}) = {}", a, b, result);
    result
}

fn compute(x: i32, y: i32) -> i32 {
    let doubled_x = double(x);
    let doubled_y = double(y);
    add(doubled_x, doubled_y)
}

/// ワーカースレッドで少し重い計算をする
fn heavy(id: usize) -> u64 {
    let mut acc = 0u64;
    for i in 0..10_000u64 {
        acc = acc.wrapping_add(i * i);
    }
    thread::sleep(Duration::from_millis(50));
    println!("worker {} done", id);
    acc
}

fn main() {
    println!("=== Kikyo Simple Target ===");
    println!("pid: {}", std::process::id());

    let result = compute(5, 10);

    let workers: Vec<_> = (0..4).map(|id| thread::spawn(move || heavy(id))).collect();
    for worker in workers {
        let _ = worker.join();
    }

    // attach を試すために少し待つ
    if std::env::args().any(|arg| arg == "--wait") {
        thread::sleep(Duration::from_secs(30));
    }

    println!("Final result: {}", result);
    println!("Expected: (5*2) + (10*2) = 10 + 20 = 30");
}
