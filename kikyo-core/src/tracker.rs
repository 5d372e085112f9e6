//! ネイティブ識別子をキーにしたコレクション
//!
//! モジュール・スレッド・AppDomain・ステッパー・評価はすべて
//! ネイティブ側のトークンで引かれます。見つからないのはプログラミングエラーなので
//! `NotFound` で失敗させます。

use crate::{DebuggerError, Result};
use indexmap::map::Entry;
use indexmap::IndexMap;
use std::fmt::Display;
use std::hash::Hash;

/// トークンをキーにした挿入順のコレクション
#[derive(Debug)]
pub struct Tracker<K, V> {
    kind: &'static str,
    entries: IndexMap<K, V>,
}

impl<K, V> Tracker<K, V>
where
    K: Copy + Eq + Hash + Display,
{
    /// `kind` は見つからなかったときのエラーに使う名前
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> &mut V {
        let index = self.entries.insert_full(key, value).0;
        &mut self.entries[index]
    }

    /// 引けなければ `f` で作って登録する。登録したかどうかも返す
    pub fn get_or_insert_with(&mut self, key: K, f: impl FnOnce() -> V) -> (&mut V, bool) {
        match self.entries.entry(key) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => (entry.insert(f()), true),
        }
    }

    pub fn get(&self, key: K) -> Result<&V> {
        self.entries
            .get(&key)
            .ok_or_else(|| DebuggerError::not_found(self.kind, key))
    }

    pub fn get_mut(&mut self, key: K) -> Result<&mut V> {
        let kind = self.kind;
        self.entries
            .get_mut(&key)
            .ok_or_else(|| DebuggerError::not_found(kind, key))
    }

    pub fn remove(&mut self, key: K) -> Result<V> {
        self.entries
            .shift_remove(&key)
            .ok_or_else(|| DebuggerError::not_found(self.kind, key))
    }

    pub fn contains(&self, key: K) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.entries.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// すべて取り出す（挿入順）
    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.entries.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kikyo_target::ModuleToken;

    #[test]
    fn test_lookup_and_not_found() {
        let mut tracker: Tracker<ModuleToken, &str> = Tracker::new("module");
        tracker.insert(ModuleToken(2), "b");
        tracker.insert(ModuleToken(1), "a");

        assert_eq!(*tracker.get(ModuleToken(1)).unwrap(), "a");
        assert_eq!(tracker.keys().collect::<Vec<_>>(), vec![ModuleToken(2), ModuleToken(1)]);

        let err = tracker.get(ModuleToken(9)).unwrap_err();
        assert_eq!(err.to_string(), "module not found: 9");

        assert_eq!(tracker.remove(ModuleToken(2)).unwrap(), "b");
        assert!(tracker.remove(ModuleToken(2)).is_err());
        assert_eq!(tracker.len(), 1);
    }
}
