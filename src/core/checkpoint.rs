//! 检查点存储：按 thread_id 持久化对话状态
//!
//! save/load 以 thread_id 为键；文件实现一线程一 JSON 文件，写临时文件后 rename，
//! 单线程内写入原子、last-writer-wins。持久化失败不影响内存态——调用方收到
//! CheckpointError 自行提示，当前进程内的状态仍然权威。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use crate::state::ConversationState;

/// 持久化边界的错误：I/O 或序列化
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// 检查点存储接口
pub trait CheckpointStore: Send + Sync {
    fn save(&self, state: &ConversationState) -> Result<(), CheckpointError>;
    fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, CheckpointError>;
}

/// 内存实现（测试与一次性会话）
#[derive(Default)]
pub struct MemoryCheckpointStore {
    slots: Mutex<HashMap<String, ConversationState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, state: &ConversationState) -> Result<(), CheckpointError> {
        self.slots
            .lock()
            .unwrap()
            .insert(state.thread_id.clone(), state.clone());
        Ok(())
    }

    fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, CheckpointError> {
        Ok(self.slots.lock().unwrap().get(thread_id).cloned())
    }
}

/// 文件实现：{dir}/{thread_id}.json
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_thread_id(thread_id)))
    }
}

/// 文件名里只保留字母数字与 -_，其余替换为 _
fn sanitize_thread_id(thread_id: &str) -> String {
    thread_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, state: &ConversationState) -> Result<(), CheckpointError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&state.thread_id);
        let data = serde_json::to_string_pretty(state)?;
        // 写临时文件再 rename：单线程检查点原子可见
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, CheckpointError> {
        let path = self.path_for(thread_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }
}

impl FileCheckpointStore {
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Message;

    fn sample(thread_id: &str, marker: &str) -> ConversationState {
        let mut state = ConversationState::with_identity(thread_id, "sys");
        state.push_message(Message::user(marker));
        state
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.save(&sample("abc", "bonjour")).unwrap();
        let loaded = store.load("abc").unwrap().unwrap();
        assert_eq!(loaded.thread_id, "abc");
        assert_eq!(loaded.messages()[1].content, "bonjour");
    }

    #[test]
    fn test_missing_thread_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.load("nope").unwrap().is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.save(&sample("t", "premier")).unwrap();
        store.save(&sample("t", "second")).unwrap();
        let loaded = store.load("t").unwrap().unwrap();
        assert_eq!(loaded.messages()[1].content, "second");
    }

    #[test]
    fn test_thread_id_sanitized_for_filename() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save(&sample("a/b c", "x")).unwrap();
        assert!(store.load("a/b c").unwrap().is_some());
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryCheckpointStore::new();
        store.save(&sample("m", "salut")).unwrap();
        assert!(store.load("m").unwrap().is_some());
        assert!(store.load("autre").unwrap().is_none());
    }
}
