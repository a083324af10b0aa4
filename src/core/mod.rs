//! 核心编排层：错误、状态机、检查点、会话任务与中断管理

pub mod checkpoint;
pub mod error;
pub mod graph;
pub mod session;
pub mod supervisor;

pub use checkpoint::{CheckpointError, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use error::AgentError;
pub use graph::{Orchestrator, Phase, TurnOptions, TurnResult, DEFAULT_MAX_ITERATIONS};
pub use session::{
    create_llm_from_config, create_session, Command, SessionConfigView, SessionHandle,
    TurnSummary, DEFAULT_THREAD_ID,
};
pub use supervisor::SessionSupervisor;
