//! Scheduler 单元测试
//!
//! 测试任务、执行池、限流、批量收集与任务管理器

mod pool;
mod rate_limit;

use crate::runtime::scheduler::{ManagerState, TaskId, TaskIdGenerator, TaskState};

/// Error type used to check that callers get the original error back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub(super) struct CustomError(pub String);

#[cfg(test)]
mod task_id_tests {
    use super::*;

    #[test]
    fn test_task_id_generator_is_sequential() {
        let generator = TaskIdGenerator::new();
        assert_eq!(generator.next(), TaskId(0));
        assert_eq!(generator.next(), TaskId(1));
        assert_eq!(generator.next().inner(), 2);
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId(5).to_string(), "Task(5)");
        assert_eq!(usize::from(TaskId(9)), 9);
        assert_eq!(TaskId::from(3), TaskId(3));
    }
}

#[cfg(test)]
mod state_tests {
    use super::*;

    #[test]
    fn test_task_state_u8_round_trip() {
        for state in [
            TaskState::Queued,
            TaskState::Running,
            TaskState::Finished,
            TaskState::Failed,
        ] {
            assert_eq!(TaskState::from_u8(state.as_u8()), state);
        }
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }

    #[test]
    fn test_manager_state_u8_round_trip() {
        for state in [
            ManagerState::Created,
            ManagerState::Running,
            ManagerState::Stopping,
            ManagerState::Stopped,
        ] {
            assert_eq!(ManagerState::from_u8(state.as_u8()), state);
        }
    }
}
