//! Builds the deduplicated `RemoteAgent` list sent in `agents` frames and
//! returned by `GET /api/agents`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::collab::AgentMetadataProvider;
use crate::protocol::AgentStatusKind;
use crate::session::{AgentId, SessionPool, TaskId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteAgent {
    #[serde(rename = "agentId")]
    pub agent_id: AgentId,
    #[serde(rename = "taskId")]
    pub task_id: TaskId,
    #[serde(rename = "taskName")]
    pub task_name: String,
    pub status: AgentStatusKind,
    #[serde(rename = "exitCode")]
    pub exit_code: Option<i32>,
    #[serde(rename = "lastLine")]
    pub last_line: String,
}

/// Iterate every agent the pool currently holds live, pull each one's
/// metadata and status, then collapse to one entry per task id: a running
/// agent always outranks an exited one for the same task; if both or
/// neither are running, the later agent in iteration order wins. An agent
/// the pool has dropped after exit is gone from `active_ids()` and so never
/// appears here, regardless of what a metadata provider might still recall
/// about it.
pub fn build_projection(pool: &SessionPool, metadata: &dyn AgentMetadataProvider) -> Vec<RemoteAgent> {
    let mut by_task: HashMap<TaskId, RemoteAgent> = HashMap::new();

    let mut agent_tasks: HashMap<AgentId, TaskId> = HashMap::new();
    for agent_id in pool.active_ids() {
        if let Some(meta) = pool.meta(&agent_id) {
            agent_tasks.insert(agent_id, meta.task_id);
        }
    }

    for (agent_id, task_id) in agent_tasks {
        let Some(info) = metadata.agent_status(&agent_id) else { continue };

        let entry = RemoteAgent {
            agent_id,
            task_id: task_id.clone(),
            task_name: metadata.task_name(&task_id),
            status: info.status,
            exit_code: info.exit_code,
            last_line: info.last_line,
        };

        match by_task.get(&task_id) {
            None => {
                by_task.insert(task_id, entry);
            }
            Some(existing) => {
                let keep_new = entry.status == AgentStatusKind::Running || existing.status != AgentStatusKind::Running;
                if keep_new {
                    by_task.insert(task_id, entry);
                }
            }
        }
    }

    by_task.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{AgentStatusInfo, NullDesktopSink};
    use std::collections::HashMap as StdHashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct FakeMetadata {
        statuses: Mutex<StdHashMap<String, AgentStatusInfo>>,
    }

    impl AgentMetadataProvider for FakeMetadata {
        fn task_name(&self, task_id: &TaskId) -> String {
            format!("Task {}", task_id.as_str())
        }

        fn agent_status(&self, agent_id: &AgentId) -> Option<AgentStatusInfo> {
            self.statuses.lock().unwrap().get(agent_id.as_str()).cloned()
        }
    }

    fn spawn_noop(pool: &std::sync::Arc<SessionPool>, agent_id: &str, task_id: &str) {
        let req = crate::session::SpawnRequest {
            agent_id: AgentId::new(agent_id.to_string()),
            task_id: TaskId::new(task_id.to_string()),
            command: "/bin/cat".to_string(),
            args: vec![],
            cwd: PathBuf::new(),
            cols: 80,
            rows: 24,
            env_overrides: StdHashMap::new(),
        };
        pool.spawn(req).unwrap();
    }

    #[tokio::test]
    async fn dedup_prefers_running_over_exited_for_same_task() {
        let pool = SessionPool::new(std::sync::Arc::new(NullDesktopSink));
        spawn_noop(&pool, "a1", "t1");
        spawn_noop(&pool, "a2", "t1");

        let mut statuses = StdHashMap::new();
        statuses.insert(
            "a1".to_string(),
            AgentStatusInfo {
                status: AgentStatusKind::Exited,
                exit_code: Some(0),
                last_line: "bye".to_string(),
            },
        );
        statuses.insert(
            "a2".to_string(),
            AgentStatusInfo {
                status: AgentStatusKind::Running,
                exit_code: None,
                last_line: "".to_string(),
            },
        );
        let metadata = FakeMetadata {
            statuses: Mutex::new(statuses),
        };

        let projection = build_projection(&pool, &metadata);
        assert_eq!(projection.len(), 1);
        assert_eq!(projection[0].status, AgentStatusKind::Running);
        assert_eq!(projection[0].agent_id.as_str(), "a2");

        pool.kill_all();
    }

    #[tokio::test]
    async fn one_entry_per_distinct_task() {
        let pool = SessionPool::new(std::sync::Arc::new(NullDesktopSink));
        spawn_noop(&pool, "a1", "t1");
        spawn_noop(&pool, "a2", "t2");

        let mut statuses = StdHashMap::new();
        for id in ["a1", "a2"] {
            statuses.insert(
                id.to_string(),
                AgentStatusInfo {
                    status: AgentStatusKind::Running,
                    exit_code: None,
                    last_line: "".to_string(),
                },
            );
        }
        let metadata = FakeMetadata {
            statuses: Mutex::new(statuses),
        };

        let projection = build_projection(&pool, &metadata);
        assert_eq!(projection.len(), 2);

        pool.kill_all();
    }
}
