use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Work class of an LLM call. Light work wants the fast cheap model; heavy
/// work gets the chat-grade one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Light,
    Heavy,
}

/// Generation parameters a task class pins for the call.
#[derive(Debug, Clone)]
pub struct TaskProfile {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TaskProfiles {
    pub light: TaskProfile,
    pub heavy: TaskProfile,
}

impl TaskProfiles {
    pub fn new(light_model: &str, heavy_model: &str, global_timeout: Duration) -> Self {
        Self {
            light: TaskProfile {
                model: light_model.to_string(),
                max_tokens: 1024,
                temperature: 0.1,
                timeout: global_timeout.min(Duration::from_secs(3)),
            },
            heavy: TaskProfile {
                model: heavy_model.to_string(),
                max_tokens: 4096,
                temperature: 0.3,
                timeout: Duration::from_secs(8),
            },
        }
    }

    pub fn get(&self, task_type: TaskType) -> &TaskProfile {
        match task_type {
            TaskType::Light => &self.light,
            TaskType::Heavy => &self.heavy,
        }
    }
}

const LIGHT_KEYWORDS: [&str; 8] = [
    "summary",
    "summar",
    "classif",
    "category",
    "simple",
    "quick",
    "basic",
    "ticket_info",
];

/// Keyword match on the operation name; anything unrecognized is treated as
/// heavy work so quality never silently degrades.
pub fn task_type_from_operation(operation: &str) -> TaskType {
    let lowered = operation.to_lowercase();
    if LIGHT_KEYWORDS.iter().any(|k| lowered.contains(k)) || lowered.contains("요약") {
        TaskType::Light
    } else {
        TaskType::Heavy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_light_operations_map_light() {
        assert_eq!(task_type_from_operation("ticket_summary"), TaskType::Light);
        assert_eq!(
            task_type_from_operation("ticket_classification"),
            TaskType::Light
        );
        assert_eq!(task_type_from_operation("simple_analysis"), TaskType::Light);
    }

    #[test]
    fn unknown_operations_default_to_heavy() {
        assert_eq!(task_type_from_operation("agent_chat"), TaskType::Heavy);
        assert_eq!(
            task_type_from_operation("conversation_analysis"),
            TaskType::Heavy
        );
        assert_eq!(task_type_from_operation("whatever_else"), TaskType::Heavy);
    }

    #[test]
    fn profiles_pin_model_and_bounds() {
        let profiles = TaskProfiles::new("light-model", "heavy-model", Duration::from_secs(5));
        assert_eq!(profiles.get(TaskType::Light).model, "light-model");
        assert_eq!(profiles.get(TaskType::Light).max_tokens, 1024);
        assert_eq!(profiles.get(TaskType::Light).timeout, Duration::from_secs(3));
        assert_eq!(profiles.get(TaskType::Heavy).model, "heavy-model");
        assert_eq!(profiles.get(TaskType::Heavy).timeout, Duration::from_secs(8));
    }
}
