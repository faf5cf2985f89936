//! Suite and test records
//!
//! These are the `data` payloads of the suite lifecycle records. Timestamps
//! are epoch milliseconds, durations are milliseconds.

use crate::suite::step::StepFailure;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Test case state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    Pending,
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: Uuid,
    pub suite_id: Uuid,
    pub suite_name: String,
    pub name: String,
    pub started: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub state: TestState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_trace: Option<String>,
}

impl TestCase {
    pub fn new(suite: &Suite, name: &str, registered: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            suite_id: suite.id,
            suite_name: suite.name.clone(),
            name: name.to_string(),
            started: registered,
            finished: None,
            duration: None,
            state: TestState::Pending,
            error_type: None,
            error: None,
            error_trace: None,
        }
    }

    /// Record the outcome; a settled test is never rewritten
    pub(crate) fn settle(&mut self, outcome: Result<(), StepFailure>, finished: i64, duration: u64) {
        if self.state != TestState::Pending {
            return;
        }

        match outcome {
            Ok(()) => self.state = TestState::Passed,
            Err(failure) => {
                self.state = TestState::Failed;
                self.error_type = Some(failure.error_type);
                self.error = Some(failure.message);
                self.error_trace = failure.trace;
            }
        }
        self.finished = Some(finished);
        self.duration = Some(duration);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suite {
    pub id: Uuid,
    pub name: String,
    pub tests: Vec<TestCase>,
    pub started: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub has_error: bool,
    pub execute_immediately: bool,
}

impl Suite {
    pub fn new(name: impl Into<String>, started: i64, execute_immediately: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            tests: Vec::new(),
            started,
            finished: None,
            duration: None,
            has_error: false,
            execute_immediately,
        }
    }
}
