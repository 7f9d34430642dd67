use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::chain::{ConfirmationState, LedgerClient};
use crate::error::{AppResult, ChainError};
use crate::store::models::OperationPayload;

/// Scripted ledger double for engine and sweeper tests.
///
/// Submit outcomes are consumed in order; poll sequences are consumed per
/// ledger reference, with the last scripted state repeating once reached.
pub struct MockLedgerClient {
    submit_outcomes: Mutex<VecDeque<Result<String, String>>>,
    poll_scripts: Mutex<HashMap<String, VecDeque<ConfirmationState>>>,
    submissions: Mutex<Vec<OperationPayload>>,
}

impl MockLedgerClient {
    pub fn new() -> Self {
        Self {
            submit_outcomes: Mutex::new(VecDeque::new()),
            poll_scripts: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn accept_submission(&self, ledger_ref: &str) {
        self.submit_outcomes
            .lock()
            .unwrap()
            .push_back(Ok(ledger_ref.to_string()));
    }

    pub fn reject_submission(&self, reason: &str) {
        self.submit_outcomes
            .lock()
            .unwrap()
            .push_back(Err(reason.to_string()));
    }

    pub fn script_poll(&self, ledger_ref: &str, states: Vec<ConfirmationState>) {
        self.poll_scripts
            .lock()
            .unwrap()
            .insert(ledger_ref.to_string(), states.into());
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn submit(&self, payload: &OperationPayload) -> AppResult<String> {
        let outcome = self
            .submit_outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err("no scripted submit outcome".to_string()));

        match outcome {
            Ok(ledger_ref) => {
                self.submissions.lock().unwrap().push(payload.clone());
                Ok(ledger_ref)
            }
            Err(reason) => Err(ChainError::Submission(reason).into()),
        }
    }

    async fn poll_status(&self, ledger_ref: &str) -> AppResult<ConfirmationState> {
        let mut scripts = self.poll_scripts.lock().unwrap();
        let state = match scripts.get_mut(ledger_ref) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) => *script.front().unwrap_or(&ConfirmationState::Pending),
            None => ConfirmationState::Pending,
        };
        Ok(state)
    }
}
