//! In-process fakes for the upstream services plus seeding helpers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use wadmin_db::Database;
use wadmin_types::models::{Instance, InstanceStatus};
use wadmin_upstream::{
    ConnectionState, CreatedInstance, GatewayApi, JoinGroupPayload, SendMessagePayload,
    UpstreamError, WorkflowApi,
};

use crate::state::{AppState, AppStateInner};

pub const TEST_SECRET: &str = "test-secret";

fn remote(message: &str) -> UpstreamError {
    UpstreamError::Remote {
        status: 500,
        message: message.to_string(),
    }
}

#[derive(Default)]
pub struct FakeGateway {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub online: AtomicBool,
    /// Make `check_status` never answer.
    pub hang: AtomicBool,
    /// Raw state returned by `get_instance_status`.
    pub state: Mutex<Option<String>>,
    pub created: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeGateway {
    fn enter(&self) -> Result<(), UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(remote("gateway unavailable"))
        } else {
            Ok(())
        }
    }

    pub fn set_state(&self, state: Option<&str>) {
        *self.state.lock().unwrap() = state.map(str::to_string);
    }
}

#[async_trait]
impl GatewayApi for FakeGateway {
    async fn check_status(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.online.load(Ordering::SeqCst)
    }

    async fn create_instance(&self, name: &str) -> Result<CreatedInstance, UpstreamError> {
        self.enter()?;
        self.created.lock().unwrap().push(name.to_string());
        Ok(CreatedInstance {
            qr_code: format!("qr-for-{name}"),
            raw: json!({ "instance": { "instanceName": name } }),
        })
    }

    async fn get_instance_qr(&self, name: &str) -> Result<String, UpstreamError> {
        self.enter()?;
        Ok(format!("fresh-qr-for-{name}"))
    }

    async fn get_instance_status(&self, _name: &str) -> Result<ConnectionState, UpstreamError> {
        self.enter()?;
        let state = self.state.lock().unwrap().clone();
        Ok(ConnectionState {
            raw: json!({ "state": state }),
            state,
        })
    }

    async fn delete_instance(&self, name: &str) -> Result<(), UpstreamError> {
        self.enter()?;
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn fetch_group_info(&self, _name: &str, group_jid: &str) -> Result<Value, UpstreamError> {
        self.enter()?;
        Ok(json!({ "id": group_jid, "participants": [] }))
    }
}

#[derive(Default)]
pub struct FakeWorkflow {
    pub fail: AtomicBool,
    pub sends: Mutex<Vec<SendMessagePayload>>,
    pub joins: Mutex<Vec<JoinGroupPayload>>,
}

impl FakeWorkflow {
    pub fn call_count(&self) -> usize {
        self.sends.lock().unwrap().len() + self.joins.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkflowApi for FakeWorkflow {
    async fn send_messages(&self, payload: &SendMessagePayload) -> Result<Value, UpstreamError> {
        self.sends.lock().unwrap().push(payload.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(remote("workflow rejected batch"));
        }
        Ok(json!({ "ok": true }))
    }

    async fn join_groups(&self, payload: &JoinGroupPayload) -> Result<Value, UpstreamError> {
        self.joins.lock().unwrap().push(payload.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(remote("workflow rejected invites"));
        }
        // Real metadata that the orchestrator must ignore.
        Ok(json!({ "groups": [{ "id": "120363@g.us", "subject": "Real Name" }] }))
    }
}

pub fn test_state() -> (AppState, Arc<FakeGateway>, Arc<FakeWorkflow>) {
    let gateway = Arc::new(FakeGateway::default());
    let workflow = Arc::new(FakeWorkflow::default());
    let db = Database::open_in_memory().unwrap();
    let state = Arc::new(AppStateInner::new(
        db,
        TEST_SECRET.to_string(),
        gateway.clone(),
        workflow.clone(),
    ));
    (state, gateway, workflow)
}

pub fn seed_user(state: &AppState) -> Uuid {
    let id = Uuid::new_v4();
    state
        .db
        .create_user(&id.to_string(), &format!("op-{}", &id.to_string()[..8]), "x", false)
        .unwrap();
    id
}

pub fn instance_with(user_id: Uuid, name: &str, status: InstanceStatus) -> Instance {
    let now = Utc::now();
    Instance {
        id: Uuid::new_v4(),
        name: name.to_string(),
        status,
        qr_code: None,
        phone_number: None,
        user_id,
        created_at: now,
        updated_at: now,
        last_connected_at: None,
    }
}

pub fn seed_instance(state: &AppState, user_id: Uuid, name: &str, status: InstanceStatus) -> Instance {
    let instance = instance_with(user_id, name, status);
    state.db.insert_instance(&instance).unwrap();
    instance
}

/// Poll until `check` holds; detached best-effort tasks land shortly after
/// the request returns.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
