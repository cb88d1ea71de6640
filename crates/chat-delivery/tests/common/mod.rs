#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chat_core::{Config, KeyValueStore, MemoryStore, ProviderKind, StaticSecretStore, Turn};
use chat_delivery::{ChatService, StaticProbe};
use chat_llm::{LLMError, LLMProvider};

/// One scripted backend answer
pub enum Step {
    Reply(&'static str),
    Status(u16),
    Panic,
}

/// Backend answering from a script; replies "default reply" once it runs out.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call(&self, index: usize) -> Vec<Turn> {
        self.calls.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    async fn complete(&self, turns: &[Turn], _model: Option<&str>) -> chat_llm::Result<String> {
        self.calls.lock().unwrap().push(turns.to_vec());
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Panic) => panic!("scripted provider crash"),
            Some(Step::Reply(text)) => Ok(text.to_string()),
            Some(Step::Status(status)) => Err(LLMError::Api {
                status,
                message: format!("scripted {}", status),
            }),
            None => Ok("default reply".to_string()),
        }
    }
}

pub struct Harness {
    pub service: ChatService,
    pub store: Arc<MemoryStore>,
    pub probe: Arc<StaticProbe>,
    pub provider: Arc<ScriptedProvider>,
}

/// Full pipeline over an in-memory store with a key for OpenAI only.
pub fn harness(steps: Vec<Step>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let probe = Arc::new(StaticProbe::online());
    let secrets = Arc::new(StaticSecretStore::with_key(ProviderKind::OpenAI, "sk-test"));

    let mut config = Config::default();
    config.pipeline.retry_delay_ms = 0;
    config.pipeline.idle_interval_ms = 5;
    config.pipeline.error_backoff_ms = 5;
    config.pipeline.stream_chunk_delay_ms = 0;

    let kv: Arc<dyn KeyValueStore> = store.clone();
    let service = ChatService::from_config(Arc::new(config), kv, secrets, probe.clone());

    let provider = ScriptedProvider::new(steps);
    for kind in ProviderKind::ALL {
        service.adapter().registry().register(kind, provider.clone());
    }

    Harness {
        service,
        store,
        probe,
        provider,
    }
}
