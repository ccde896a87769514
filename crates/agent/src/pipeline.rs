use async_trait::async_trait;
use futures::future::try_join_all;
use homebot_core::{
    Config, ConversationRecord, ConversationSink, Error, InboundMessage, MessageHandler, Result,
};
use homebot_home::{Discovery, HomeApi, HomeAssistantClient, ServiceDescriptor};
use homebot_providers::ActiveProvider;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::correction::{CorrectionLoop, CorrectionRequest};
use crate::executor::{Executor, Outcome};
use crate::intent::{IntentClass, IntentClassifier};
use crate::prompt::{implicated_domains, match_entities, PromptBuilder};
use crate::reply;

/// Where the platform client comes from on reload.
pub enum HomeSource {
    /// Built from `homeAssistant` settings on every reload.
    FromConfig,
    /// Fixed client, only caches are rebuilt.
    Fixed(Arc<dyn HomeApi>),
}

/// Per-configuration state. Runs hold an `Arc` to the one they started
/// with, so a reload never changes a run midway.
struct PipelineContext {
    config: Config,
    discovery: Arc<Discovery>,
    executor: Executor,
    classifier: IntentClassifier,
}

impl PipelineContext {
    fn build(config: &Config, api: Arc<dyn HomeApi>) -> Self {
        let discovery = Arc::new(Discovery::from_config(api, config));
        let executor = Executor::new(
            discovery.clone(),
            config.home_assistant.dry_run,
            Duration::from_millis(config.pipeline.verify_delay_ms),
        );
        Self {
            config: config.clone(),
            discovery,
            executor,
            classifier: IntentClassifier::from_words(&config.pipeline.question_words),
        }
    }
}

/// Result of one message, before it is turned into reply text.
#[derive(Debug)]
pub struct Answer {
    pub class: IntentClass,
    pub provider: String,
    pub attempts: u32,
    pub result: Result<Outcome>,
}

impl Answer {
    fn failed(class: IntentClass, provider: &str, err: Error) -> Self {
        Self {
            class,
            provider: provider.to_string(),
            attempts: 0,
            result: Err(err),
        }
    }

    pub fn reply_text(&self) -> String {
        match &self.result {
            Ok(outcome) => reply::outcome_text(outcome),
            Err(e) => reply::error_text(e),
        }
    }

    pub fn outcome_label(&self) -> &'static str {
        match &self.result {
            Ok(outcome) => outcome.label(),
            Err(e) => e.kind(),
        }
    }
}

/// The conversational command pipeline: classify, discover, prompt,
/// parse, validate, execute, correct.
pub struct Pipeline {
    context: RwLock<Arc<PipelineContext>>,
    provider: ActiveProvider,
    home: HomeSource,
    sink: Arc<dyn ConversationSink>,
}

impl Pipeline {
    /// Provider and platform client both follow the configuration.
    pub fn new(config: &Config, sink: Arc<dyn ConversationSink>) -> Self {
        let api: Arc<dyn HomeApi> = Arc::new(HomeAssistantClient::from_config(&config.home_assistant));
        Self {
            context: RwLock::new(Arc::new(PipelineContext::build(config, api))),
            provider: ActiveProvider::from_config(config),
            home: HomeSource::FromConfig,
            sink,
        }
    }

    pub fn with_parts(
        config: &Config,
        home: Arc<dyn HomeApi>,
        provider: ActiveProvider,
        sink: Arc<dyn ConversationSink>,
    ) -> Self {
        Self {
            context: RwLock::new(Arc::new(PipelineContext::build(config, home.clone()))),
            provider,
            home: HomeSource::Fixed(home),
            sink,
        }
    }

    fn context(&self) -> Arc<PipelineContext> {
        match self.context.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn process(&self, message: &str, cancel: &CancellationToken) -> Answer {
        let ctx = self.context();
        let class = ctx.classifier.classify(message);

        let snapshot = match self.provider.current() {
            Ok(s) => s,
            Err(e) => return Answer::failed(class, "none", e),
        };
        let provider_name = snapshot.kind.as_str();

        let known = match ctx.discovery.entities().await {
            Ok(k) => k,
            Err(e) => return Answer::failed(class, provider_name, e),
        };
        let matched = match_entities(message, &known, ctx.config.pipeline.max_prompt_entities);

        let domains = implicated_domains(&matched);
        let services: Vec<ServiceDescriptor> =
            match try_join_all(domains.iter().map(|d| ctx.discovery.services(d))).await {
                Ok(per_domain) => per_domain.into_iter().flatten().collect(),
                Err(e) => return Answer::failed(class, provider_name, e),
            };

        info!(
            class = class.as_str(),
            provider = provider_name,
            matched = matched.len(),
            services = services.len(),
            "Processing message"
        );

        let builder = PromptBuilder::new(&snapshot.config.system_prompt);
        let request = CorrectionRequest {
            message,
            hint: class,
            matched: &matched,
            known: &known,
            services: &services,
        };
        let resolution = CorrectionLoop {
            provider: &snapshot.provider,
            builder: &builder,
            discovery: &ctx.discovery,
            executor: &ctx.executor,
            max_corrections: ctx.config.pipeline.max_corrections,
        }
        .run(&request, cancel)
        .await;

        Answer {
            class,
            provider: provider_name.to_string(),
            attempts: resolution.attempts,
            result: resolution.result,
        }
    }

    pub fn provider(&self) -> &ActiveProvider {
        &self.provider
    }
}

#[async_trait]
impl MessageHandler for Pipeline {
    async fn handle(&self, msg: &InboundMessage, cancel: &CancellationToken) -> Option<String> {
        let answer = self.process(&msg.content, cancel).await;
        if matches!(answer.result, Err(Error::Cancelled)) {
            info!(chat_id = %msg.chat_id, "Run cancelled, no reply sent");
            return None;
        }
        if let Err(e) = &answer.result {
            warn!(chat_id = %msg.chat_id, error = %e, attempts = answer.attempts, "Message failed");
        }

        let text = answer.reply_text();
        let mut record = ConversationRecord::new(&msg.channel, &msg.chat_id, &msg.content);
        record.intent = answer.class.as_str().to_string();
        record.provider = answer.provider.clone();
        record.reply = text.clone();
        record.outcome = answer.outcome_label().to_string();
        record.attempts = answer.attempts;
        self.sink.record(record);

        Some(text)
    }

    async fn reload(&self, config: &Config) -> Result<()> {
        let api: Arc<dyn HomeApi> = match &self.home {
            HomeSource::FromConfig => Arc::new(HomeAssistantClient::from_config(&config.home_assistant)),
            HomeSource::Fixed(api) => api.clone(),
        };
        let fresh = Arc::new(PipelineContext::build(config, api));
        match self.context.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        info!(dry_run = config.home_assistant.dry_run, "Pipeline configuration reloaded");
        self.provider.replace(config)
    }
}
