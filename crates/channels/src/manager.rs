use homebot_core::config::TelegramConfig;
use homebot_core::{ConfigStore, Error, InboundMessage, MessageHandler, OutboundMessage, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::rate_limit::ChatRateLimiter;
use crate::transport::{Transport, TransportFactory};

pub const UNAUTHORIZED: &str = "⛔ Unauthorized. Please contact admin.";

pub const GREETING: &str = "👋 Merhaba! Ben akıllı ev asistanınızım.\n\n\
Bana istediğiniz soruyu sorabilir veya komut verebilirsiniz.";

pub const RATE_LIMITED: &str = "⏳ Çok fazla mesaj gönderdiniz. Lütfen biraz bekleyin.";

const INBOUND_QUEUE: usize = 256;
/// A chat worker with nothing to do for this long exits.
const WORKER_IDLE: Duration = Duration::from_secs(300);
/// How long cancelled runs get to unwind before their tasks are aborted.
const ABORT_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl BotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotState::Stopped => "stopped",
            BotState::Starting => "starting",
            BotState::Running => "running",
            BotState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct RunningBot {
    /// Stops the transport and the dispatcher's intake.
    stop: CancellationToken,
    transport_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
}

impl RunningBot {
    fn is_finished(&self) -> bool {
        self.transport_task.is_finished()
    }
}

/// Owns the single live transport and moves it through
/// Stopped → Starting → Running → Stopping → Stopped.
pub struct BotManager {
    store: Arc<dyn ConfigStore>,
    handler: Arc<dyn MessageHandler>,
    factory: Arc<dyn TransportFactory>,
    state_tx: Arc<watch::Sender<BotState>>,
    /// Held for the whole of every transition.
    running: Mutex<Option<RunningBot>>,
}

impl BotManager {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        handler: Arc<dyn MessageHandler>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let (state_tx, _) = watch::channel(BotState::Stopped);
        Self {
            store,
            handler,
            factory,
            state_tx: Arc::new(state_tx),
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BotState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BotState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: BotState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Bot state changed");
        }
    }

    /// Starts the bot with freshly loaded settings. A bot that is already
    /// running is left alone.
    pub async fn start(&self) -> Result<BotState> {
        let mut slot = self.running.lock().await;
        if let Some(bot) = slot.as_ref() {
            if !bot.is_finished() {
                return Ok(BotState::Running);
            }
            self.stop_locked(&mut slot).await;
        }
        self.start_locked(&mut slot).await
    }

    /// Idempotent; returns once in-flight messages drained or the grace
    /// period ran out.
    pub async fn stop(&self) {
        let mut slot = self.running.lock().await;
        self.stop_locked(&mut slot).await;
    }

    /// Stop, then start again with the current settings.
    pub async fn restart(&self) -> Result<BotState> {
        let mut slot = self.running.lock().await;
        self.stop_locked(&mut slot).await;
        self.start_locked(&mut slot).await
    }

    async fn start_locked(&self, slot: &mut Option<RunningBot>) -> Result<BotState> {
        let config = self.store.load()?;

        if !config.telegram.enabled {
            info!("Telegram bot disabled, not starting");
            self.set_state(BotState::Stopped);
            return Ok(BotState::Stopped);
        }
        config.telegram_ready()?;

        self.set_state(BotState::Starting);

        if let Err(e) = self.handler.reload(&config).await {
            warn!(error = %e, "Handler reload failed, messages will report it");
        }

        let transport = match self.factory.create(&config.telegram) {
            Ok(t) => t,
            Err(e) => {
                self.set_state(BotState::Stopped);
                return Err(e);
            }
        };

        let stop = CancellationToken::new();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

        let dispatcher = Dispatcher {
            limiter: ChatRateLimiter::per_minute(config.telegram.rate_limit_per_minute),
            telegram: config.telegram.clone(),
            handler: self.handler.clone(),
            transport: transport.clone(),
            grace: Duration::from_secs(config.pipeline.shutdown_grace_secs),
            idle: WORKER_IDLE,
        };
        let dispatcher_task = tokio::spawn(dispatcher.run(inbound_rx, stop.clone()));

        // Before the transport task exists: a transport that dies at once
        // must leave the state at Stopped.
        self.set_state(BotState::Running);

        let transport_stop = stop.clone();
        let state_tx = self.state_tx.clone();
        let transport_task = tokio::spawn(async move {
            let name = transport.name().to_string();
            let cancel = transport_stop.clone();
            let outcome = tokio::spawn(async move { transport.run(inbound_tx, cancel).await }).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(transport = %name, error = %e, "Transport stopped with an error"),
                Err(e) => error!(transport = %name, error = %e, "Transport task died"),
            }
            if !transport_stop.is_cancelled() {
                transport_stop.cancel();
                state_tx.send_replace(BotState::Stopped);
            }
        });

        *slot = Some(RunningBot {
            stop,
            transport_task,
            dispatcher_task,
        });
        info!(
            mode = ?config.telegram.mode,
            allowed_chats = config.telegram.allowed_chat_ids.len(),
            rate_limit_per_minute = config.telegram.rate_limit_per_minute,
            "Telegram bot running"
        );
        Ok(BotState::Running)
    }

    async fn stop_locked(&self, slot: &mut Option<RunningBot>) {
        let Some(bot) = slot.take() else {
            self.set_state(BotState::Stopped);
            return;
        };

        self.set_state(BotState::Stopping);
        bot.stop.cancel();

        if let Err(e) = bot.transport_task.await {
            warn!(error = %e, "Transport task ended abnormally");
        }
        if let Err(e) = bot.dispatcher_task.await {
            warn!(error = %e, "Dispatcher task ended abnormally");
        }

        self.set_state(BotState::Stopped);
        info!("Telegram bot stopped");
    }
}

enum Job {
    Reply(InboundMessage, String),
    Handle(InboundMessage),
}

fn reply_to(msg: &InboundMessage, text: &str) -> OutboundMessage {
    let mut out = OutboundMessage::new(&msg.channel, &msg.chat_id, text);
    out.reply_to = msg.metadata.get("message_id").map(|id| match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    out
}

async fn send(transport: &dyn Transport, msg: &InboundMessage, text: &str) {
    if let Err(e) = transport.send(&reply_to(msg, text)).await {
        warn!(chat_id = %msg.chat_id, error = %e, "Failed to send reply");
    }
}

/// Routes inbound messages to one worker per allowed chat: a chat's
/// messages run in arrival order, different chats run concurrently.
/// Chats outside the allowlist never get a worker.
struct Dispatcher {
    telegram: TelegramConfig,
    limiter: ChatRateLimiter,
    handler: Arc<dyn MessageHandler>,
    transport: Arc<dyn Transport>,
    grace: Duration,
    idle: Duration,
}

type Workers = HashMap<String, mpsc::UnboundedSender<Job>>;

/// Tasks yield the chat id of the worker that ran, `None` for one-off sends.
type Tasks = JoinSet<Option<String>>;

impl Dispatcher {
    async fn run(self, mut inbound: mpsc::Receiver<InboundMessage>, stop: CancellationToken) {
        let work = CancellationToken::new();
        let mut workers = Workers::new();
        let mut tasks = Tasks::new();

        loop {
            tokio::select! {
                maybe = inbound.recv() => match maybe {
                    Some(msg) => self.route(msg, &mut workers, &mut tasks, &work),
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok(Some(chat_id)) => reap(&mut workers, &chat_id),
                    Ok(None) => {}
                    Err(e) if e.is_panic() => error!(error = %e, "Chat worker panicked"),
                    Err(_) => {}
                },
                _ = stop.cancelled() => break,
            }
        }

        // Closing the queues lets each worker finish its backlog and exit.
        drop(workers);
        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(in_flight, grace_secs = self.grace.as_secs(), "Draining in-flight messages");
        }
        let drained = tokio::time::timeout(self.grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(remaining = tasks.len(), "Grace period over, cancelling in-flight messages");
            work.cancel();
            let settled = tokio::time::timeout(ABORT_SETTLE, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if settled.is_err() {
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
            }
        }
        debug!("Dispatcher stopped");
    }

    fn route(&self, msg: InboundMessage, workers: &mut Workers, tasks: &mut Tasks, work: &CancellationToken) {
        let greeting = matches!(msg.command(), Some("start") | Some("help"));
        let allowed = self.telegram.is_allowed(&msg.chat_id);

        let job = if !allowed {
            let text = if greeting {
                GREETING
            } else {
                warn!(chat_id = %msg.chat_id, sender_id = %msg.sender_id, "Message from chat outside the allowlist");
                UNAUTHORIZED
            };
            let transport = self.transport.clone();
            tasks.spawn(async move {
                send(transport.as_ref(), &msg, text).await;
                None
            });
            return;
        } else if greeting {
            Job::Reply(msg, GREETING.to_string())
        } else if !self.limiter.admit(&msg.chat_id) {
            let err = Error::RateLimited(msg.chat_id.clone());
            info!(error = %err, "Message rejected");
            Job::Reply(msg, RATE_LIMITED.to_string())
        } else {
            Job::Handle(msg)
        };

        let chat_id = match &job {
            Job::Reply(m, _) | Job::Handle(m) => m.chat_id.clone(),
        };
        let job = match workers.get(&chat_id) {
            Some(queue) => match queue.send(job) {
                Ok(()) => return,
                // The worker went idle and closed its queue.
                Err(mpsc::error::SendError(job)) => {
                    workers.remove(&chat_id);
                    job
                }
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tasks.spawn(chat_worker(
            chat_id.clone(),
            rx,
            self.handler.clone(),
            self.transport.clone(),
            work.clone(),
            self.idle,
        ));
        debug!(chat_id = %chat_id, "Chat worker started");
        if tx.send(job).is_err() {
            warn!(chat_id = %chat_id, "Chat worker gone, message dropped");
            return;
        }
        workers.insert(chat_id, tx);
    }
}

/// Drops a finished worker's queue unless a newer worker already took the slot.
fn reap(workers: &mut Workers, chat_id: &str) {
    if workers.get(chat_id).is_some_and(|queue| queue.is_closed()) {
        workers.remove(chat_id);
        debug!(chat_id = %chat_id, "Chat worker reaped");
    }
}

async fn chat_worker(
    chat_id: String,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    handler: Arc<dyn MessageHandler>,
    transport: Arc<dyn Transport>,
    work: CancellationToken,
    idle: Duration,
) -> Option<String> {
    loop {
        let job = match tokio::time::timeout(idle, jobs.recv()).await {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(_) => {
                // Refuse new jobs, then finish whatever slipped in.
                jobs.close();
                match jobs.try_recv() {
                    Ok(job) => job,
                    Err(_) => break,
                }
            }
        };
        if work.is_cancelled() {
            break;
        }
        match job {
            Job::Reply(msg, text) => send(transport.as_ref(), &msg, &text).await,
            Job::Handle(msg) => {
                if let Some(text) = handler.handle(&msg, &work).await {
                    send(transport.as_ref(), &msg, &text).await;
                }
            }
        }
    }
    Some(chat_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use homebot_core::{Config, Error, MemoryConfigStore};
    use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeTransport {
        sender: StdMutex<Option<mpsc::Sender<InboundMessage>>>,
        sent: StdMutex<Vec<OutboundMessage>>,
        active: AtomicI32,
        max_active: AtomicI32,
        runs: AtomicU32,
    }

    impl FakeTransport {
        async fn push(&self, chat_id: &str, text: &str) {
            let tx = self.sender.lock().unwrap().clone().expect("transport not running");
            let mut msg = InboundMessage::new("telegram", chat_id, chat_id, text);
            msg.metadata = serde_json::json!({"message_id": 7});
            tx.send(msg).await.unwrap();
        }

        fn sent_texts(&self, chat_id: &str) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.chat_id == chat_id)
                .map(|m| m.content.clone())
                .collect()
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn name(&self) -> &str {
            "fake"
        }

        async fn run(&self, inbound: mpsc::Sender<InboundMessage>, cancel: CancellationToken) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            *self.sender.lock().unwrap() = Some(inbound);
            cancel.cancelled().await;
            *self.sender.lock().unwrap() = None;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, msg: &OutboundMessage) -> Result<()> {
            self.sent.lock().unwrap().push(msg.clone());
            Ok(())
        }
    }

    struct FakeFactory {
        transport: Arc<FakeTransport>,
        creates: AtomicU32,
    }

    impl TransportFactory for FakeFactory {
        fn create(&self, _config: &TelegramConfig) -> Result<Arc<dyn Transport>> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(self.transport.clone())
        }
    }

    /// Echoes messages. Text "slow" takes 300ms, "hang" waits for
    /// cancellation.
    #[derive(Default)]
    struct EchoHandler {
        handled: StdMutex<Vec<String>>,
        reloads: AtomicU32,
    }

    #[async_trait]
    impl MessageHandler for EchoHandler {
        async fn handle(&self, msg: &InboundMessage, cancel: &CancellationToken) -> Option<String> {
            self.handled.lock().unwrap().push(msg.content.clone());
            let delay = match msg.content.as_str() {
                "slow" => Duration::from_millis(300),
                "hang" => Duration::from_secs(30),
                _ => Duration::from_millis(5),
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => Some(format!("echo {}", msg.content)),
                _ = cancel.cancelled() => None,
            }
        }

        async fn reload(&self, _config: &Config) -> Result<()> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryConfigStore>,
        transport: Arc<FakeTransport>,
        factory: Arc<FakeFactory>,
        handler: Arc<EchoHandler>,
        manager: BotManager,
    }

    fn config(allowed: &[&str]) -> Config {
        let mut config = Config::default();
        config.telegram.enabled = true;
        config.telegram.token = "123:abc".to_string();
        config.telegram.allowed_chat_ids = allowed.iter().map(|s| s.to_string()).collect();
        config.pipeline.shutdown_grace_secs = 5;
        config
    }

    fn harness(config: Config) -> Harness {
        let store = Arc::new(MemoryConfigStore::new(config));
        let transport = Arc::new(FakeTransport::default());
        let factory = Arc::new(FakeFactory {
            transport: transport.clone(),
            creates: AtomicU32::new(0),
        });
        let handler = Arc::new(EchoHandler::default());
        let manager = BotManager::new(store.clone(), handler.clone(), factory.clone());
        Harness {
            store,
            transport,
            factory,
            handler,
            manager,
        }
    }

    async fn wait_for(what: &str, check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    async fn running(h: &Harness) {
        let t = h.transport.clone();
        wait_for("transport", move || t.sender.lock().unwrap().is_some()).await;
    }

    #[tokio::test]
    async fn test_empty_token_is_not_configured() {
        let mut cfg = config(&["1"]);
        cfg.telegram.token = String::new();
        let h = harness(cfg);
        let err = h.manager.start().await.unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
        assert_eq!(h.manager.state(), BotState::Stopped);
        assert_eq!(h.factory.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_stays_stopped() {
        let mut cfg = config(&["1"]);
        cfg.telegram.enabled = false;
        let h = harness(cfg);
        assert_eq!(h.manager.start().await.unwrap(), BotState::Stopped);
        assert_eq!(h.factory.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let h = harness(config(&["1"]));
        h.manager.stop().await;
        assert_eq!(h.manager.state(), BotState::Stopped);
        h.manager.start().await.unwrap();
        h.manager.stop().await;
        h.manager.stop().await;
        assert_eq!(h.manager.state(), BotState::Stopped);
    }

    #[tokio::test]
    async fn test_concurrent_restarts_keep_one_transport() {
        let h = harness(config(&["1"]));
        h.manager.start().await.unwrap();
        running(&h).await;
        let (a, b) = tokio::join!(h.manager.restart(), h.manager.restart());
        assert_eq!(a.unwrap(), BotState::Running);
        assert_eq!(b.unwrap(), BotState::Running);
        running(&h).await;
        assert_eq!(h.transport.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(h.factory.creates.load(Ordering::SeqCst), 3);
        h.manager.stop().await;
    }

    #[tokio::test]
    async fn test_restart_rereads_config() {
        let h = harness(config(&["1"]));
        h.manager.start().await.unwrap();
        running(&h).await;
        h.transport.push("2", "merhaba").await;
        let t = h.transport.clone();
        wait_for("unauthorized reply", move || t.sent_count() == 1).await;
        assert_eq!(h.transport.sent_texts("2"), vec![UNAUTHORIZED.to_string()]);

        h.store.set(config(&["1", "2"]));
        h.manager.restart().await.unwrap();
        running(&h).await;
        assert_eq!(h.handler.reloads.load(Ordering::SeqCst), 2);

        h.transport.push("2", "merhaba").await;
        let t = h.transport.clone();
        wait_for("echo", move || t.sent_count() == 2).await;
        assert_eq!(h.transport.sent_texts("2")[1], "echo merhaba");
        h.manager.stop().await;
    }

    #[tokio::test]
    async fn test_greeting_and_reply_threading() {
        let h = harness(config(&[]));
        h.manager.start().await.unwrap();
        running(&h).await;
        h.transport.push("9", "/start").await;
        let t = h.transport.clone();
        wait_for("greeting", move || t.sent_count() == 1).await;
        let sent = h.transport.sent.lock().unwrap()[0].clone();
        assert_eq!(sent.content, GREETING);
        assert_eq!(sent.reply_to.as_deref(), Some("7"));
        assert!(h.handler.handled.lock().unwrap().is_empty());
        h.manager.stop().await;
    }

    #[tokio::test]
    async fn test_rate_limit_per_chat() {
        let mut cfg = config(&["1", "2"]);
        cfg.telegram.rate_limit_per_minute = 2;
        let h = harness(cfg);
        h.manager.start().await.unwrap();
        running(&h).await;
        for text in ["a", "b", "c"] {
            h.transport.push("1", text).await;
        }
        h.transport.push("2", "d").await;
        let t = h.transport.clone();
        wait_for("four replies", move || t.sent_count() == 4).await;
        assert_eq!(
            h.transport.sent_texts("1"),
            vec!["echo a".to_string(), "echo b".to_string(), RATE_LIMITED.to_string()]
        );
        assert_eq!(h.transport.sent_texts("2"), vec!["echo d".to_string()]);
        h.manager.stop().await;
    }

    #[tokio::test]
    async fn test_same_chat_ordered_other_chats_concurrent() {
        let h = harness(config(&["1", "2"]));
        h.manager.start().await.unwrap();
        running(&h).await;
        h.transport.push("1", "slow").await;
        h.transport.push("1", "fast").await;
        h.transport.push("2", "other").await;
        let t = h.transport.clone();
        wait_for("three replies", move || t.sent_count() == 3).await;

        let order: Vec<String> = h.transport.sent.lock().unwrap().iter().map(|m| m.content.clone()).collect();
        assert_eq!(order[0], "echo other");
        assert_eq!(h.transport.sent_texts("1"), vec!["echo slow".to_string(), "echo fast".to_string()]);
        h.manager.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_in_flight_message() {
        let h = harness(config(&["1"]));
        h.manager.start().await.unwrap();
        running(&h).await;
        h.transport.push("1", "slow").await;
        let handler = h.handler.clone();
        wait_for("handler started", move || !handler.handled.lock().unwrap().is_empty()).await;
        h.manager.stop().await;
        assert_eq!(h.transport.sent_texts("1"), vec!["echo slow".to_string()]);
    }

    #[tokio::test]
    async fn test_stop_cancels_after_grace() {
        let mut cfg = config(&["1"]);
        cfg.pipeline.shutdown_grace_secs = 0;
        let h = harness(cfg);
        h.manager.start().await.unwrap();
        running(&h).await;
        h.transport.push("1", "hang").await;
        let handler = h.handler.clone();
        wait_for("handler started", move || !handler.handled.lock().unwrap().is_empty()).await;

        let started = std::time::Instant::now();
        h.manager.stop().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(h.transport.sent_count(), 0);
        assert_eq!(h.manager.state(), BotState::Stopped);
    }

    #[tokio::test]
    async fn test_state_is_published() {
        let h = harness(config(&["1"]));
        let rx = h.manager.subscribe();
        h.manager.start().await.unwrap();
        assert_eq!(*rx.borrow(), BotState::Running);
        h.manager.stop().await;
        assert_eq!(*rx.borrow(), BotState::Stopped);
    }

    struct PanickingTransport;

    #[async_trait]
    impl Transport for PanickingTransport {
        fn name(&self) -> &str {
            "broken"
        }

        async fn run(&self, _inbound: mpsc::Sender<InboundMessage>, _cancel: CancellationToken) -> Result<()> {
            panic!("listener setup failed");
        }

        async fn send(&self, _msg: &OutboundMessage) -> Result<()> {
            Ok(())
        }
    }

    struct PanickingFactory;

    impl TransportFactory for PanickingFactory {
        fn create(&self, _config: &TelegramConfig) -> Result<Arc<dyn Transport>> {
            Ok(Arc::new(PanickingTransport))
        }
    }

    #[tokio::test]
    async fn test_transport_panic_leaves_bot_stopped() {
        let store = Arc::new(MemoryConfigStore::new(config(&["1"])));
        let manager = BotManager::new(store, Arc::new(EchoHandler::default()), Arc::new(PanickingFactory));
        let mut rx = manager.subscribe();
        manager.start().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == BotState::Stopped))
            .await
            .expect("state never went back to stopped")
            .unwrap();

        // The dead run is cleaned up and a fresh one attempted.
        assert_eq!(manager.start().await.unwrap(), BotState::Running);
        manager.stop().await;
        assert_eq!(manager.state(), BotState::Stopped);
    }

    fn dispatcher(transport: Arc<FakeTransport>, allowed: &[&str], idle: Duration) -> Dispatcher {
        Dispatcher {
            limiter: ChatRateLimiter::per_minute(10),
            telegram: config(allowed).telegram,
            handler: Arc::new(EchoHandler::default()),
            transport,
            grace: Duration::from_secs(1),
            idle,
        }
    }

    fn inbound(chat_id: &str, text: &str) -> InboundMessage {
        InboundMessage::new("telegram", chat_id, chat_id, text)
    }

    #[tokio::test]
    async fn test_strangers_never_get_a_worker() {
        let transport = Arc::new(FakeTransport::default());
        let d = dispatcher(transport.clone(), &["1"], WORKER_IDLE);
        let work = CancellationToken::new();
        let mut workers = Workers::new();
        let mut tasks = Tasks::new();

        for n in 0..50 {
            d.route(inbound(&format!("-{}", 1000 + n), "/start"), &mut workers, &mut tasks, &work);
        }
        d.route(inbound("-1000", "ışığı aç"), &mut workers, &mut tasks, &work);
        assert!(workers.is_empty());

        while let Some(joined) = tasks.join_next().await {
            assert_eq!(joined.unwrap(), None);
        }
        assert_eq!(transport.sent_count(), 51);
        assert_eq!(transport.sent_texts("-1007"), vec![GREETING.to_string()]);
        assert!(transport.sent_texts("-1000").contains(&UNAUTHORIZED.to_string()));
    }

    #[tokio::test]
    async fn test_allowed_greeting_goes_through_worker() {
        let transport = Arc::new(FakeTransport::default());
        let d = dispatcher(transport.clone(), &["1"], WORKER_IDLE);
        let work = CancellationToken::new();
        let mut workers = Workers::new();
        let mut tasks = Tasks::new();

        d.route(inbound("1", "/help"), &mut workers, &mut tasks, &work);
        d.route(inbound("1", "merhaba"), &mut workers, &mut tasks, &work);
        assert_eq!(workers.len(), 1);
        drop(workers);
        while tasks.join_next().await.is_some() {}
        assert_eq!(
            transport.sent_texts("1"),
            vec![GREETING.to_string(), "echo merhaba".to_string()]
        );
    }

    #[tokio::test]
    async fn test_idle_worker_is_replaced_and_reaped() {
        let transport = Arc::new(FakeTransport::default());
        let d = dispatcher(transport.clone(), &["1"], Duration::from_millis(50));
        let work = CancellationToken::new();
        let mut workers = Workers::new();
        let mut tasks = Tasks::new();

        d.route(inbound("1", "a"), &mut workers, &mut tasks, &work);
        let finished = tasks.join_next().await.unwrap().unwrap();
        assert_eq!(finished.as_deref(), Some("1"));
        assert!(workers["1"].is_closed());

        // Closed queue: the message goes to a fresh worker instead of being lost.
        d.route(inbound("1", "b"), &mut workers, &mut tasks, &work);
        assert_eq!(workers.len(), 1);
        assert!(!workers["1"].is_closed());
        reap(&mut workers, "1");
        assert_eq!(workers.len(), 1);

        let finished = tasks.join_next().await.unwrap().unwrap();
        assert_eq!(finished.as_deref(), Some("1"));
        reap(&mut workers, "1");
        assert!(workers.is_empty());
        assert_eq!(transport.sent_texts("1"), vec!["echo a".to_string(), "echo b".to_string()]);
    }
}
