//! Rate-limited, retrying send pipeline.
//!
//! Each send runs validate → admit → attempt loop. An attempt renders the body,
//! loads attachments and hands the message to the transport; any failure there
//! is retried after the policy's delay until `max_retries` attempts are spent.
//! A delivered message is counted against the rate limit before its event is
//! published, so every published event matches one counted send.

pub mod retry;

pub use retry::{BackoffStrategy, ExponentialBackoff, FixedDelay, RetryPolicy};

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::events::{EventBus, SendEvent};
use crate::mail::template::{TemplateData, TemplateRenderer};
use crate::mail::{load_attachments, MailAddress, OutboundMessage, Transport};
use crate::models::{MailBody, SendError, SendOutcome, SendRequest};
use crate::rate_limit::RateLimiter;
use crate::validation::AddressValidator;

#[derive(Clone)]
pub struct SendPipeline {
    validator: AddressValidator,
    rate_limiter: RateLimiter,
    transport: Arc<dyn Transport>,
    renderer: Arc<dyn TemplateRenderer>,
    events: EventBus,
    retry: RetryPolicy,
    from: MailAddress,
    reply_to: Option<MailAddress>,
}

impl SendPipeline {
    pub fn new(
        rate_limiter: RateLimiter,
        transport: Arc<dyn Transport>,
        renderer: Arc<dyn TemplateRenderer>,
        events: EventBus,
        retry: RetryPolicy,
        from: MailAddress,
    ) -> Self {
        Self {
            validator: AddressValidator::new(),
            rate_limiter,
            transport,
            renderer,
            events,
            retry,
            from,
            reply_to: None,
        }
    }

    pub fn from_config(
        config: &Config,
        rate_limiter: RateLimiter,
        transport: Arc<dyn Transport>,
        renderer: Arc<dyn TemplateRenderer>,
        events: EventBus,
    ) -> Self {
        let from = MailAddress::new(config.mail_from_address.clone(), config.mail_from_name.clone());
        let reply_to = config
            .mail_reply_to_address
            .as_ref()
            .map(|address| MailAddress::new(address.clone(), config.mail_reply_to_name.clone()));

        Self::new(
            rate_limiter,
            transport,
            renderer,
            events,
            RetryPolicy::from_config(config),
            from,
        )
        .with_reply_to(reply_to)
    }

    pub fn with_reply_to(mut self, reply_to: Option<MailAddress>) -> Self {
        self.reply_to = reply_to;
        self
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Send raw HTML content
    pub async fn send_html(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        attachments: Vec<PathBuf>,
    ) -> SendOutcome {
        self.send(SendRequest::html(to, subject, html).with_attachments(attachments))
            .await
    }

    /// Send a rendered template
    pub async fn send_template(
        &self,
        to: &str,
        subject: &str,
        template_id: &str,
        data: TemplateData,
        attachments: Vec<PathBuf>,
    ) -> SendOutcome {
        self.send(SendRequest::template(to, subject, template_id, data).with_attachments(attachments))
            .await
    }

    pub async fn send(&self, request: SendRequest) -> SendOutcome {
        let template = request.template_id();

        if !self.validator.is_valid(&request.to) {
            tracing::error!(to = %request.to, "Invalid recipient address");
            return SendOutcome::failed(0, SendError::InvalidAddress(request.to.clone()));
        }

        match self.rate_limiter.admit().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    to = %request.to,
                    subject = %request.subject,
                    max = self.rate_limiter.max(),
                    "Send rate limit reached"
                );
                return SendOutcome::failed(
                    0,
                    SendError::RateLimited {
                        max: self.rate_limiter.max(),
                    },
                );
            }
            Err(e) => {
                tracing::error!(error = %e, to = %request.to, "Rate limit check failed");
                return SendOutcome::failed(0, SendError::RateLimitUnavailable(e.to_string()));
            }
        }

        let max_retries = self.retry.max_retries();
        let mut last_error = None;

        for attempt in 1..=max_retries {
            match self.attempt(&request).await {
                Ok(()) => {
                    self.record_delivery(&request, attempt).await;
                    return SendOutcome::delivered(attempt);
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        kind = e.kind(),
                        to = %request.to,
                        subject = %request.subject,
                        template = ?template,
                        attempt,
                        max_retries,
                        "Failed to send email"
                    );
                    last_error = Some(e);

                    if self.retry.should_retry(attempt) {
                        tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    }
                }
            }
        }

        SendOutcome {
            success: false,
            attempts: max_retries,
            error: last_error,
        }
    }

    async fn attempt(&self, request: &SendRequest) -> Result<(), SendError> {
        let html = match &request.body {
            MailBody::Html(html) => html.clone(),
            MailBody::Template { id, data } => self.renderer.render(id, data)?,
        };

        let attachments = load_attachments(&request.attachments)
            .await
            .map_err(|e| SendError::Attachment(e.to_string()))?;

        let message = OutboundMessage {
            from: self.from.clone(),
            reply_to: self.reply_to.clone(),
            to: vec![request.to.clone()],
            subject: request.subject.clone(),
            html,
            attachments,
        };

        self.transport.deliver(&message).await?;
        Ok(())
    }

    async fn record_delivery(&self, request: &SendRequest, attempt: u32) {
        let template = request.template_id();

        match self.rate_limiter.increment().await {
            Ok(_) => self.events.emit(SendEvent::new(
                &request.to,
                &request.subject,
                template,
                attempt,
            )),
            // Without a counted send there must be no event
            Err(e) => tracing::error!(
                error = %e,
                to = %request.to,
                "Email delivered but rate limit counter was not updated"
            ),
        }

        tracing::info!(
            to = %request.to,
            subject = %request.subject,
            template = ?template,
            attempt,
            "Email sent successfully"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::Instant;

    use crate::error::AppError;
    use crate::mail::template::TeraRenderer;
    use crate::mail::TransportError;
    use crate::rate_limit::{CounterStore, MemoryCounterStore};

    /// Transport that plays back scripted results, then succeeds
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<(), TransportError>>>,
        calls: AtomicU32,
        delivered: Mutex<Vec<OutboundMessage>>,
    }

    impl ScriptedTransport {
        fn failing(times: usize) -> Self {
            let script = (0..times)
                .map(|i| Err(TransportError::Delivery(format!("connection reset #{}", i + 1))))
                .collect();
            Self {
                script: Mutex::new(script),
                ..Default::default()
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn deliver(&self, message: &OutboundMessage) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            if next.is_ok() {
                self.delivered.lock().unwrap().push(message.clone());
            }
            next
        }
    }

    struct Harness {
        pipeline: SendPipeline,
        transport: Arc<ScriptedTransport>,
        limiter: RateLimiter,
        events: EventBus,
    }

    /// Counter store whose reads or writes fail on demand
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryCounterStore,
        fail_reads: bool,
        fail_writes: bool,
    }

    fn store_down() -> AppError {
        AppError::RedisError("Connection refused".to_string())
    }

    #[async_trait]
    impl CounterStore for FaultyStore {
        async fn get(&self, key: &str) -> crate::error::Result<Option<u64>> {
            if self.fail_reads {
                return Err(store_down());
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: u64, ttl: Duration) -> crate::error::Result<()> {
            if self.fail_writes {
                return Err(store_down());
            }
            self.inner.set(key, value, ttl).await
        }

        async fn ttl(&self, key: &str) -> crate::error::Result<Option<Duration>> {
            self.inner.ttl(key).await
        }

        async fn remove(&self, key: &str) -> crate::error::Result<()> {
            self.inner.remove(key).await
        }
    }

    fn harness(transport: ScriptedTransport, max: u64, delay: Duration) -> Harness {
        harness_with_store(Arc::new(MemoryCounterStore::new()), transport, max, delay)
    }

    fn harness_with_store(
        store: Arc<dyn CounterStore>,
        transport: ScriptedTransport,
        max: u64,
        delay: Duration,
    ) -> Harness {
        let transport = Arc::new(transport);
        let limiter = RateLimiter::new(store, max, Duration::from_secs(3600));
        let mut renderer = TeraRenderer::empty();
        renderer
            .add_raw_template("emails.welcome", "<h1>Hello {{ name }}</h1>")
            .unwrap();
        let events = EventBus::new();

        let pipeline = SendPipeline::new(
            limiter.clone(),
            transport.clone(),
            Arc::new(renderer),
            events.clone(),
            RetryPolicy::fixed(3, delay),
            MailAddress::new("hello@example.com", Some("Example".to_string())),
        );

        Harness {
            pipeline,
            transport,
            limiter,
            events,
        }
    }

    #[tokio::test]
    async fn test_invalid_address_skips_transport() {
        let h = harness(ScriptedTransport::default(), 100, Duration::ZERO);

        let outcome = h
            .pipeline
            .send_html("not-an-email", "Hi", "<p>hi</p>", Vec::new())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 0);
        assert!(matches!(outcome.error, Some(SendError::InvalidAddress(_))));
        assert_eq!(h.transport.calls(), 0);
        assert_eq!(h.limiter.current_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_second_send() {
        let h = harness(ScriptedTransport::default(), 1, Duration::ZERO);

        let first = h
            .pipeline
            .send_html("user@example.com", "Hi", "<p>hi</p>", Vec::new())
            .await;
        assert!(first.success);
        assert_eq!(h.limiter.current_count().await.unwrap(), 1);

        let second = h
            .pipeline
            .send_html("other@example.com", "Hi", "<p>hi</p>", Vec::new())
            .await;
        assert!(!second.success);
        assert_eq!(second.attempts, 0);
        assert!(matches!(second.error, Some(SendError::RateLimited { max: 1 })));
        assert_eq!(h.transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_on_admission_fails_closed() {
        let store = FaultyStore {
            fail_reads: true,
            ..Default::default()
        };
        let h = harness_with_store(
            Arc::new(store),
            ScriptedTransport::default(),
            100,
            Duration::ZERO,
        );
        let mut rx = h.events.subscribe();

        let outcome = h
            .pipeline
            .send_html("user@example.com", "Hi", "<p>hi</p>", Vec::new())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 0);
        assert!(matches!(
            outcome.error,
            Some(SendError::RateLimitUnavailable(_))
        ));
        assert_eq!(h.transport.calls(), 0);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_store_failure_after_delivery_reports_success_without_event() {
        let store = FaultyStore {
            fail_writes: true,
            ..Default::default()
        };
        let h = harness_with_store(
            Arc::new(store),
            ScriptedTransport::default(),
            100,
            Duration::ZERO,
        );
        let mut rx = h.events.subscribe();

        let outcome = h
            .pipeline
            .send_html("user@example.com", "Hi", "<p>hi</p>", Vec::new())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.error.is_none());
        assert_eq!(h.transport.calls(), 1);
        assert_eq!(h.limiter.current_count().await.unwrap(), 0);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_after_fixed_delays() {
        let h = harness(ScriptedTransport::failing(2), 100, Duration::from_secs(5));
        let started = Instant::now();

        let outcome = h
            .pipeline
            .send_html("user@example.com", "Hi", "<p>hi</p>", Vec::new())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.error.is_none());
        assert_eq!(h.transport.calls(), 3);
        assert_eq!(h.limiter.current_count().await.unwrap(), 1);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_do_not_count() {
        let h = harness(ScriptedTransport::failing(3), 100, Duration::from_secs(5));
        let mut rx = h.events.subscribe();
        let started = Instant::now();

        let outcome = h
            .pipeline
            .send_html("user@example.com", "Hi", "<p>hi</p>", Vec::new())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        match outcome.error {
            Some(SendError::Transport(TransportError::Delivery(msg))) => {
                assert_eq!(msg, "connection reset #3")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(h.limiter.current_count().await.unwrap(), 0);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        // two delays, none after the final attempt
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_success_emits_single_event() {
        let h = harness(ScriptedTransport::failing(1), 100, Duration::ZERO);
        let mut rx = h.events.subscribe();

        let outcome = h
            .pipeline
            .send_html("user@example.com", "Report", "<p>hi</p>", Vec::new())
            .await;
        assert!(outcome.success);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name, "email.sent");
        assert_eq!(event.to, "user@example.com");
        assert_eq!(event.subject, "Report");
        assert_eq!(event.attempt, 2);
        assert_eq!(event.template, None);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_template_send_renders_body() {
        let h = harness(ScriptedTransport::default(), 100, Duration::ZERO);
        let mut rx = h.events.subscribe();
        let mut data = TemplateData::new();
        data.insert("name".to_string(), json!("Ada"));

        let outcome = h
            .pipeline
            .send_template("user@example.com", "Welcome", "emails.welcome", data, Vec::new())
            .await;

        assert!(outcome.success);
        let delivered = h.transport.delivered.lock().unwrap();
        assert_eq!(delivered[0].html, "<h1>Hello Ada</h1>");
        assert_eq!(delivered[0].from.to_string(), "Example <hello@example.com>");

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name, "email.template.sent");
        assert_eq!(event.template.as_deref(), Some("emails.welcome"));
    }

    #[tokio::test]
    async fn test_template_failure_is_retried_without_transport() {
        let h = harness(ScriptedTransport::default(), 100, Duration::ZERO);

        let outcome = h
            .pipeline
            .send_template(
                "user@example.com",
                "Welcome",
                "emails.missing",
                TemplateData::new(),
                Vec::new(),
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(
            outcome.error.as_ref().map(SendError::kind),
            Some("template_render_failure")
        );
        assert_eq!(h.transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_attachment_is_skipped() {
        let h = harness(ScriptedTransport::default(), 100, Duration::ZERO);
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("invoice.txt");
        std::fs::write(&present, "total: 42").unwrap();

        let outcome = h
            .pipeline
            .send_html(
                "user@example.com",
                "Invoice",
                "<p>attached</p>",
                vec![present, dir.path().join("missing.pdf")],
            )
            .await;

        assert!(outcome.success);
        let delivered = h.transport.delivered.lock().unwrap();
        assert_eq!(delivered[0].attachments.len(), 1);
        assert_eq!(delivered[0].attachments[0].filename, "invoice.txt");
    }
}
