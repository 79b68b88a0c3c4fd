//! Generation gate
//!
//! Wires the token store, guards, result cache and usage recorder around an
//! external generation backend:
//!
//! 1. admit: authorize + style validation + fingerprint and style guards
//! 2. caption via the caption cache (backend on miss)
//! 3. story prompt via the story cache (backend on miss)
//! 4. image generation
//! 5. commit (re-validated under the token lock), then a coalesced flush of
//!    the token file
//!
//! Nothing touches the token before step 5, so a backend failure never
//! charges a use.

use crate::auth::{check_token, AuthDecision, AuthorizationEngine};
use crate::cache::{CacheNamespace, ResultCache};
use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::event::{EventBus, GateEvent};
use crate::fingerprint::{fingerprint, story_key};
use crate::guard::{FingerprintGuard, StyleBudget};
use crate::models::{GenerationRecord, StyleId, StyleStatus, Token, TokenSummary};
use crate::provision::{provision, ProvisionRequest};
use crate::recorder::UsageRecorder;
use crate::store::TokenStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// External caption / prompt / image service
///
/// Calls are blocking and opaque: errors are surfaced as
/// `CollaboratorFailure` without interpretation, and any timeout policy
/// belongs in the implementation.
pub trait GenerationBackend: Send + Sync {
    fn describe_image(&self, image: &[u8]) -> anyhow::Result<String>;

    fn compose_prompt(
        &self,
        caption: &str,
        style: &StyleId,
        additional_text: &str,
    ) -> anyhow::Result<String>;

    /// Returns references (paths or URLs) to the generated images
    fn generate(&self, prompt: &str, style: &StyleId) -> anyhow::Result<Vec<String>>;
}

/// One inbound generation request
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub token_id: String,
    /// Blank selects the theme's default style
    pub style: String,
    pub image: Vec<u8>,
    pub additional_text: String,
}

impl GenerationRequest {
    pub fn new(token_id: impl Into<String>, image: Vec<u8>) -> Self {
        Self {
            token_id: token_id.into(),
            image,
            ..Default::default()
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    pub fn with_additional_text(mut self, text: impl Into<String>) -> Self {
        self.additional_text = text.into();
        self
    }
}

/// A request that passed every pre-check
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub decision: AuthDecision,
    pub style: StyleId,
    pub image_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub token: TokenSummary,
    pub image_hash: String,
    pub style: StyleId,
    pub caption: String,
    pub prompt: String,
    pub output_files: Vec<String>,
    pub caption_cache_hit: bool,
    pub prompt_cache_hit: bool,
}

pub struct Gate {
    config: GateConfig,
    store: Arc<TokenStore>,
    cache: Arc<ResultCache>,
    auth: AuthorizationEngine,
    budget: StyleBudget,
    recorder: UsageRecorder,
    events: EventBus,
}

impl Gate {
    pub fn new(config: GateConfig, store: Arc<TokenStore>, cache: Arc<ResultCache>) -> Result<Self> {
        config.validate()?;

        let budget = StyleBudget::new(config.style_budget);
        Ok(Self {
            auth: AuthorizationEngine::new(Arc::clone(&store)),
            recorder: UsageRecorder::new(Arc::clone(&store), budget),
            budget,
            config,
            store,
            cache,
            events: EventBus::default(),
        })
    }

    /// Open the token file and cache database under `data_dir`
    pub fn open(data_dir: &Path, config: GateConfig) -> Result<Self> {
        let store = TokenStore::open(&config.tokens_path(data_dir))?;
        let cache = ResultCache::open(&config.cache_path(data_dir))?;
        Self::new(config, Arc::new(store), Arc::new(cache))
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn authorize(&self, token_id: &str, now: i64) -> Result<AuthDecision> {
        self.auth.authorize(token_id, now)
    }

    /// All pre-checks against one consistent view of the token. No side effects.
    pub fn admit(&self, token_id: &str, style: &str, image: &[u8], now: i64) -> Result<Admission> {
        let image_hash = fingerprint(image);

        let result = self.store.read(token_id, |token| {
            let decision = check_token(token, now)?;
            let style = self.config.catalog(token.theme)?.parse(style)?;
            FingerprintGuard::check(token, &image_hash)?;
            self.budget.check(token, &style)?;
            Ok(Admission {
                decision,
                style,
                image_hash: image_hash.clone(),
            })
        });

        match &result {
            Ok(admission) => {
                debug!(token_id, style = %admission.style, "Request admitted");
                self.events.publish(GateEvent::Admitted {
                    token_id: token_id.to_string(),
                });
            }
            Err(e) => self.report_failure(token_id, e),
        }

        result
    }

    /// Run one generation end to end
    pub fn process(
        &self,
        request: &GenerationRequest,
        backend: &dyn GenerationBackend,
        now: i64,
    ) -> Result<GenerationOutcome> {
        let admission = self.admit(&request.token_id, &request.style, &request.image, now)?;

        self.generate_and_commit(request, &admission, backend, now)
            .inspect_err(|e| self.report_failure(&request.token_id, e))
    }

    fn generate_and_commit(
        &self,
        request: &GenerationRequest,
        admission: &Admission,
        backend: &dyn GenerationBackend,
        now: i64,
    ) -> Result<GenerationOutcome> {
        // The fingerprint doubles as the caption cache key
        let caption = self
            .cache
            .get_or_compute(CacheNamespace::Caption, &admission.image_hash, || {
                backend
                    .describe_image(&request.image)
                    .map_err(|e| GateError::collaborator("caption", e))
            })?;
        if caption.hit {
            self.events.publish(GateEvent::CacheHit {
                namespace: CacheNamespace::Caption,
            });
        }

        let prompt_key = story_key(
            &caption.value,
            admission.style.as_str(),
            &request.additional_text,
        );
        let prompt = self
            .cache
            .get_or_compute(CacheNamespace::Story, &prompt_key, || {
                backend
                    .compose_prompt(&caption.value, &admission.style, &request.additional_text)
                    .map_err(|e| GateError::collaborator("story prompt", e))
            })?;
        if prompt.hit {
            self.events.publish(GateEvent::CacheHit {
                namespace: CacheNamespace::Story,
            });
        }

        let output_files = backend
            .generate(&prompt.value, &admission.style)
            .map_err(|e| GateError::collaborator("image generation", e))?;

        let record = GenerationRecord::new(
            admission.image_hash.clone(),
            admission.style.clone(),
            now,
            caption.hit,
            output_files.clone(),
        );
        let token = self.recorder.commit_record(&request.token_id, record)?;

        // The charge is already applied in memory; a failed write is retried on the next flush
        if let Err(e) = self.store.flush_pending() {
            warn!(token_id = %token.id, error = %e, "Failed to flush token store after commit");
        }

        self.events.publish(GateEvent::Committed {
            token_id: token.id.clone(),
            usage_count: token.usage_count,
            max_usage_count: token.max_usage_count,
        });

        Ok(GenerationOutcome {
            token: TokenSummary::from_token(&token, now, self.budget.budget()),
            image_hash: admission.image_hash.clone(),
            style: admission.style.clone(),
            caption: caption.value,
            prompt: prompt.value,
            output_files,
            caption_cache_hit: caption.hit,
            prompt_cache_hit: prompt.hit,
        })
    }

    fn report_failure(&self, token_id: &str, error: &GateError) {
        if error.is_rejection() {
            debug!(token_id, kind = error.kind(), "Request rejected: {}", error);
        } else {
            warn!(token_id, kind = error.kind(), error = %error, "Request failed");
        }
        self.events.publish(GateEvent::Rejected {
            token_id: token_id.to_string(),
            kind: error.kind(),
        });
    }

    /// Status view; only requires the access window to be open
    pub fn summary(&self, token_id: &str, now: i64) -> Result<TokenSummary> {
        let token = self.auth.validate_access(token_id, now)?;
        Ok(TokenSummary::from_token(&token, now, self.budget.budget()))
    }

    /// Style picker state for a token's theme
    pub fn style_availability(&self, token_id: &str, now: i64) -> Result<Vec<(StyleId, StyleStatus)>> {
        let token = self.auth.validate_access(token_id, now)?;
        let catalog = self.config.catalog(token.theme)?;
        Ok(self.budget.availability(&token, &catalog))
    }

    /// Create and store a batch of tokens; ids already present are skipped
    pub fn provision(&self, request: &ProvisionRequest, now: DateTime<Utc>) -> Result<Vec<Token>> {
        let inserted: Vec<Token> = provision(request, now)?
            .into_iter()
            .filter(|token| self.store.insert_new(token.clone()))
            .collect();

        self.store.flush()?;
        self.events.publish(GateEvent::Provisioned {
            count: inserted.len(),
        });
        Ok(inserted)
    }

    /// Flush the token file and close the cache database
    pub fn shutdown(self) -> Result<()> {
        self.store.flush()?;

        match Arc::try_unwrap(self.cache) {
            Ok(cache) => cache.close()?,
            Err(_) => debug!("Result cache still shared, leaving it open"),
        }

        info!("Gate shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Theme;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeBackend {
        captions: AtomicUsize,
        prompts: AtomicUsize,
        fail_generate: bool,
    }

    impl GenerationBackend for FakeBackend {
        fn describe_image(&self, image: &[u8]) -> anyhow::Result<String> {
            self.captions.fetch_add(1, Ordering::SeqCst);
            Ok(format!("caption of {} bytes", image.len()))
        }

        fn compose_prompt(&self, caption: &str, style: &StyleId, extra: &str) -> anyhow::Result<String> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{} in {} style {}", caption, style, extra))
        }

        fn generate(&self, _prompt: &str, style: &StyleId) -> anyhow::Result<Vec<String>> {
            if self.fail_generate {
                anyhow::bail!("backend unavailable");
            }
            Ok(vec![format!("out/{}-1.png", style), format!("out/{}-2.png", style)])
        }
    }

    fn gate(dir: &Path, token: Token) -> Gate {
        let gate = Gate::open(dir, GateConfig::default()).unwrap();
        gate.store().insert_new(token);
        gate
    }

    fn token() -> Token {
        Token::new("t1", Theme::Ice, 3, 0, 1_000, 2_000)
    }

    #[test]
    fn test_process_happy_path() {
        let dir = tempdir().unwrap();
        let gate = gate(dir.path(), token());
        let backend = FakeBackend::default();

        let request = GenerationRequest::new("t1", b"photo".to_vec()).with_style("ink");
        let outcome = gate.process(&request, &backend, 100).unwrap();

        assert_eq!(outcome.style.as_str(), "ink");
        assert_eq!(outcome.caption, "caption of 5 bytes");
        assert!(!outcome.caption_cache_hit);
        assert_eq!(outcome.output_files.len(), 2);
        assert_eq!(outcome.token.usage_count, 1);
        assert_eq!(outcome.token.generation_records[0].output_files, outcome.output_files);

        // Persisted
        let reopened = TokenStore::open(&dir.path().join("tokens.json")).unwrap();
        assert_eq!(reopened.get("t1").unwrap().usage_count, 1);
    }

    #[test]
    fn test_blank_style_uses_default() {
        let dir = tempdir().unwrap();
        let gate = gate(dir.path(), token());

        let admission = gate.admit("t1", "", b"photo", 100).unwrap();
        assert_eq!(admission.style.as_str(), "classic");
        assert_eq!(admission.decision.theme, Theme::Ice);
    }

    #[test]
    fn test_unknown_style_rejected() {
        let dir = tempdir().unwrap();
        let gate = gate(dir.path(), token());

        let err = gate.admit("t1", "sepia", b"photo", 100).unwrap_err();
        assert_eq!(err.kind(), "unknown_style");
    }

    #[test]
    fn test_backend_failure_charges_nothing() {
        let dir = tempdir().unwrap();
        let gate = gate(dir.path(), token());
        let backend = FakeBackend {
            fail_generate: true,
            ..Default::default()
        };

        let request = GenerationRequest::new("t1", b"photo".to_vec());
        let err = gate.process(&request, &backend, 100).unwrap_err();
        assert!(matches!(
            err,
            GateError::CollaboratorFailure {
                stage: "image generation",
                ..
            }
        ));

        let stored = gate.store().get("t1").unwrap();
        assert_eq!(stored.usage_count, 0);
        assert!(stored.used_image_hashes.is_empty());
        assert!(stored.used_styles.is_empty());
    }

    #[test]
    fn test_same_caption_new_style_reuses_caption_cache() {
        let dir = tempdir().unwrap();
        let gate = gate(dir.path(), Token::new("t1", Theme::Ice, 5, 0, 1_000, 2_000));
        gate.store()
            .insert_new(Token::new("t2", Theme::Ice, 5, 0, 1_000, 2_000));
        let backend = FakeBackend::default();

        gate.process(&GenerationRequest::new("t1", b"photo".to_vec()), &backend, 10)
            .unwrap();
        let second = gate
            .process(&GenerationRequest::new("t2", b"photo".to_vec()), &backend, 11)
            .unwrap();

        assert!(second.caption_cache_hit);
        assert!(second.prompt_cache_hit);
        assert_eq!(backend.captions.load(Ordering::SeqCst), 1);
        assert_eq!(backend.prompts.load(Ordering::SeqCst), 1);
        assert!(gate.store().get("t2").unwrap().generation_records[0].cache_hit);
    }

    #[test]
    fn test_summary_and_availability() {
        let dir = tempdir().unwrap();
        let gate = gate(dir.path(), token());
        gate.process(
            &GenerationRequest::new("t1", b"photo".to_vec()).with_style("anime"),
            &FakeBackend::default(),
            100,
        )
        .unwrap();

        let summary = gate.summary("t1", 1_500).unwrap();
        assert!(!summary.is_usage_valid);
        assert!(summary.is_access_valid);
        assert!(summary.can_use_more_styles);

        let availability = gate.style_availability("t1", 100).unwrap();
        let anime = availability
            .iter()
            .find(|(style, _)| style.as_str() == "anime")
            .unwrap();
        assert_eq!(anime.1, StyleStatus::Used);

        assert_eq!(gate.summary("t1", 2_001).unwrap_err().kind(), "expired");
    }

    #[test]
    fn test_provision_through_gate() {
        let dir = tempdir().unwrap();
        let gate = Gate::open(dir.path(), GateConfig::default()).unwrap();
        let now = chrono::Utc::now();

        let request = ProvisionRequest {
            count: 3,
            ..Default::default()
        };
        assert_eq!(gate.provision(&request, now).unwrap().len(), 3);
        // Same instant, same ids
        assert!(gate.provision(&request, now).unwrap().is_empty());
        assert_eq!(gate.store().len(), 3);

        gate.shutdown().unwrap();
        assert_eq!(
            TokenStore::open(&dir.path().join("tokens.json")).unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn test_events_for_commit_and_rejection() {
        let dir = tempdir().unwrap();
        let gate = gate(dir.path(), token());
        let mut rx = gate.events().subscribe();
        let backend = FakeBackend::default();

        let request = GenerationRequest::new("t1", b"photo".to_vec());
        gate.process(&request, &backend, 100).unwrap();
        assert!(gate.process(&request, &backend, 101).is_err());

        assert!(matches!(rx.recv().await.unwrap(), GateEvent::Admitted { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            GateEvent::Committed { usage_count: 1, .. }
        ));
        assert_eq!(
            rx.recv().await.unwrap(),
            GateEvent::Rejected {
                token_id: "t1".into(),
                kind: "duplicate_image"
            }
        );
    }
}
