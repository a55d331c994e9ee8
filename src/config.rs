//! Engine configuration with environment overrides.
//!
//! Defaults are compiled in; any field can be overridden through `RAGWELD_*`
//! environment variables (resolved once via `dotenvy`, so a local `.env` file
//! works in development).

use std::time::Duration;

/// Tuning for Reciprocal Rank Fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    /// Smoothing constant `k` in `1/(k + rank)`. The default of 60 follows
    /// the original RRF paper (Cormack, Clarke, Buettcher; SIGIR 2009).
    pub k: f64,
    /// Weight applied to the vector-index contribution.
    pub vector_weight: f64,
    /// Weight applied to the lexical-index contribution.
    pub lexical_weight: f64,
    /// Top-K requested from the vector index.
    pub vector_k: usize,
    /// Top-K requested from the lexical index; independent of `vector_k`.
    pub lexical_k: usize,
    /// When set, a single unreachable index degrades the query to the
    /// surviving modality instead of failing the whole call.
    pub allow_degraded: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        FusionConfig {
            k: resolve_f64("RAGWELD_RRF_K", 60.0),
            vector_weight: resolve_f64("RAGWELD_VECTOR_WEIGHT", 1.0),
            lexical_weight: resolve_f64("RAGWELD_LEXICAL_WEIGHT", 1.0),
            vector_k: resolve_usize("RAGWELD_VECTOR_TOP_K", 20),
            lexical_k: resolve_usize("RAGWELD_LEXICAL_TOP_K", 20),
            allow_degraded: false,
        }
    }
}

impl FusionConfig {
    #[must_use]
    pub fn with_k(mut self, k: f64) -> Self {
        self.k = k;
        self
    }

    #[must_use]
    pub fn with_weights(mut self, vector_weight: f64, lexical_weight: f64) -> Self {
        self.vector_weight = vector_weight;
        self.lexical_weight = lexical_weight;
        self
    }

    #[must_use]
    pub fn with_top_k(mut self, vector_k: usize, lexical_k: usize) -> Self {
        self.vector_k = vector_k;
        self.lexical_k = lexical_k;
        self
    }

    #[must_use]
    pub fn with_degraded_mode(mut self, allow: bool) -> Self {
        self.allow_degraded = allow;
        self
    }
}

/// Tuning for the ingestion pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionConfig {
    /// Chunk size bound handed to the conversion collaborator.
    pub max_tokens: usize,
    /// Attempts per embedding call before the failure is surfaced.
    pub embed_max_attempts: u32,
    /// Base delay for exponential backoff between embedding attempts.
    pub embed_backoff: Duration,
    /// Overall budget for conversion plus embedding; `None` disables the
    /// time-box.
    pub timeout: Option<Duration>,
    /// Completed registry entries retained for inspection before eviction.
    pub registry_retain: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        IngestionConfig {
            max_tokens: resolve_usize("RAGWELD_MAX_TOKENS", 512),
            embed_max_attempts: resolve_usize("RAGWELD_EMBED_MAX_ATTEMPTS", 3) as u32,
            embed_backoff: Duration::from_millis(resolve_usize(
                "RAGWELD_EMBED_BACKOFF_MS",
                100,
            ) as u64),
            timeout: None,
            registry_retain: resolve_usize("RAGWELD_REGISTRY_RETAIN", 64),
        }
    }
}

impl IngestionConfig {
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_embed_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.embed_max_attempts = max_attempts;
        self.embed_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_registry_retain(mut self, retain: usize) -> Self {
        self.registry_retain = retain;
        self
    }
}

/// Top-level configuration bundle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalConfig {
    pub ingestion: IngestionConfig,
    pub fusion: FusionConfig,
}

fn resolve_usize(key: &str, default: usize) -> usize {
    dotenvy::dotenv().ok();
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn resolve_f64(key: &str, default: f64) -> f64 {
    dotenvy::dotenv().ok();
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
