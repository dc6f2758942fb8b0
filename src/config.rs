//! Configuration types for a parallex run.
//!
//! All run behaviour is controlled through [`ParallexConfig`], built via its
//! [`ParallexConfigBuilder`]. Nothing in the pipeline reads the process
//! environment on its own: the model identifier, limits and prompt are all
//! threaded through this value, so two runs with equal configs behave the
//! same regardless of ambient state.

use crate::client::RemoteJobClient;
use crate::error::ParallexError;
use crate::output::OrderedDocument;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One mebibyte.
const MIB: u64 = 1024 * 1024;

/// Hook invoked with the finished document before the run returns.
pub type PostProcessHook = Arc<dyn Fn(&OrderedDocument) + Send + Sync>;

/// Configuration for a PDF-to-Markdown batch run.
///
/// # Example
/// ```rust
/// use parallex::{BatchGranularity, ParallexConfig};
///
/// let config = ParallexConfig::builder()
///     .model("gpt-4o-batch")
///     .concurrency(10)
///     .granularity(BatchGranularity::PerPage)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 10);
/// ```
#[derive(Clone)]
pub struct ParallexConfig {
    /// Model (or Azure deployment) name written into every request line.
    ///
    /// Required at run time. The CLI fills it from `AZURE_OPENAI_API_DEPLOYMENT`
    /// when the flag is omitted.
    pub model: Option<String>,

    /// Maximum number of remote operations in flight per pipeline phase
    /// (upload, submit, wait). Default: 20.
    pub concurrency: usize,

    /// Prompt sent with every page image. If None, uses [`crate::prompts::DEFAULT_PROMPT`].
    pub prompt_text: Option<String>,

    /// Advisory ceiling for one upload unit in bytes. Default: 150 MiB.
    ///
    /// The packer checks the size before appending, so a unit may exceed this
    /// by at most one serialised page.
    pub max_unit_bytes: u64,

    /// Hard ceiling for a single serialised page in bytes. Default: 200 MiB.
    ///
    /// A page that cannot fit into any upload is a configuration error.
    pub upload_limit_bytes: u64,

    /// How many pages go into one remote job. Default: [`BatchGranularity::WholeTrace`].
    pub granularity: BatchGranularity,

    /// `max_tokens` written into each request line. Default: 2000.
    pub max_tokens: u32,

    /// Status polling schedule for submitted jobs.
    pub poll: PollPolicy,

    /// Rendering DPI. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Maximum rendered image dimension in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Page separator used by [`OrderedDocument::to_markdown`]. Default: None.
    pub page_separator: PageSeparator,

    /// Pre-constructed remote client. If None, one is built from the environment.
    pub client: Option<Arc<dyn RemoteJobClient>>,

    /// Called with the ordered document once every page is in.
    pub post_process: Option<PostProcessHook>,

    /// Optional observer for run and job events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ParallexConfig {
    fn default() -> Self {
        Self {
            model: None,
            concurrency: 20,
            prompt_text: None,
            max_unit_bytes: 150 * MIB,
            upload_limit_bytes: 200 * MIB,
            granularity: BatchGranularity::default(),
            max_tokens: 2000,
            poll: PollPolicy::default(),
            dpi: 150,
            max_rendered_pixels: 2000,
            password: None,
            download_timeout_secs: 120,
            page_separator: PageSeparator::default(),
            client: None,
            post_process: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ParallexConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallexConfig")
            .field("model", &self.model)
            .field("concurrency", &self.concurrency)
            .field("prompt_text", &self.prompt_text.as_ref().map(|p| p.len()))
            .field("max_unit_bytes", &self.max_unit_bytes)
            .field("upload_limit_bytes", &self.upload_limit_bytes)
            .field("granularity", &self.granularity)
            .field("max_tokens", &self.max_tokens)
            .field("poll", &self.poll)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("page_separator", &self.page_separator)
            .field("client", &self.client.as_ref().map(|_| "<dyn RemoteJobClient>"))
            .field("post_process", &self.post_process.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

impl ParallexConfig {
    /// Create a new builder for `ParallexConfig`.
    pub fn builder() -> ParallexConfigBuilder {
        ParallexConfigBuilder {
            config: Self::default(),
        }
    }

    /// The prompt sent with each page.
    pub fn prompt(&self) -> &str {
        self.prompt_text
            .as_deref()
            .unwrap_or(crate::prompts::DEFAULT_PROMPT)
    }

    /// The configured model, or a configuration error when it is unset.
    pub fn require_model(&self) -> Result<&str, ParallexError> {
        match self.model.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => Ok(m),
            _ => Err(ParallexError::InvalidConfig(
                "No model configured. Pass --model or set AZURE_OPENAI_API_DEPLOYMENT.".into(),
            )),
        }
    }

    /// Re-run the builder's checks; used by entry points that accept a
    /// config whose public fields may have been edited after `build()`.
    pub fn validate(&self) -> Result<(), ParallexError> {
        if self.concurrency == 0 {
            return Err(ParallexError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if self.dpi < 72 || self.dpi > 400 {
            return Err(ParallexError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                self.dpi
            )));
        }
        if self.max_unit_bytes == 0 {
            return Err(ParallexError::InvalidConfig(
                "max_unit_bytes must be > 0".into(),
            ));
        }
        if self.upload_limit_bytes < self.max_unit_bytes {
            return Err(ParallexError::InvalidConfig(format!(
                "upload_limit_bytes ({}) must be ≥ max_unit_bytes ({})",
                self.upload_limit_bytes, self.max_unit_bytes
            )));
        }
        self.poll.validate()
    }
}

/// Builder for [`ParallexConfig`].
pub struct ParallexConfigBuilder {
    config: ParallexConfig,
}

impl fmt::Debug for ParallexConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallexConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ParallexConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    /// Unlike the other numeric setters this does not clamp: a zero limit is
    /// reported by [`build`](Self::build).
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn prompt_text(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt_text = Some(prompt.into());
        self
    }

    pub fn max_unit_bytes(mut self, bytes: u64) -> Self {
        self.config.max_unit_bytes = bytes;
        self
    }

    pub fn upload_limit_bytes(mut self, bytes: u64) -> Self {
        self.config.upload_limit_bytes = bytes;
        self
    }

    pub fn granularity(mut self, granularity: BatchGranularity) -> Self {
        self.config.granularity = granularity;
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn poll(mut self, policy: PollPolicy) -> Self {
        self.config.poll = policy;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn client(mut self, client: Arc<dyn RemoteJobClient>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn post_process(mut self, hook: PostProcessHook) -> Self {
        self.config.post_process = Some(hook);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ParallexConfig, ParallexError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How pages are grouped into remote jobs.
///
/// Both shapes go through the same packer, scheduler and waiter; only the
/// sealing rule differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchGranularity {
    /// Fill each upload unit up to `max_unit_bytes`. Fewest jobs. (default)
    #[default]
    WholeTrace,
    /// One upload unit, and therefore one job, per page.
    PerPage,
}

/// Status polling schedule for a submitted job.
///
/// The first poll happens immediately; after each non-terminal answer the
/// waiter sleeps `interval`, then multiplies it by `multiplier` up to
/// `max_interval`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(60),
            multiplier: 1.5,
        }
    }
}

impl PollPolicy {
    /// A constant interval with no backoff.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
        }
    }

    /// The interval that follows `current`, saturating at `max_interval`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .map_or(self.max_interval, |next| next.min(self.max_interval))
    }

    pub fn validate(&self) -> Result<(), ParallexError> {
        if self.initial_interval.is_zero() {
            return Err(ParallexError::InvalidConfig(
                "Poll interval must be > 0".into(),
            ));
        }
        if self.max_interval < self.initial_interval {
            return Err(ParallexError::InvalidConfig(
                "Maximum poll interval must be ≥ the initial interval".into(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ParallexError::InvalidConfig(format!(
                "Poll multiplier must be a finite value ≥ 1.0, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}

/// How to separate pages in assembled Markdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// No separator; pages joined with "\n\n". (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator string placed before the given page (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
