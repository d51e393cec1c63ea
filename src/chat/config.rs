//! Configuration types for the chat application.
//!
//! Settings come from four layers, highest precedence first: command-line
//! arguments parsed via `arrrg`, an optional YAML file named by `--config`,
//! the `CHATSTREAM_URL` and `CHATSTREAM_MODEL` environment variables, and the
//! built-in defaults.

use std::path::Path;
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::Deserialize;

use crate::client::{DEFAULT_ENDPOINT, ENDPOINT_ENV_VAR};
use crate::controller::DEFAULT_MODEL;
use crate::error::{Error, Result};

/// Environment variable consulted for the model.
pub const MODEL_ENV_VAR: &str = "CHATSTREAM_MODEL";

/// Greeting the transcript opens with unless configured otherwise.
pub const DEFAULT_GREETING: &str = "Hello! How can I help you today?";

/// Command-line arguments for the chatstream-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Model to use for chat.
    #[arrrg(optional, "Model to use (default: llava:13b)", "MODEL")]
    pub model: Option<String>,

    /// Endpoint to post prompts to.
    #[arrrg(optional, "Chat endpoint URL (default: http://localhost:8000/api/chat)", "URL")]
    pub url: Option<String>,

    /// Bound on a whole request, including the streamed reply.
    #[arrrg(optional, "Request timeout in seconds (default: none)", "SECONDS")]
    pub timeout_secs: Option<u64>,

    /// YAML file with default settings.
    #[arrrg(optional, "Path to a YAML config file", "PATH")]
    pub config: Option<String>,

    /// Greeting shown before the first prompt.
    #[arrrg(optional, "Opening assistant greeting (empty to disable)", "TEXT")]
    pub greeting: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Settings read from a YAML config file.  Every field is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub model: Option<String>,
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub greeting: Option<String>,
    pub color: Option<bool>,
}

impl ConfigFile {
    /// Parses a config file from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads and parses the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::io(format!("could not read config file {}: {e}", path.display()), e)
        })?;
        Self::from_yaml(&yaml)
    }
}

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after layering
/// arguments, file and environment over the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// The model to use for generating responses.
    pub model: String,

    /// The endpoint prompts are posted to.
    pub endpoint: String,

    /// Optional bound on each request.
    pub timeout: Option<Duration>,

    /// Assistant message the transcript opens with, if any.
    pub greeting: Option<String>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Model: llava:13b
    /// - Endpoint: http://localhost:8000/api/chat
    /// - Timeout: none
    /// - Greeting: "Hello! How can I help you today?"
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: None,
            greeting: Some(DEFAULT_GREETING.to_string()),
            use_color: true,
        }
    }

    /// Resolves the full configuration for the command line in `args`.
    pub fn load(args: ChatArgs) -> Result<Self> {
        let mut config = Self::new().with_env(|name| std::env::var(name).ok());
        if let Some(path) = args.config.as_deref() {
            config = config.with_file(ConfigFile::load(path)?);
        }
        config.with_args(args).validated()
    }

    /// Applies environment variables, looked up through `lookup`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(model) = lookup(MODEL_ENV_VAR) {
            self.model = model;
        }
        if let Some(endpoint) = lookup(ENDPOINT_ENV_VAR) {
            self.endpoint = endpoint;
        }
        self
    }

    /// Applies the settings present in a config file.
    pub fn with_file(mut self, file: ConfigFile) -> Self {
        if let Some(model) = file.model {
            self.model = model;
        }
        if let Some(url) = file.url {
            self.endpoint = url;
        }
        if let Some(secs) = file.timeout_secs {
            self.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(greeting) = file.greeting {
            self = self.with_greeting(greeting);
        }
        if let Some(color) = file.color {
            self.use_color = color;
        }
        self
    }

    /// Applies the settings given on the command line.
    pub fn with_args(mut self, args: ChatArgs) -> Self {
        if let Some(model) = args.model {
            self.model = model;
        }
        if let Some(url) = args.url {
            self.endpoint = url;
        }
        if let Some(secs) = args.timeout_secs {
            self.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(greeting) = args.greeting {
            self = self.with_greeting(greeting);
        }
        if args.no_color {
            self.use_color = false;
        }
        self
    }

    /// Checks the resolved values.
    pub fn validated(self) -> Result<Self> {
        if self.model.trim().is_empty() {
            return Err(Error::config("model must not be empty"));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(Error::config("timeout must be at least one second"));
        }
        url::Url::parse(&self.endpoint)
            .map_err(|e| Error::config(format!("invalid endpoint {:?}: {e}", self.endpoint)))?;
        Ok(self)
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the greeting; an empty greeting disables it.
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        let greeting = greeting.into();
        self.greeting = (!greeting.is_empty()).then_some(greeting);
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        ChatConfig::new().with_args(args)
    }
}
