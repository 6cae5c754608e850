use thiserror::Error;

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(&'static str),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing API key: pass --api-key or set the {0} environment variable")]
    MissingApiKey(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("no dialogue to summarize")]
    EmptyDialogue,

    #[error("not enough dialogue to summarize ({dialogue} messages)")]
    InsufficientContent { dialogue: usize },

    #[error("template render error: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error(transparent)]
    Provider(#[from] LLMError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Provider(#[from] LLMError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Summarize(#[from] SummarizeError),

    #[error("terminal I/O error: {0}")]
    Io(#[from] std::io::Error),
}
