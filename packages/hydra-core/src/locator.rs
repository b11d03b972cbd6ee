//! Download locators, start requests and backend dispatch

use crate::error::{DownloadError, Result};
use serde::{Deserialize, Serialize};

/// Externally supplied identifier of a logical download ("game")
pub type JobId = i64;

/// What to fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Locator {
    /// BitTorrent magnet URI
    Magnet { uri: String },
    /// One HTTP(S) link
    SingleUrl {
        url: String,
        header: Option<String>,
        filename: Option<String>,
    },
    /// Several links merged into one logical job
    MultiUrl {
        urls: Vec<String>,
        header: Option<String>,
        filename: Option<String>,
        total_size: Option<u64>,
    },
}

/// Controller family a locator is dispatched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Http,
    MultiLink,
    Torrent,
    Debrid,
}

impl Locator {
    pub fn magnet(uri: impl Into<String>) -> Self {
        Locator::Magnet { uri: uri.into() }
    }

    pub fn single(url: impl Into<String>) -> Self {
        Locator::SingleUrl {
            url: url.into(),
            header: None,
            filename: None,
        }
    }

    pub fn multi(urls: Vec<String>) -> Self {
        Locator::MultiUrl {
            urls,
            header: None,
            filename: None,
            total_size: None,
        }
    }

    /// Build a locator from the loosely typed `url` field of a start payload
    ///
    /// A JSON array becomes a multi-link locator, a string starting with
    /// `magnet:` a magnet, any other string a single link.
    pub fn from_url_value(
        url: &serde_json::Value,
        header: Option<String>,
        filename: Option<String>,
        total_size: Option<u64>,
    ) -> Result<Self> {
        let locator = match url {
            serde_json::Value::Array(items) => {
                let urls = items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            DownloadError::invalid_locator("URL list entries must be strings")
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Locator::MultiUrl {
                    urls,
                    header,
                    filename,
                    total_size,
                }
            }
            serde_json::Value::String(s) if is_magnet(s) => Locator::magnet(s.clone()),
            serde_json::Value::String(s) => Locator::SingleUrl {
                url: s.clone(),
                header,
                filename,
            },
            other => {
                return Err(DownloadError::invalid_locator(format!(
                    "Unsupported url value: {}",
                    other
                )))
            }
        };
        locator.validate()?;
        Ok(locator)
    }

    /// Reject locators no backend could act on
    pub fn validate(&self) -> Result<()> {
        match self {
            Locator::Magnet { uri } => {
                if !is_magnet(uri) || !uri.contains("xt=") {
                    return Err(DownloadError::invalid_locator(format!(
                        "Malformed magnet URI: {}",
                        uri
                    )));
                }
            }
            Locator::SingleUrl { url, .. } => validate_link(url)?,
            Locator::MultiUrl { urls, .. } => {
                if urls.is_empty() {
                    return Err(DownloadError::invalid_locator("Empty URL list"));
                }
                for url in urls {
                    validate_link(url)?;
                }
            }
        }
        Ok(())
    }

    /// Short human-readable form for logs
    pub fn describe(&self) -> String {
        match self {
            Locator::Magnet { uri } => uri.chars().take(60).collect(),
            Locator::SingleUrl { url, .. } => url.clone(),
            Locator::MultiUrl { urls, .. } => format!("{} links", urls.len()),
        }
    }
}

fn is_magnet(s: &str) -> bool {
    s.get(..7)
        .map_or(false, |scheme| scheme.eq_ignore_ascii_case("magnet:"))
}

fn validate_link(url: &str) -> Result<()> {
    let trimmed = url.trim();
    if trimmed.is_empty() || !trimmed.contains("://") || is_magnet(trimmed) {
        return Err(DownloadError::invalid_locator(format!(
            "Malformed download link: {:?}",
            url
        )));
    }
    Ok(())
}

/// Per-job knobs that travel with a start request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {
    /// Restrict a torrent to these file indices
    #[serde(default)]
    pub file_indices: Option<Vec<usize>>,

    /// Route a magnet through the debrid caching service
    #[serde(default)]
    pub use_debrid: bool,

    /// Add the torrent in upload-only mode (resume seeding)
    #[serde(default)]
    pub seed_only: bool,

    /// Per-job HTTP rate cap in bytes per second
    #[serde(default)]
    pub max_download_rate: Option<u64>,
}

impl StartOptions {
    pub fn with_file_indices(mut self, indices: Vec<usize>) -> Self {
        self.file_indices = Some(indices);
        self
    }

    pub fn with_debrid(mut self) -> Self {
        self.use_debrid = true;
        self
    }

    pub fn seeding(mut self) -> Self {
        self.seed_only = true;
        self
    }

    /// File subset to select, `None` when the whole torrent is wanted
    pub fn selected_files(&self) -> Option<&[usize]> {
        self.file_indices
            .as_deref()
            .filter(|indices| !indices.is_empty())
    }
}

/// Everything a controller needs to (re)start a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub locator: Locator,
    pub save_path: String,
    #[serde(default)]
    pub options: StartOptions,
}

impl StartRequest {
    pub fn new(locator: Locator, save_path: impl Into<String>) -> Self {
        Self {
            locator,
            save_path: save_path.into(),
            options: StartOptions::default(),
        }
    }

    pub fn with_options(mut self, options: StartOptions) -> Self {
        self.options = options;
        self
    }

    /// Which controller family handles this request
    pub fn backend_kind(&self) -> BackendKind {
        dispatch_kind(&self.locator, &self.options)
    }
}

/// Map a locator shape to its controller family
pub fn dispatch_kind(locator: &Locator, options: &StartOptions) -> BackendKind {
    match locator {
        Locator::MultiUrl { .. } => BackendKind::MultiLink,
        Locator::Magnet { .. } if options.use_debrid => BackendKind::Debrid,
        Locator::Magnet { .. } => BackendKind::Torrent,
        Locator::SingleUrl { .. } => BackendKind::Http,
    }
}

/// Start payload as sent by the parent process
#[derive(Debug, Clone, Deserialize)]
pub struct StartPayload {
    pub game_id: JobId,
    pub url: serde_json::Value,
    pub save_path: String,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub out: Option<String>,
    #[serde(default)]
    pub total_size: Option<u64>,
    #[serde(default)]
    pub file_indices: Option<Vec<usize>>,
    #[serde(default)]
    pub use_debrid: bool,
}

impl StartPayload {
    /// Parse a payload that arrived URL-encoded (command-line form)
    pub fn from_encoded(raw: &str) -> Result<Self> {
        let decoded = urlencoding::decode(raw)
            .map_err(|e| DownloadError::invalid_input(format!("Bad payload encoding: {}", e)))?;
        Ok(serde_json::from_str(&decoded)?)
    }

    pub fn into_request(self) -> Result<(JobId, StartRequest)> {
        let locator = Locator::from_url_value(&self.url, self.header, self.out, self.total_size)?;
        let options = StartOptions {
            file_indices: self.file_indices,
            use_debrid: self.use_debrid,
            ..StartOptions::default()
        };
        Ok((
            self.game_id,
            StartRequest::new(locator, self.save_path).with_options(options),
        ))
    }
}
