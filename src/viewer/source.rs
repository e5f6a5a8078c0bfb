//! Validated document sources

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::error::LoadError;

const OBJECT_URL_PREFIX: &str = "blob:";
const DATA_URL_PREFIX: &str = "data:";
const DEFAULT_MEDIA_TYPE: &str = "application/pdf";

/// A document reference that has passed validation.
///
/// Construction is the only place validation happens, so holding a
/// `DocumentSource` means the scheme is supported and the payload is usable.
#[derive(Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// `blob:` URL minted by the host
    ObjectUrl(String),
    /// `http://` or `https://` URL
    HttpUrl(String),
    /// `data:` URL with its payload already decoded
    DataUrl {
        media_type: String,
        data: Arc<[u8]>,
    },
    /// In-memory document bytes
    Bytes(Arc<[u8]>),
}

/// Coarse category of a source, for logging and backend dispatch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    ObjectUrl,
    HttpUrl,
    DataUrl,
    Bytes,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::ObjectUrl => "object URL",
            SourceKind::HttpUrl => "http URL",
            SourceKind::DataUrl => "data URL",
            SourceKind::Bytes => "byte buffer",
        };
        f.write_str(name)
    }
}

impl DocumentSource {
    /// Validate a URL-style reference
    pub fn parse(reference: &str) -> Result<Self, LoadError> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(LoadError::invalid("empty source reference"));
        }

        if let Some(rest) = strip_prefix_ignore_case(trimmed, OBJECT_URL_PREFIX) {
            if rest.is_empty() || rest.chars().any(char::is_whitespace) {
                return Err(LoadError::invalid("malformed object URL"));
            }
            return Ok(Self::ObjectUrl(trimmed.to_string()));
        }

        if let Some(rest) = strip_prefix_ignore_case(trimmed, "https://")
            .or_else(|| strip_prefix_ignore_case(trimmed, "http://"))
        {
            let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
            if host.is_empty() || rest.chars().any(char::is_whitespace) {
                return Err(LoadError::invalid("http URL has no host"));
            }
            return Ok(Self::HttpUrl(trimmed.to_string()));
        }

        if let Some(rest) = strip_prefix_ignore_case(trimmed, DATA_URL_PREFIX) {
            return parse_data_url(rest);
        }

        let scheme = trimmed.split(':').next().unwrap_or(trimmed);
        Err(LoadError::invalid(format!("unsupported scheme in {scheme:?}")))
    }

    /// Accept an in-memory buffer; empty buffers are rejected
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, LoadError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(LoadError::invalid("empty byte buffer"));
        }
        Ok(Self::Bytes(Arc::from(bytes)))
    }

    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::ObjectUrl(_) => SourceKind::ObjectUrl,
            Self::HttpUrl(_) => SourceKind::HttpUrl,
            Self::DataUrl { .. } => SourceKind::DataUrl,
            Self::Bytes(_) => SourceKind::Bytes,
        }
    }

    /// Document bytes, for sources that carry them inline
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::DataUrl { data, .. } | Self::Bytes(data) => Some(&data[..]),
            Self::ObjectUrl(_) | Self::HttpUrl(_) => None,
        }
    }

    /// Media type hint for backends that sniff formats
    #[must_use]
    pub fn media_type(&self) -> &str {
        match self {
            Self::DataUrl { media_type, .. } => media_type.as_str(),
            _ => DEFAULT_MEDIA_TYPE,
        }
    }

    /// URL for sources that must be fetched
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::ObjectUrl(url) | Self::HttpUrl(url) => Some(url.as_str()),
            Self::DataUrl { .. } | Self::Bytes(_) => None,
        }
    }
}

impl FromStr for DocumentSource {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Inline payloads can be megabytes; never print them
impl fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectUrl(url) | Self::HttpUrl(url) => {
                write!(f, "{}({url})", self.kind())
            }
            Self::DataUrl { media_type, data } => {
                write!(f, "data URL({media_type}, {} bytes)", data.len())
            }
            Self::Bytes(data) => write!(f, "byte buffer({} bytes)", data.len()),
        }
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&value[prefix.len()..])
    } else {
        None
    }
}

fn parse_data_url(rest: &str) -> Result<DocumentSource, LoadError> {
    let Some((meta, payload)) = rest.split_once(',') else {
        return Err(LoadError::invalid("data URL is missing ','"));
    };

    let mut parts = meta.split(';');
    let media_type = match parts.next() {
        Some(mt) if !mt.is_empty() => mt.to_ascii_lowercase(),
        _ => DEFAULT_MEDIA_TYPE.to_string(),
    };
    let is_base64 = parts.any(|p| p.eq_ignore_ascii_case("base64"));

    let data = if is_base64 {
        STANDARD
            .decode(payload.trim())
            .map_err(|e| LoadError::invalid(format!("data URL is not valid base64: {e}")))?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };

    if data.is_empty() {
        return Err(LoadError::invalid("data URL has an empty payload"));
    }

    Ok(DocumentSource::DataUrl {
        media_type,
        data: Arc::from(data),
    })
}
