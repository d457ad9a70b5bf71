use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MarkerError {
    #[error("empty marker text")]
    Empty,

    #[error("unknown marker tag {0:?}")]
    UnknownTag(String),

    #[error("marker is missing its {0} field")]
    MissingField(&'static str),

    #[error("marker {0} field is not a number")]
    InvalidNumber(&'static str),
}

/// The atrace tag embedded in a marker write, one of the five kinds the
/// userspace tracing API emits into the kernel trace buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerTag {
    SectionBegin,
    SectionEnd,
    AsyncBegin,
    AsyncEnd,
    Counter,
}

/// Decoded payload of one `tracing_mark_write` event.
///
/// Fields other than the tag are optional because the wire text carries a
/// different subset per tag; a consumer validates the subset it needs and
/// skips payloads that fall short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerWrite {
    pub tag: MarkerTag,
    pub pid: Option<i32>,
    pub section_name: Option<String>,
    pub cookie: Option<i64>,
    pub counter_name: Option<String>,
    pub value: Option<f64>,
}

impl MarkerWrite {
    fn bare(tag: MarkerTag) -> Self {
        MarkerWrite {
            tag,
            pid: None,
            section_name: None,
            cookie: None,
            counter_name: None,
            value: None,
        }
    }

    pub fn section_begin(pid: i32, name: impl Into<String>) -> Self {
        MarkerWrite {
            pid: Some(pid),
            section_name: Some(name.into()),
            ..Self::bare(MarkerTag::SectionBegin)
        }
    }

    pub fn section_end() -> Self {
        Self::bare(MarkerTag::SectionEnd)
    }

    pub fn async_begin(pid: i32, name: impl Into<String>, cookie: i64) -> Self {
        MarkerWrite {
            pid: Some(pid),
            section_name: Some(name.into()),
            cookie: Some(cookie),
            ..Self::bare(MarkerTag::AsyncBegin)
        }
    }

    pub fn async_end(pid: i32, name: impl Into<String>, cookie: i64) -> Self {
        MarkerWrite {
            pid: Some(pid),
            section_name: Some(name.into()),
            cookie: Some(cookie),
            ..Self::bare(MarkerTag::AsyncEnd)
        }
    }

    pub fn counter(pid: i32, name: impl Into<String>, value: f64) -> Self {
        MarkerWrite {
            pid: Some(pid),
            counter_name: Some(name.into()),
            value: Some(value),
            ..Self::bare(MarkerTag::Counter)
        }
    }

    /// Decode the text form written into the trace buffer:
    /// `B|pid|name`, `E`, `C|pid|name|value`, `S|pid|name|cookie`,
    /// `F|pid|name|cookie`. A section name may itself contain `|`.
    pub fn parse(text: &str) -> Result<Self, MarkerError> {
        let text = text.trim_end();
        if text.is_empty() {
            return Err(MarkerError::Empty);
        }
        let (tag, rest) = match text.split_once('|') {
            Some((tag, rest)) => (tag, rest),
            None => (text, ""),
        };
        match tag {
            "B" => {
                let (pid, name) = rest
                    .split_once('|')
                    .ok_or(MarkerError::MissingField("section name"))?;
                Ok(Self::section_begin(parse_i32(pid, "pid")?, name))
            }
            "E" => Ok(Self::section_end()),
            "C" => {
                let mut fields = rest.splitn(3, '|');
                let pid = fields.next().ok_or(MarkerError::MissingField("pid"))?;
                let name = fields
                    .next()
                    .ok_or(MarkerError::MissingField("counter name"))?;
                let value = fields.next().ok_or(MarkerError::MissingField("value"))?;
                let value = value
                    .parse::<f64>()
                    .map_err(|_| MarkerError::InvalidNumber("value"))?;
                Ok(Self::counter(parse_i32(pid, "pid")?, name, value))
            }
            "S" | "F" => {
                let mut fields = rest.splitn(3, '|');
                let pid = fields.next().ok_or(MarkerError::MissingField("pid"))?;
                let name = fields
                    .next()
                    .ok_or(MarkerError::MissingField("section name"))?;
                let cookie = fields.next().ok_or(MarkerError::MissingField("cookie"))?;
                let cookie = cookie
                    .parse::<i64>()
                    .map_err(|_| MarkerError::InvalidNumber("cookie"))?;
                let pid = parse_i32(pid, "pid")?;
                Ok(if tag == "S" {
                    Self::async_begin(pid, name, cookie)
                } else {
                    Self::async_end(pid, name, cookie)
                })
            }
            other => Err(MarkerError::UnknownTag(other.to_string())),
        }
    }
}

fn parse_i32(text: &str, field: &'static str) -> Result<i32, MarkerError> {
    if text.is_empty() {
        return Err(MarkerError::MissingField(field));
    }
    text.parse::<i32>()
        .map_err(|_| MarkerError::InvalidNumber(field))
}
