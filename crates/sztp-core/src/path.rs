//! RESTCONF data paths
//!
//! A data path addresses one node of the datastore, e.g.
//! `/sztpd:devices/device=SN-0001/activation-code`. List entries carry their
//! key after `=`, percent-encoded as in RFC 8040. The schema path of a data
//! path is the same path with list keys stripped, which is what callbacks and
//! the schema are indexed by.

use crate::error::{Error, Result};
use crate::types::MODULE;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;

/// One step of a data path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    pub name: String,
    pub key: Option<String>,
}

impl PathSegment {
    pub fn new(name: impl Into<String>, key: Option<String>) -> Self {
        Self {
            name: name.into(),
            key,
        }
    }

    /// Node name without its module prefix
    pub fn local_name(&self) -> &str {
        self.name
            .split_once(':')
            .map(|(_, local)| local)
            .unwrap_or(&self.name)
    }
}

/// Address of a node in the datastore
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DataPath {
    segments: Vec<PathSegment>,
}

impl DataPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a RESTCONF data path. `""` and `"/"` denote the datastore root.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.strip_prefix('/').unwrap_or(raw);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for part in trimmed.split('/') {
            if part.is_empty() {
                return Err(Error::invalid_path(format!("empty segment in \"{}\"", raw)));
            }
            let (name, key) = match part.split_once('=') {
                Some((name, key)) => (name, Some(percent_decode(key)?)),
                None => (part, None),
            };
            if name.is_empty() {
                return Err(Error::invalid_path(format!("missing node name in \"{}\"", raw)));
            }
            segments.push(PathSegment::new(percent_decode(name)?, key));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    pub fn parent(&self) -> Option<DataPath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a child node. Top-level children are qualified with the module name.
    pub fn child(&self, name: &str, key: Option<&str>) -> DataPath {
        let name = if self.is_root() && !name.contains(':') {
            format!("{}:{}", MODULE, name)
        } else {
            name.to_string()
        };
        let mut segments = self.segments.clone();
        segments.push(PathSegment::new(name, key.map(str::to_string)));
        Self { segments }
    }

    /// Append a relative path of keyless segments such as `"devices/device"`.
    pub fn join(&self, rel: &str) -> DataPath {
        rel.split('/')
            .filter(|s| !s.is_empty())
            .fold(self.clone(), |acc, name| acc.child(name, None))
    }

    /// The first `n` segments of this path
    pub fn prefix(&self, n: usize) -> DataPath {
        Self {
            segments: self.segments[..n.min(self.segments.len())].to_vec(),
        }
    }

    /// Tenant owning this path, if it lies below `/sztpd:tenants/tenant=NAME`
    pub fn tenant(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [first, second, ..] if first.local_name() == "tenants" && second.name == "tenant" => {
                second.key.as_deref()
            }
            _ => None,
        }
    }

    pub fn starts_with(&self, prefix: &DataPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Path with list keys removed, e.g. `/sztpd:devices/device/activation-code`
    pub fn schema_path(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        let mut out = String::new();
        for seg in &self.segments {
            out.push('/');
            out.push_str(&seg.name);
        }
        out
    }

    /// Module-qualified name of the addressed node, as used in documents
    pub fn qualified_name(&self) -> Option<String> {
        let last = self.last()?;
        if last.name.contains(':') {
            Some(last.name.clone())
        } else {
            let module = self
                .segments
                .first()
                .and_then(|s| s.name.split_once(':'))
                .map(|(m, _)| m)
                .unwrap_or(MODULE);
            Some(format!("{}:{}", module, last.name))
        }
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for seg in &self.segments {
            write!(f, "/{}", seg.name)?;
            if let Some(key) = &seg.key {
                write!(f, "={}", percent_encode(key))?;
            }
        }
        Ok(())
    }
}

/// Escaped in list keys: the RFC 8040 key delimiters plus what cannot
/// appear unescaped in a URI path
const KEY_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'#')
    .add(b'%')
    .add(b',')
    .add(b'/')
    .add(b'=')
    .add(b'?');

/// Decode `%XX` escapes (RFC 3986). A `%` not followed by two hex digits is
/// an error.
pub fn percent_decode(input: &str) -> Result<String> {
    let malformed = input
        .split('%')
        .skip(1)
        .any(|rest| !rest.get(..2).is_some_and(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit())));
    if malformed {
        return Err(Error::invalid_path(format!("bad escape in \"{}\"", input)));
    }
    percent_decode_str(input)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|_| Error::invalid_path(format!("non UTF-8 key in \"{}\"", input)))
}

fn percent_encode(input: &str) -> String {
    utf8_percent_encode(input, KEY_ESCAPES).to_string()
}
