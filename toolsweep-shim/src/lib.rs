// toolsweep-shim/src/lib.rs

//! Native tool interceptor
//!
//! An interceptor is this crate's binary with a payload appended to the end
//! of the executable image. When run, it reads its own image, records the
//! invocation in the audit directory, and replaces itself with the
//! destination tool.
//!
//! # Image layout
//!
//! ```text
//! [stub executable][payload][payload length: u32 LE][MAGIC: 8 bytes]
//! ```
//!
//! The payload is three length-prefixed byte strings (u32 LE length then
//! bytes): tool name, destination path, audit directory. Paths are stored
//! as raw OS bytes.
//!
//! # Audit records
//!
//! One file per invocation, named `toolsweep-native-XXXXXX`:
//!
//! ```text
//! <tool>\n<nanoseconds since the Unix epoch>\n<cwd>\0<argv[0]>\0<argv[1]>...
//! ```
//!
//! Neither paths nor arguments can contain NUL, so the last line is split
//! on it unambiguously. A file holding only the tool name is still read.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::Write;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Trailer marking an image that carries a payload
pub const MAGIC: &[u8; 8] = b"TSWPSHM1";

/// Prefix of the audit files written on every invocation
pub const AUDIT_PREFIX: &str = "toolsweep-native-";

#[derive(Debug, Error)]
pub enum ShimError {
    #[error("cannot read own executable: {0}")]
    ReadImage(#[source] std::io::Error),

    #[error("executable carries no redirect payload")]
    MissingPayload,

    #[error("corrupt redirect payload: {0}")]
    CorruptPayload(&'static str),

    #[error("cannot record invocation of '{tool}' in {dir}: {source}")]
    Audit {
        tool: String,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot exec {path}: {source}")]
    Exec {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What an interceptor redirects, and where it reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Native tool name as seen by the build
    pub tool: String,
    /// Absolute path of the toolchain tool to exec
    pub destination: PathBuf,
    /// Directory receiving one audit file per invocation
    pub audit_dir: PathBuf,
}

impl Payload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for field in [
            self.tool.as_bytes(),
            self.destination.as_os_str().as_bytes(),
            self.audit_dir.as_os_str().as_bytes(),
        ] {
            out.extend_from_slice(&(field.len() as u32).to_le_bytes());
            out.extend_from_slice(field);
        }
        out
    }

    /// Stub image followed by this payload and the trailer
    pub fn append_to(&self, stub: &[u8]) -> Vec<u8> {
        let payload = self.encode();
        let mut image = Vec::with_capacity(stub.len() + payload.len() + 12);
        image.extend_from_slice(stub);
        image.extend_from_slice(&payload);
        image.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        image.extend_from_slice(MAGIC);
        image
    }

    /// Decode the payload at the end of an image, if there is one
    pub fn extract(image: &[u8]) -> Result<Option<Self>, ShimError> {
        let Some(rest) = image.strip_suffix(MAGIC.as_slice()) else {
            return Ok(None);
        };
        if rest.len() < 4 {
            return Err(ShimError::CorruptPayload("truncated trailer"));
        }
        let (rest, len_bytes) = rest.split_at(rest.len() - 4);
        let len = read_u32(len_bytes)? as usize;
        if len > rest.len() {
            return Err(ShimError::CorruptPayload("payload longer than image"));
        }

        let mut cursor = &rest[rest.len() - len..];
        let tool = take_field(&mut cursor)?;
        let destination = take_field(&mut cursor)?;
        let audit_dir = take_field(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(ShimError::CorruptPayload("trailing bytes"));
        }

        let tool = String::from_utf8(tool.to_vec())
            .map_err(|_| ShimError::CorruptPayload("tool name is not UTF-8"))?;

        Ok(Some(Self {
            tool,
            destination: PathBuf::from(OsString::from_vec(destination.to_vec())),
            audit_dir: PathBuf::from(OsString::from_vec(audit_dir.to_vec())),
        }))
    }
}

fn read_u32(bytes: &[u8]) -> Result<u32, ShimError> {
    let array: [u8; 4] = bytes
        .try_into()
        .map_err(|_| ShimError::CorruptPayload("bad length field"))?;
    Ok(u32::from_le_bytes(array))
}

fn take_field<'a>(cursor: &mut &'a [u8]) -> Result<&'a [u8], ShimError> {
    if cursor.len() < 4 {
        return Err(ShimError::CorruptPayload("truncated field length"));
    }
    let (len_bytes, rest) = cursor.split_at(4);
    let len = read_u32(len_bytes)? as usize;
    if len > rest.len() {
        return Err(ShimError::CorruptPayload("truncated field"));
    }
    let (field, rest) = rest.split_at(len);
    *cursor = rest;
    Ok(field)
}

/// Argument vector for the destination: argv[0] replaced, the tail untouched
pub fn rewrite_argv<I>(argv: I, destination: &Path) -> Vec<OsString>
where
    I: IntoIterator,
    I::Item: AsRef<OsStr>,
{
    std::iter::once(destination.as_os_str().to_os_string())
        .chain(argv.into_iter().skip(1).map(|a| a.as_ref().to_os_string()))
        .collect()
}

/// One intercepted run of a native tool
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Invocation {
    /// Nanoseconds since the Unix epoch; 0 when unknown
    pub time: u64,
    pub tool: String,
    /// Working directory of the invoking process
    pub directory: PathBuf,
    /// Arguments as the build passed them, argv[0] included
    pub argv: Vec<OsString>,
}

impl Invocation {
    /// Invocation happening now
    pub fn now(tool: &str, directory: PathBuf, argv: Vec<OsString>) -> Self {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            time,
            tool: tool.to_string(),
            directory,
            argv,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("{}\n{}\n", self.tool, self.time).into_bytes();
        out.extend_from_slice(self.directory.as_os_str().as_bytes());
        for arg in &self.argv {
            out.push(0);
            out.extend_from_slice(arg.as_bytes());
        }
        out
    }

    /// Parse one audit record; `None` if it names no tool
    pub fn decode(record: &[u8]) -> Option<Self> {
        let mut lines = record.splitn(3, |b| *b == b'\n');
        let tool = String::from_utf8_lossy(lines.next()?).trim().to_string();
        if tool.is_empty() {
            return None;
        }
        let time = lines
            .next()
            .and_then(|line| std::str::from_utf8(line).ok())
            .and_then(|line| line.trim().parse().ok())
            .unwrap_or(0);

        let mut fields = lines
            .next()
            .unwrap_or_default()
            .split(|b| *b == 0)
            .map(|field| OsString::from_vec(field.to_vec()));
        let directory = fields.next().map(PathBuf::from).unwrap_or_default();

        Some(Self {
            time,
            tool,
            directory,
            argv: fields.collect(),
        })
    }

    /// Arguments joined by spaces, lossily decoded
    pub fn command_line(&self) -> String {
        if self.argv.is_empty() {
            return self.tool.clone();
        }
        self.argv
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Create a uniquely named audit file describing one invocation
///
/// Each invocation gets its own file so concurrent invocations never
/// contend, and the record survives the process image being replaced.
pub fn record_invocation(audit_dir: &Path, invocation: &Invocation) -> Result<PathBuf, ShimError> {
    let audit_err = |source| ShimError::Audit {
        tool: invocation.tool.clone(),
        dir: audit_dir.to_path_buf(),
        source,
    };

    let mut file = tempfile::Builder::new()
        .prefix(AUDIT_PREFIX)
        .tempfile_in(audit_dir)
        .map_err(audit_err)?;
    file.write_all(&invocation.encode()).map_err(audit_err)?;
    file.flush().map_err(audit_err)?;

    let (_, path) = file.keep().map_err(|e| audit_err(e.error))?;
    Ok(path)
}

/// Read every audit record in a directory, oldest first
pub fn read_audit_records(audit_dir: &Path) -> std::io::Result<Vec<Invocation>> {
    let mut invocations = Vec::new();
    for entry in fs::read_dir(audit_dir)? {
        let entry = entry?;
        if !entry.file_name().to_string_lossy().starts_with(AUDIT_PREFIX) {
            continue;
        }
        if let Some(invocation) = Invocation::decode(&fs::read(entry.path())?) {
            invocations.push(invocation);
        }
    }
    invocations.sort();
    Ok(invocations)
}

/// Tool names of a set of invocations, in the same order
pub fn tool_names(invocations: &[Invocation]) -> Vec<&str> {
    invocations.iter().map(|i| i.tool.as_str()).collect()
}
