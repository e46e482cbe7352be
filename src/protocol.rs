use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::signing;

/// Response type the server uses for non-terminal messages during `run`
pub const PROGRESS_UPDATE: &str = "progress_update";

/// Command understood by the notebook server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Execute a notebook
    Run,
    /// Close an open notebook
    Close,
    /// Shut the server down
    Stop,
    /// Ask whether a notebook is open
    IsOpen,
    /// Ask whether the server is ready for work
    IsReady,
    /// Server status summary
    Status,
}

impl CommandKind {
    /// Whether the command carries a notebook path as its content
    pub fn takes_notebook(self) -> bool {
        matches!(self, Self::Run | Self::Close | Self::IsOpen)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Close => "close",
            Self::Stop => "stop",
            Self::IsOpen => "isopen",
            Self::IsReady => "isready",
            Self::Status => "status",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a notebook path argument is turned into the path sent to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PathPolicy {
    /// Join relative paths onto the working directory
    #[default]
    ResolveRelative,
    /// Reject any path that is not already absolute
    RequireAbsolute,
}

impl PathPolicy {
    fn apply(self, arg: &str, cwd: &Path) -> Result<PathBuf> {
        let path = Path::new(arg);
        match self {
            Self::ResolveRelative => Ok(normalize(&cwd.join(path))),
            Self::RequireAbsolute if path.is_absolute() => Ok(path.to_path_buf()),
            Self::RequireAbsolute => Err(Error::usage(format!(
                "Notebook path must be absolute: {}",
                arg
            ))),
        }
    }
}

/// Drop `.` segments and fold `..` into its parent without touching the
/// filesystem. `..` at the root stays at the root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Request from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    /// Notebook path, or empty for commands without one
    pub content: String,
}

impl Request {
    /// Build the request for `kind` from its optional command-line argument.
    ///
    /// Commands that take a notebook fail when the argument is missing or
    /// rejected by `policy`. Commands that don't take one ignore `arg`.
    pub fn new(
        kind: CommandKind,
        arg: Option<&str>,
        policy: PathPolicy,
        cwd: &Path,
    ) -> Result<Self> {
        if !kind.takes_notebook() {
            return Ok(Self {
                kind,
                content: String::new(),
            });
        }

        let arg = match arg {
            Some(a) if !a.is_empty() => a,
            _ => {
                return Err(Error::usage(format!(
                    "No notebook specified for '{}'.",
                    kind
                )))
            }
        };

        let path = policy.apply(arg, cwd)?;
        let content = path
            .to_str()
            .ok_or_else(|| {
                Error::usage(format!(
                    "Notebook path is not valid UTF-8: {}",
                    path.display()
                ))
            })?
            .to_string();

        Ok(Self { kind, content })
    }
}

/// Signed wrapper used when the server requires authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// base64 HMAC-SHA256 of `payload`
    pub hmac: String,
    /// Serialized request JSON, kept as text so the digest stays valid
    pub payload: String,
}

/// Encode `request` as one newline-terminated wire message.
///
/// With a key the request JSON is signed and wrapped in an `Envelope`.
pub fn build_message(request: &Request, key: Option<&[u8]>) -> Result<Vec<u8>> {
    let payload = serde_json::to_string(request)?;

    let mut message = match key {
        Some(key) => {
            let envelope = Envelope {
                hmac: signing::sign(key, payload.as_bytes())?,
                payload,
            };
            serde_json::to_vec(&envelope)?
        }
        None => payload.into_bytes(),
    };
    message.push(b'\n');
    Ok(message)
}

/// Response from server to client
///
/// The server's messages are free-form beyond the `type` field, so the raw
/// line is kept for printing alongside the parsed value.
#[derive(Debug, Clone)]
pub struct Response {
    pub kind: String,
    pub raw: String,
    pub value: serde_json::Value,
}

impl Response {
    pub fn parse(line: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| Error::protocol(line, e))?;

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| Error::MissingType(line.to_string()))?
            .to_string();

        Ok(Self {
            kind,
            raw: line.to_string(),
            value,
        })
    }

    /// Terminal messages end the receive loop; progress updates do not
    pub fn is_terminal(&self) -> bool {
        self.kind != PROGRESS_UPDATE
    }

    pub fn to_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cwd() -> PathBuf {
        PathBuf::from("/work/notebooks")
    }

    #[test]
    fn test_request_wire_format() {
        let request = Request::new(CommandKind::Stop, None, PathPolicy::default(), &cwd()).unwrap();
        let message = build_message(&request, None).unwrap();
        assert_eq!(message, b"{\"type\":\"stop\",\"content\":\"\"}\n");

        let request = Request::new(
            CommandKind::IsOpen,
            Some("/tmp/a.ipynb"),
            PathPolicy::RequireAbsolute,
            &cwd(),
        )
        .unwrap();
        let message = build_message(&request, None).unwrap();
        assert_eq!(message, b"{\"type\":\"isopen\",\"content\":\"/tmp/a.ipynb\"}\n");
    }

    #[test]
    fn test_signed_stop_envelope_verifies() {
        let request = Request::new(CommandKind::Stop, None, PathPolicy::default(), &cwd()).unwrap();
        let message = build_message(&request, Some(b"k")).unwrap();

        assert_eq!(message.last(), Some(&b'\n'));
        assert_eq!(message.iter().filter(|&&b| b == b'\n').count(), 1);

        let envelope: Envelope = serde_json::from_slice(&message).unwrap();
        assert_eq!(envelope.payload, r#"{"type":"stop","content":""}"#);
        assert!(signing::verify(b"k", envelope.payload.as_bytes(), &envelope.hmac));
        assert_eq!(envelope.hmac, signing::sign(b"k", envelope.payload.as_bytes()).unwrap());
    }

    #[test]
    fn test_notebook_commands_require_path() {
        for kind in [CommandKind::Run, CommandKind::Close, CommandKind::IsOpen] {
            let err = Request::new(kind, None, PathPolicy::default(), &cwd()).unwrap_err();
            assert!(matches!(err, Error::Usage(_)), "{kind}: {err}");

            let err = Request::new(kind, Some(""), PathPolicy::default(), &cwd()).unwrap_err();
            assert!(matches!(err, Error::Usage(_)));
        }
    }

    #[test]
    fn test_commands_without_notebook_ignore_arg() {
        for kind in [CommandKind::Stop, CommandKind::IsReady, CommandKind::Status] {
            let request =
                Request::new(kind, Some("x.ipynb"), PathPolicy::default(), &cwd()).unwrap();
            assert_eq!(request.content, "");
        }
    }

    #[test]
    fn test_path_policies() {
        let resolved = Request::new(
            CommandKind::Run,
            Some("sub/a.ipynb"),
            PathPolicy::ResolveRelative,
            &cwd(),
        )
        .unwrap();
        assert_eq!(resolved.content, "/work/notebooks/sub/a.ipynb");

        let kept = Request::new(
            CommandKind::Run,
            Some("/abs/a.ipynb"),
            PathPolicy::ResolveRelative,
            &cwd(),
        )
        .unwrap();
        assert_eq!(kept.content, "/abs/a.ipynb");

        let err = Request::new(
            CommandKind::Run,
            Some("a.ipynb"),
            PathPolicy::RequireAbsolute,
            &cwd(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be absolute"));
    }

    #[test]
    fn test_resolve_relative_cleans_dot_segments() {
        let resolve = |arg| {
            Request::new(CommandKind::Run, Some(arg), PathPolicy::ResolveRelative, &cwd())
                .unwrap()
                .content
        };

        assert_eq!(resolve("./a.ipynb"), "/work/notebooks/a.ipynb");
        assert_eq!(resolve("../x/a.ipynb"), "/work/x/a.ipynb");
        assert_eq!(resolve("sub/./../b.ipynb"), "/work/notebooks/b.ipynb");
        assert_eq!(resolve("../../../../a.ipynb"), "/a.ipynb");
        assert_eq!(resolve("/abs/./x/../a.ipynb"), "/abs/a.ipynb");
    }

    #[test]
    fn test_response_parse() {
        let progress = Response::parse(r#"{"type":"progress_update","content":"50%"}"#).unwrap();
        assert!(!progress.is_terminal());

        let done = Response::parse(r#"{"type":"done","content":"ok"}"#).unwrap();
        assert!(done.is_terminal());
        assert_eq!(done.raw, r#"{"type":"done","content":"ok"}"#);
        assert_eq!(done.value["content"], "ok");

        assert!(matches!(Response::parse("{not json"), Err(Error::Protocol { .. })));
        assert!(matches!(Response::parse(r#"{"content":1}"#), Err(Error::MissingType(_))));
        assert!(matches!(Response::parse(r#"{"type":3}"#), Err(Error::MissingType(_))));
    }
}
