//! Wire protocol definitions
//!
//! Frames are short ASCII strings. Fields are joined with [`SEPARATOR`], a
//! multi-character token, and each frame is read from the socket with one
//! bounded read. File contents travel as raw bytes after the frame exchange
//! that announces their length.
//!
//! ```text
//! LIST                               -> EMPTY | name|size,name|size
//! UPLOAD<SEPARATOR>name<SEPARATOR>n  -> READY, then n raw bytes from client
//! DOWNLOAD<SEPARATOR>name            -> ERROR | name<SEPARATOR>n, OK, n raw bytes
//! DELETE<SEPARATOR>name              -> OK | ERROR:<CODE>
//! QUIT                               -> (connection closed)
//! anything else                      -> INVALID
//! ```

use std::borrow::Cow;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{ErrorCode, ProtocolError};
use crate::types::FileEntry;

/// Field delimiter inside a frame
pub const SEPARATOR: &str = "<SEPARATOR>";

pub const READY: &str = "READY";
pub const OK: &str = "OK";
pub const EMPTY: &str = "EMPTY";
pub const ERROR: &str = "ERROR";
pub const INVALID: &str = "INVALID";

/// Characters left as-is when encoding names (RFC 3986 unreserved)
const NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a name for transmission
pub fn encode_name(name: &str) -> Cow<'_, str> {
    utf8_percent_encode(name, NAME_ENCODE_SET).into()
}

/// Percent-decode a name received from the wire
pub fn decode_name(wire: &str) -> Cow<'_, str> {
    percent_decode_str(wire).decode_utf8_lossy()
}

/// Percent-decode a name, refusing escapes that are not valid UTF-8
pub fn try_decode_name(wire: &str) -> Result<Cow<'_, str>, ProtocolError> {
    percent_decode_str(wire)
        .decode_utf8()
        .map_err(|_| ProtocolError::NotUtf8)
}

/// A client request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    List,
    /// `name` is the wire form; the server decodes and sanitizes it
    Upload { name: String, size: u64 },
    Download { name: String },
    Delete { name: String },
    Quit,
}

impl Command {
    /// Parse one frame.
    ///
    /// Unknown verbs yield [`ProtocolError::UnknownCommand`]; known verbs with
    /// the wrong shape yield [`ProtocolError::Malformed`] or
    /// [`ProtocolError::InvalidSize`].
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let frame = frame.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = frame.split(SEPARATOR).collect();

        match fields[0] {
            "LIST" if fields.len() == 1 => Ok(Command::List),
            "QUIT" if fields.len() == 1 => Ok(Command::Quit),
            "UPLOAD" => match fields[..] {
                [_, name, size] => {
                    let size = size
                        .trim()
                        .parse::<u64>()
                        .map_err(|_| ProtocolError::InvalidSize(size.to_string()))?;
                    Ok(Command::Upload {
                        name: name.to_string(),
                        size,
                    })
                }
                _ => Err(malformed("UPLOAD", 3, fields.len())),
            },
            "DOWNLOAD" => match fields[..] {
                [_, name] => Ok(Command::Download {
                    name: name.to_string(),
                }),
                _ => Err(malformed("DOWNLOAD", 2, fields.len())),
            },
            "DELETE" => match fields[..] {
                [_, name] => Ok(Command::Delete {
                    name: name.to_string(),
                }),
                _ => Err(malformed("DELETE", 2, fields.len())),
            },
            _ => Err(ProtocolError::UnknownCommand(frame.to_string())),
        }
    }

    /// Encode as a frame, percent-encoding names
    pub fn encode(&self) -> String {
        match self {
            Command::List => "LIST".to_string(),
            Command::Quit => "QUIT".to_string(),
            Command::Upload { name, size } => {
                format!("UPLOAD{SEPARATOR}{}{SEPARATOR}{size}", encode_name(name))
            }
            Command::Download { name } => format!("DOWNLOAD{SEPARATOR}{}", encode_name(name)),
            Command::Delete { name } => format!("DELETE{SEPARATOR}{}", encode_name(name)),
        }
    }

    /// Verb used in logs
    pub fn verb(&self) -> &'static str {
        match self {
            Command::List => "LIST",
            Command::Upload { .. } => "UPLOAD",
            Command::Download { .. } => "DOWNLOAD",
            Command::Delete { .. } => "DELETE",
            Command::Quit => "QUIT",
        }
    }
}

fn malformed(command: &'static str, expected: usize, got: usize) -> ProtocolError {
    ProtocolError::Malformed {
        command,
        reason: format!("expected {} fields, got {}", expected, got),
    }
}

/// `ERROR:<CODE>`
pub fn error_reply(code: ErrorCode) -> String {
    format!("{ERROR}:{code}")
}

/// Parse a reply that is either `OK` or `ERROR:<CODE>`
pub fn parse_status_reply(reply: &str) -> Result<Result<(), ErrorCode>, ProtocolError> {
    if reply == OK {
        return Ok(Ok(()));
    }

    reply
        .strip_prefix("ERROR:")
        .and_then(ErrorCode::parse)
        .map(Err)
        .ok_or_else(|| ProtocolError::Malformed {
            command: "status",
            reason: format!("unexpected reply {:?}", reply),
        })
}

/// Header announcing a download: `name<SEPARATOR>size`
pub fn download_header(name: &str, size: u64) -> String {
    format!("{}{SEPARATOR}{size}", encode_name(name))
}

/// Parse a download header into the decoded name and size
pub fn parse_download_header(frame: &str) -> Result<(String, u64), ProtocolError> {
    match frame.split(SEPARATOR).collect::<Vec<_>>()[..] {
        [name, size] => {
            let size = size
                .parse::<u64>()
                .map_err(|_| ProtocolError::InvalidSize(size.to_string()))?;
            Ok((decode_name(name).into_owned(), size))
        }
        _ => Err(ProtocolError::Malformed {
            command: "DOWNLOAD",
            reason: format!("unexpected header {:?}", frame),
        }),
    }
}

/// Encode a directory listing, or [`EMPTY`] when there is nothing to list
pub fn encode_listing(entries: &[FileEntry]) -> String {
    if entries.is_empty() {
        return EMPTY.to_string();
    }

    entries
        .iter()
        .map(|e| format!("{}|{}", encode_name(&e.name), e.size))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a listing produced by [`encode_listing`]
pub fn parse_listing(payload: &str) -> Result<Vec<FileEntry>, ProtocolError> {
    if payload == EMPTY {
        return Ok(Vec::new());
    }

    payload
        .split(',')
        .map(|item| {
            let (name, size) = item.rsplit_once('|').ok_or_else(|| ProtocolError::Malformed {
                command: "LIST",
                reason: format!("entry without size: {:?}", item),
            })?;
            let size = size
                .parse::<u64>()
                .map_err(|_| ProtocolError::InvalidSize(size.to_string()))?;
            Ok(FileEntry::new(decode_name(name).into_owned(), size))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse("LIST").unwrap(), Command::List);
        assert_eq!(Command::parse("QUIT").unwrap(), Command::Quit);
        assert_eq!(Command::parse("LIST\r\n").unwrap(), Command::List);
    }

    #[test]
    fn test_parse_upload() {
        let cmd = Command::parse("UPLOAD<SEPARATOR>report.pdf<SEPARATOR>5000").unwrap();
        assert_eq!(
            cmd,
            Command::Upload {
                name: "report.pdf".into(),
                size: 5000
            }
        );
    }

    #[test]
    fn test_parse_upload_bad_size() {
        let err = Command::parse("UPLOAD<SEPARATOR>a.txt<SEPARATOR>lots").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSize(_)));

        let err = Command::parse("UPLOAD<SEPARATOR>a.txt<SEPARATOR>-1").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSize(_)));
    }

    #[test]
    fn test_parse_wrong_arity_is_malformed() {
        assert!(matches!(
            Command::parse("UPLOAD<SEPARATOR>a.txt").unwrap_err(),
            ProtocolError::Malformed { .. }
        ));
        assert!(matches!(
            Command::parse("DOWNLOAD").unwrap_err(),
            ProtocolError::Malformed { .. }
        ));
        assert!(matches!(
            Command::parse("DELETE<SEPARATOR>a<SEPARATOR>b").unwrap_err(),
            ProtocolError::Malformed { .. }
        ));
    }

    #[test]
    fn test_parse_unknown() {
        assert!(matches!(
            Command::parse("FOO").unwrap_err(),
            ProtocolError::UnknownCommand(_)
        ));
        assert!(matches!(
            Command::parse("LIST<SEPARATOR>x").unwrap_err(),
            ProtocolError::UnknownCommand(_)
        ));
        assert!(matches!(
            Command::parse("").unwrap_err(),
            ProtocolError::UnknownCommand(_)
        ));
    }

    #[test]
    fn test_encode_escapes_separator_in_names() {
        let cmd = Command::Download {
            name: "a<SEPARATOR>b".into(),
        };
        let frame = cmd.encode();
        assert_eq!(frame.matches(SEPARATOR).count(), 1);

        match Command::parse(&frame).unwrap() {
            Command::Download { name } => assert_eq!(decode_name(&name), "a<SEPARATOR>b"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_listing() {
        assert_eq!(encode_listing(&[]), EMPTY);
        assert!(parse_listing(EMPTY).unwrap().is_empty());

        let entries = vec![
            FileEntry::new("report.pdf", 5000),
            FileEntry::new("a,b|c.txt", 3),
        ];
        let payload = encode_listing(&entries);
        assert!(payload.starts_with("report.pdf|5000,"));
        assert_eq!(parse_listing(&payload).unwrap(), entries);
    }

    #[test]
    fn test_status_reply() {
        assert_eq!(parse_status_reply("OK").unwrap(), Ok(()));
        assert_eq!(
            parse_status_reply(&error_reply(ErrorCode::NotFound)).unwrap(),
            Err(ErrorCode::NotFound)
        );
        assert!(parse_status_reply("READY").is_err());
    }

    #[test]
    fn test_download_header() {
        let header = download_header("my notes.txt", 42);
        assert_eq!(header, "my%20notes.txt<SEPARATOR>42");
        assert_eq!(
            parse_download_header(&header).unwrap(),
            ("my notes.txt".to_string(), 42)
        );
        assert!(parse_download_header(ERROR).is_err());
    }
}
