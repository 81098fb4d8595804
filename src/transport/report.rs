//! receive-pack commands and the status report that answers them

use anyhow::Result;

use super::pkt_line::{chomp, pkt_line, PktLine, PktLineReader, FLUSH_PKT};
use crate::{error::Error, pack::ObjectId};

/// One ref update: move `ref_name` from `old_id` to `new_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCommand {
    pub ref_name: String,
    /// Remote's current value, zero when the ref does not exist yet
    pub old_id: ObjectId,
    pub new_id: ObjectId,
}

impl UpdateCommand {
    /// "old-hex SP new-hex SP ref-name"
    pub fn line(&self) -> String {
        format!("{} {} {}", self.old_id, self.new_id, self.ref_name)
    }
}

/// pkt-line framed commands followed by a flush. The first command carries
/// the requested capabilities after a NUL.
pub fn encode_commands(commands: &[UpdateCommand], capabilities: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, cmd) in commands.iter().enumerate() {
        let mut line = cmd.line().into_bytes();
        if i == 0 && !capabilities.is_empty() {
            line.push(0);
            line.extend_from_slice(capabilities.join(" ").as_bytes());
        }
        line.push(b'\n');
        out.extend_from_slice(&pkt_line(&line));
    }
    out.extend_from_slice(FLUSH_PKT);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefStatus {
    Ok,
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefReport {
    pub ref_name: String,
    pub status: RefStatus,
}

/// Parsed `report-status` answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReport {
    /// `Ok(())` for "unpack ok", otherwise the remote's unpack error
    pub unpack: std::result::Result<(), String>,
    pub refs: Vec<RefReport>,
}

impl PushReport {
    /// Report for a server that did not negotiate `report-status`: a 2xx
    /// response is all we get, so every command counts as accepted.
    pub fn assume_accepted(commands: &[UpdateCommand]) -> Self {
        PushReport {
            unpack: Ok(()),
            refs: commands
                .iter()
                .map(|c| RefReport {
                    ref_name: c.ref_name.clone(),
                    status: RefStatus::Ok,
                })
                .collect(),
        }
    }

    pub fn status_of(&self, ref_name: &str) -> Option<&RefStatus> {
        self.refs
            .iter()
            .find(|r| r.ref_name == ref_name)
            .map(|r| &r.status)
    }

    pub fn rejected(&self) -> impl Iterator<Item = (&str, &str)> {
        self.refs.iter().filter_map(|r| match &r.status {
            RefStatus::Rejected(reason) => Some((r.ref_name.as_str(), reason.as_str())),
            RefStatus::Ok => None,
        })
    }

    /// First rejection as [`Error::RemoteRejected`]
    pub fn into_result(self) -> Result<Self> {
        if let Some((ref_name, reason)) = self.rejected().next() {
            return Err(Error::RemoteRejected {
                ref_name: ref_name.to_string(),
                reason: reason.to_string(),
            }
            .into());
        }
        Ok(self)
    }
}

/// Parse the body of a `report-status` response for `commands`.
///
/// Every command ends up with a status: refs the remote did not mention are
/// rejected with the unpack error, or reported as a protocol error when the
/// unpack succeeded.
pub fn parse_report(body: &[u8], commands: &[UpdateCommand]) -> Result<PushReport> {
    let mut reader = PktLineReader::new(body);

    let unpack = match reader.read()? {
        Some(PktLine::Data(line)) => {
            let line = String::from_utf8_lossy(chomp(line)).into_owned();
            match line.strip_prefix("unpack ") {
                Some("ok") => Ok(()),
                Some(reason) => Err(reason.to_string()),
                None => {
                    return Err(Error::Protocol(format!(
                        "expected unpack status, got {:?}",
                        line
                    ))
                    .into())
                }
            }
        }
        _ => return Err(Error::Protocol("empty status report".into()).into()),
    };

    let mut refs = Vec::new();
    for line in reader.read_until_flush()? {
        let line = String::from_utf8_lossy(chomp(line)).into_owned();
        let report = if let Some(name) = line.strip_prefix("ok ") {
            RefReport {
                ref_name: name.to_string(),
                status: RefStatus::Ok,
            }
        } else if let Some(rest) = line.strip_prefix("ng ") {
            let (name, reason) = rest.split_once(' ').unwrap_or((rest, "rejected"));
            RefReport {
                ref_name: name.to_string(),
                status: RefStatus::Rejected(reason.to_string()),
            }
        } else {
            tracing::debug!("Ignoring status line {:?}", line);
            continue;
        };
        refs.push(report);
    }

    for cmd in commands {
        if refs.iter().any(|r| r.ref_name == cmd.ref_name) {
            continue;
        }
        match &unpack {
            Err(reason) => refs.push(RefReport {
                ref_name: cmd.ref_name.clone(),
                status: RefStatus::Rejected(format!("unpacker error: {}", reason)),
            }),
            Ok(()) => {
                return Err(Error::Protocol(format!(
                    "no status reported for {}",
                    cmd.ref_name
                ))
                .into())
            }
        }
    }

    Ok(PushReport { unpack, refs })
}

#[cfg(test)]
mod tests {
    use super::super::pkt_line::pkt_line_with_newline;
    use super::*;

    fn command(name: &str) -> UpdateCommand {
        UpdateCommand {
            ref_name: name.to_string(),
            old_id: ObjectId::from_hex(&"1".repeat(40)).unwrap(),
            new_id: ObjectId::from_hex(&"2".repeat(40)).unwrap(),
        }
    }

    fn report(lines: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for line in lines {
            out.extend_from_slice(&pkt_line_with_newline(line.as_bytes()));
        }
        out.extend_from_slice(FLUSH_PKT);
        out
    }

    #[test]
    fn test_encode_commands() {
        let cmd = command("refs/heads/main");
        let encoded = encode_commands(&[cmd.clone()], &["report-status".to_string()]);

        let line = format!("{}\0report-status\n", cmd.line());
        let mut expected = format!("{:04x}", line.len() + 4).into_bytes();
        expected.extend_from_slice(line.as_bytes());
        expected.extend_from_slice(b"0000");
        assert_eq!(encoded, expected);
        assert_eq!(
            cmd.line(),
            format!("{} {} refs/heads/main", "1".repeat(40), "2".repeat(40))
        );
    }

    #[test]
    fn test_capabilities_only_on_first_command() {
        let encoded = encode_commands(
            &[command("refs/heads/a"), command("refs/heads/b")],
            &["report-status".to_string()],
        );
        let text = String::from_utf8_lossy(&encoded);
        assert_eq!(text.matches("report-status").count(), 1);
    }

    #[test]
    fn test_parse_success() {
        let cmds = [command("refs/heads/main")];
        let parsed = parse_report(&report(&["unpack ok", "ok refs/heads/main"]), &cmds).unwrap();
        assert_eq!(parsed.unpack, Ok(()));
        assert_eq!(parsed.status_of("refs/heads/main"), Some(&RefStatus::Ok));
        assert!(parsed.into_result().is_ok());
    }

    #[test]
    fn test_parse_rejection() {
        let cmds = [command("refs/heads/main"), command("refs/heads/dev")];
        let body = report(&[
            "unpack ok",
            "ng refs/heads/main failed to lock",
            "ok refs/heads/dev",
        ]);
        let parsed = parse_report(&body, &cmds).unwrap();
        assert_eq!(
            parsed.status_of("refs/heads/main"),
            Some(&RefStatus::Rejected("failed to lock".into()))
        );
        // the other ref is unaffected
        assert_eq!(parsed.status_of("refs/heads/dev"), Some(&RefStatus::Ok));

        let err = parsed.into_result().unwrap_err();
        match crate::error::find(&err) {
            Some(Error::RemoteRejected { ref_name, reason }) => {
                assert_eq!(ref_name, "refs/heads/main");
                assert_eq!(reason, "failed to lock");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unpack_failure_rejects_unreported_refs() {
        let cmds = [command("refs/heads/main")];
        let parsed = parse_report(&report(&["unpack index-pack abnormal exit"]), &cmds).unwrap();
        assert_eq!(parsed.unpack, Err("index-pack abnormal exit".to_string()));
        assert_eq!(
            parsed.status_of("refs/heads/main"),
            Some(&RefStatus::Rejected(
                "unpacker error: index-pack abnormal exit".into()
            ))
        );
    }

    #[test]
    fn test_missing_ref_status_is_protocol_error() {
        let cmds = [command("refs/heads/main")];
        let err = parse_report(&report(&["unpack ok"]), &cmds).unwrap_err();
        assert!(matches!(crate::error::find(&err), Some(Error::Protocol(_))));
    }

    #[test]
    fn test_garbage_report() {
        let cmds = [command("refs/heads/main")];
        assert!(parse_report(b"", &cmds).is_err());
        assert!(parse_report(&report(&["hello"]), &cmds).is_err());
    }
}
