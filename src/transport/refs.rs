//! Ref advertisement returned by `info/refs`

use anyhow::Result;

use super::pkt_line::{chomp, PktLine, PktLineReader};
use crate::{error::Error, pack::ObjectId};

/// Placeholder ref name an empty repository advertises its capabilities on
const NO_REFS_PLACEHOLDER: &str = "capabilities^{}";
const PEELED_SUFFIX: &str = "^{}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    pub name: String,
    pub target: ObjectId,
    /// Commit an annotated tag points at, when advertised
    pub peeled: Option<ObjectId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefAdvertisement {
    pub refs: Vec<Ref>,
    pub capabilities: Vec<String>,
}

impl RefAdvertisement {
    pub fn find(&self, name: &str) -> Option<&Ref> {
        self.refs.iter().find(|r| r.name == name)
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c == name || c.split_once('=').map(|(k, _)| k) == Some(name))
    }
}

/// Parse the body of `GET info/refs?service=<service>`
pub fn parse_advertisement(body: &[u8], service: &str) -> Result<RefAdvertisement> {
    let mut reader = PktLineReader::new(body);

    let expected = format!("# service={}", service);
    match reader.read()? {
        Some(PktLine::Data(line)) if chomp(line) == expected.as_bytes() => {}
        _ => {
            return Err(Error::Protocol(format!(
                "response does not start with '{}'; is this a smart HTTP server?",
                expected
            ))
            .into())
        }
    }

    let mut advertisement = RefAdvertisement::default();
    let mut first = true;
    loop {
        let line = match reader.read()? {
            // A flush follows the service line; skip it before the first ref
            Some(PktLine::Flush) if first && advertisement.refs.is_empty() => {
                first = false;
                continue;
            }
            Some(PktLine::Flush) | None => break,
            Some(PktLine::Data(line)) => chomp(line),
            Some(other) => {
                return Err(Error::Protocol(format!("unexpected packet {:?}", other)).into())
            }
        };
        first = false;

        let (line, caps) = match line.iter().position(|&b| b == 0) {
            Some(nul) => (&line[..nul], Some(&line[nul + 1..])),
            None => (line, None),
        };
        if let Some(caps) = caps {
            advertisement.capabilities = String::from_utf8_lossy(caps)
                .split(' ')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
        }

        let line = std::str::from_utf8(line)
            .map_err(|_| Error::Protocol("ref line is not UTF-8".into()))?;
        if line.starts_with("shallow ") {
            continue;
        }
        let (hex, name) = line
            .split_once(' ')
            .ok_or_else(|| Error::Protocol(format!("malformed ref line: {:?}", line)))?;
        let id = ObjectId::from_hex(hex)
            .ok_or_else(|| Error::Protocol(format!("malformed object id: {:?}", hex)))?;

        if name == NO_REFS_PLACEHOLDER {
            continue;
        }
        if let Some(base) = name.strip_suffix(PEELED_SUFFIX) {
            if let Some(tag) = advertisement.refs.iter_mut().rev().find(|r| r.name == base) {
                tag.peeled = Some(id);
            }
            continue;
        }

        advertisement.refs.push(Ref {
            name: name.to_string(),
            target: id,
            peeled: None,
        });
    }

    Ok(advertisement)
}

#[cfg(test)]
mod tests {
    use super::super::pkt_line::{pkt_line_with_newline, FLUSH_PKT};
    use super::*;

    const SERVICE: &str = "git-receive-pack";

    fn body(lines: &[&[u8]]) -> Vec<u8> {
        let mut out = pkt_line_with_newline(b"# service=git-receive-pack");
        out.extend_from_slice(FLUSH_PKT);
        for line in lines {
            out.extend_from_slice(&pkt_line_with_newline(line));
        }
        out.extend_from_slice(FLUSH_PKT);
        out
    }

    #[test]
    fn test_parse_refs_and_capabilities() {
        let main = "a".repeat(40);
        let tag = "b".repeat(40);
        let peeled = "c".repeat(40);
        let first = format!("{} refs/heads/main\0report-status delete-refs agent=git/2.43", main);
        let second = format!("{} refs/tags/v1", tag);
        let third = format!("{} refs/tags/v1^{{}}", peeled);
        let data = body(&[first.as_bytes(), second.as_bytes(), third.as_bytes()]);

        let adv = parse_advertisement(&data, SERVICE).unwrap();
        assert_eq!(adv.refs.len(), 2);
        assert_eq!(adv.find("refs/heads/main").unwrap().target.to_hex(), main);
        let v1 = adv.find("refs/tags/v1").unwrap();
        assert_eq!(v1.peeled.unwrap().to_hex(), peeled);
        assert!(adv.has_capability("report-status"));
        assert!(adv.has_capability("agent"));
        assert!(!adv.has_capability("side-band-64k"));
    }

    #[test]
    fn test_empty_repository() {
        let zero = "0".repeat(40);
        let first = format!("{} capabilities^{{}}\0report-status", zero);
        let adv = parse_advertisement(&body(&[first.as_bytes()]), SERVICE).unwrap();
        assert!(adv.refs.is_empty());
        assert!(adv.has_capability("report-status"));
    }

    #[test]
    fn test_missing_service_line() {
        let main = "a".repeat(40);
        let line = format!("{} refs/heads/main\0report-status", main);
        let data = pkt_line_with_newline(line.as_bytes());
        let err = parse_advertisement(&data, SERVICE).unwrap_err();
        assert!(matches!(crate::error::find(&err), Some(Error::Protocol(_))));
    }

    #[test]
    fn test_dumb_server_response() {
        let err = parse_advertisement(b"ref: refs/heads/main\n", SERVICE).unwrap_err();
        assert!(matches!(crate::error::find(&err), Some(Error::Protocol(_))));
    }

    #[test]
    fn test_service_line_without_flush() {
        let main = "a".repeat(40);
        let mut data = pkt_line_with_newline(b"# service=git-receive-pack");
        data.extend_from_slice(&pkt_line_with_newline(
            format!("{} refs/heads/main\0report-status", main).as_bytes(),
        ));
        data.extend_from_slice(FLUSH_PKT);
        let adv = parse_advertisement(&data, SERVICE).unwrap();
        assert_eq!(adv.refs.len(), 1);
    }
}
