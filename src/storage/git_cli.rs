use std::{
    cell::{Cell, RefCell, RefMut},
    io::{self, BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
};

use anyhow::{anyhow, Context, Result};
use flate2::{read::ZlibEncoder, Compression};
use gix_object::Kind;

use super::traits::ObjectStore;
use crate::{
    error::Error,
    pack::{parse_kind, GitObject, ObjectId},
};

/// Object access through `git cat-file`, which also sees objects that only
/// live inside existing pack files.
///
/// One `cat-file --batch-check` child answers existence and header queries
/// and one `cat-file --batch` child serves object bodies. Both are spawned on
/// first use and kept for the lifetime of the store.
pub struct GitCliStore {
    git_dir: PathBuf,
    check: RefCell<Option<CatFileProcess>>,
    batch: RefCell<Option<CatFileProcess>>,
    spawned: Cell<usize>,
}

impl GitCliStore {
    pub fn new<P: AsRef<Path>>(git_dir: P) -> Self {
        GitCliStore {
            git_dir: git_dir.as_ref().to_path_buf(),
            check: RefCell::new(None),
            batch: RefCell::new(None),
            spawned: Cell::new(0),
        }
    }

    /// Borrow the child in `slot`, spawning it if needed
    fn process<'a>(
        &self,
        slot: &'a RefCell<Option<CatFileProcess>>,
        mode: &'static str,
    ) -> Result<RefMut<'a, Option<CatFileProcess>>> {
        let mut guard = slot
            .try_borrow_mut()
            .map_err(|_| anyhow!("git cat-file {} is still streaming an object", mode))?;
        if guard.is_none() {
            *guard = Some(CatFileProcess::spawn(&self.git_dir, mode)?);
            self.spawned.set(self.spawned.get() + 1);
        }
        Ok(guard)
    }

    /// Run `f` against the child in `slot`. A failed exchange leaves the
    /// pipe in an unknown position, so the child is dropped and respawned on
    /// the next call.
    fn with_process<T>(
        &self,
        slot: &RefCell<Option<CatFileProcess>>,
        mode: &'static str,
        f: impl FnOnce(&mut CatFileProcess) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.process(slot, mode)?;
        let result = match guard.as_mut() {
            Some(process) => f(process),
            None => Err(anyhow!("git cat-file {} is not running", mode)),
        };
        if result.is_err() {
            *guard = None;
        }
        result
    }

    fn lookup(&self, id: &ObjectId) -> Result<Option<(Kind, u64)>> {
        self.with_process(&self.check, "--batch-check", |process| {
            process.request(id)
        })
    }
}

impl ObjectStore for GitCliStore {
    fn contains(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.lookup(id)?.is_some())
    }

    fn header(&self, id: &ObjectId) -> Result<(Kind, u64)> {
        self.lookup(id)?
            .ok_or_else(|| Error::ObjectNotFound(*id).into())
    }

    fn read(&self, id: &ObjectId) -> Result<GitObject> {
        let obj = self
            .with_process(&self.batch, "--batch", |process| {
                let Some((kind, size)) = process.request(id)? else {
                    return Ok(None);
                };
                let mut data = vec![0; size as usize];
                process
                    .stdout
                    .read_exact(&mut data)
                    .with_context(|| format!("Failed to read object {} from git", id))?;
                process.end_of_body()?;
                Ok(Some(GitObject::from_raw(kind, data)))
            })?
            .ok_or(Error::ObjectNotFound(*id))?;

        if obj.id != *id {
            return Err(Error::InvalidObject {
                id: *id,
                reason: format!("content hashes to {}", obj.id),
            }
            .into());
        }
        Ok(obj)
    }

    fn compressed_payload<'a>(&'a self, id: &ObjectId) -> Result<Box<dyn Read + 'a>> {
        let mut guard = self.process(&self.batch, "--batch")?;
        let header = match guard.as_mut() {
            Some(process) => process.request(id),
            None => Err(anyhow!("git cat-file --batch is not running")),
        };
        let (_, size) = match header {
            Ok(Some(header)) => header,
            Ok(None) => return Err(Error::ObjectNotFound(*id).into()),
            Err(e) => {
                *guard = None;
                return Err(e);
            }
        };

        let body = BatchBody {
            process: guard,
            remaining: size,
            finished: false,
        };
        Ok(Box::new(ZlibEncoder::new(body, Compression::default())))
    }
}

/// A `git cat-file --batch` or `--batch-check` child
struct CatFileProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl CatFileProcess {
    fn spawn(git_dir: &Path, mode: &str) -> Result<Self> {
        tracing::debug!("Spawning git cat-file {} for {:?}", mode, git_dir);
        let mut child = Command::new("git")
            .arg("--git-dir")
            .arg(git_dir)
            .arg("cat-file")
            .arg(mode)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn git cat-file {}", mode))?;

        let stdin = child
            .stdin
            .take()
            .context("git cat-file stdin was not captured")?;
        let stdout = child
            .stdout
            .take()
            .context("git cat-file stdout was not captured")?;
        Ok(CatFileProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// Ask for `id` and read the reply line: `<id> <type> <size>`, or
    /// `<id> missing`. With `--batch` the body follows a found object.
    fn request(&mut self, id: &ObjectId) -> Result<Option<(Kind, u64)>> {
        writeln!(self.stdin, "{}", id.to_hex())
            .and_then(|_| self.stdin.flush())
            .context("Failed to write to git cat-file")?;

        let mut line = String::new();
        let n = self
            .stdout
            .read_line(&mut line)
            .context("Failed to read from git cat-file")?;
        if n == 0 {
            return Err(anyhow!("git cat-file exited unexpectedly"));
        }

        let fields: Vec<&str> = line.trim_end().split(' ').collect();
        match fields.as_slice() {
            [_, "missing"] => Ok(None),
            [reply_id, kind, size] if *reply_id == id.to_hex() => {
                let kind = parse_kind(kind).ok_or_else(|| Error::InvalidObject {
                    id: *id,
                    reason: format!("unknown type {:?}", kind),
                })?;
                let size = size
                    .parse()
                    .with_context(|| format!("Invalid size reported for {}", id))?;
                Ok(Some((kind, size)))
            }
            _ => Err(anyhow!("Unexpected git cat-file reply: {:?}", line.trim_end())),
        }
    }

    /// Consume the LF that terminates a `--batch` body
    fn end_of_body(&mut self) -> Result<()> {
        let mut lf = [0u8; 1];
        self.stdout
            .read_exact(&mut lf)
            .context("Failed to read from git cat-file")?;
        if lf[0] != b'\n' {
            return Err(anyhow!("git cat-file body was not terminated by LF"));
        }
        Ok(())
    }
}

impl Drop for CatFileProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// One object body streamed straight off the `--batch` pipe. Holds the
/// child until the body is consumed; a body dropped early is drained, or
/// the child is discarded when draining fails.
struct BatchBody<'a> {
    process: RefMut<'a, Option<CatFileProcess>>,
    remaining: u64,
    finished: bool,
}

impl Read for BatchBody<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished || buf.is_empty() {
            return Ok(0);
        }
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| io::Error::other("git cat-file is not running"))?;

        if self.remaining == 0 {
            process.end_of_body().map_err(io::Error::other)?;
            self.finished = true;
            return Ok(0);
        }

        let max = (buf.len() as u64).min(self.remaining) as usize;
        let n = process.stdout.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl Drop for BatchBody<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let pending = self.remaining + 1;
        let drained = match self.process.as_mut() {
            Some(process) => io::copy(&mut (&mut process.stdout).take(pending), &mut io::sink())
                .is_ok_and(|n| n == pending),
            None => true,
        };
        if !drained {
            *self.process = None;
        }
    }
}
