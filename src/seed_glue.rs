// Command-line contract of `snapd-seed-glue` and the acceptance run that
// checks it. The tool is a black box: success and failure are decided by its
// exit code together with fixed substrings of its merged stdout/stderr.

use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_PROGRAM: &str = "/usr/bin/snapd-seed-glue";

/// Printed by the tool after a seed was provisioned and validated.
pub const SUCCESS_MARKER: &str = "Cleanup and validation completed";

/// A snap name no store will ever resolve.
pub const MISSING_SNAP: &str = "absolutelyridiculouslongnamethatwilldefinitelyneverexist";

/// The error the tool must print for a snap the store does not know.
pub fn snap_not_found_message(snap: &str) -> String {
    format!("cannot install snap \"{snap}\": snap not found")
}

pub type SeedGlueResult<T> = Result<T, SeedGlueError>;

#[derive(Debug, Error)]
pub enum SeedGlueError {
    #[error("Failed to run {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read output of {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("seed {seed:?} failed with exit code {exit_code:?}")]
    Failed {
        seed: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("seed {seed:?} exited cleanly but never reported completion")]
    MissingMarker { seed: String, output: String },

    #[error("snap {snap:?} was accepted by seed {seed:?}")]
    UnexpectedSuccess { seed: String, snap: String },

    #[error("output for snap {snap:?} lacks {expected:?}")]
    MissingError {
        snap: String,
        expected: String,
        output: String,
    },
}

/// Result of one invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// stdout and stderr interleaved as the tool wrote them.
    pub output: String,
    /// `None` when the tool was killed by a signal.
    pub exit_code: Option<i32>,
}

impl Invocation {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn output_contains(&self, s: &str) -> bool {
        self.output.contains(s)
    }
}

#[derive(Debug, Clone)]
pub struct SeedGlue {
    program: PathBuf,
    echo: bool,
}

impl Default for SeedGlue {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl SeedGlue {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            echo: false,
        }
    }

    /// Copy every output line to our stdout while it is collected.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn command<S: AsRef<str>>(&self, seed: &str, snaps: &[S]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--verbose").arg("--seed").arg(seed);
        for snap in snaps {
            let snap: &str = snap.as_ref();
            cmd.arg(snap);
        }
        cmd
    }

    pub fn run<S: AsRef<str>>(&self, seed: &str, snaps: &[S]) -> SeedGlueResult<Invocation> {
        let spawn_err = |source| SeedGlueError::Spawn {
            path: self.program.clone(),
            source,
        };
        let output_err = |source| SeedGlueError::Output {
            path: self.program.clone(),
            source,
        };

        let (reader, writer) = io::pipe().map_err(spawn_err)?;

        // The command holds the write ends; it has to be gone before reading
        // or the pipe never reaches EOF.
        let mut child = {
            let mut cmd = self.command(seed, snaps);
            cmd.stdout(writer.try_clone().map_err(spawn_err)?).stderr(writer);
            debug!(?cmd, "running seed glue");
            cmd.spawn().map_err(spawn_err)?
        };

        let mut output = String::new();
        if let Err(source) = self.collect(reader, &mut output) {
            // Reap the tool before bailing out so it is not left behind.
            let _ = child.kill();
            let _ = child.wait();
            return Err(output_err(source));
        }

        let status = child.wait().map_err(output_err)?;
        Ok(Invocation {
            output,
            exit_code: status.code(),
        })
    }

    /// Reads until EOF. Bytes that are not UTF-8 are replaced, never fatal.
    fn collect(&self, reader: impl io::Read, output: &mut String) -> io::Result<()> {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                return Ok(());
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.strip_suffix('\n').unwrap_or(&line);
            if self.echo {
                println!("{line}");
            }
            output.push_str(line);
            output.push('\n');
        }
    }

    /// Provisions `snaps` into `seed`, reconciling whatever the seed held before.
    pub fn provision<S: AsRef<str>>(&self, seed: &str, snaps: &[S]) -> SeedGlueResult<Invocation> {
        let invocation = self.run(seed, snaps)?;
        if !invocation.success() {
            return Err(SeedGlueError::Failed {
                seed: seed.to_string(),
                exit_code: invocation.exit_code,
                output: invocation.output,
            });
        }
        if !invocation.output_contains(SUCCESS_MARKER) {
            return Err(SeedGlueError::MissingMarker {
                seed: seed.to_string(),
                output: invocation.output,
            });
        }
        Ok(invocation)
    }

    /// Runs with a snap that must not resolve and checks the refusal.
    pub fn expect_missing_snap(&self, seed: &str, snap: &str) -> SeedGlueResult<Invocation> {
        let invocation = self.run(seed, &[snap])?;
        if invocation.success() {
            return Err(SeedGlueError::UnexpectedSuccess {
                seed: seed.to_string(),
                snap: snap.to_string(),
            });
        }
        let expected = snap_not_found_message(snap);
        if !invocation.output_contains(&expected) {
            return Err(SeedGlueError::MissingError {
                snap: snap.to_string(),
                expected,
                output: invocation.output,
            });
        }
        Ok(invocation)
    }

    /// Add a snap to a seed, swap it for another, then check that an
    /// unknown snap is refused.
    pub fn acceptance(&self, seed: &str) -> SeedGlueResult<()> {
        info!(seed, "Testing snapd-seed-glue with hello");
        self.provision(seed, &["hello"])?;

        info!(seed, "Add htop to the same seed");
        self.provision(seed, &["hello", "htop"])?;

        info!(seed, "Remove htop and replace it with btop");
        self.provision(seed, &["hello", "btop"])?;

        info!("Confirm that non-existent snaps will fail");
        self.expect_missing_snap("test_dir", MISSING_SNAP)?;

        Ok(())
    }
}
