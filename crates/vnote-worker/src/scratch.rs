//! Per-job scratch files.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use vnote_models::Job;

/// Input and output scratch paths for one job.
///
/// Both files are removed when the guard is dropped, whichever way the run
/// ended, unless `keep` is set.
#[derive(Debug)]
pub struct ScratchFiles {
    input: PathBuf,
    output: PathBuf,
    keep: bool,
}

impl ScratchFiles {
    /// Create the cache directory and reserve the job's scratch paths.
    pub async fn acquire(cache_dir: &Path, job: &Job, keep: bool) -> io::Result<Self> {
        tokio::fs::create_dir_all(cache_dir).await?;
        Ok(Self {
            input: cache_dir.join(job.input_scratch_name()),
            output: cache_dir.join(job.output_scratch_name()),
            keep,
        })
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        if self.keep {
            debug!(input = %self.input.display(), output = %self.output.display(), "Keeping scratch files");
            return;
        }
        for path in [&self.input, &self.output] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed scratch file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove scratch file"),
            }
        }
    }
}
