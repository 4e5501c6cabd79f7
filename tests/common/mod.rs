//! Shared test helpers for sbom-merge integration tests.
//!
//! All tests use temp directories. Merges run either through
//! [`FakeEngine`] in-process or through `sh` standing in for the
//! `cyclonedx` binary.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sbom_merge::config::MergeConfig;
use sbom_merge::invoker::{CancelToken, InvokeError, MergeEngine};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A temp directory holding `count` SBOM fragments named `sbom_00.xml`...
pub fn sbom_dir(count: usize) -> TempDir {
    let dir = TempDir::new().expect("failed to create temp dir");
    for i in 0..count {
        write_sbom(dir.path(), &format!("sbom_{i:02}.xml"));
    }
    dir
}

/// Write a minimal `CycloneDX` document.
pub fn write_sbom(dir: &Path, name: &str) {
    std::fs::write(
        dir.join(name),
        format!("<bom xmlns=\"http://cyclonedx.org/schema/bom/1.4\"><!-- {name} --></bom>\n"),
    )
    .unwrap();
}

/// Zip `entries` (name, contents) into `path`.
pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    use std::io::Write as _;
    let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    for (name, body) in entries {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// Config with the given chunk size and thread count and no timeout.
pub fn config(chunk_size: usize, threads: usize) -> MergeConfig {
    let mut config = MergeConfig::default();
    config.batch.chunk_size = chunk_size;
    config.batch.threads = threads;
    config.batch.timeout_seconds = 0;
    config
}

/// Sorted file names in `dir`.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// FakeEngine
// ---------------------------------------------------------------------------

/// One recorded merge call.
#[derive(Clone, Debug)]
pub struct Call {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
}

/// In-process engine that writes the names of its inputs to the output.
///
/// Merges whose output file name is in `fail_outputs` fail without writing.
/// Merges whose output name is in `slow_outputs` sleep for `slow_delay`.
#[derive(Default)]
pub struct FakeEngine {
    fail_outputs: HashSet<String>,
    slow_outputs: HashSet<String>,
    slow_delay: Duration,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any merge writing to a file named `output_name`.
    pub fn failing(mut self, output_name: &str) -> Self {
        self.fail_outputs.insert(output_name.to_owned());
        self
    }

    /// Delay any merge writing to a file named `output_name`.
    pub fn slow(mut self, output_name: &str, delay: Duration) -> Self {
        self.slow_outputs.insert(output_name.to_owned());
        self.slow_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that wrote `name`.
    pub fn calls_to(&self, name: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.output.file_name().is_some_and(|n| n == name))
            .collect()
    }

    /// Highest number of merges observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl MergeEngine for FakeEngine {
    fn merge(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        cancel: &CancelToken,
    ) -> Result<(), InvokeError> {
        if cancel.is_cancelled() {
            return Err(InvokeError::Cancelled);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(Call {
            inputs: inputs.to_vec(),
            output: output.to_owned(),
        });

        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.slow_outputs.contains(&name) {
            std::thread::sleep(self.slow_delay);
        } else {
            std::thread::sleep(Duration::from_millis(10));
        }

        let result = if self.fail_outputs.contains(&name) {
            Err(InvokeError::Engine(format!("refusing to write {name}")))
        } else {
            let body: Vec<String> = inputs
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect();
            std::fs::write(output, body.join("\n")).map_err(|e| InvokeError::Engine(e.to_string()))
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ---------------------------------------------------------------------------
// Fake merge tool
// ---------------------------------------------------------------------------

/// Shell script that accepts the `cyclonedx merge` argument shape.
///
/// Writes `merged: <input names>` to the output file. Exits 3 with a message
/// on stderr if any input file name contains `bad`.
pub const FAKE_TOOL_SCRIPT: &str = r#"
out=""
ins=""
while [ $# -gt 0 ]; do
  case "$1" in
    --input-files)
      shift
      while [ $# -gt 0 ] && [ "$1" != "--output-file" ]; do
        ins="$ins $(basename "$1")"
        shift
      done
      ;;
    --output-file)
      out="$2"
      shift 2
      ;;
    *)
      shift
      ;;
  esac
done
case "$ins" in
  *bad*) echo "cannot parse input" >&2; exit 3 ;;
esac
echo "noise on stdout"
echo "merged:$ins" > "$out"
"#;

/// Arguments that make `sh` behave like the merge tool.
pub fn fake_tool_args() -> Vec<String> {
    vec![
        "-c".to_owned(),
        FAKE_TOOL_SCRIPT.to_owned(),
        "fake-cyclonedx".to_owned(),
    ]
}

/// Write `sbom-merge.toml` into `dir`, running the fake tool through `sh`.
///
/// `extra` is appended verbatim.
pub fn write_fake_tool_config(dir: &Path, extra: &str) -> PathBuf {
    let args = fake_tool_args()
        .iter()
        .map(|a| format!("'''{a}'''"))
        .collect::<Vec<_>>()
        .join(", ");
    let path = dir.join("sbom-merge.toml");
    std::fs::write(
        &path,
        format!("[engine]\nprogram = \"sh\"\nargs = [{args}]\n\n{extra}"),
    )
    .unwrap();
    path
}

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Run the `sbom-merge` binary in `cwd` with logging at its default level.
pub fn sbom_merge_in(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sbom-merge"))
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .env_remove("OTEL_EXPORTER_OTLP_ENDPOINT")
        .env_remove("SBOM_MERGE_TOOL")
        .env_remove("SBOM_MERGE_THREADS")
        .env_remove("SBOM_MERGE_CHUNK_SIZE")
        .output()
        .expect("failed to run sbom-merge")
}
