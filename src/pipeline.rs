//! Pipeline – ties together template validation, name extraction, rendering
//! and archive streaming for one batch.
//!
//! A [`Pipeline`] is built once per process (configuration plus loaded fonts)
//! and hands out one [`Batch`] per request. A batch walks the states
//!
//! ```text
//! Idle -> Validating -> Extracting -> Rendering(0..n) -> Finalizing -> Done
//! ```
//!
//! and can drop into `Aborted` from any of them. Validation and extraction
//! both finish before the sink is touched, so every input problem is reported
//! while a clean error response is still possible. The template and names
//! files are released on every way out, including an early drop.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::archive::ArchiveStreamer;
use crate::error::{BatchError, BatchResult};
use crate::fonts::{FontManager, ResolvedFont};
use crate::names::read_names;
use crate::render::{CertificateRenderer, CERTIFICATE_EXTENSION};
use crate::settings::{PipelineConfig, RenderSettings};
use crate::template::{load_template, Template};

/// Where a batch currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Validating,
    Extracting,
    /// Rendering the name at this index.
    Rendering(usize),
    Finalizing,
    Done,
    Aborted,
}

impl BatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchState::Done | BatchState::Aborted)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchState::Rendering(i) => write!(f, "Rendering({i})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// The two uploaded files of a batch.
#[derive(Debug, Clone)]
pub struct BatchInputs {
    pub template_path: PathBuf,
    pub names_path: PathBuf,
}

impl BatchInputs {
    pub fn new(template_path: impl Into<PathBuf>, names_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            names_path: names_path.into(),
        }
    }
}

/// Summary of a finished batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Archive entry names, in input order.
    pub entries: Vec<String>,
    /// Bytes written to the sink.
    pub bytes_written: u64,
}

/// Process-level pipeline: configuration plus the shared font manager.
///
/// Holds no per-batch state, so one instance can serve concurrent batches.
pub struct Pipeline {
    config: PipelineConfig,
    fonts: FontManager,
}

impl Pipeline {
    /// Build a pipeline, loading fonts as the config asks.
    pub fn new(config: PipelineConfig) -> Self {
        let mut fonts = if config.load_system_fonts {
            FontManager::system()
        } else {
            FontManager::new()
        };
        if let Some(dir) = &config.fonts_dir {
            fonts.load_fonts_dir(dir);
        }
        if fonts.is_empty() {
            log::warn!("no fonts available; certificates will not show names");
        }
        Self::with_fonts(config, fonts)
    }

    /// Build a pipeline around an already populated font manager.
    pub fn with_fonts(config: PipelineConfig, fonts: FontManager) -> Self {
        Self { config, fonts }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn fonts(&self) -> &FontManager {
        &self.fonts
    }

    /// Start a batch. Nothing is read until [`Batch::prepare`].
    pub fn batch(&self, inputs: BatchInputs, settings: RenderSettings) -> Batch<'_> {
        Batch {
            pipeline: self,
            transient: TransientInputs::new(&inputs, self.config.release_inputs),
            inputs,
            settings,
            state: BatchState::Idle,
            template: None,
            names: Vec::new(),
        }
    }

    /// Convenience: run a whole batch, opening the sink only once the inputs
    /// are known to be good.
    pub fn run<W, F>(
        &self,
        inputs: BatchInputs,
        settings: RenderSettings,
        open_sink: F,
    ) -> BatchResult<BatchReport>
    where
        W: Write,
        F: FnOnce() -> io::Result<W>,
    {
        self.batch(inputs, settings).run(open_sink)
    }
}

/// One request's job context: its template, its names and its archive.
pub struct Batch<'p> {
    pipeline: &'p Pipeline,
    inputs: BatchInputs,
    transient: TransientInputs,
    settings: RenderSettings,
    state: BatchState,
    template: Option<Template>,
    names: Vec<String>,
}

impl<'p> Batch<'p> {
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Names extracted by [`Batch::prepare`], in input order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Validate the template and read every name.
    ///
    /// Returns the number of certificates the batch will produce. On error the
    /// batch is `Aborted` and its inputs are released.
    pub fn prepare(&mut self) -> BatchResult<usize> {
        if self.state != BatchState::Idle {
            return Err(BatchError::internal(format!(
                "prepare called in state {}",
                self.state
            )));
        }
        log::info!(
            "batch started: template={} names={}",
            self.inputs.template_path.display(),
            self.inputs.names_path.display()
        );

        if let Err(e) = self.settings.validate() {
            return Err(self.abort(e));
        }

        self.transition(BatchState::Validating);
        let pipeline = self.pipeline;
        let config = &pipeline.config;
        let template = match load_template(
            &self.inputs.template_path,
            config.max_template_width,
            config.max_template_height,
        ) {
            Ok(t) => t,
            Err(e) => return Err(self.abort(e)),
        };
        log::debug!("template is {}x{}", template.width(), template.height());
        self.template = Some(template);

        self.transition(BatchState::Extracting);
        match read_names(&self.inputs.names_path, config.skip_header) {
            Ok(names) => self.names = names,
            Err(e) => return Err(self.abort(e)),
        }
        log::debug!("extracted {} names", self.names.len());

        Ok(self.names.len())
    }

    /// Render every name into a ZIP archive written to `sink`.
    ///
    /// Must follow a successful [`Batch::prepare`]. Once this is called,
    /// any failure leaves a truncated archive in the sink.
    pub fn stream_to<W: Write>(&mut self, sink: W) -> BatchResult<BatchReport> {
        let template = match self.template.take() {
            Some(t) if self.state == BatchState::Extracting => t,
            _ => {
                let err = BatchError::internal(format!(
                    "stream_to called in state {}",
                    self.state
                ));
                return Err(self.abort(err));
            }
        };

        let font = self.resolve_font();
        let mut archive = ArchiveStreamer::open(sink, self.pipeline.config.compression_level);
        self.transition(BatchState::Rendering(0));

        let renderer = CertificateRenderer::new(&template, &self.settings, font.as_ref());
        let mut failure = None;
        for (i, name) in self.names.iter().enumerate() {
            self.state = BatchState::Rendering(i);
            let appended = renderer
                .render(name)
                .and_then(|png| archive.append(name, CERTIFICATE_EXTENSION, &png));
            if let Err(e) = appended {
                failure = Some(e);
                break;
            }
        }

        if let Some(e) = failure {
            archive.abort();
            return Err(self.abort(e));
        }

        self.transition(BatchState::Finalizing);
        let (entries, bytes_written) = match archive.finish() {
            Ok(done) => done,
            Err(e) => return Err(self.abort(e)),
        };

        self.transition(BatchState::Done);
        self.transient.release();
        log::info!(
            "batch done: {} certificates, {} bytes",
            entries.len(),
            bytes_written
        );
        Ok(BatchReport {
            entries,
            bytes_written,
        })
    }

    /// [`Batch::prepare`], then open the sink, then [`Batch::stream_to`].
    pub fn run<W, F>(mut self, open_sink: F) -> BatchResult<BatchReport>
    where
        W: Write,
        F: FnOnce() -> io::Result<W>,
    {
        self.prepare()?;
        let sink = match open_sink() {
            Ok(sink) => sink,
            Err(e) => return Err(self.abort(BatchError::SinkWriteFailed(e))),
        };
        self.stream_to(sink)
    }

    fn resolve_font(&self) -> Option<ResolvedFont> {
        let font = self.pipeline.fonts.resolve(&self.settings.font_family);
        match &font {
            Some(f) => log::debug!(
                "font {:?} resolved to {:?}",
                self.settings.font_family,
                f.family
            ),
            None => log::warn!(
                "no font face for {:?}; names will not be drawn",
                self.settings.font_family
            ),
        }
        font
    }

    fn transition(&mut self, next: BatchState) {
        log::debug!("batch state {} -> {}", self.state, next);
        self.state = next;
    }

    fn abort(&mut self, err: BatchError) -> BatchError {
        if err.is_validation() {
            log::warn!("batch rejected in state {}: {err}", self.state);
        } else {
            log::error!("batch failed in state {}: {err}", self.state);
        }
        self.transition(BatchState::Aborted);
        self.transient.release();
        err
    }
}

/// Uploaded files owned by a batch, deleted when the batch ends.
///
/// Deletion is best-effort: failures are logged, never returned.
struct TransientInputs {
    paths: Vec<PathBuf>,
}

impl TransientInputs {
    fn new(inputs: &BatchInputs, release: bool) -> Self {
        let paths = if release {
            vec![inputs.template_path.clone(), inputs.names_path.clone()]
        } else {
            Vec::new()
        };
        Self { paths }
    }

    fn release(&mut self) {
        for path in self.paths.drain(..) {
            remove_quietly(&path);
        }
    }
}

impl Drop for TransientInputs {
    fn drop(&mut self) {
        self.release();
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("could not remove {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn config() -> PipelineConfig {
        PipelineConfig {
            load_system_fonts: false,
            ..PipelineConfig::default()
        }
    }

    fn write_inputs(dir: &Path, w: u32, h: u32, csv: &str) -> BatchInputs {
        let template = dir.join("template.png");
        RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]))
            .save_with_format(&template, ImageFormat::Png)
            .unwrap();
        let names = dir.join("names.csv");
        std::fs::write(&names, csv).unwrap();
        BatchInputs::new(template, names)
    }

    #[test]
    fn happy_path_walks_to_done() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(dir.path(), 40, 30, "Alice\nBob\n");
        let pipeline = Pipeline::new(config());
        let mut batch = pipeline.batch(inputs.clone(), RenderSettings::default());

        assert_eq!(batch.state(), BatchState::Idle);
        assert_eq!(batch.prepare().unwrap(), 2);
        assert_eq!(batch.state(), BatchState::Extracting);
        assert_eq!(batch.names(), ["Alice", "Bob"]);

        let mut out = Vec::new();
        let report = batch.stream_to(&mut out).unwrap();
        assert_eq!(batch.state(), BatchState::Done);
        assert_eq!(report.entries, vec!["Alice.png", "Bob.png"]);
        assert_eq!(report.bytes_written as usize, out.len());
        assert!(!inputs.template_path.exists());
        assert!(!inputs.names_path.exists());
    }

    #[test]
    fn oversized_template_aborts_before_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(dir.path(), 501, 10, "\"never parsed");
        let pipeline = Pipeline::new(config());
        let mut batch = pipeline.batch(inputs.clone(), RenderSettings::default());

        let err = batch.prepare().unwrap_err();
        assert!(matches!(err, BatchError::TemplateTooLarge { .. }));
        assert_eq!(batch.state(), BatchState::Aborted);
        assert!(!inputs.template_path.exists());
        assert!(!inputs.names_path.exists());
    }

    #[test]
    fn malformed_names_abort_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(dir.path(), 10, 10, "Alice\n\"Bob");
        let pipeline = Pipeline::new(config());
        let mut batch = pipeline.batch(inputs.clone(), RenderSettings::default());

        assert!(matches!(
            batch.prepare(),
            Err(BatchError::MalformedInput { .. })
        ));
        assert_eq!(batch.state(), BatchState::Aborted);
        assert!(!inputs.names_path.exists());
    }

    #[test]
    fn invalid_settings_abort_without_reading() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(dir.path(), 10, 10, "Alice\n");
        let pipeline = Pipeline::new(config());
        let settings = RenderSettings {
            font_size: -3.0,
            ..RenderSettings::default()
        };
        let mut batch = pipeline.batch(inputs, settings);
        assert!(matches!(batch.prepare(), Err(BatchError::InvalidSettings(_))));
        assert_eq!(batch.state(), BatchState::Aborted);
    }

    #[test]
    fn stream_without_prepare_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(dir.path(), 10, 10, "Alice\n");
        let pipeline = Pipeline::new(config());
        let mut batch = pipeline.batch(inputs, RenderSettings::default());
        let mut out = Vec::new();
        assert!(matches!(
            batch.stream_to(&mut out),
            Err(BatchError::InternalError(_))
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn sink_is_not_opened_for_rejected_batches() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(dir.path(), 600, 200, "Alice\n");
        let pipeline = Pipeline::new(config());
        let mut opened = false;
        let result = pipeline.run(inputs, RenderSettings::default(), || {
            opened = true;
            Ok(Cursor::new(Vec::new()))
        });
        assert!(result.is_err());
        assert!(!opened);
    }

    #[test]
    fn failing_sink_open_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(dir.path(), 10, 10, "Alice\n");
        let pipeline = Pipeline::new(config());
        let result = pipeline.run(inputs.clone(), RenderSettings::default(), || {
            Err::<Vec<u8>, _>(io::Error::new(io::ErrorKind::PermissionDenied, "nope"))
        });
        assert!(matches!(result, Err(BatchError::SinkWriteFailed(_))));
        assert!(!inputs.template_path.exists());
    }

    #[test]
    fn inputs_are_kept_when_release_is_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(dir.path(), 10, 10, "Alice\n");
        let pipeline = Pipeline::new(PipelineConfig {
            release_inputs: false,
            ..config()
        });
        pipeline
            .run(inputs.clone(), RenderSettings::default(), || Ok(Vec::new()))
            .unwrap();
        assert!(inputs.template_path.exists());
        assert!(inputs.names_path.exists());
    }

    #[test]
    fn dropping_a_prepared_batch_releases_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(dir.path(), 10, 10, "Alice\n");
        let pipeline = Pipeline::new(config());
        {
            let mut batch = pipeline.batch(inputs.clone(), RenderSettings::default());
            batch.prepare().unwrap();
        }
        assert!(!inputs.template_path.exists());
        assert!(!inputs.names_path.exists());
    }

    #[test]
    fn state_display() {
        assert_eq!(BatchState::Rendering(3).to_string(), "Rendering(3)");
        assert_eq!(BatchState::Aborted.to_string(), "Aborted");
        assert!(BatchState::Done.is_terminal());
        assert!(!BatchState::Extracting.is_terminal());
    }
}
