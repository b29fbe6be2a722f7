//! The cloning pipeline: validation, synthesis, tone-color conversion.
//!
//! [`OpenVoice`] owns every loaded model and the precomputed source
//! embeddings — built once at startup and passed by reference, never
//! ambient globals.  Each [`predict`](OpenVoice::predict) call is fully
//! sequential: validate, extract the target tone color, synthesize into a
//! per-request temporary WAV, convert into the caller's output path.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, Result};
use log::info;
use thiserror::Error;

use crate::{
    base_speaker::{BaseSpeakerTts, Synthesizer},
    converter::{ToneColorConverter, ToneTransfer},
    extractor,
    lang::{self, Lang},
    se::{SourceEmbeddings, SpeakerEmbedding},
};

/// Styles the English base speaker was trained with.
pub const EN_STYLES: [&str; 9] = [
    "default",
    "whispering",
    "shouting",
    "excited",
    "cheerful",
    "terrified",
    "angry",
    "sad",
    "friendly",
];

/// Styles the Chinese base speaker was trained with.
pub const ZH_STYLES: [&str; 1] = ["default"];

/// Message embedded into every converted clip.
pub const WATERMARK_MESSAGE: &str = "@lwabish";

const MIN_PROMPT_CHARS: usize = 2;
const MAX_PROMPT_CHARS: usize = 200;

/// Render an allow-list the way the error messages quote it:
/// `['default', 'whispering', …]`.
fn quoted_list(items: &[&str]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| format!("'{}'", s)).collect();
    format!("[{}]", quoted.join(", "))
}

// ─── Error taxonomy ──────────────────────────────────────────────────────────

/// Everything that can go wrong with one prediction.  Each variant renders
/// as the human-readable `[ERROR] …` line callers display verbatim.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error(
        "[ERROR] The detected language {code} for your input text is not in our Supported Languages: {}",
        quoted_list(&lang::SUPPORTED_LANGUAGES)
    )]
    UnsupportedLanguage { code: String },

    #[error("[ERROR] The style {style} is not supported for {language}, which should be in {allowed}")]
    UnsupportedStyle { style: String, language: &'static str, allowed: String },

    #[error("[ERROR] Please give a longer prompt text")]
    PromptTooShort,

    #[error("[ERROR] Text length limited to 200 characters for this demo, please try shorter text")]
    PromptTooLong,

    #[error("[ERROR] Get target tone color error {0:#}")]
    ToneColorExtraction(anyhow::Error),

    #[error("[ERROR] Synthesis or conversion failed: {0:#}")]
    Internal(anyhow::Error),
}

/// Result of a successful prediction.
#[derive(Debug)]
pub struct Prediction {
    /// Human-readable success message.
    pub message: String,
    /// The caller-supplied output path, now holding the converted audio.
    pub output_path: PathBuf,
    /// The reference clip the tone color was extracted from.
    pub reference_path: PathBuf,
}

// ─── Pipeline configuration ──────────────────────────────────────────────────

/// Filesystem layout the pipeline works in.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of the checkpoint tree (`base_speakers/{EN,ZH}`, `converter/`).
    pub checkpoints_dir: PathBuf,
    /// Where extraction writes per-clip voiced-segment WAVs.
    pub processing_dir: PathBuf,
    /// Where per-request intermediate synthesis WAVs go.
    pub temp_dir: PathBuf,
}

impl PipelineConfig {
    pub fn new(checkpoints_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoints_dir: checkpoints_dir.into(),
            processing_dir: PathBuf::from("processed"),
            temp_dir: std::env::temp_dir(),
        }
    }
}

// ─── The pipeline ────────────────────────────────────────────────────────────

/// The loaded cloning pipeline: two base speakers, the tone-color
/// converter, and the per-language source embeddings.
pub struct OpenVoice {
    en_tts: Box<dyn Synthesizer>,
    zh_tts: Box<dyn Synthesizer>,
    converter: Box<dyn ToneTransfer>,
    en_sources: SourceEmbeddings,
    zh_sources: SourceEmbeddings,
    config: PipelineConfig,
    request_counter: AtomicU64,
}

impl OpenVoice {
    /// Load every checkpoint under `config.checkpoints_dir`.
    pub fn load(config: PipelineConfig) -> Result<Self> {
        let base = config.checkpoints_dir.join("base_speakers");
        let en_dir = base.join("EN");
        let zh_dir = base.join("ZH");

        let en_tts = BaseSpeakerTts::load(&en_dir)
            .context("Failed to load the English base speaker")?;
        let zh_tts = BaseSpeakerTts::load(&zh_dir)
            .context("Failed to load the Chinese base speaker")?;
        let converter = ToneColorConverter::load(&config.checkpoints_dir.join("converter"))
            .context("Failed to load the tone color converter")?;
        let en_sources = SourceEmbeddings::load(&en_dir)?;
        let zh_sources = SourceEmbeddings::load(&zh_dir)?;

        // The converter re-emits audio at its own rate, so the base
        // speakers must have been exported at the same one.
        for tts in [&en_tts, &zh_tts] {
            anyhow::ensure!(
                tts.sample_rate() == converter.sample_rate(),
                "Base speaker rate {} Hz does not match converter rate {} Hz",
                tts.sample_rate(),
                converter.sample_rate()
            );
        }

        info!("Loaded checkpoints from {}", config.checkpoints_dir.display());
        Ok(Self::from_parts(
            Box::new(en_tts),
            Box::new(zh_tts),
            Box::new(converter),
            en_sources,
            zh_sources,
            config,
        ))
    }

    /// Assemble a pipeline from already-constructed components.  This is
    /// how tests run the full request path against mock models.
    pub fn from_parts(
        en_tts: Box<dyn Synthesizer>,
        zh_tts: Box<dyn Synthesizer>,
        converter: Box<dyn ToneTransfer>,
        en_sources: SourceEmbeddings,
        zh_sources: SourceEmbeddings,
        config: PipelineConfig,
    ) -> Self {
        Self {
            en_tts,
            zh_tts,
            converter,
            en_sources,
            zh_sources,
            config,
            request_counter: AtomicU64::new(0),
        }
    }

    /// Unique intermediate path per request, so concurrent or repeated
    /// invocations never race on a shared file.
    fn intermediate_path(&self) -> PathBuf {
        let n = self.request_counter.fetch_add(1, Ordering::Relaxed);
        self.config
            .temp_dir
            .join(format!("openvoice-src-{}-{}.wav", std::process::id(), n))
    }

    /// Run one cloning request.
    ///
    /// Validation order: prompt length, detected language, style.  The
    /// length bound is checked first, so a prompt that is both over-long
    /// and in an unsupported language reports the length error, not the
    /// language error.  Every failure is returned as a [`PredictError`];
    /// nothing is written to `output_path` unless the whole pipeline
    /// succeeds.
    pub fn predict(
        &self,
        text: &str,
        style: &str,
        reference_audio: &Path,
        output_path: &Path,
    ) -> Result<Prediction, PredictError> {
        let n_chars = text.chars().count();
        if n_chars < MIN_PROMPT_CHARS {
            return Err(PredictError::PromptTooShort);
        }
        if n_chars > MAX_PROMPT_CHARS {
            return Err(PredictError::PromptTooLong);
        }

        let code = lang::classify(text);
        info!("Detected language: {}", code);
        let Some(language) = Lang::from_code(&code) else {
            return Err(PredictError::UnsupportedLanguage { code });
        };

        let (tts, source_se) = match language {
            Lang::Zh => {
                if !ZH_STYLES.contains(&style) {
                    return Err(PredictError::UnsupportedStyle {
                        style: style.to_string(),
                        language: Lang::Zh.name(),
                        allowed: quoted_list(&ZH_STYLES),
                    });
                }
                (self.zh_tts.as_ref(), self.zh_sources.default_se())
            }
            Lang::En => {
                if !EN_STYLES.contains(&style) {
                    return Err(PredictError::UnsupportedStyle {
                        style: style.to_string(),
                        language: Lang::En.name(),
                        allowed: quoted_list(&EN_STYLES),
                    });
                }
                // All non-default English styles share one source embedding.
                let se = if style == "default" {
                    self.en_sources.default_se()
                } else {
                    self.en_sources.style_se()
                };
                (self.en_tts.as_ref(), se)
            }
        };

        let (target_se, _clip_name) = extractor::get_se(
            reference_audio,
            self.converter.as_ref(),
            &self.config.processing_dir,
            true,
        )
        .map_err(PredictError::ToneColorExtraction)?;

        let src_path = self.intermediate_path();
        let result = self.run_models(tts, text, style, &src_path, source_se, &target_se, output_path);
        // Best-effort cleanup of the intermediate file, success or not.
        let _ = std::fs::remove_file(&src_path);
        result.map_err(PredictError::Internal)?;

        info!("Wrote converted audio to {}", output_path.display());
        Ok(Prediction {
            message: "Get response successfully".to_string(),
            output_path: output_path.to_path_buf(),
            reference_path: reference_audio.to_path_buf(),
        })
    }

    fn run_models(
        &self,
        tts: &dyn Synthesizer,
        text: &str,
        style: &str,
        src_path: &Path,
        source_se: &SpeakerEmbedding,
        target_se: &SpeakerEmbedding,
        output_path: &Path,
    ) -> Result<()> {
        tts.synthesize(text, style, src_path)?;
        self.converter.convert(src_path, source_se, target_se, output_path, WATERMARK_MESSAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio;
    use anyhow::bail;
    use std::sync::{Arc, Mutex as StdMutex};

    const RATE: u32 = 16_000;

    struct MockSynth;

    impl Synthesizer for MockSynth {
        fn synthesize(&self, _text: &str, _style: &str, output: &Path) -> Result<()> {
            let tone: Vec<f32> =
                (0..RATE as usize).map(|i| (i as f32 * 0.1).sin() * 0.3).collect();
            audio::write_wav(output, &tone, RATE)
        }
    }

    struct FailingSynth;

    impl Synthesizer for FailingSynth {
        fn synthesize(&self, _text: &str, _style: &str, _output: &Path) -> Result<()> {
            bail!("onnx session exploded")
        }
    }

    struct MockConverter;

    impl ToneTransfer for MockConverter {
        fn encode_reference(&self, samples: &[f32], _rate: u32) -> Result<SpeakerEmbedding> {
            let energy = samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32;
            SpeakerEmbedding::new(vec![energy, 1.0])
        }

        fn convert(
            &self,
            source_wav: &Path,
            _src_se: &SpeakerEmbedding,
            _tgt_se: &SpeakerEmbedding,
            output: &Path,
            message: &str,
        ) -> Result<()> {
            assert_eq!(message, WATERMARK_MESSAGE);
            std::fs::copy(source_wav, output).context("copy failed")?;
            Ok(())
        }
    }

    /// Converter that records the source embedding each conversion was
    /// asked to move away from.
    struct RecordingConverter {
        seen_src: Arc<StdMutex<Option<SpeakerEmbedding>>>,
    }

    impl ToneTransfer for RecordingConverter {
        fn encode_reference(&self, samples: &[f32], rate: u32) -> Result<SpeakerEmbedding> {
            MockConverter.encode_reference(samples, rate)
        }

        fn convert(
            &self,
            source_wav: &Path,
            src_se: &SpeakerEmbedding,
            tgt_se: &SpeakerEmbedding,
            output: &Path,
            message: &str,
        ) -> Result<()> {
            *self.seen_src.lock().unwrap() = Some(src_se.clone());
            MockConverter.convert(source_wav, src_se, tgt_se, output, message)
        }
    }

    fn se(values: &[f32]) -> SpeakerEmbedding {
        SpeakerEmbedding::new(values.to_vec()).unwrap()
    }

    // Source embeddings the mock pipelines are assembled with.
    const EN_DEFAULT_SE: [f32; 2] = [0.1, 0.2];
    const EN_STYLE_SE: [f32; 2] = [0.3, 0.4];
    const ZH_DEFAULT_SE: [f32; 2] = [0.5, 0.6];

    /// Pipeline over mock models, with all scratch paths in `dir`.
    fn mock_pipeline_with(
        dir: &Path,
        en_tts: Box<dyn Synthesizer>,
        converter: Box<dyn ToneTransfer>,
    ) -> OpenVoice {
        let config = PipelineConfig {
            checkpoints_dir: dir.join("checkpoints"),
            processing_dir: dir.join("processed"),
            temp_dir: dir.to_path_buf(),
        };
        OpenVoice::from_parts(
            en_tts,
            Box::new(MockSynth),
            converter,
            SourceEmbeddings::from_parts(se(&EN_DEFAULT_SE), Some(se(&EN_STYLE_SE))),
            SourceEmbeddings::from_parts(se(&ZH_DEFAULT_SE), None),
            config,
        )
    }

    fn mock_pipeline(dir: &Path, en_tts: Box<dyn Synthesizer>) -> OpenVoice {
        mock_pipeline_with(dir, en_tts, Box::new(MockConverter))
    }

    /// Write a reference clip with a voiced middle section.
    fn write_reference(dir: &Path) -> PathBuf {
        let path = dir.join("reference.wav");
        let mut samples = vec![0.0f32; RATE as usize / 2];
        samples.extend((0..RATE as usize).map(|i| (i as f32 * 0.1).sin() * 0.4));
        samples.extend(vec![0.0f32; RATE as usize / 2]);
        audio::write_wav(&path, &samples, RATE).unwrap();
        path
    }

    #[test]
    fn test_unsupported_language() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_reference(dir.path());
        let pipeline = mock_pipeline(dir.path(), Box::new(MockSynth));

        let err = pipeline
            .predict("Привет, как дела сегодня?", "default", &reference, &dir.path().join("out.wav"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("[ERROR]"), "got: {msg}");
        assert!(msg.contains("ru"), "should name the detected code, got: {msg}");
        assert!(msg.contains("['zh', 'en']"), "should list the supported set, got: {msg}");
        assert!(!dir.path().join("out.wav").exists());
    }

    #[test]
    fn test_zh_rejects_non_default_style() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_reference(dir.path());
        let pipeline = mock_pipeline(dir.path(), Box::new(MockSynth));

        let err = pipeline
            .predict("你好，今天天气很好。", "shouting", &reference, &dir.path().join("out.wav"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("shouting"), "got: {msg}");
        assert!(msg.contains("Chinese"), "got: {msg}");
        assert!(msg.contains("['default']"), "got: {msg}");
    }

    #[test]
    fn test_en_rejects_unknown_style() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_reference(dir.path());
        let pipeline = mock_pipeline(dir.path(), Box::new(MockSynth));

        let err = pipeline
            .predict("Hello there, my friend", "growling", &reference, &dir.path().join("out.wav"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.contains(
                "['default', 'whispering', 'shouting', 'excited', 'cheerful', 'terrified', 'angry', 'sad', 'friendly']"
            ),
            "got: {msg}"
        );
    }

    #[test]
    fn test_prompt_length_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_reference(dir.path());
        let pipeline = mock_pipeline(dir.path(), Box::new(MockSynth));
        let out = dir.path().join("out.wav");

        for text in ["", "a"] {
            let err = pipeline.predict(text, "default", &reference, &out).unwrap_err();
            assert!(matches!(err, PredictError::PromptTooShort), "text {:?}: {err}", text);
        }

        let long = "word ".repeat(50);
        assert!(long.chars().count() > 200);
        let err = pipeline.predict(&long, "default", &reference, &out).unwrap_err();
        assert!(matches!(err, PredictError::PromptTooLong));
        assert!(err.to_string().contains("200"), "got: {err}");
        assert!(!out.exists());
    }

    #[test]
    fn test_extraction_failure_is_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = mock_pipeline(dir.path(), Box::new(MockSynth));
        let out = dir.path().join("out.wav");

        // Missing reference file → extractor error, wrapped in the message.
        let err = pipeline
            .predict("Hello there", "default", &dir.path().join("missing.wav"), &out)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Get target tone color error"), "got: {msg}");
        assert!(!out.exists());
    }

    #[test]
    fn test_silent_reference_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let silent = dir.path().join("silent.wav");
        audio::write_wav(&silent, &vec![0.0; RATE as usize], RATE).unwrap();
        let pipeline = mock_pipeline(dir.path(), Box::new(MockSynth));

        let err = pipeline
            .predict("Hello there", "default", &silent, &dir.path().join("out.wav"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Get target tone color error"), "got: {msg}");
        assert!(msg.contains("No voiced segments"), "got: {msg}");
    }

    #[test]
    fn test_synthesis_failure_is_internal() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_reference(dir.path());
        let pipeline = mock_pipeline(dir.path(), Box::new(FailingSynth));
        let out = dir.path().join("out.wav");

        let err = pipeline.predict("Hello there", "default", &reference, &out).unwrap_err();
        assert!(matches!(err, PredictError::Internal(_)));
        assert!(err.to_string().contains("onnx session exploded"), "got: {err}");
        assert!(!out.exists());
    }

    #[test]
    fn test_successful_clone() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_reference(dir.path());
        let pipeline = mock_pipeline(dir.path(), Box::new(MockSynth));
        let out = dir.path().join("out.wav");

        let prediction =
            pipeline.predict("Hello there", "default", &reference, &out).unwrap();
        assert!(prediction.message.contains("Get response successfully"));
        assert_eq!(prediction.output_path, out);
        assert_eq!(prediction.reference_path, reference);
        assert!(out.exists());
        assert!(std::fs::metadata(&out).unwrap().len() > 0);
    }

    #[test]
    fn test_en_default_style_selects_default_source_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_reference(dir.path());
        let seen_src = Arc::new(StdMutex::new(None));
        let converter = RecordingConverter { seen_src: seen_src.clone() };
        let pipeline = mock_pipeline_with(dir.path(), Box::new(MockSynth), Box::new(converter));

        pipeline
            .predict("Hello there", "default", &reference, &dir.path().join("out.wav"))
            .unwrap();
        let recorded = seen_src.lock().unwrap().take().expect("conversion never ran");
        assert_eq!(recorded.as_slice(), &EN_DEFAULT_SE);
    }

    #[test]
    fn test_en_non_default_style_selects_style_source_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_reference(dir.path());
        let seen_src = Arc::new(StdMutex::new(None));
        let converter = RecordingConverter { seen_src: seen_src.clone() };
        let pipeline = mock_pipeline_with(dir.path(), Box::new(MockSynth), Box::new(converter));
        let out = dir.path().join("out.wav");

        let prediction =
            pipeline.predict("Hello there", "whispering", &reference, &out).unwrap();
        assert!(prediction.message.contains("Get response successfully"));
        assert!(out.exists());

        // Every non-default English style shares the one `style` embedding.
        let recorded = seen_src.lock().unwrap().take().expect("conversion never ran");
        assert_eq!(recorded.as_slice(), &EN_STYLE_SE);
    }

    #[test]
    fn test_zh_selects_its_default_source_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_reference(dir.path());
        let seen_src = Arc::new(StdMutex::new(None));
        let converter = RecordingConverter { seen_src: seen_src.clone() };
        let pipeline = mock_pipeline_with(dir.path(), Box::new(MockSynth), Box::new(converter));

        pipeline
            .predict("你好，今天天气很好。", "default", &reference, &dir.path().join("out.wav"))
            .unwrap();
        let recorded = seen_src.lock().unwrap().take().expect("conversion never ran");
        assert_eq!(recorded.as_slice(), &ZH_DEFAULT_SE);
    }

    #[test]
    fn test_length_checked_before_language() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_reference(dir.path());
        let pipeline = mock_pipeline(dir.path(), Box::new(MockSynth));

        // Over-long prompt in an unsupported language: the length bound
        // wins, as documented on `predict`.
        let long_ru = "привет ".repeat(40);
        assert!(long_ru.chars().count() > 200);
        let err = pipeline
            .predict(&long_ru, "default", &reference, &dir.path().join("out.wav"))
            .unwrap_err();
        assert!(matches!(err, PredictError::PromptTooLong), "got: {err}");
    }

    #[test]
    fn test_intermediate_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_reference(dir.path());
        let pipeline = mock_pipeline(dir.path(), Box::new(MockSynth));
        let out = dir.path().join("out.wav");
        pipeline.predict("Hello there", "default", &reference, &out).unwrap();

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("openvoice-src-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_intermediate_paths_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = mock_pipeline(dir.path(), Box::new(MockSynth));
        let a = pipeline.intermediate_path();
        let b = pipeline.intermediate_path();
        assert_ne!(a, b);
    }

    #[test]
    fn test_quoted_list_format() {
        assert_eq!(quoted_list(&ZH_STYLES), "['default']");
        assert!(quoted_list(&EN_STYLES).starts_with("['default', 'whispering'"));
        assert_eq!(quoted_list(&lang::SUPPORTED_LANGUAGES), "['zh', 'en']");
    }
}
