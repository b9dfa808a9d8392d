//! The hybrid engine: closed-set and open-set in parallel, then arbitration.
//!
//! ```text
//! ImageTensor ─┬─► ClosedSetPredictor ─► Calibrator ─┐
//!              └─► OpenSetScorer ────────────────────┴─► ArbitrationPolicy ─► Verdict
//! ```

use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use ndarray::Array4;

use crate::arbitration::ArbitrationPolicy;
use crate::calibration::{Calibrator, Temperature};
use crate::classifier::{ClosedSetPredictor, OnnxClassifier, WeightedSource};
use crate::config::Config;
use crate::error::{ConfigError, InferenceError, InferenceResult, Result};
use crate::labels::LabelSet;
use crate::open_set::{
    DomainCheck, OnnxImageEncoder, OnnxTextEncoder, OpenSetScorer, OpenSetVocabulary, PromptBank,
};
use crate::types::{Assessment, ClosedSetResult, DomainReport, ImageTensor, SimilarityRanking, Verdict};

/// Default number of open-set entries reported in an [`Assessment`].
const DEFAULT_DISPLAY_TOP_K: usize = 5;

/// Process-wide decision engine.
///
/// Everything except the calibrator is immutable after construction. The
/// calibrator sits behind a `RwLock<Arc<_>>`: each request takes one snapshot
/// at its start, and a reload swaps in a fully built replacement.
pub struct HybridEngine {
    predictor: ClosedSetPredictor,
    scorer: OpenSetScorer,
    policy: ArbitrationPolicy,
    calibrator: RwLock<Arc<Calibrator>>,
    display_top_k: usize,
    temperature_bounds: Option<RangeInclusive<f64>>,
}

impl HybridEngine {
    /// Assemble an engine from already-built components.
    pub fn new(
        predictor: ClosedSetPredictor,
        scorer: OpenSetScorer,
        policy: ArbitrationPolicy,
        temperature: Temperature,
    ) -> Self {
        Self {
            predictor,
            scorer,
            policy,
            calibrator: RwLock::new(Arc::new(Calibrator::new(temperature))),
            display_top_k: DEFAULT_DISPLAY_TOP_K,
            temperature_bounds: None,
        }
    }

    /// How many open-set entries to keep in each assessment.
    pub fn with_display_top_k(mut self, k: usize) -> Self {
        self.display_top_k = k;
        self
    }

    /// Range that [`reload_temperature`](Self::reload_temperature) enforces.
    pub fn with_temperature_bounds(mut self, bounds: RangeInclusive<f64>) -> Self {
        self.temperature_bounds = Some(bounds);
        self
    }

    /// Load every artifact and model named by `config`.
    ///
    /// Validates `config` first, then fails fast on a missing or malformed
    /// label map, temperature, model, or vocabulary, and on encoders whose
    /// output dimension differs from `open_set.embedding_dim`. Blocking; call
    /// from `spawn_blocking` in async code.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let labels = Arc::new(LabelSet::load(&config.label_map_path())?);
        let bounds = config.calibration.temperature_bounds();
        let temperature = Temperature::load_within(&config.temperature_path(), &bounds)?;
        let policy = ArbitrationPolicy::new(&config.arbitration, &labels)?;

        let mut sources = Vec::with_capacity(config.classifier.sources.len());
        for source in &config.classifier.sources {
            if source.weight == 0.0 {
                tracing::info!("Skipping classifier source '{}' with zero weight", source.name);
                continue;
            }
            let model = OnnxClassifier::load(source, &config.source_model_path(source))?;
            sources.push(WeightedSource::new(Arc::new(model), source.weight));
        }
        let predictor = ClosedSetPredictor::new(Arc::clone(&labels), sources)?;

        let open = &config.open_set;
        let vocabulary_file = config.vocabulary_file();
        let vocabulary = OpenSetVocabulary::from_config(open, vocabulary_file.as_deref())?;
        let model_dir = config.open_set_model_dir();
        let image_encoder = OnnxImageEncoder::load(&model_dir, open)?;
        let text_encoder = OnnxTextEncoder::load(&model_dir, open)?;

        let prompts = vocabulary.prompts(&open.prompt_template);
        let cache_path = config
            .cache_dir()
            .join(format!("{}-prompts.bin", open.model));
        let bank = PromptBank::load_or_encode(
            &cache_path,
            &prompts,
            &text_encoder,
            open.text_batch_size,
            open.embedding_dim,
        )?;

        let mut scorer =
            OpenSetScorer::new(vocabulary, bank, Arc::new(image_encoder), open.logit_scale)?;
        let size = config.input.image_size as usize;
        scorer.check_embedding_dim(&ImageTensor::new(Array4::zeros((1, 3, size, size)))?)?;
        if open.domain.enabled {
            let domain = DomainCheck::encode(&open.domain, &text_encoder, open.logit_scale)?;
            scorer = scorer.with_domain_check(domain);
        }

        tracing::info!(
            "Hybrid engine ready: {} classes, T={}, general threshold {}, severity threshold {}",
            labels.len(),
            temperature,
            config.arbitration.general_threshold,
            config.arbitration.severity_threshold
        );

        Ok(Self::new(predictor, scorer, policy, temperature)
            .with_display_top_k(open.display_top_k)
            .with_temperature_bounds(bounds))
    }

    /// The closed-set label set.
    pub fn labels(&self) -> &LabelSet {
        self.predictor.labels()
    }

    /// The closed-set predictor.
    pub fn predictor(&self) -> &ClosedSetPredictor {
        &self.predictor
    }

    /// The open-set scorer.
    pub fn scorer(&self) -> &OpenSetScorer {
        &self.scorer
    }

    /// Snapshot of the calibrator currently in use.
    pub fn calibrator(&self) -> Arc<Calibrator> {
        Arc::clone(&self.calibrator.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the temperature. Returns the previous one.
    ///
    /// Requests already running keep the snapshot they started with.
    pub fn swap_temperature(&self, temperature: Temperature) -> Temperature {
        let replacement = Arc::new(Calibrator::new(temperature));
        let mut guard = self.calibrator.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *guard, replacement);
        drop(guard);
        tracing::info!(
            "Temperature swapped: {} -> {}",
            previous.temperature(),
            temperature
        );
        previous.temperature()
    }

    /// Load a temperature file and swap it in. The old value stays on failure,
    /// including a value outside the engine's temperature bounds.
    pub fn reload_temperature(&self, path: &Path) -> std::result::Result<Temperature, ConfigError> {
        let temperature = match &self.temperature_bounds {
            Some(bounds) => Temperature::load_within(path, bounds)?,
            None => Temperature::load(path)?,
        };
        self.swap_temperature(temperature);
        Ok(temperature)
    }

    /// Arbitrate between a closed-set result and an open-set ranking.
    pub fn decide(
        &self,
        closed: &ClosedSetResult,
        ranking: &SimilarityRanking,
    ) -> InferenceResult<Verdict> {
        self.policy.decide(closed, ranking)
    }

    /// Assess one image, running both paths on scoped threads.
    pub fn assess_blocking(&self, image: &ImageTensor) -> InferenceResult<Assessment> {
        let calibrator = self.calibrator();
        let (closed, open) = std::thread::scope(|scope| {
            let closed = scope.spawn(|| self.predictor.predict(image, &calibrator));
            let open = self.scorer.assess(image);
            let closed = closed
                .join()
                .unwrap_or_else(|_| Err(InferenceError::model("closed-set", "worker panicked")));
            (closed, open)
        });
        let (ranking, domain) = open?;
        self.finish(closed?, ranking, domain, &calibrator)
    }

    /// Assess one image, running both paths on the blocking pool.
    pub async fn assess(self: &Arc<Self>, image: Arc<ImageTensor>) -> InferenceResult<Assessment> {
        let calibrator = self.calibrator();

        let closed_task = {
            let engine = Arc::clone(self);
            let image = Arc::clone(&image);
            let calibrator = Arc::clone(&calibrator);
            tokio::task::spawn_blocking(move || engine.predictor.predict(&image, &calibrator))
        };
        let open_task = {
            let engine = Arc::clone(self);
            tokio::task::spawn_blocking(move || engine.scorer.assess(&image))
        };

        let (closed, open) = tokio::try_join!(closed_task, open_task).map_err(|e| {
            InferenceError::model("engine", format!("inference task failed: {e}"))
        })?;
        let (ranking, domain) = open?;
        self.finish(closed?, ranking, domain, &calibrator)
    }

    fn finish(
        &self,
        closed: ClosedSetResult,
        ranking: SimilarityRanking,
        domain: Option<DomainReport>,
        calibrator: &Calibrator,
    ) -> InferenceResult<Assessment> {
        if let Some(report) = &domain {
            if !report.in_domain {
                tracing::warn!(
                    "Image looks out of domain (in {:.3} vs out {:.3})",
                    report.in_domain_score,
                    report.out_of_domain_score
                );
            }
        }
        let verdict = self.policy.decide(&closed, &ranking)?;
        Ok(Assessment {
            verdict,
            closed_set: closed,
            open_set_top: ranking.top_k(self.display_top_k).to_vec(),
            domain,
            temperature: calibrator.temperature().value(),
        })
    }
}
