//! Cluster-count search
//!
//! Fits k-means++ for every candidate k and keeps the one with the best
//! validity score. A candidate that fails (too few distinct rows, degenerate
//! labelling, non-finite score) is recorded and skipped; the search only fails
//! when no candidate succeeds. Each k has its own seed derived from the base
//! seed, so the sequential and parallel paths choose the same k and labels.

use rayon::prelude::*;
use tracing::{info, warn};

use super::kmeans::{candidate_seed, fit, KMeansFit};
use super::{metrics, Clusterer};
use crate::config::KSearchParams;
use crate::error::{AnalysisError, Result};
use crate::types::{CandidateScore, ClusterAssignment, FeatureMatrix, KSelection};

pub struct KSearch<'a> {
    params: &'a KSearchParams,
}

type Evaluation = (CandidateScore, Option<KMeansFit>);

impl<'a> KSearch<'a> {
    pub fn new(params: &'a KSearchParams) -> Self {
        Self { params }
    }

    /// Score every candidate k and return the selection with the winning fit
    pub fn run(&self, matrix: &FeatureMatrix) -> Result<(KSelection, KMeansFit)> {
        self.params.validate()?;
        if matrix.n_rows() < 2 {
            return Err(AnalysisError::Data(format!(
                "cluster-count search needs at least 2 rows, got {}",
                matrix.n_rows()
            )));
        }

        let n = matrix.n_rows();
        let candidates = self.params.candidates(n);
        let mut evaluations: Vec<Evaluation> = if self.params.parallel {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.params.workers)
                .build()
                .map_err(|e| AnalysisError::Config(format!("cannot start worker pool: {e}")))?;
            pool.install(|| {
                candidates
                    .par_iter()
                    .map(|&k| self.evaluate(matrix, k))
                    .collect()
            })
        } else {
            candidates.iter().map(|&k| self.evaluate(matrix, k)).collect()
        };
        if self.params.k_max > n {
            let first = self.params.k_min.max(n + 1);
            let error = format!(
                "k values {first}..={} exceed the row count {n}",
                self.params.k_max
            );
            warn!(k = first, error = %error, "candidate cluster counts skipped");
            evaluations.push((
                CandidateScore {
                    k: first,
                    score: None,
                    error: Some(error),
                },
                None,
            ));
        }
        evaluations.sort_by_key(|(score, _)| score.k);

        let scores: Vec<CandidateScore> = evaluations.iter().map(|(s, _)| s.clone()).collect();
        let best = select_best(&scores).ok_or_else(|| {
            AnalysisError::Data(format!(
                "no candidate k in {}..={} produced a valid clustering",
                self.params.k_min, self.params.k_max
            ))
        })?;

        let chosen_k = scores[best].k;
        let fitted = evaluations
            .swap_remove(best)
            .1
            .ok_or_else(|| AnalysisError::Data(format!("missing fit for k={chosen_k}")))?;

        info!(
            chosen_k,
            metric = self.params.metric.as_str(),
            score = ?scores[best].score,
            "selected cluster count"
        );

        Ok((
            KSelection {
                chosen_k,
                metric: self.params.metric.as_str().to_string(),
                candidates: scores,
            },
            fitted,
        ))
    }

    fn evaluate(&self, matrix: &FeatureMatrix, k: usize) -> Evaluation {
        let outcome = fit(matrix, k, self.params, candidate_seed(self.params.seed, k)).and_then(|f| {
            let score = metrics::score(self.params.metric, matrix, &f.labels, k)?;
            if !score.is_finite() {
                return Err(AnalysisError::Data(format!("non-finite score {score}")));
            }
            Ok((score, f))
        });

        match outcome {
            Ok((score, f)) => (
                CandidateScore {
                    k,
                    score: Some(score),
                    error: None,
                },
                Some(f),
            ),
            Err(e) => {
                warn!(k, error = %e, "candidate cluster count failed");
                (
                    CandidateScore {
                        k,
                        score: None,
                        error: Some(e.to_string()),
                    },
                    None,
                )
            }
        }
    }
}

/// Index of the best-scoring candidate; ties keep the earlier (smaller) k
pub(crate) fn select_best(scores: &[CandidateScore]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, candidate) in scores.iter().enumerate() {
        if let Some(score) = candidate.score {
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((i, score)),
            }
        }
    }
    best.map(|(i, _)| i)
}

impl Clusterer for KSearch<'_> {
    fn name(&self) -> &'static str {
        "kmeans++ auto"
    }

    fn label(&self, matrix: &FeatureMatrix) -> Result<ClusterAssignment> {
        let (selection, fitted) = self.run(matrix)?;
        let mut assignment = fitted.into_assignment(self.name());
        assignment.selection = Some(selection);
        Ok(assignment)
    }
}
