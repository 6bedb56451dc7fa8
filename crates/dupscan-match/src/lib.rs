//! Pairwise similarity scoring and owner-scoped duplicate scanning.

use std::collections::BTreeSet;

use dupscan_core::{
    ComponentScore, DuplicateMatch, PropertyRecord, ScoreComponent, SimilarityBreakdown,
};

pub const CRATE_NAME: &str = "dupscan-match";

/// Weights, activation thresholds, tolerances, and match gates.
///
/// A sub-score participates in the weighted total (and the component count)
/// only when it is strictly above its activation threshold. A pair is a
/// candidate match only when at least `min_active_components` sub-scores
/// activate and the weighted total reaches `match_threshold` - a double gate
/// against false positives from a single strong signal.
#[derive(Debug, Clone, Copy)]
pub struct ScoringConfig {
    pub address_weight: f64,
    pub specs_weight: f64,
    pub title_weight: f64,
    pub description_weight: f64,
    pub address_activation: f64,
    pub specs_activation: f64,
    pub title_activation: f64,
    pub description_activation: f64,
    pub square_meters_tolerance: f64,
    pub rent_tolerance: f64,
    pub min_active_components: usize,
    pub match_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            address_weight: 0.40,
            specs_weight: 0.35,
            title_weight: 0.15,
            description_weight: 0.10,
            address_activation: 70.0,
            specs_activation: 60.0,
            title_activation: 40.0,
            description_activation: 30.0,
            square_meters_tolerance: 0.05,
            rent_tolerance: 0.10,
            min_active_components: 2,
            match_threshold: 85.0,
        }
    }
}

/// Running earned/possible point tally for one sub-score.
///
/// Criteria where a value is absent on both sides are skipped entirely, so
/// the sub-score is normalized against whichever branches were reachable for
/// the pair.
#[derive(Debug, Default, Clone, Copy)]
struct PointTally {
    earned: f64,
    possible: f64,
}

impl PointTally {
    fn credit(&mut self, points: f64, hit: bool) {
        self.possible += points;
        if hit {
            self.earned += points;
        }
    }

    fn normalized(&self) -> Option<f64> {
        if self.possible > 0.0 {
            Some(self.earned / self.possible * 100.0)
        } else {
            None
        }
    }
}

#[derive(Default)]
pub struct SimilarityScorer {
    config: ScoringConfig,
}

impl SimilarityScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score one unordered property pair.
    ///
    /// `total` is the plain weighted sum over the activated components; it is
    /// not renormalized when components are absent or below threshold.
    pub fn score(&self, a: &PropertyRecord, b: &PropertyRecord) -> SimilarityBreakdown {
        let mut components = Vec::new();
        let mut reasons = Vec::new();
        let mut total = 0.0;

        let candidates = [
            (
                ScoreComponent::Address,
                self.config.address_weight,
                self.config.address_activation,
                self.address_score(a, b),
            ),
            (
                ScoreComponent::Specs,
                self.config.specs_weight,
                self.config.specs_activation,
                self.specs_score(a, b),
            ),
            (
                ScoreComponent::Title,
                self.config.title_weight,
                self.config.title_activation,
                self.title_score(a, b),
            ),
            (
                ScoreComponent::Description,
                self.config.description_weight,
                self.config.description_activation,
                self.description_score(a, b),
            ),
        ];

        for (component, weight, activation, scored) in candidates {
            if let Some((score, mut component_reasons)) = scored {
                if score > activation {
                    total += score * weight;
                    components.push(ComponentScore { component, score });
                    reasons.append(&mut component_reasons);
                }
            }
        }

        SimilarityBreakdown {
            total,
            components,
            reasons,
        }
    }

    /// Apply both match gates to a breakdown produced by [`score`].
    ///
    /// [`score`]: SimilarityScorer::score
    pub fn is_match(&self, breakdown: &SimilarityBreakdown) -> bool {
        breakdown.components.len() >= self.config.min_active_components
            && breakdown.total >= self.config.match_threshold
    }

    fn address_score(&self, a: &PropertyRecord, b: &PropertyRecord) -> Option<(f64, Vec<String>)> {
        let mut tally = PointTally::default();
        let mut reasons = Vec::new();

        if let Some(hit) = compare_fields(&a.street_name, &b.street_name) {
            tally.credit(40.0, hit);
            if hit {
                reasons.push("street name matches".to_string());
            }
        }
        // Bonus branch: only widens the scale when both sides carry a number.
        if let Some(hit) = compare_optional_fields(&a.street_number, &b.street_number) {
            tally.credit(20.0, hit);
            if hit {
                reasons.push("street number matches".to_string());
            }
        }
        if let Some(hit) = compare_fields(&a.city, &b.city) {
            tally.credit(20.0, hit);
            if hit {
                reasons.push("city matches".to_string());
            }
        }
        if let Some(hit) = compare_fields(&a.zip_code, &b.zip_code) {
            tally.credit(20.0, hit);
            if hit {
                reasons.push("zip code matches".to_string());
            }
        }
        if let Some(hit) = compare_optional_fields(&a.region, &b.region) {
            tally.credit(10.0, hit);
            if hit {
                reasons.push("region matches".to_string());
            }
        }
        if let Some(hit) = compare_optional_fields(&a.country, &b.country) {
            tally.credit(10.0, hit);
            if hit {
                reasons.push("country matches".to_string());
            }
        }

        tally.normalized().map(|score| (score, reasons))
    }

    fn specs_score(&self, a: &PropertyRecord, b: &PropertyRecord) -> Option<(f64, Vec<String>)> {
        let mut tally = PointTally::default();
        let mut reasons = Vec::new();

        tally.credit(25.0, a.bedrooms == b.bedrooms);
        if a.bedrooms == b.bedrooms {
            reasons.push(format!("same bedroom count ({})", a.bedrooms));
        }
        tally.credit(15.0, a.bathrooms == b.bathrooms);
        if a.bathrooms == b.bathrooms {
            reasons.push(format!("same bathroom count ({})", a.bathrooms));
        }
        if let (Some(x), Some(y)) = (a.square_meters, b.square_meters) {
            let hit = within_relative_tolerance(x, y, self.config.square_meters_tolerance);
            tally.credit(30.0, hit);
            if hit {
                reasons.push("living area within 5%".to_string());
            }
        }
        if let (Some(x), Some(y)) = (a.monthly_rent, b.monthly_rent) {
            let hit = within_relative_tolerance(x, y, self.config.rent_tolerance);
            tally.credit(30.0, hit);
            if hit {
                reasons.push("monthly rent within 10%".to_string());
            }
        }

        tally.normalized().map(|score| (score, reasons))
    }

    fn title_score(&self, a: &PropertyRecord, b: &PropertyRecord) -> Option<(f64, Vec<String>)> {
        jaccard_similarity(&a.title, &b.title).map(|ratio| {
            let score = ratio * 100.0;
            (score, vec![format!("titles share {:.0}% of their words", score)])
        })
    }

    fn description_score(
        &self,
        a: &PropertyRecord,
        b: &PropertyRecord,
    ) -> Option<(f64, Vec<String>)> {
        jaccard_similarity(&a.description, &b.description).map(|ratio| {
            let score = ratio * 100.0;
            (
                score,
                vec![format!("descriptions share {:.0}% of their words", score)],
            )
        })
    }
}

/// O(n²) pairwise scan over one owner's portfolio.
///
/// Input is never mutated; results are sorted by confidence descending with
/// an id tie-break so an unchanged portfolio always scans to structurally
/// identical matches. Tenant isolation is the data-access layer's job - the
/// slice passed here is already one owner's property set.
pub fn scan_properties(
    scorer: &SimilarityScorer,
    properties: &[PropertyRecord],
) -> Vec<DuplicateMatch> {
    let mut matches = Vec::new();

    for i in 0..properties.len() {
        for j in (i + 1)..properties.len() {
            let breakdown = scorer.score(&properties[i], &properties[j]);
            if scorer.is_match(&breakdown) {
                matches.push(DuplicateMatch {
                    property_id_a: properties[i].id,
                    property_id_b: properties[j].id,
                    confidence: breakdown.total,
                    reasons: breakdown.reasons,
                });
            }
        }
    }

    matches.sort_by(|x, y| {
        y.confidence
            .total_cmp(&x.confidence)
            .then_with(|| x.property_id_a.cmp(&y.property_id_a))
            .then_with(|| x.property_id_b.cmp(&y.property_id_b))
    });
    matches
}

/// Case-folded, punctuation-stripped, whitespace-split token set.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Token-overlap ratio in 0-1, or `None` when either side has no tokens.
pub fn jaccard_similarity(a: &str, b: &str) -> Option<f64> {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return None;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    Some(intersection as f64 / union as f64)
}

fn within_relative_tolerance(x: f64, y: f64, tolerance: f64) -> bool {
    let scale = x.abs().max(y.abs());
    if scale == 0.0 {
        return true;
    }
    (x - y).abs() <= scale * tolerance
}

fn normalize_field(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Exact case-insensitive comparison; `None` when the field is blank on
/// either side, so absent data neither earns nor burns points and two blank
/// fields never count as a match.
fn compare_fields(a: &str, b: &str) -> Option<bool> {
    let a = normalize_field(a);
    let b = normalize_field(b);
    if a.is_empty() || b.is_empty() {
        return None;
    }
    Some(a == b)
}

fn compare_optional_fields(a: &Option<String>, b: &Option<String>) -> Option<bool> {
    compare_fields(a.as_deref().unwrap_or(""), b.as_deref().unwrap_or(""))
}
