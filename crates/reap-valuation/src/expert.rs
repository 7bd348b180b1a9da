//! Three fixed investor archetypes reading the same valuation, area and subsidy figures.
//!
//! Offers, ROI and recommendations are computed here and never depend on the narrator;
//! only the prose (summary, strengths, concerns) may be replaced by a generated version.

use std::sync::Arc;

use reap_adapters::{FmrBasis, FmrQuote};
use reap_core::{AreaRating, Archetype, ExpertOpinion, Grade, Recommendation};
use serde_json::json;
use tracing::{debug, warn};

use crate::narrative::{Narrative, NarrativePrompt, Narrator, TemplateNarrator};

const AGGRESSIVE_RATIO: f64 = 0.70;
const AGGRESSIVE_RATIO_UNDERPRICED: f64 = 0.72;
/// Comparables this far above asking mark the subject as underpriced.
const UNDERPRICED_MARGIN: f64 = 1.10;
/// Share of gross rent left after vacancy, repairs, taxes and management.
const NET_RENT_SHARE: f64 = 0.60;

#[derive(Debug, Clone)]
pub struct ExpertInputs {
    pub subject_label: String,
    pub subject_price: f64,
    pub comparable_avg_price: f64,
    pub comparable_avg_rent: f64,
    pub area: AreaRating,
    pub fmr: FmrQuote,
}

/// Deterministic half of an opinion.
#[derive(Debug, Clone, PartialEq)]
struct Figures {
    archetype: Archetype,
    offer_ratio: f64,
    offer: f64,
    roi: f64,
    recommendation: Recommendation,
    exit_strategy: &'static str,
}

pub struct ExpertSynthesizer {
    narrator: Arc<dyn Narrator>,
}

impl Default for ExpertSynthesizer {
    fn default() -> Self {
        Self::new(Arc::new(TemplateNarrator))
    }
}

impl ExpertSynthesizer {
    pub fn new(narrator: Arc<dyn Narrator>) -> Self {
        Self { narrator }
    }

    /// Always one opinion per archetype, in [`Archetype::ALL`] order.
    pub async fn synthesize(&self, inputs: &ExpertInputs) -> [ExpertOpinion; 3] {
        let figures = Archetype::ALL.map(|archetype| figures_for(archetype, inputs));
        let prompts = figures.clone().map(|f| prompt_for(&f, inputs));

        let [aggressive, conservative, subsidized] = &prompts;
        let narratives = tokio::join!(
            self.narrate(aggressive),
            self.narrate(conservative),
            self.narrate(subsidized)
        );
        let [f_aggressive, f_conservative, f_subsidized] = figures;
        [
            opinion(f_aggressive, narratives.0),
            opinion(f_conservative, narratives.1),
            opinion(f_subsidized, narratives.2),
        ]
    }

    async fn narrate(&self, prompt: &NarrativePrompt) -> Narrative {
        match self.narrator.narrate(prompt).await {
            Ok(narrative) => narrative,
            Err(err) => {
                warn!(archetype = prompt.archetype.as_str(), error = %err, "narrative failed; using template text");
                prompt.draft.clone()
            }
        }
    }
}

fn opinion(f: Figures, narrative: Narrative) -> ExpertOpinion {
    ExpertOpinion {
        archetype: f.archetype,
        expert_name: expert_name(f.archetype).to_string(),
        recommended_offer: f.offer,
        offer_percent_of_asking: round1(f.offer_ratio * 100.0),
        exit_strategy: f.exit_strategy.to_string(),
        roi_estimate: f.roi,
        recommendation: f.recommendation,
        summary: narrative.summary,
        strengths: narrative.strengths,
        concerns: narrative.concerns,
        narrative_generated: narrative.generated,
    }
}

pub fn expert_name(archetype: Archetype) -> &'static str {
    match archetype {
        Archetype::Aggressive => "Aggressive Investor",
        Archetype::Conservative => "Conservative Investor",
        Archetype::SubsidizedHousing => "Section 8 Specialist",
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn percent_return(annual_gain: f64, basis: f64) -> f64 {
    if basis > 0.0 {
        round1(annual_gain / basis * 100.0)
    } else {
        0.0
    }
}

/// Maps an ROI onto the ladder `[strong buy, buy, hold, pass]`; anything lower is a strong avoid.
fn ladder(roi: f64, thresholds: [f64; 4]) -> Recommendation {
    let [strong_buy, buy, hold, pass] = thresholds;
    if roi >= strong_buy {
        Recommendation::StrongBuy
    } else if roi >= buy {
        Recommendation::Buy
    } else if roi >= hold {
        Recommendation::Hold
    } else if roi >= pass {
        Recommendation::Pass
    } else {
        Recommendation::StrongAvoid
    }
}

fn figures_for(archetype: Archetype, inputs: &ExpertInputs) -> Figures {
    let asking = inputs.subject_price.max(0.0);
    let grade = inputs.area.grade;

    let (offer_ratio, thresholds, exit_strategy) = match archetype {
        Archetype::Aggressive => {
            let ratio = if inputs.comparable_avg_price > asking * UNDERPRICED_MARGIN {
                AGGRESSIVE_RATIO_UNDERPRICED
            } else {
                AGGRESSIVE_RATIO
            };
            (ratio, [30.0, 15.0, 5.0, 0.0], "")
        }
        Archetype::Conservative => {
            let ratio = match grade {
                Grade::A | Grade::B => 0.90,
                Grade::C => 0.88,
                Grade::D | Grade::F => 0.85,
            };
            (ratio, [10.0, 8.0, 6.0, 4.0], "Long-term buy and hold")
        }
        Archetype::SubsidizedHousing => {
            let ratio = if grade.is_poor() { 0.84 } else { 0.85 };
            (ratio, [12.0, 9.0, 7.0, 5.0], "Long-term hold with guaranteed housing-assistance payments")
        }
    };

    let offer = (asking * offer_ratio).round();
    let roi = match archetype {
        Archetype::Aggressive => percent_return(inputs.comparable_avg_price - offer, offer),
        Archetype::Conservative => percent_return(inputs.comparable_avg_rent * 12.0 * NET_RENT_SHARE, offer),
        // Gross subsidy income against the asking price.
        Archetype::SubsidizedHousing => percent_return(inputs.fmr.monthly_rent * 12.0, asking),
    };

    let exit_strategy = match archetype {
        Archetype::Aggressive if roi >= thresholds[0] => "Fix and flip",
        Archetype::Aggressive => "BRRRR (buy, rehab, rent, refinance, repeat)",
        _ => exit_strategy,
    };

    let mut recommendation = ladder(roi, thresholds);
    if grade == Grade::F {
        recommendation = recommendation.downgrade();
    }

    Figures {
        archetype,
        offer_ratio,
        offer,
        roi,
        recommendation,
        exit_strategy,
    }
}

/// Whole dollars with thousands separators.
fn dollars(amount: f64) -> String {
    let whole = amount.round().abs() as u64;
    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if amount < 0.0 && whole > 0 {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}

fn basis_label(basis: FmrBasis) -> &'static str {
    match basis {
        FmrBasis::Live => "published HUD figure",
        FmrBasis::Regional => "regional HUD table",
        FmrBasis::Generic => "national generic table",
    }
}

fn draft_for(f: &Figures, inputs: &ExpertInputs) -> Narrative {
    let area = &inputs.area;
    let mut strengths = Vec::new();
    let mut concerns = Vec::new();

    let summary = match f.archetype {
        Archetype::Aggressive => {
            if inputs.comparable_avg_price > 0.0 {
                strengths.push(format!(
                    "Comparable sales average {}, leaving {} of spread over the offer",
                    dollars(inputs.comparable_avg_price),
                    dollars(inputs.comparable_avg_price - f.offer)
                ));
            }
            if inputs.comparable_avg_price > inputs.subject_price * UNDERPRICED_MARGIN {
                strengths.push("Asking price sits more than 10% below nearby comparables".to_string());
            }
            concerns.push("Deep discount offers are frequently rejected".to_string());
            if area.grade.is_poor() {
                concerns.push(format!("Area grade {} may slow resale", area.grade));
            }
            format!(
                "Offer {} ({:.0}% of asking) on {} and target a {:.1}% return through a {} exit.",
                dollars(f.offer),
                f.offer_ratio * 100.0,
                inputs.subject_label,
                f.roi,
                if f.exit_strategy == "Fix and flip" { "flip" } else { "BRRRR" }
            )
        }
        Archetype::Conservative => {
            if inputs.comparable_avg_rent > 0.0 {
                strengths.push(format!(
                    "Comparable rents near {}/month support steady cash flow",
                    dollars(inputs.comparable_avg_rent)
                ));
            }
            strengths.extend(area.positives.iter().cloned());
            concerns.extend(area.warnings.iter().cloned());
            if f.roi < 6.0 {
                concerns.push(format!("Net yield of {:.1}% is thin for a long hold", f.roi));
            }
            format!(
                "Offer {} ({:.0}% of asking) on {} for a long-term hold yielding about {:.1}% net in a grade {} area.",
                dollars(f.offer),
                f.offer_ratio * 100.0,
                inputs.subject_label,
                f.roi,
                area.grade
            )
        }
        Archetype::SubsidizedHousing => {
            strengths.push(format!(
                "Fair market rent of {}/month for {} bedrooms ({}) is paid largely by the housing authority",
                dollars(inputs.fmr.monthly_rent),
                inputs.fmr.bedrooms,
                basis_label(inputs.fmr.basis)
            ));
            strengths.push(format!(
                "Annual subsidy income of {} against the asking price",
                dollars(inputs.fmr.monthly_rent * 12.0)
            ));
            if inputs.fmr.basis != FmrBasis::Live {
                concerns.push("Fair market rent comes from a fallback table; confirm with the local housing authority".to_string());
            }
            concerns.push("Units must pass housing-quality inspection before payments start".to_string());
            if area.grade.is_poor() {
                concerns.push(format!("Area grade {} can make tenant retention harder", area.grade));
            }
            format!(
                "Offer {} ({:.0}% of asking) on {} and lease to voucher holders at {}/month for a {:.1}% gross return.",
                dollars(f.offer),
                f.offer_ratio * 100.0,
                inputs.subject_label,
                dollars(inputs.fmr.monthly_rent),
                f.roi
            )
        }
    };

    Narrative {
        summary,
        strengths,
        concerns,
        generated: false,
    }
}

fn prompt_for(f: &Figures, inputs: &ExpertInputs) -> NarrativePrompt {
    let draft = draft_for(f, inputs);
    debug!(archetype = f.archetype.as_str(), offer = f.offer, roi = f.roi, "expert figures computed");
    NarrativePrompt {
        archetype: f.archetype,
        expert_name: expert_name(f.archetype).to_string(),
        facts: json!({
            "property": inputs.subject_label,
            "askingPrice": inputs.subject_price,
            "comparableAveragePrice": inputs.comparable_avg_price,
            "comparableAverageRent": inputs.comparable_avg_rent,
            "areaGrade": inputs.area.grade,
            "areaScore": inputs.area.score,
            "fairMarketRent": inputs.fmr.monthly_rent,
            "recommendedOffer": f.offer,
            "offerPercentOfAsking": round1(f.offer_ratio * 100.0),
            "roiEstimate": f.roi,
            "recommendation": f.recommendation,
            "exitStrategy": f.exit_strategy,
        }),
        draft,
    }
}
