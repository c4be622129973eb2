//! Deterministic keyword scorer used when a provider call cannot be used.
//!
//! It counts marker phrases in six weighted categories and derives the score and
//! the characteristic, strength and tendency lists from those counts plus a few
//! surface features of the text. Same input, same output.

use std::sync::OnceLock;

use regex::Regex;

use crate::accounting::count_words;
use crate::domain::{CognitiveAnalysis, ReportSections};

const BASE_SCORE: f64 = 100.0;
const MIN_SCORE: f64 = 60.0;
const MAX_SCORE: f64 = 140.0;

/// Weight per hit is capped at this many hits per category.
const MAX_COUNTED_HITS: usize = 5;

struct Category {
    weight: f64,
    markers: &'static [&'static str],
}

const FRICTION: Category = Category {
    weight: 3.0,
    markers: &[
        "however", "but", "although", "yet", "tension", "contradiction", "paradox", "conflict",
        "nevertheless", "on the other hand",
    ],
};

const RISK_TAKING: Category = Category {
    weight: 4.0,
    markers: &[
        "i suspect", "i bet", "i wager", "i might be wrong", "speculate", "gamble", "dare",
        "my guess", "provocatively",
    ],
};

const GENERATIVE_PRESSURE: Category = Category {
    weight: 3.0,
    markers: &[
        "what if", "imagine", "suppose", "propose", "hypothesis", "alternative", "invent",
        "reframe", "new way",
    ],
};

const ARGUMENTATIVE_HEAT: Category = Category {
    weight: 2.0,
    markers: &[
        "wrong", "must", "refuse", "absurd", "nonsense", "insist", "reject", "fallacy", "mistaken",
    ],
};

const ACADEMIC_THEATER: Category = Category {
    weight: -3.0,
    markers: &[
        "paradigm", "discourse", "framework", "interrogate", "problematize", "hegemonic",
        "epistemic", "praxis", "liminal", "nexus",
    ],
};

const CLEAN_RESOLUTION: Category = Category {
    weight: -2.0,
    markers: &[
        "in conclusion", "to summarize", "in summary", "all in all", "ultimately", "clearly",
        "obviously", "it is evident",
    ],
};

/// Marker regex per category, in the order of `CategoryHits` fields.
fn category_patterns() -> &'static [(f64, Regex); 6] {
    static PATTERNS: OnceLock<[(f64, Regex); 6]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |category: &Category| {
            let alternation = category
                .markers
                .iter()
                .map(|m| regex::escape(m))
                .collect::<Vec<_>>()
                .join("|");
            let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))
                .expect("marker pattern is valid");
            (category.weight, pattern)
        };
        [
            compile(&FRICTION),
            compile(&RISK_TAKING),
            compile(&GENERATIVE_PRESSURE),
            compile(&ARGUMENTATIVE_HEAT),
            compile(&ACADEMIC_THEATER),
            compile(&CLEAN_RESOLUTION),
        ]
    })
}

fn causal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(?:because|therefore|thus|hence|since|consequently)\b")
            .expect("causal pattern is valid")
    })
}

/// Marker counts for one text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryHits {
    pub friction: usize,
    pub risk_taking: usize,
    pub generative_pressure: usize,
    pub argumentative_heat: usize,
    pub academic_theater: usize,
    pub clean_resolution: usize,
}

impl CategoryHits {
    pub fn count(text: &str) -> Self {
        let [f, r, g, a, t, c] = category_patterns();
        let hits = |(_, pattern): &(f64, Regex)| pattern.find_iter(text).count();
        Self {
            friction: hits(f),
            risk_taking: hits(r),
            generative_pressure: hits(g),
            argumentative_heat: hits(a),
            academic_theater: hits(t),
            clean_resolution: hits(c),
        }
    }

    fn as_array(&self) -> [usize; 6] {
        [
            self.friction,
            self.risk_taking,
            self.generative_pressure,
            self.argumentative_heat,
            self.academic_theater,
            self.clean_resolution,
        ]
    }

    /// `BASE_SCORE + Σ weight · min(hits, MAX_COUNTED_HITS)`, clamped and rounded.
    pub fn score(&self) -> f64 {
        let raw = category_patterns()
            .iter()
            .zip(self.as_array())
            .fold(BASE_SCORE, |acc, ((weight, _), hits)| {
                acc + weight * hits.min(MAX_COUNTED_HITS) as f64
            });
        raw.clamp(MIN_SCORE, MAX_SCORE).round()
    }
}

fn average_sentence_words(text: &str) -> f64 {
    let sentences = text
        .split(|c: char| c == '.' || c == '?' || c == '!')
        .filter(|s| !s.trim().is_empty())
        .count();
    if sentences == 0 {
        return 0.0;
    }
    count_words(text) as f64 / sentences as f64
}

/// Local, explainable stand-in for a provider's short-form analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, text: &str) -> CognitiveAnalysis {
        let hits = CategoryHits::count(text);
        let words = count_words(text);
        let asks_questions = text.contains('?');
        let causal = causal_pattern().is_match(text);

        let mut characteristics = Vec::new();
        if asks_questions {
            characteristics.push("Inquisitive: poses questions rather than only asserting".to_string());
        }
        if hits.friction > 0 {
            characteristics.push("Engages with tension and counterpoints".to_string());
        }
        if hits.generative_pressure > 0 {
            characteristics.push("Generates hypotheses and alternatives".to_string());
        }
        if hits.academic_theater > hits.friction + hits.generative_pressure {
            characteristics.push("Leans on academic vocabulary".to_string());
        }
        if words > 300 {
            characteristics.push("Sustains an argument over length".to_string());
        } else if words < 50 {
            characteristics.push("Compressed, brief expression".to_string());
        }
        if characteristics.is_empty() {
            characteristics.push("Straightforward, declarative expression".to_string());
        }

        let mut strengths = Vec::new();
        if hits.risk_taking > 0 {
            strengths.push("Willing to commit to uncertain claims".to_string());
        }
        if causal {
            strengths.push("Makes causal links explicit".to_string());
        }
        if hits.friction > 0 {
            strengths.push("Holds competing ideas in view".to_string());
        }
        if average_sentence_words(text) > 20.0 {
            strengths.push("Builds complex, multi-clause sentences".to_string());
        }
        if strengths.is_empty() {
            strengths.push("Communicates a central point clearly".to_string());
        }

        let mut tendencies = Vec::new();
        if hits.clean_resolution > 0 {
            tendencies.push("Ties ideas off with tidy conclusions".to_string());
        }
        if hits.argumentative_heat > 0 {
            tendencies.push("Argues with conviction".to_string());
        }
        if hits.academic_theater > 0 {
            tendencies.push("Reaches for theoretical framing".to_string());
        }
        if !asks_questions {
            tendencies.push("Prefers assertion over inquiry".to_string());
        }
        if tendencies.is_empty() {
            tendencies.push("Develops ideas in a linear sequence".to_string());
        }

        let score = hits.score();
        let analysis = format!(
            "Heuristic assessment of {} words, generated locally because the language model response was unavailable. \
             Markers found: {} friction, {} risk-taking, {} generative, {} argumentative, {} academic-theater, {} clean-resolution. \
             Estimated score: {}.",
            words,
            hits.friction,
            hits.risk_taking,
            hits.generative_pressure,
            hits.argumentative_heat,
            hits.academic_theater,
            hits.clean_resolution,
            score
        );

        CognitiveAnalysis {
            score,
            characteristics,
            analysis,
            strengths,
            tendencies,
        }
    }

    /// A report with the heuristic summary in the fields it can speak to and the
    /// seeded defaults everywhere else.
    pub fn report(&self, text: &str) -> ReportSections {
        let analysis = self.score(text);
        let hits = CategoryHits::count(text);
        let archetype = if hits.generative_pressure + hits.risk_taking > hits.clean_resolution + hits.academic_theater {
            "The Explorer: follows ideas past the point of comfort."
        } else if hits.friction + hits.argumentative_heat > 0 {
            "The Debater: sharpens ideas against opposition."
        } else {
            "The Synthesizer: arranges ideas into orderly conclusions."
        };

        ReportSections {
            intelligence: format!("Heuristic score {} (local estimate). {}", analysis.score, analysis.analysis),
            originality: analysis.characteristics.join("; "),
            reasoning_style: analysis.strengths.join("; "),
            thinking_quality: analysis.tendencies.join("; "),
            archetype: archetype.to_string(),
            ..ReportSections::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_markers_on_word_boundaries() {
        let hits = CategoryHits::count("But the butter was, however, a paradox.");
        assert_eq!(hits.friction, 3);
        assert_eq!(hits.risk_taking, 0);
    }

    #[test]
    fn neutral_text_scores_the_base() {
        assert_eq!(CategoryHits::count("The cat sat on the mat.").score(), BASE_SCORE);
    }

    #[test]
    fn negative_markers_lower_the_score() {
        let hits = CategoryHits::count("In conclusion, the paradigm of discourse is clearly a framework.");
        assert!(hits.score() < BASE_SCORE);
    }

    #[test]
    fn score_is_clamped() {
        let hot = "what if I suspect imagine however but yet suppose I bet dare ".repeat(50);
        let score = CategoryHits::count(&hot).score();
        assert!(score <= MAX_SCORE);
        let theater = "paradigm discourse framework clearly obviously in summary epistemic praxis ".repeat(50);
        assert!(CategoryHits::count(&theater).score() >= MIN_SCORE);
    }

    #[test]
    fn scoring_is_deterministic() {
        let text = "What if the theory is wrong? I suspect it is, because the data conflict.";
        let scorer = HeuristicScorer::new();
        assert_eq!(scorer.score(text), scorer.score(text));
    }

    #[test]
    fn lists_are_never_empty() {
        let analysis = HeuristicScorer::new().score("");
        assert!(!analysis.characteristics.is_empty());
        assert!(!analysis.strengths.is_empty());
        assert!(!analysis.tendencies.is_empty());
    }

    #[test]
    fn predicates_drive_the_lists() {
        let analysis = HeuristicScorer::new()
            .score("What if we are wrong? I suspect so, because the evidence is thin. However, we must try.");
        assert!(analysis.characteristics.iter().any(|c| c.starts_with("Inquisitive")));
        assert!(analysis.strengths.iter().any(|s| s == "Makes causal links explicit"));
        assert!(analysis.tendencies.iter().any(|t| t == "Argues with conviction"));
        assert!(!analysis.tendencies.iter().any(|t| t == "Prefers assertion over inquiry"));
    }

    #[test]
    fn report_fills_every_field() {
        let report = HeuristicScorer::new().report("Imagine a new way to read. I suspect it works.");
        assert!(report.intelligence.starts_with("Heuristic score"));
        assert!(report.archetype.starts_with("The Explorer"));
        assert_eq!(report.metacognition, ReportSections::default().metacognition);
    }
}
