//! Rubric prompts sent to the providers.

use crate::domain::AnalysisType;

const SHORT_FORM_CONTRACT: &str = r#"Respond with ONLY a JSON object, no prose and no markdown, of this exact shape:
{
  "score": <number between 60 and 140>,
  "characteristics": [<short strings>],
  "analysis": "<one or two paragraphs>",
  "strengths": [<short strings>],
  "tendencies": [<short strings>]
}"#;

const INTELLIGENCE_RUBRIC: &str = "You are a cognitive profiler. Estimate the intelligence displayed by the author of the text: how much inferential work each sentence does, how precisely distinctions are drawn, and whether claims are earned rather than asserted. Judge the thinking, not the prose polish.";

const ORIGINALITY_RUBRIC: &str = "You are a cognitive profiler. Estimate how original the author's thinking is: whether the text generates new framings, takes intellectual risks and resists stock conclusions, or instead rearranges familiar material.";

const COGNITIVE_RUBRIC: &str = "You are a cognitive profiler. Characterize the author's cognitive style: how they handle friction between ideas, ambiguity, and the pressure to resolve an argument cleanly.";

/// Long-form rubric. The section headings are what `ReportParser` keys on.
pub const COMPREHENSIVE_REPORT_PROMPT: &str = r#"You are a cognitive profiler. Write a profile of the author of the text in exactly ten numbered sections, in this order, each starting on its own line:
1. Intelligence:
2. Abstract Thinking:
3. Originality:
4. Reasoning Style:
5. Ambiguity Handling:
6. Metacognition:
7. Thinking Type:
8. Cognitive Complexity:
9. Thinking Quality:
10. Archetype:
Write a short paragraph under each heading. Do not add any other sections."#;

/// The full system prompt for a short-form analysis.
pub fn analysis_prompt(analysis_type: AnalysisType) -> String {
    let rubric = match analysis_type {
        AnalysisType::Intelligence => INTELLIGENCE_RUBRIC,
        AnalysisType::Originality => ORIGINALITY_RUBRIC,
        AnalysisType::Cognitive | AnalysisType::Comprehensive => COGNITIVE_RUBRIC,
    };
    format!("{}\n\n{}", rubric, SHORT_FORM_CONTRACT)
}
