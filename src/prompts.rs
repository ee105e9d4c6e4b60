//! Prompts for the analysis steps and for vision OCR.
//!
//! Every prompt lives here so the wording can change without touching the
//! orchestrator, and so tests can inspect prompts without a live model.
//! The per-step templates are plugged into [`crate::pipeline::steps`].

/// Shared preamble sent before every step's own instructions.
pub const ANALYST_PREAMBLE: &str = r#"You are a meticulous legal analyst reading a court judgment.
You receive numbered excerpts of the judgment. Each excerpt header has the form
[chunk <id> | page <P> | paragraph <Q>].

Rules:
- Use only what the excerpts and the prior analysis context say. Never invent facts, dates, names or citations.
- Every item you extract must carry an "anchor" object {"page": P, "paragraph": Q}
  pointing at the excerpt it came from.
- Reuse entities already established in the prior analysis context instead of re-deriving them.
- Respond with one JSON object and nothing else."#;

/// Header line that names the step. Parsed back by the offline generator.
pub const STEP_HEADER_PREFIX: &str = "ANALYSIS STEP:";

/// Heading that opens the excerpt block of the user message.
pub const EXCERPTS_HEADING: &str = "JUDGMENT EXCERPTS:";

/// Heading that opens the prior-steps JSON context of the user message.
pub const CONTEXT_HEADING: &str = "PRIOR ANALYSIS CONTEXT:";

pub const METADATA_INSTRUCTIONS: &str = r#"Extract the judgment's metadata.
Return {"case_name": string, "court": string, "date": string|null, "judges": [string],
"parties": {"appellants": [string], "respondents": [string]}, "citation": string|null, "anchor": {...}}."#;

pub const FACTS_INSTRUCTIONS: &str = r#"Extract the material facts of the case in the order the judgment states them.
Return {"facts": [{"statement": string, "anchor": {...}}]}."#;

pub const TIMELINE_INSTRUCTIONS: &str = r#"Build a chronological timeline of dated events mentioned in the judgment.
Return {"events": [{"date": string, "event": string, "anchor": {...}}]} sorted by date."#;

pub const ISSUES_INSTRUCTIONS: &str = r#"Identify the legal issues (questions of law or fact) the court had to decide.
Return {"issues": [{"question": string, "anchor": {...}}]}."#;

pub const ARGUMENTS_INSTRUCTIONS: &str = r#"Summarise the arguments advanced by each side, linked to the issues above where possible.
Return {"arguments": [{"party": string, "argument": string, "issue": string|null, "anchor": {...}}]}."#;

pub const RATIO_INSTRUCTIONS: &str = r#"Extract the ratio decidendi: the binding legal principles necessary for the decision.
Return {"ratio_decidendi": [{"principle": string, "issue": string|null, "anchor": {...}}]}."#;

pub const OBITER_INSTRUCTIONS: &str = r#"Extract obiter dicta: observations not necessary for the decision.
Return {"obiter_dicta": [{"observation": string, "anchor": {...}}]}."#;

pub const STATUTES_INSTRUCTIONS: &str = r#"List the statutory provisions the court relied on or interpreted.
Return {"statutes": [{"provision": string, "act": string|null, "anchor": {...}}]}."#;

pub const PRECEDENTS_INSTRUCTIONS: &str = r#"List the precedents cited and how the court treated each (followed, distinguished, overruled, referred).
Return {"precedents": [{"case": string, "treatment": string, "anchor": {...}}]}."#;

pub const SUMMARY_INSTRUCTIONS: &str = r#"Write a concise summary of the judgment built from the prior analysis context.
Return {"summary": string, "outcome": string|null, "key_holdings": [{"holding": string, "anchor": {...}}]}."#;

/// Appended to the system message when strict JSON output is requested.
pub const JSON_ONLY_DIRECTIVE: &str =
    "Output ONLY a single valid JSON object. Do NOT wrap it in ```json fences. Do NOT add commentary.";

/// System prompt for vision OCR of a rasterised judgment page.
pub const OCR_SYSTEM_PROMPT: &str = r#"You are an OCR engine. Transcribe ALL text on this scanned court judgment page exactly as printed.

Rules:
- Preserve reading order and paragraph breaks (blank line between paragraphs).
- Keep paragraph numbering such as "12.", "(a)", "(iv)" at the start of its line.
- Do not correct spelling, summarise, translate, or add commentary.
- Omit running headers, footers and page numbers.
- Output plain text only, no Markdown."#;

/// The first line of every step's system message.
pub fn step_header(step_name: &str) -> String {
    format!("{STEP_HEADER_PREFIX} {step_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_templates_ask_for_anchors() {
        for template in [
            FACTS_INSTRUCTIONS,
            TIMELINE_INSTRUCTIONS,
            ISSUES_INSTRUCTIONS,
            ARGUMENTS_INSTRUCTIONS,
            RATIO_INSTRUCTIONS,
            OBITER_INSTRUCTIONS,
            STATUTES_INSTRUCTIONS,
            PRECEDENTS_INSTRUCTIONS,
            SUMMARY_INSTRUCTIONS,
        ] {
            assert!(template.contains("\"anchor\""), "{template}");
        }
    }

    #[test]
    fn step_header_format() {
        assert_eq!(step_header("ratio"), "ANALYSIS STEP: ratio");
    }
}
