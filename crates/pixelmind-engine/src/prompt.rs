//! Prompt enrichment: wraps an instruction in fixed phrases that bias the
//! generation toward keeping the source photo realistic.
//!
//! Not idempotent. Enriching an already enriched prompt doubles the phrases,
//! so the orchestrator applies it exactly once per job.

pub const ENRICHMENT_PREFIX: &str =
    "High quality photo, preserve original composition and lighting, subtle enhancement, ";
pub const ENRICHMENT_SUFFIX: &str =
    ", keep original colors and style, minimal changes, realistic, photorealistic";

pub fn enrich_prompt(text: &str) -> String {
    format!("{ENRICHMENT_PREFIX}{text}{ENRICHMENT_SUFFIX}")
}
